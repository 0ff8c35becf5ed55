//! Shared test utilities for exam simulation tests.
//!
//! - `ScriptedAdapter`: in-memory `ProtocolAdapter` with a per-client script
//! - `Recorder`: everything the adapters saw, timestamped on the tokio clock
//! - `mock_server`: minimal Socket.IO server on a local TCP port

#![allow(dead_code)] // Utilities may not all be used in every test file

pub mod mock_server;

use async_trait::async_trait;
use exam_sim::signaling::protocol::{CodeUpdate, LoginError, ProjectLoaded, ServerEvent, StudentJoin};
use exam_sim::signaling::{
    AdapterError, AdapterResult, ClientEvent, EventKind, Handler, HandlerRegistry, InboundEvent,
    ProtocolAdapter,
};
use exam_sim::SimulationConfig;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// How the fake server treats one client
#[derive(Debug, Clone)]
pub struct Script {
    pub fail_connect: bool,
    pub panic_on_connect: bool,
    /// Session id sent back on `student-join`; `None` never acknowledges
    pub session_id: Option<String>,
    /// Event name carrying the session id, e.g. `session-restored`
    pub ack_event: &'static str,
    /// Delay between `student-join` and its acknowledgment
    pub ack_delay: Duration,
    /// Answer `student-join` with `login-error` instead
    pub reject_login: bool,
    /// Server drops the link after this many code updates
    pub drop_after_updates: Option<usize>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_connect: false,
            panic_on_connect: false,
            session_id: Some("5f2b8c1e-9d4a-4f7e-b3a6-2c8d1e0f9a7b".to_string()),
            ack_event: "session-created",
            ack_delay: Duration::ZERO,
            reject_login: false,
            drop_after_updates: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Sent {
    pub client: usize,
    pub at: Instant,
    pub event: ClientEvent,
}

#[derive(Default)]
pub struct Recorder {
    sent: Mutex<Vec<Sent>>,
    connects: Mutex<Vec<(usize, Instant)>>,
    disconnect_events: AtomicUsize,
    active: AtomicUsize,
    peak_active: AtomicUsize,
}

impl Recorder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn sent_by(&self, client: usize) -> Vec<Sent> {
        self.sent().into_iter().filter(|s| s.client == client).collect()
    }

    pub fn joins(&self) -> Vec<(usize, StudentJoin)> {
        self.sent()
            .into_iter()
            .filter_map(|s| match s.event {
                ClientEvent::StudentJoin(join) => Some((s.client, join)),
                _ => None,
            })
            .collect()
    }

    pub fn code_updates(&self, client: usize) -> Vec<(Instant, CodeUpdate)> {
        self.sent_by(client)
            .into_iter()
            .filter_map(|s| match s.event {
                ClientEvent::CodeUpdate(update) => Some((s.at, update)),
                _ => None,
            })
            .collect()
    }

    /// Connection attempts in call order
    pub fn connects(&self) -> Vec<(usize, Instant)> {
        self.connects.lock().unwrap().clone()
    }

    pub fn disconnect_events(&self) -> usize {
        self.disconnect_events.load(Ordering::SeqCst)
    }

    pub fn peak_active(&self) -> usize {
        self.peak_active.load(Ordering::SeqCst)
    }

    fn link_up(&self) {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_active.fetch_max(now, Ordering::SeqCst);
    }

    fn link_down(&self) {
        self.active.fetch_sub(1, Ordering::SeqCst);
        self.disconnect_events.fetch_add(1, Ordering::SeqCst);
    }
}

pub struct ScriptedAdapter {
    id: usize,
    script: Script,
    recorder: Arc<Recorder>,
    handlers: HandlerRegistry,
    connected: Arc<AtomicBool>,
    updates: AtomicUsize,
    closed: bool,
}

impl ScriptedAdapter {
    pub fn new(id: usize, script: Script, recorder: Arc<Recorder>) -> Self {
        Self {
            id,
            script,
            recorder,
            handlers: HandlerRegistry::new(),
            connected: Arc::new(AtomicBool::new(false)),
            updates: AtomicUsize::new(0),
            closed: false,
        }
    }

    fn acknowledge_join(&self) {
        let replies = if self.script.reject_login {
            vec![InboundEvent::LoginError(LoginError {
                message: "Student not found in class list".to_string(),
                kind: Some("not-found".to_string()),
            })]
        } else if let Some(session_id) = self.script.session_id.clone() {
            let ack = json!({ "sessionId": session_id, "timeLeft": 5_400_000, "lastCode": "" });
            let session = ServerEvent::from_event(self.script.ack_event, ack)
                .unwrap()
                .unwrap_or_else(|| panic!("'{}' is not a session event", self.script.ack_event));
            let files: HashMap<_, _> = [("main.js".to_string(), json!({ "content": "" }))].into();
            vec![
                InboundEvent::from(session),
                InboundEvent::ProjectLoaded(ProjectLoaded { files }),
            ]
        } else {
            return;
        };

        if self.script.ack_delay.is_zero() {
            for reply in replies {
                self.handlers.dispatch(reply);
            }
            return;
        }

        let handlers = self.handlers.clone();
        let connected = self.connected.clone();
        let delay = self.script.ack_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if connected.load(Ordering::SeqCst) {
                for reply in replies {
                    handlers.dispatch(reply);
                }
            }
        });
    }

    fn server_drop(&self) {
        if self.connected.swap(false, Ordering::SeqCst) {
            self.recorder.link_down();
            self.handlers.dispatch(InboundEvent::Disconnect {
                reason: "transport close".to_string(),
            });
        }
    }
}

#[async_trait]
impl ProtocolAdapter for ScriptedAdapter {
    async fn connect(&mut self, _endpoint: &str) -> AdapterResult<()> {
        self.recorder
            .connects
            .lock()
            .unwrap()
            .push((self.id, Instant::now()));

        if self.script.panic_on_connect {
            panic!("scripted adapter {} blew up", self.id);
        }
        if self.closed || self.script.fail_connect {
            return Err(AdapterError::ConnectionFailed("connection refused".to_string()));
        }

        self.connected.store(true, Ordering::SeqCst);
        self.recorder.link_up();
        self.handlers.dispatch(InboundEvent::Connect);
        Ok(())
    }

    fn emit(&self, event: ClientEvent) -> AdapterResult<()> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(AdapterError::NotConnected);
        }
        self.recorder.sent.lock().unwrap().push(Sent {
            client: self.id,
            at: Instant::now(),
            event: event.clone(),
        });

        match event {
            ClientEvent::StudentJoin(_) => self.acknowledge_join(),
            ClientEvent::CodeUpdate(_) => {
                let count = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
                if self.script.drop_after_updates == Some(count) {
                    self.server_drop();
                }
            }
        }
        Ok(())
    }

    fn on(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.register(kind, handler);
    }

    async fn disconnect(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if self.connected.swap(false, Ordering::SeqCst) {
            self.recorder.link_down();
            self.handlers.dispatch(InboundEvent::Disconnect {
                reason: "io client disconnect".to_string(),
            });
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

/// Default timings with a fixed seed and `clients` students
pub fn config(clients: usize) -> SimulationConfig {
    SimulationConfig {
        client_count: clients,
        seed: Some(7),
        ..Default::default()
    }
}

/// Short timings for runs against a real socket
pub fn fast_config(server_address: String, clients: usize) -> SimulationConfig {
    SimulationConfig {
        server_address,
        client_count: clients,
        stagger_interval_ms: 20,
        connect_timeout_ms: 2000,
        handshake_settle_ms: 20,
        join_wait_ms: 100,
        keystroke_min_ms: 1,
        keystroke_max_ms: 2,
        idle_ms: 20,
        lifecycle_timeout_ms: 10_000,
        seed: Some(11),
        ..Default::default()
    }
}
