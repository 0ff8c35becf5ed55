#![forbid(unsafe_code)]

// One simulated student: connect -> join -> type -> idle -> disconnect

use crate::catalog::{self, Identity};
use crate::config::SimulationConfig;
use crate::signaling::protocol::{CodeUpdate, StudentJoin};
use crate::signaling::{AdapterError, AdapterResult, ClientEvent, EventKind, InboundEvent, ProtocolAdapter};
use rand::rngs::StdRng;
use rand::Rng;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, error, info, warn};

/// Every suspension a virtual client makes
#[derive(Debug, Clone, PartialEq)]
pub struct ClientTimings {
    /// Pause after the transport handshake before joining
    pub handshake_settle: Duration,
    /// Pause after `student-join` for the session acknowledgment
    pub join_wait: Duration,
    pub keystroke_min: Duration,
    pub keystroke_max: Duration,
    /// Hold after the last keystroke before disconnecting
    pub idle: Duration,
    /// Upper bound on connect..idle; disconnect always runs afterwards
    pub lifecycle_timeout: Duration,
}

impl ClientTimings {
    pub fn from_config(config: &SimulationConfig) -> Self {
        Self {
            handshake_settle: Duration::from_millis(config.handshake_settle_ms),
            join_wait: Duration::from_millis(config.join_wait_ms),
            keystroke_min: Duration::from_millis(config.keystroke_min_ms),
            keystroke_max: Duration::from_millis(config.keystroke_max_ms),
            idle: Duration::from_millis(config.idle_ms),
            lifecycle_timeout: config.lifecycle_timeout(),
        }
    }
}

impl Default for ClientTimings {
    fn default() -> Self {
        Self::from_config(&SimulationConfig::default())
    }
}

/// Lifecycle phase. `Closed` is the final disconnected state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientPhase {
    Disconnected,
    Connected,
    Joined,
    Typing,
    Idle,
    Closed,
}

/// Terminal state of one lifecycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStatus {
    Completed,
    ConnectFailed(String),
    TimedOut,
    /// The lifecycle task itself died
    Panicked(String),
}

#[derive(Debug, Clone)]
pub struct ClientOutcome {
    pub id: usize,
    pub identity: Identity,
    pub status: ClientStatus,
    /// When the orchestrator launched this lifecycle
    pub started_at: Instant,
    /// Every phase entered, starting with `Disconnected` and ending with `Closed`
    pub phases: Vec<ClientPhase>,
    pub session_id: Option<String>,
    /// File count from the last `project-loaded`, if one arrived
    pub project_files: Option<usize>,
    pub updates_sent: usize,
}

/// Values deposited by adapter handlers; read by the state machine
#[derive(Default)]
struct SharedState {
    connected: AtomicBool,
    session_id: Mutex<Option<String>>,
    project_files: Mutex<Option<usize>>,
}

impl SharedState {
    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

pub fn client_label(id: usize) -> String {
    format!("student-{id}")
}

/// Successive prefixes of `text`, one per character, ending with `text` itself
pub fn prefixes(text: &str) -> impl Iterator<Item = &str> {
    text.char_indices()
        .map(move |(idx, ch)| &text[..idx + ch.len_utf8()])
}

pub struct VirtualClient<A> {
    id: usize,
    label: String,
    identity: Identity,
    endpoint: String,
    timings: ClientTimings,
    adapter: A,
    rng: StdRng,
    state: Arc<SharedState>,
    phases: Vec<ClientPhase>,
    updates_sent: usize,
}

impl<A: ProtocolAdapter> VirtualClient<A> {
    pub fn new(
        id: usize,
        identity: Identity,
        endpoint: impl Into<String>,
        timings: ClientTimings,
        adapter: A,
        rng: StdRng,
    ) -> Self {
        Self {
            id,
            label: client_label(id),
            identity,
            endpoint: endpoint.into(),
            timings,
            adapter,
            rng,
            state: Arc::new(SharedState::default()),
            phases: vec![ClientPhase::Disconnected],
            updates_sent: 0,
        }
    }

    /// Runs the whole lifecycle. Never fails: the outcome records how it ended.
    ///
    /// `started_at` is the launch instant, taken by the caller before the
    /// lifecycle is spawned.
    pub async fn run(mut self, started_at: Instant) -> ClientOutcome {
        info!(
            "{}: Starting virtual student {} ({})",
            self.label, self.identity.name, self.identity.class
        );
        self.register_handlers();

        let lifecycle_timeout = self.timings.lifecycle_timeout;
        let status = match tokio::time::timeout(lifecycle_timeout, self.drive()).await {
            Ok(status) => status,
            Err(_) => {
                warn!(
                    "{}: Lifecycle exceeded {:?}, closing",
                    self.label, lifecycle_timeout
                );
                ClientStatus::TimedOut
            }
        };

        self.close().await;

        ClientOutcome {
            id: self.id,
            session_id: self.state.session_id(),
            project_files: *self
                .state
                .project_files
                .lock()
                .unwrap_or_else(|e| e.into_inner()),
            identity: self.identity,
            status,
            started_at,
            phases: self.phases,
            updates_sent: self.updates_sent,
        }
    }

    async fn drive(&mut self) -> ClientStatus {
        if let Err(e) = self.connect().await {
            return ClientStatus::ConnectFailed(e.to_string());
        }
        self.join().await;
        self.type_snippet().await;
        self.idle().await;
        ClientStatus::Completed
    }

    fn register_handlers(&mut self) {
        let label = self.label.clone();
        let name = self.identity.name.clone();

        let state = self.state.clone();
        let (l, n) = (label.clone(), name.clone());
        self.adapter.on(EventKind::Connect, Arc::new(move |_: InboundEvent| {
            state.connected.store(true, Ordering::SeqCst);
            info!("{}: [{}] Connected to server", l, n);
        }));

        let state = self.state.clone();
        let (l, n) = (label.clone(), name.clone());
        self.adapter.on(EventKind::Disconnect, Arc::new(move |event: InboundEvent| {
            state.connected.store(false, Ordering::SeqCst);
            if let InboundEvent::Disconnect { reason } = event {
                info!("{}: [{}] Disconnected from server ({})", l, n, reason);
            }
        }));

        let state = self.state.clone();
        let (l, n) = (label.clone(), name.clone());
        self.adapter.on(EventKind::SessionCreated, Arc::new(move |event: InboundEvent| {
            let InboundEvent::SessionCreated(created) = event else {
                return;
            };
            if created.session_id.is_empty() {
                return;
            }
            let short: String = created.session_id.chars().take(8).collect();
            info!("{}: [{}] Session created: {}...", l, n, short);
            *state.session_id.lock().unwrap_or_else(|e| e.into_inner()) = Some(created.session_id);
        }));

        let state = self.state.clone();
        let (l, n) = (label.clone(), name.clone());
        self.adapter.on(EventKind::ProjectLoaded, Arc::new(move |event: InboundEvent| {
            if let InboundEvent::ProjectLoaded(loaded) = event {
                let count = loaded.file_count();
                info!("{}: [{}] Project loaded with {} files", l, n, count);
                *state.project_files.lock().unwrap_or_else(|e| e.into_inner()) = Some(count);
            }
        }));

        self.adapter.on(EventKind::LoginError, Arc::new(move |event: InboundEvent| {
            if let InboundEvent::LoginError(login) = event {
                warn!("{}: [{}] Login error: {}", label, name, login.message);
            }
        }));
    }

    async fn connect(&mut self) -> AdapterResult<()> {
        if let Err(e) = self.adapter.connect(&self.endpoint).await {
            error!(
                "{}: [{}] Connection failed: {}",
                self.label, self.identity.name, e
            );
            return Err(e);
        }
        sleep(self.timings.handshake_settle).await;
        self.transition(ClientPhase::Connected);
        Ok(())
    }

    async fn join(&mut self) {
        if !self.state.connected.load(Ordering::SeqCst) {
            warn!("{}: Not connected, skipping join", self.label);
            return;
        }

        let join = ClientEvent::StudentJoin(StudentJoin {
            student_name: self.identity.name.clone(),
            student_class: self.identity.class.clone(),
            exam_code: String::new(),
        });
        if let Err(e) = self.adapter.emit(join) {
            warn!("{}: Failed to send student-join: {}", self.label, e);
            return;
        }

        // Time-boxed: a late session-created is still picked up by typing
        sleep(self.timings.join_wait).await;
        self.transition(ClientPhase::Joined);
    }

    async fn type_snippet(&mut self) {
        let Some(session_id) = self.state.session_id() else {
            info!("{}: [{}] No session, skipping typing", self.label, self.identity.name);
            return;
        };

        let snippet = catalog::random_snippet(&mut self.rng);
        let filename = catalog::random_filename(&mut self.rng);
        self.transition(ClientPhase::Typing);
        info!(
            "{}: [{}] Starting to type {} chars in {}",
            self.label,
            self.identity.name,
            snippet.chars().count(),
            filename
        );

        for (i, prefix) in prefixes(snippet).enumerate() {
            if i > 0 {
                let delay = self.keystroke_delay();
                sleep(delay).await;
            }
            let update = ClientEvent::CodeUpdate(CodeUpdate {
                session_id: session_id.clone(),
                filename: filename.to_string(),
                code: prefix.to_string(),
            });
            match self.adapter.emit(update) {
                Ok(()) => self.updates_sent += 1,
                Err(AdapterError::NotConnected) => {
                    warn!(
                        "{}: Connection lost after {} updates, stopping typing",
                        self.label, self.updates_sent
                    );
                    return;
                }
                Err(e) => debug!("{}: Dropped code-update: {}", self.label, e),
            }
        }

        info!(
            "{}: [{}] Finished typing {} characters in {}",
            self.label,
            self.identity.name,
            snippet.chars().count(),
            filename
        );
    }

    async fn idle(&mut self) {
        self.transition(ClientPhase::Idle);
        sleep(self.timings.idle).await;
    }

    async fn close(&mut self) {
        self.adapter.disconnect().await;
        self.transition(ClientPhase::Closed);
    }

    fn keystroke_delay(&mut self) -> Duration {
        self.rng
            .gen_range(self.timings.keystroke_min..=self.timings.keystroke_max)
    }

    fn transition(&mut self, next: ClientPhase) {
        if let Some(current) = self.phases.last() {
            debug!("{}: {:?} -> {:?}", self.label, current, next);
        }
        self.phases.push(next);
    }
}
