//! Minimal Socket.IO v5 server for adapter and end-to-end tests.
//!
//! Speaks just enough Engine.IO v4 over a raw websocket to drive one
//! student through join and typing. Frames go through the crate's own
//! packet codec.

use exam_sim::signaling::protocol::{
    CodeUpdate, EnginePacket, Handshake, ProjectLoaded, ServerEvent, SessionCreated, SocketPacket,
    StudentJoin,
};
use exam_sim::signaling::ClientEvent;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};

type ServerSink = SplitSink<WebSocketStream<TcpStream>, Message>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Behavior {
    /// Full handshake, acknowledges joins, records updates
    Accept,
    /// Answers the namespace connect with `44`
    RejectConnect,
    /// Sends `41` right after acknowledging the join
    DisconnectAfterJoin,
    /// Flushes the `40` ack and a `41` together
    AckThenDisconnect,
    /// 50ms ping interval and timeout, then no pings at all
    GoSilentAfterConnect,
    /// Sends Engine.IO close `1` after the connect ack
    EngineClose,
    /// Sends a websocket close frame after the connect ack
    CloseFrame,
    /// Upgrades the websocket and then says nothing
    Silent,
}

#[derive(Default)]
pub struct ServerState {
    pub paths: Mutex<Vec<String>>,
    pub joins: Mutex<Vec<StudentJoin>>,
    pub updates: Mutex<Vec<CodeUpdate>>,
    pub sessions: Mutex<Vec<String>>,
    pub pongs: AtomicUsize,
    pub client_disconnects: AtomicUsize,
    pub closed_connections: AtomicUsize,
}

pub struct MockServer {
    pub url: String,
    pub state: Arc<ServerState>,
    accept_task: JoinHandle<()>,
}

impl MockServer {
    pub async fn start(behavior: Behavior) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(ServerState::default());

        let shared = state.clone();
        let accept_task = tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(serve(stream, shared.clone(), behavior));
            }
        });

        Self {
            url: format!("http://{addr}"),
            state,
            accept_task,
        }
    }

    pub fn joins(&self) -> Vec<StudentJoin> {
        self.state.joins.lock().unwrap().clone()
    }

    pub fn updates(&self) -> Vec<CodeUpdate> {
        self.state.updates.lock().unwrap().clone()
    }

    pub fn sessions(&self) -> Vec<String> {
        self.state.sessions.lock().unwrap().clone()
    }

    pub fn paths(&self) -> Vec<String> {
        self.state.paths.lock().unwrap().clone()
    }

    /// Polls until every accepted connection has closed, or two seconds pass
    pub async fn wait_for_closed(&self, connections: usize) -> bool {
        wait_until(|| self.state.closed_connections.load(Ordering::SeqCst) >= connections).await
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.accept_task.abort();
    }
}

pub async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while tokio::time::Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

fn frame(packet: EnginePacket) -> Message {
    Message::Text(packet.encode().into())
}

fn event_frame(event: ServerEvent) -> Message {
    frame(event.to_packet().unwrap())
}

fn connect_ack() -> Message {
    let sid = uuid::Uuid::new_v4().to_string();
    frame(EnginePacket::Message(SocketPacket::Connect(Some(json!({ "sid": sid })))))
}

async fn serve(stream: TcpStream, state: Arc<ServerState>, behavior: Behavior) {
    let paths = state.clone();
    let callback = move |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        paths.paths.lock().unwrap().push(req.uri().to_string());
        Ok(resp)
    };
    let Ok(ws) = accept_hdr_async(stream, callback).await else {
        return;
    };
    let (mut tx, mut rx) = ws.split();

    if behavior == Behavior::Silent {
        while let Some(Ok(_)) = rx.next().await {}
        state.closed_connections.fetch_add(1, Ordering::SeqCst);
        return;
    }

    let (ping_interval, ping_timeout) = match behavior {
        Behavior::GoSilentAfterConnect => (50, 50),
        _ => (25000, 20000),
    };
    let open = EnginePacket::Open(Handshake {
        sid: uuid::Uuid::new_v4().to_string(),
        upgrades: Vec::new(),
        ping_interval,
        ping_timeout,
        max_payload: Some(1_000_000),
    });
    if tx.send(frame(open)).await.is_err() {
        return;
    }

    while let Some(Ok(msg)) = rx.next().await {
        let text = match msg {
            Message::Text(text) => text,
            Message::Close(_) => break,
            _ => continue,
        };

        match EnginePacket::decode(text.as_str()) {
            Ok(EnginePacket::Message(SocketPacket::Connect(_))) => {
                if on_connect(&mut tx, behavior).await.is_err() {
                    break;
                }
            }
            Ok(EnginePacket::Pong) => {
                state.pongs.fetch_add(1, Ordering::SeqCst);
            }
            Ok(EnginePacket::Message(SocketPacket::Disconnect)) => {
                state.client_disconnects.fetch_add(1, Ordering::SeqCst);
                break;
            }
            Ok(EnginePacket::Message(SocketPacket::Event { name, data })) => {
                match ClientEvent::from_event(&name, data) {
                    Ok(ClientEvent::StudentJoin(join)) => {
                        if on_join(&mut tx, &state, join, behavior).await.is_err() {
                            break;
                        }
                    }
                    Ok(ClientEvent::CodeUpdate(update)) => {
                        state.updates.lock().unwrap().push(update);
                    }
                    Err(_) => {}
                }
            }
            _ => {}
        }
    }

    state.closed_connections.fetch_add(1, Ordering::SeqCst);
}

async fn on_connect(
    tx: &mut ServerSink,
    behavior: Behavior,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    match behavior {
        Behavior::RejectConnect => {
            let error = SocketPacket::ConnectError(json!({ "message": "Not authorized" }));
            tx.send(frame(EnginePacket::Message(error))).await?;
            tx.close().await
        }
        Behavior::AckThenDisconnect => {
            tx.feed(connect_ack()).await?;
            tx.feed(frame(EnginePacket::Message(SocketPacket::Disconnect)))
                .await?;
            tx.flush().await
        }
        Behavior::GoSilentAfterConnect => tx.send(connect_ack()).await,
        Behavior::EngineClose => {
            tx.send(connect_ack()).await?;
            tx.send(frame(EnginePacket::Close)).await
        }
        Behavior::CloseFrame => {
            tx.send(connect_ack()).await?;
            tx.close().await
        }
        _ => {
            tx.send(connect_ack()).await?;
            tx.send(frame(EnginePacket::Ping)).await
        }
    }
}

async fn on_join(
    tx: &mut ServerSink,
    state: &ServerState,
    join: StudentJoin,
    behavior: Behavior,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let session_id = uuid::Uuid::new_v4().to_string();
    state.joins.lock().unwrap().push(join);
    state.sessions.lock().unwrap().push(session_id.clone());

    let files: HashMap<_, _> = [
        ("main.js".to_string(), json!({ "content": "" })),
        ("package.json".to_string(), json!({ "content": "{}" })),
    ]
    .into();
    tx.send(event_frame(ServerEvent::SessionCreated(SessionCreated { session_id })))
        .await?;
    tx.send(event_frame(ServerEvent::ProjectLoaded(ProjectLoaded { files })))
        .await?;

    if behavior == Behavior::DisconnectAfterJoin {
        tx.send(frame(EnginePacket::Message(SocketPacket::Disconnect)))
            .await?;
        return tx.close().await;
    }
    Ok(())
}
