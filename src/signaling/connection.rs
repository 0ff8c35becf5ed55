#![forbid(unsafe_code)]

// Socket.IO client connection over the Engine.IO websocket transport

use super::protocol::{ClientEvent, EnginePacket, EventKind, Handshake, InboundEvent, ServerEvent, SocketPacket};
use super::types::{AdapterError, AdapterResult};
use super::{Handler, HandlerRegistry, ProtocolAdapter};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, warn};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Bounded outbound queue per client.
/// A typing client produces ~10 frames/s, so a full queue means the socket is stuck.
const CHANNEL_CAPACITY: usize = 256;

/// How long `disconnect` waits for queued frames and the close frame to flush.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(1);

const DEFAULT_ENGINE_PATH: &str = "/socket.io/";

/// Connection flags shared with the receive task
#[derive(Default)]
struct LinkState {
    connected: AtomicBool,
    disconnect_signalled: AtomicBool,
}

impl LinkState {
    /// Marks the link down and dispatches `disconnect` at most once.
    fn close(&self, handlers: &HandlerRegistry, reason: &str) {
        self.connected.store(false, Ordering::SeqCst);
        if !self.disconnect_signalled.swap(true, Ordering::SeqCst) {
            handlers.dispatch(InboundEvent::Disconnect {
                reason: reason.to_string(),
            });
        }
    }
}

/// WebSocket-backed protocol adapter speaking Socket.IO v5 / Engine.IO v4
pub struct SocketIoAdapter {
    label: String,
    connect_timeout: Duration,
    handlers: HandlerRegistry,
    link: Arc<LinkState>,
    outbound: Option<mpsc::Sender<String>>,
    send_task: Option<JoinHandle<()>>,
    recv_task: Option<JoinHandle<()>>,
    used: bool,
}

impl SocketIoAdapter {
    /// `label` prefixes this adapter's log lines.
    pub fn new(label: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            label: label.into(),
            connect_timeout,
            handlers: HandlerRegistry::new(),
            link: Arc::new(LinkState::default()),
            outbound: None,
            send_task: None,
            recv_task: None,
            used: false,
        }
    }
}

#[async_trait]
impl ProtocolAdapter for SocketIoAdapter {
    async fn connect(&mut self, endpoint: &str) -> AdapterResult<()> {
        if self.used {
            return Err(AdapterError::Protocol(
                "adapter cannot be reconnected".to_string(),
            ));
        }
        self.used = true;

        let url = websocket_url(endpoint)?;
        debug!("{}: Connecting to {}", self.label, url);

        let connect_timeout = self.connect_timeout;
        let (ws_stream, handshake) =
            tokio::time::timeout(connect_timeout, open_session(url.as_str()))
                .await
                .map_err(|_| AdapterError::HandshakeTimeout(connect_timeout))??;

        debug!(
            "{}: Engine.IO session {} (ping interval {}ms, timeout {}ms)",
            self.label, handshake.sid, handshake.ping_interval, handshake.ping_timeout
        );

        let (ws_sender, ws_receiver) = ws_stream.split();
        let (tx, rx) = mpsc::channel::<String>(CHANNEL_CAPACITY);

        self.send_task = Some(tokio::spawn(send_loop(ws_sender, rx, self.label.clone())));
        self.outbound = Some(tx.clone());

        // `connect` must be dispatched before the reader can observe a close
        self.link.connected.store(true, Ordering::SeqCst);
        self.handlers.dispatch(InboundEvent::Connect);

        self.recv_task = Some(tokio::spawn(receive_loop(
            ws_receiver,
            tx,
            self.handlers.clone(),
            self.link.clone(),
            handshake.heartbeat_deadline(),
            self.label.clone(),
        )));
        Ok(())
    }

    fn emit(&self, event: ClientEvent) -> AdapterResult<()> {
        let tx = self.outbound.as_ref().ok_or(AdapterError::NotConnected)?;
        if !self.link.connected.load(Ordering::SeqCst) {
            return Err(AdapterError::NotConnected);
        }
        let frame = event.to_packet()?.encode();
        tx.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => AdapterError::QueueFull,
            TrySendError::Closed(_) => AdapterError::NotConnected,
        })
    }

    fn on(&mut self, kind: EventKind, handler: Handler) {
        self.handlers.register(kind, handler);
    }

    async fn disconnect(&mut self) {
        // Never connected, or already closed
        let Some(tx) = self.outbound.take() else {
            self.used = true;
            return;
        };

        if self.link.connected.load(Ordering::SeqCst) {
            let _ = tx.try_send(EnginePacket::Message(SocketPacket::Disconnect).encode());
        }
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        // Dropping the last sender lets the send task flush and close the socket
        drop(tx);
        if let Some(task) = self.send_task.take() {
            if tokio::time::timeout(FLUSH_TIMEOUT, task).await.is_err() {
                warn!("{}: Socket did not close within {:?}", self.label, FLUSH_TIMEOUT);
            }
        }

        self.link.close(&self.handlers, "io client disconnect");
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::SeqCst)
    }
}

impl Drop for SocketIoAdapter {
    fn drop(&mut self) {
        if let Some(task) = self.recv_task.take() {
            task.abort();
        }
        if let Some(task) = self.send_task.take() {
            task.abort();
        }
    }
}

/// Rewrites a server address into the Engine.IO websocket endpoint.
///
/// `http://host:8080` becomes `ws://host:8080/socket.io/?EIO=4&transport=websocket`.
/// A path other than `/` is used as the Engine.IO path.
pub fn websocket_url(endpoint: &str) -> AdapterResult<Url> {
    let mut url = Url::parse(endpoint)
        .map_err(|e| AdapterError::InvalidEndpoint(format!("{endpoint}: {e}")))?;

    let scheme = match url.scheme() {
        "http" | "ws" => "ws",
        "https" | "wss" => "wss",
        other => {
            return Err(AdapterError::InvalidEndpoint(format!(
                "{endpoint}: unsupported scheme '{other}'"
            )))
        }
    };
    url.set_scheme(scheme)
        .map_err(|_| AdapterError::InvalidEndpoint(format!("{endpoint}: cannot use {scheme}")))?;

    if url.path().is_empty() || url.path() == "/" {
        url.set_path(DEFAULT_ENGINE_PATH);
    }
    url.query_pairs_mut()
        .append_pair("EIO", "4")
        .append_pair("transport", "websocket");
    Ok(url)
}

/// WebSocket connect, Engine.IO OPEN, then Socket.IO CONNECT to the main namespace.
async fn open_session(url: &str) -> AdapterResult<(WsStream, Handshake)> {
    let (mut ws_stream, _) = connect_async(url)
        .await
        .map_err(|e| AdapterError::ConnectionFailed(e.to_string()))?;

    let handshake = loop {
        match next_packet(&mut ws_stream).await? {
            EnginePacket::Open(handshake) => break handshake,
            EnginePacket::Noop => continue,
            other => {
                return Err(AdapterError::Protocol(format!(
                    "expected open packet, got {other:?}"
                )))
            }
        }
    };

    let connect = EnginePacket::Message(SocketPacket::Connect(None)).encode();
    ws_stream.send(Message::Text(connect.into())).await?;

    loop {
        match next_packet(&mut ws_stream).await? {
            EnginePacket::Message(SocketPacket::Connect(_)) => break,
            EnginePacket::Message(SocketPacket::ConnectError(payload)) => {
                let reason = payload
                    .get("message")
                    .and_then(|m| m.as_str())
                    .map(str::to_string)
                    .unwrap_or_else(|| payload.to_string());
                return Err(AdapterError::HandshakeRejected(reason));
            }
            EnginePacket::Ping => {
                ws_stream
                    .send(Message::Text(EnginePacket::Pong.encode().into()))
                    .await?;
            }
            EnginePacket::Close => {
                return Err(AdapterError::ConnectionFailed(
                    "server closed the session during handshake".to_string(),
                ))
            }
            _ => {}
        }
    }

    Ok((ws_stream, handshake))
}

async fn next_packet(ws_stream: &mut WsStream) -> AdapterResult<EnginePacket> {
    loop {
        match ws_stream.next().await {
            Some(Ok(Message::Text(text))) => return EnginePacket::decode(text.as_str()),
            Some(Ok(Message::Close(_))) | None => {
                return Err(AdapterError::ConnectionFailed(
                    "connection closed during handshake".to_string(),
                ))
            }
            Some(Ok(_)) => continue,
            Some(Err(e)) => return Err(e.into()),
        }
    }
}

async fn send_loop(
    mut ws_sender: SplitSink<WsStream, Message>,
    mut rx: mpsc::Receiver<String>,
    label: String,
) {
    while let Some(frame) = rx.recv().await {
        if let Err(e) = ws_sender.send(Message::Text(frame.into())).await {
            debug!("{}: Send failed: {}", label, e);
            break;
        }
    }
    let _ = ws_sender.close().await;
    debug!("{}: Send task finished", label);
}

async fn receive_loop(
    mut ws_receiver: SplitStream<WsStream>,
    outbound: mpsc::Sender<String>,
    handlers: HandlerRegistry,
    link: Arc<LinkState>,
    heartbeat_deadline: Duration,
    label: String,
) {
    let reason = loop {
        // Server pings every pingInterval; silence past the deadline means it is gone
        let msg = match tokio::time::timeout(heartbeat_deadline, ws_receiver.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!("{}: WebSocket error: {}", label, e);
                break "transport error";
            }
            Ok(None) => break "transport close",
            Err(_) => {
                warn!("{}: No heartbeat within {:?}", label, heartbeat_deadline);
                break "ping timeout";
            }
        };

        match msg {
            Message::Text(text) => match EnginePacket::decode(text.as_str()) {
                Ok(EnginePacket::Ping) => {
                    let _ = outbound.try_send(EnginePacket::Pong.encode());
                }
                Ok(EnginePacket::Close) => break "transport close",
                Ok(EnginePacket::Message(SocketPacket::Disconnect)) => break "io server disconnect",
                Ok(EnginePacket::Message(SocketPacket::Event { name, data })) => {
                    match ServerEvent::from_event(&name, data) {
                        Ok(Some(event)) => handlers.dispatch(event.into()),
                        Ok(None) => debug!("{}: Ignoring event '{}'", label, name),
                        Err(e) => warn!("{}: Malformed '{}' payload: {}", label, name, e),
                    }
                }
                Ok(other) => debug!("{}: Ignoring packet {:?}", label, other),
                Err(e) => warn!("{}: Undecodable frame: {}", label, e),
            },
            Message::Close(_) => break "transport close",
            _ => {}
        }
    };

    link.close(&handlers, reason);
}
