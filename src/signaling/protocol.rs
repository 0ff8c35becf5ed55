#![forbid(unsafe_code)]

// Signaling protocol - Exam server events and the Engine.IO/Socket.IO framing
// they travel in over the WebSocket transport.

use super::types::{AdapterError, AdapterResult};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::time::Duration;

/// Client-to-Server events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Ask the server to open an exam session for a student
    StudentJoin(StudentJoin),
    /// Full current content of one file (not a diff)
    CodeUpdate(CodeUpdate),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentJoin {
    pub student_name: String,
    pub student_class: String,
    /// Empty lets the server pick the exam context
    #[serde(default)]
    pub exam_code: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CodeUpdate {
    pub session_id: String,
    pub filename: String,
    pub code: String,
}

/// Server-to-Client events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Join acknowledged, carries the session identifier. Returning
    /// students get `session-restored` with the same `sessionId`.
    #[serde(alias = "student-id-assigned", alias = "session-restored")]
    SessionCreated(SessionCreated),
    /// Project files for the session
    ProjectLoaded(ProjectLoaded),
    /// Join refused
    LoginError(LoginError),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionCreated {
    pub session_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProjectLoaded {
    #[serde(default)]
    pub files: HashMap<String, Value>,
}

impl ProjectLoaded {
    pub fn file_count(&self) -> usize {
        self.files.len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LoginError {
    #[serde(default)]
    pub message: String,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
}

impl ClientEvent {
    /// Wire event name
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::StudentJoin(_) => "student-join",
            ClientEvent::CodeUpdate(_) => "code-update",
        }
    }

    /// Frames the event as a Socket.IO EVENT packet
    pub fn to_packet(&self) -> AdapterResult<EnginePacket> {
        let data = match self {
            ClientEvent::StudentJoin(join) => serde_json::to_value(join)?,
            ClientEvent::CodeUpdate(update) => serde_json::to_value(update)?,
        };
        Ok(EnginePacket::Message(SocketPacket::Event {
            name: self.name().to_string(),
            data,
        }))
    }

    /// Rebuilds a client event from a decoded EVENT packet
    pub fn from_event(name: &str, data: Value) -> AdapterResult<Self> {
        Ok(serde_json::from_value(json!({ "event": name, "data": data }))?)
    }
}

impl ServerEvent {
    /// Decodes a server event. Returns `Ok(None)` for event names this
    /// client does not listen to.
    pub fn from_event(name: &str, data: Value) -> AdapterResult<Option<Self>> {
        if EventKind::for_server_event(name).is_none() {
            return Ok(None);
        }
        let event = serde_json::from_value(json!({ "event": name, "data": data }))?;
        Ok(Some(event))
    }

    /// Wire event name, as the current server emits it
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::SessionCreated(_) => "session-created",
            ServerEvent::ProjectLoaded(_) => "project-loaded",
            ServerEvent::LoginError(_) => "login-error",
        }
    }

    pub fn to_packet(&self) -> AdapterResult<EnginePacket> {
        let data = match self {
            ServerEvent::SessionCreated(created) => serde_json::to_value(created)?,
            ServerEvent::ProjectLoaded(loaded) => serde_json::to_value(loaded)?,
            ServerEvent::LoginError(error) => serde_json::to_value(error)?,
        };
        Ok(EnginePacket::Message(SocketPacket::Event {
            name: self.name().to_string(),
            data,
        }))
    }
}

/// Names under which inbound handlers are registered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connect,
    Disconnect,
    SessionCreated,
    ProjectLoaded,
    LoginError,
}

impl EventKind {
    /// Maps a server-emitted event name; `connect`/`disconnect` are
    /// transport signals and never arrive as events.
    pub fn for_server_event(name: &str) -> Option<Self> {
        match name {
            "session-created" | "student-id-assigned" | "session-restored" => {
                Some(EventKind::SessionCreated)
            }
            "project-loaded" => Some(EventKind::ProjectLoaded),
            "login-error" => Some(EventKind::LoginError),
            _ => None,
        }
    }
}

/// Inbound event delivered to a registered handler
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Connect,
    Disconnect { reason: String },
    SessionCreated(SessionCreated),
    ProjectLoaded(ProjectLoaded),
    LoginError(LoginError),
}

impl InboundEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            InboundEvent::Connect => EventKind::Connect,
            InboundEvent::Disconnect { .. } => EventKind::Disconnect,
            InboundEvent::SessionCreated(_) => EventKind::SessionCreated,
            InboundEvent::ProjectLoaded(_) => EventKind::ProjectLoaded,
            InboundEvent::LoginError(_) => EventKind::LoginError,
        }
    }
}

impl From<ServerEvent> for InboundEvent {
    fn from(event: ServerEvent) -> Self {
        match event {
            ServerEvent::SessionCreated(created) => InboundEvent::SessionCreated(created),
            ServerEvent::ProjectLoaded(loaded) => InboundEvent::ProjectLoaded(loaded),
            ServerEvent::LoginError(error) => InboundEvent::LoginError(error),
        }
    }
}

/// Engine.IO OPEN payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    pub sid: String,
    #[serde(default)]
    pub upgrades: Vec<String>,
    pub ping_interval: u64,
    pub ping_timeout: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_payload: Option<u64>,
}

impl Handshake {
    /// Silence longer than this means the server is gone
    pub fn heartbeat_deadline(&self) -> Duration {
        Duration::from_millis(self.ping_interval + self.ping_timeout)
    }
}

/// Engine.IO v4 packet (one per WebSocket text frame)
#[derive(Debug, Clone, PartialEq)]
pub enum EnginePacket {
    Open(Handshake),
    Close,
    Ping,
    Pong,
    Message(SocketPacket),
    Upgrade,
    Noop,
}

/// Socket.IO v5 packet carried inside an Engine.IO MESSAGE
#[derive(Debug, Clone, PartialEq)]
pub enum SocketPacket {
    Connect(Option<Value>),
    Disconnect,
    Event { name: String, data: Value },
    Ack,
    ConnectError(Value),
    /// Binary packets are not used by the exam server
    Binary,
}

impl EnginePacket {
    pub fn encode(&self) -> String {
        match self {
            EnginePacket::Open(handshake) => {
                let mut payload = json!({
                    "sid": handshake.sid,
                    "upgrades": handshake.upgrades,
                    "pingInterval": handshake.ping_interval,
                    "pingTimeout": handshake.ping_timeout,
                });
                if let Some(max) = handshake.max_payload {
                    payload["maxPayload"] = json!(max);
                }
                format!("0{payload}")
            }
            EnginePacket::Close => "1".to_string(),
            EnginePacket::Ping => "2".to_string(),
            EnginePacket::Pong => "3".to_string(),
            EnginePacket::Message(packet) => format!("4{}", packet.encode()),
            EnginePacket::Upgrade => "5".to_string(),
            EnginePacket::Noop => "6".to_string(),
        }
    }

    pub fn decode(frame: &str) -> AdapterResult<Self> {
        let mut chars = frame.chars();
        let kind = chars
            .next()
            .ok_or_else(|| AdapterError::Protocol("empty frame".to_string()))?;
        let rest = chars.as_str();
        match kind {
            '0' => Ok(EnginePacket::Open(serde_json::from_str(rest)?)),
            '1' => Ok(EnginePacket::Close),
            '2' => Ok(EnginePacket::Ping),
            '3' => Ok(EnginePacket::Pong),
            '4' => Ok(EnginePacket::Message(SocketPacket::decode(rest)?)),
            '5' => Ok(EnginePacket::Upgrade),
            '6' => Ok(EnginePacket::Noop),
            other => Err(AdapterError::Protocol(format!(
                "unknown engine packet type '{other}'"
            ))),
        }
    }
}

impl SocketPacket {
    fn encode(&self) -> String {
        match self {
            SocketPacket::Connect(None) => "0".to_string(),
            SocketPacket::Connect(Some(payload)) => format!("0{payload}"),
            SocketPacket::Disconnect => "1".to_string(),
            SocketPacket::Event { name, data } => {
                let args = if data.is_null() {
                    json!([name])
                } else {
                    json!([name, data])
                };
                format!("2{args}")
            }
            SocketPacket::Ack => "3[]".to_string(),
            SocketPacket::ConnectError(payload) => format!("4{payload}"),
            SocketPacket::Binary => "5".to_string(),
        }
    }

    fn decode(body: &str) -> AdapterResult<Self> {
        let mut chars = body.chars();
        let kind = chars
            .next()
            .ok_or_else(|| AdapterError::Protocol("empty socket packet".to_string()))?;
        let payload = strip_ack_id(strip_namespace(chars.as_str()));

        match kind {
            '0' if payload.is_empty() => Ok(SocketPacket::Connect(None)),
            '0' => Ok(SocketPacket::Connect(Some(serde_json::from_str(payload)?))),
            '1' => Ok(SocketPacket::Disconnect),
            '2' => {
                let args: Vec<Value> = serde_json::from_str(payload)?;
                let mut args = args.into_iter();
                let name = match args.next() {
                    Some(Value::String(name)) => name,
                    _ => {
                        return Err(AdapterError::Protocol(
                            "event packet without a name".to_string(),
                        ))
                    }
                };
                Ok(SocketPacket::Event {
                    name,
                    data: args.next().unwrap_or(Value::Null),
                })
            }
            '3' => Ok(SocketPacket::Ack),
            '4' if payload.is_empty() => Ok(SocketPacket::ConnectError(Value::Null)),
            '4' => Ok(SocketPacket::ConnectError(serde_json::from_str(payload)?)),
            '5' | '6' => Ok(SocketPacket::Binary),
            other => Err(AdapterError::Protocol(format!(
                "unknown socket packet type '{other}'"
            ))),
        }
    }
}

// "/admin,..." -> "..."
fn strip_namespace(body: &str) -> &str {
    if body.starts_with('/') {
        match body.find(',') {
            Some(idx) => &body[idx + 1..],
            None => "",
        }
    } else {
        body
    }
}

fn strip_ack_id(body: &str) -> &str {
    body.trim_start_matches(|c: char| c.is_ascii_digit())
}
