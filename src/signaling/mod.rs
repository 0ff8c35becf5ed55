#![forbid(unsafe_code)]

// Signaling module - the client side of the exam server's event channel

pub mod connection;
pub mod protocol;
pub mod types;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Arc, RwLock as StdRwLock};

pub use connection::SocketIoAdapter;
pub use protocol::{ClientEvent, EventKind, InboundEvent};
pub use types::{AdapterError, AdapterResult};

/// Callback invoked for one inbound event kind
pub type Handler = Arc<dyn Fn(InboundEvent) + Send + Sync>;

/// Bidirectional event channel to the exam server.
///
/// One adapter belongs to exactly one virtual client. It must not be reused
/// after `disconnect`.
#[async_trait]
pub trait ProtocolAdapter: Send {
    /// Opens the transport and completes the handshake. Dispatches
    /// `connect` on success.
    async fn connect(&mut self, endpoint: &str) -> AdapterResult<()>;

    /// Fire-and-forget send. Acknowledgments, if any, arrive later as
    /// separate inbound events.
    fn emit(&self, event: ClientEvent) -> AdapterResult<()>;

    /// Registers the handler for `kind`, replacing any previous one.
    fn on(&mut self, kind: EventKind, handler: Handler);

    /// Closes the transport. Calling it again is a no-op.
    async fn disconnect(&mut self);

    fn is_connected(&self) -> bool;
}

/// Handler table shared between an adapter and its receive task
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    inner: Arc<StdRwLock<HashMap<EventKind, Handler>>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, kind: EventKind, handler: Handler) {
        let mut map = self.inner.write().unwrap_or_else(|e| e.into_inner());
        map.insert(kind, handler);
    }

    /// Routes an event to its handler. Events without a handler are dropped.
    pub fn dispatch(&self, event: InboundEvent) {
        let handler = {
            let map = self.inner.read().unwrap_or_else(|e| e.into_inner());
            map.get(&event.kind()).cloned()
        };
        // Called outside the lock so a handler may register other handlers
        if let Some(handler) = handler {
            handler(event);
        }
    }
}
