#![forbid(unsafe_code)]

// Error handling for the signaling module

use std::time::Duration;
use thiserror::Error;

/// Errors raised by a protocol adapter
#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    #[error("Handshake rejected: {0}")]
    HandshakeRejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Outbound queue full")]
    QueueFull,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type alias for adapter operations
pub type AdapterResult<T> = Result<T, AdapterError>;
