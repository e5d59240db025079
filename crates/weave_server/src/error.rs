//! Error types for the sync server.

use thiserror::Error;
use weave_model::ModelError;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the sync server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Model-level failure (corrupt state, bad row).
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// A request was malformed or out of bounds.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The first frame on a socket was not a valid handshake.
    #[error("handshake rejected: {0}")]
    HandshakeRejected(String),

    /// Wire serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Socket-level I/O failure.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for ServerError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ServerError::WebSocket(Box::new(e))
    }
}
