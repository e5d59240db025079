//! Error types for the sync client.

use thiserror::Error;
use weave_model::ModelError;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors that can occur in the sync client.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Model-level failure (corrupt state, bad row).
    #[error("model error: {0}")]
    Model(#[from] ModelError),

    /// The cursor store failed to read or persist a cursor.
    #[error("cursor store error: {reason}")]
    CursorStore {
        /// Description of the failure.
        reason: String,
    },

    /// A record targeted by a local edit does not exist.
    #[error("unknown record: {id}")]
    UnknownRecord {
        /// The missing record id.
        id: String,
    },

    /// No socket id could be obtained for the handshake.
    #[error("handshake failed: {0}")]
    HandshakeFailed(String),

    /// The socket is not connected.
    #[error("not connected")]
    NotConnected,

    /// Wire serialization failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// WebSocket protocol failure.
    #[error("websocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),
}

impl From<tokio_tungstenite::tungstenite::Error> for ClientError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        ClientError::WebSocket(Box::new(e))
    }
}

impl ClientError {
    /// Creates a cursor-store error.
    pub fn cursor_store(reason: impl Into<String>) -> Self {
        Self::CursorStore {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        assert_eq!(ClientError::NotConnected.to_string(), "not connected");
        assert!(ClientError::cursor_store("disk full")
            .to_string()
            .contains("disk full"));
    }
}
