//! Error types for the model crate.

use thiserror::Error;

/// Result type for model operations.
pub type ModelResult<T> = Result<T, ModelError>;

/// Errors that can occur in model operations.
#[derive(Debug, Error)]
pub enum ModelError {
    /// A CRDT state blob could not be decoded.
    ///
    /// This is fatal for the affected record only; the caller is expected
    /// to quarantine the record rather than abort.
    #[error("corrupt CRDT state: {reason}")]
    CorruptState {
        /// Description of the corruption.
        reason: String,
    },

    /// A CRDT update could not be encoded.
    #[error("failed to encode CRDT state: {reason}")]
    EncodeFailed {
        /// Description of the failure.
        reason: String,
    },

    /// A revision string was not a valid 64-bit integer.
    #[error("invalid revision: {value:?}")]
    InvalidRevision {
        /// The offending value.
        value: String,
    },

    /// A database row failed to map to a domain object.
    #[error("invalid row for {entity}: {reason}")]
    InvalidRow {
        /// The entity kind being mapped.
        entity: &'static str,
        /// Description of the failure.
        reason: String,
    },

    /// An unknown collaboration role was encountered.
    #[error("unknown role: {role:?}")]
    UnknownRole {
        /// The offending role string.
        role: String,
    },
}

impl ModelError {
    /// Creates a corrupt-state error.
    pub fn corrupt(reason: impl Into<String>) -> Self {
        Self::CorruptState {
            reason: reason.into(),
        }
    }

    /// Creates a row-mapping error.
    pub fn invalid_row(entity: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidRow {
            entity,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = ModelError::corrupt("truncated blob");
        assert_eq!(err.to_string(), "corrupt CRDT state: truncated blob");

        let err = ModelError::InvalidRevision {
            value: "abc".into(),
        };
        assert!(err.to_string().contains("abc"));
    }
}
