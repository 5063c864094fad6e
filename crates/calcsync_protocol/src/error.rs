//! Protocol error types.

use calcsync_core::ModelError;
use thiserror::Error;

/// Result type for protocol operations.
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Errors that can occur while encoding, decoding or routing messages.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A body could not be encoded or decoded.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A value in a message is not valid for the model.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// No endpoint matches the method and path.
    #[error("no route for {method} {path}")]
    UnknownRoute {
        /// Request method.
        method: String,
        /// Request path.
        path: String,
    },

    /// A snapshot field is missing or has the wrong shape.
    #[error("invalid snapshot field {field}: {message}")]
    InvalidSnapshot {
        /// Field name.
        field: &'static str,
        /// What is wrong.
        message: String,
    },

    /// The snapshot is for another entity type.
    #[error("expected a {expected} snapshot, got {found}")]
    EntityMismatch {
        /// Expected entity type.
        expected: &'static str,
        /// Entity type found.
        found: &'static str,
    },
}

impl ProtocolError {
    /// Creates an invalid-snapshot error.
    pub fn invalid_snapshot(field: &'static str, message: impl Into<String>) -> Self {
        Self::InvalidSnapshot {
            field,
            message: message.into(),
        }
    }
}
