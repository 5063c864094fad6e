//! Error types for the sync engine.

use calcsync_core::ModelError;
use calcsync_protocol::{ProtocolError, RecordSnapshot};
use calcsync_store::StoreError;
use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during sync operations.
#[derive(Error, Debug)]
pub enum SyncError {
    /// The remote side could not be reached.
    #[error("network error: {message}")]
    Network {
        /// Error message.
        message: String,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// Credentials were missing, invalid or expired.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The server answered with an error status.
    #[error("server error {status}: {message}")]
    Server {
        /// HTTP status.
        status: u16,
        /// Message from the error body.
        message: String,
    },

    /// The server holds a newer, different version of the record.
    #[error("remote version of {} {} has diverged", .0.entity_type, .0.client_id)]
    Conflict(Box<RecordSnapshot>),

    /// Local data is corrupt.
    #[error("corrupt local data: {0}")]
    Corruption(String),

    /// The record or request was rejected before it reached the network.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A remote call exceeded its timeout.
    #[error("operation timed out")]
    Timeout,

    /// Sync was cancelled.
    #[error("sync cancelled")]
    Cancelled,

    /// A message could not be encoded or decoded.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Local store error.
    #[error("store error: {0}")]
    Store(StoreError),
}

impl SyncError {
    /// Creates a retryable network error.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: true,
        }
    }

    /// Creates a non-retryable network error.
    pub fn network_fatal(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
            retryable: false,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Network { retryable, .. } => *retryable,
            SyncError::Timeout => true,
            SyncError::Server { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Returns true for authentication failures, which halt sync.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_))
    }
}

impl From<StoreError> for SyncError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Model(model) => SyncError::Validation(model.to_string()),
            err if err.is_corruption() => SyncError::Corruption(err.to_string()),
            err => SyncError::Store(err),
        }
    }
}

impl From<ProtocolError> for SyncError {
    fn from(err: ProtocolError) -> Self {
        SyncError::Protocol(err.to_string())
    }
}

impl From<ModelError> for SyncError {
    fn from(err: ModelError) -> Self {
        SyncError::Validation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::network("connection lost").is_retryable());
        assert!(!SyncError::network_fatal("invalid certificate").is_retryable());
        assert!(SyncError::Timeout.is_retryable());
        assert!(SyncError::Server {
            status: 503,
            message: "unavailable".into()
        }
        .is_retryable());
        assert!(!SyncError::Server {
            status: 400,
            message: "bad request".into()
        }
        .is_retryable());
        assert!(!SyncError::Auth("expired".into()).is_retryable());
        assert!(!SyncError::Cancelled.is_retryable());
        assert!(!SyncError::Validation("empty".into()).is_retryable());
    }

    #[test]
    fn corrupt_rows_become_corruption() {
        let err: SyncError = StoreError::corrupt_row("calculations", "bad json").into();
        assert!(matches!(err, SyncError::Corruption(_)));

        let err: SyncError = StoreError::MissingIdentity.into();
        assert!(matches!(err, SyncError::Store(StoreError::MissingIdentity)));
    }

    #[test]
    fn model_errors_are_validation() {
        let err: SyncError = ModelError::validation("device id is empty").into();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(err.to_string().contains("device id is empty"));
    }
}
