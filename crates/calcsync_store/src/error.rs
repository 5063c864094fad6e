//! Error types for the local store.

use calcsync_core::ModelError;
use std::io;
use thiserror::Error;

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur in local store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON payload could not be encoded.
    #[error("payload encoding error: {0}")]
    Json(#[from] serde_json::Error),

    /// Record failed model validation.
    #[error(transparent)]
    Model(#[from] ModelError),

    /// Update called on a record that was never saved.
    #[error("record has no identity; save it before updating")]
    MissingIdentity,

    /// The addressed row does not exist.
    #[error("{table} row {id} not found")]
    NotFound {
        /// Table searched.
        table: &'static str,
        /// Identifier searched for.
        id: String,
    },

    /// Attempt to modify or delete a built-in preset.
    #[error("parameter set {0} is a preset and cannot be modified")]
    PresetImmutable(i64),

    /// A stored row cannot be decoded into its model type.
    #[error("corrupt row in {table}: {message}")]
    CorruptRow {
        /// Table the row lives in.
        table: &'static str,
        /// What is wrong with it.
        message: String,
    },

    /// Another process holds the store lock.
    #[error("store locked: another process has exclusive access")]
    StoreLocked,

    /// The store was closed.
    #[error("store is closed")]
    Closed,

    /// A maintenance operation could not acquire the maintenance lock.
    #[error("maintenance lock unavailable: a sync pass is running")]
    MaintenanceBusy,

    /// The store was written by a newer schema.
    #[error("unsupported schema version {found} (this build supports up to {supported})")]
    UnsupportedSchema {
        /// Version found on disk.
        found: u32,
        /// Highest version this build understands.
        supported: u32,
    },

    /// The configured path cannot be used.
    #[error("invalid store path: {0}")]
    InvalidPath(String),
}

impl StoreError {
    /// Creates a not-found error.
    pub fn not_found(table: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            table,
            id: id.to_string(),
        }
    }

    /// Creates a corrupt-row error.
    pub fn corrupt_row(table: &'static str, message: impl Into<String>) -> Self {
        Self::CorruptRow {
            table,
            message: message.into(),
        }
    }

    /// Returns true if the error indicates damaged data rather than a
    /// caller mistake.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            StoreError::CorruptRow { .. } => true,
            StoreError::Sqlite(rusqlite::Error::SqliteFailure(err, _)) => matches!(
                err.code,
                rusqlite::ErrorCode::DatabaseCorrupt | rusqlite::ErrorCode::NotADatabase
            ),
            _ => false,
        }
    }
}
