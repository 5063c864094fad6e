//! Error types for integrity checks, repair and backups.

use calcsync_store::rusqlite;
use calcsync_store::StoreError;
use std::io;
use std::path::PathBuf;
use thiserror::Error;
use uuid::Uuid;

/// Result type for integrity operations.
pub type IntegrityResult<T> = Result<T, IntegrityError>;

/// Errors that can occur in integrity operations.
#[derive(Debug, Error)]
pub enum IntegrityError {
    /// Local store error.
    #[error(transparent)]
    Store(#[from] StoreError),

    /// SQLite error outside the store handle, e.g. on a backup file.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Sidecar could not be encoded or decoded.
    #[error("sidecar error: {0}")]
    Json(#[from] serde_json::Error),

    /// Backups need a directory and none is configured.
    #[error("no backup directory: the store is in memory and none was configured")]
    NoBackupDir,

    /// No backup with this id.
    #[error("backup {0} not found")]
    BackupNotFound(Uuid),

    /// The backup file is gone.
    #[error("backup file missing: {}", .0.display())]
    MissingBackupFile(PathBuf),

    /// The backup file does not match its recorded checksum.
    #[error("backup {id} checksum mismatch: expected {expected}, found {actual}")]
    ChecksumMismatch {
        /// Backup id.
        id: Uuid,
        /// Recorded checksum.
        expected: String,
        /// Checksum of the file on disk.
        actual: String,
    },

    /// The restored store failed validation and was rolled back.
    #[error("restored store failed validation: {0}")]
    RestoreRejected(String),
}

impl IntegrityError {
    /// Returns true if the error means stored data is damaged.
    #[must_use]
    pub fn is_corruption(&self) -> bool {
        match self {
            IntegrityError::Store(err) => err.is_corruption(),
            IntegrityError::ChecksumMismatch { .. } | IntegrityError::RestoreRejected(_) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checksum_mismatch_is_corruption() {
        let err = IntegrityError::ChecksumMismatch {
            id: Uuid::nil(),
            expected: "aa".into(),
            actual: "bb".into(),
        };
        assert!(err.is_corruption());
        assert!(err.to_string().contains("expected aa"));
        assert!(!IntegrityError::NoBackupDir.is_corruption());
    }
}
