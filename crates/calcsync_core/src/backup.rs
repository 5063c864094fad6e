//! Backup metadata.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

text_enum! {
    /// Why a backup was taken.
    pub enum BackupReason {
        /// Requested by the user.
        Manual => "manual",
        /// Periodic automatic backup.
        Scheduled => "scheduled",
        /// Taken before a restore replaced the live store.
        PreRestore => "pre_restore",
        /// Taken at the start of a database repair.
        Emergency => "emergency",
    }
}

impl BackupReason {
    /// Returns true for backups the system took on its own.
    #[must_use]
    pub fn is_automatic(self) -> bool {
        !matches!(self, BackupReason::Manual)
    }
}

/// Metadata describing a backup artifact.
///
/// The same structure is stored in the `data_backups` table and written
/// next to the backup file as a JSON sidecar.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataBackup {
    /// Backup id.
    pub id: Uuid,
    /// Display name.
    pub name: String,
    /// Optional description.
    pub description: Option<String>,
    /// Location of the backup file.
    pub file_path: PathBuf,
    /// File size in bytes.
    pub size_bytes: u64,
    /// Hex-encoded SHA-256 of the file.
    pub checksum: String,
    /// Creation time.
    pub created_at: Timestamp,
    /// Row count per table at backup time.
    pub table_counts: BTreeMap<String, u64>,
    /// Whether the system took the backup on its own.
    pub automatic: bool,
    /// Trigger.
    pub reason: BackupReason,
}

impl DataBackup {
    /// Total rows across all counted tables.
    #[must_use]
    pub fn total_rows(&self) -> u64 {
        self.table_counts.values().sum()
    }
}
