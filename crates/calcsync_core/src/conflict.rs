//! Sync conflicts.

use crate::ids::ClientId;
use crate::status::EntityType;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

text_enum! {
    /// How the local and remote versions diverged.
    pub enum ConflictKind {
        /// Both sides changed within the concurrency window.
        ConcurrentModification => "concurrent_modification",
        /// The remote version moved on while local edits were unsynced.
        VersionMismatch => "version_mismatch",
        /// The same logical record was created on two devices.
        DeviceMismatch => "device_mismatch",
    }
}

text_enum! {
    /// How a conflict is settled.
    pub enum ConflictStrategy {
        /// Local version wins.
        KeepLocal => "keep_local",
        /// Remote version wins.
        KeepServer => "keep_server",
        /// Later `updated_at ?? created_at` wins; ties go to local.
        KeepNewest => "keep_newest",
        /// Field-level merge.
        Merge => "merge",
    }
}

impl Default for ConflictStrategy {
    fn default() -> Self {
        ConflictStrategy::KeepNewest
    }
}

/// Record of how a conflict was settled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConflictResolution {
    /// Strategy applied.
    pub strategy: ConflictStrategy,
    /// Who resolved it (`auto` or a user/device label).
    pub resolved_by: String,
    /// When it was resolved.
    pub resolved_at: Timestamp,
}

/// A detected divergence between the local and remote version of a record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConflict {
    /// Conflict id.
    pub id: Uuid,
    /// Entity kind.
    pub entity_type: EntityType,
    /// Client ID of the record.
    pub entity_id: ClientId,
    /// Divergence kind.
    pub kind: ConflictKind,
    /// Local snapshot at detection time.
    pub local: Value,
    /// Remote snapshot at detection time.
    pub remote: Value,
    /// Detection time.
    pub detected_at: Timestamp,
    /// Set once resolved.
    pub resolution: Option<ConflictResolution>,
}

impl SyncConflict {
    /// Creates an unresolved conflict.
    pub fn new(
        entity_type: EntityType,
        entity_id: ClientId,
        kind: ConflictKind,
        local: Value,
        remote: Value,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            entity_type,
            entity_id,
            kind,
            local,
            remote,
            detected_at,
            resolution: None,
        }
    }

    /// Returns true once a resolution has been recorded.
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_some()
    }
}
