//! Per-entity-type download checkpoints.

use crate::error::StoreResult;
use crate::rows::{parse_ts, ts};
use crate::store::LocalStore;
use calcsync_core::{EntityType, Timestamp};
use rusqlite::{params, OptionalExtension};

const TABLE: &str = "sync_checkpoints";

impl LocalStore {
    /// Server time of the last clean download for `entity_type`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::StoreError::CorruptRow`] if the stored time is not a
    /// timestamp.
    pub fn get_checkpoint(&self, entity_type: EntityType) -> StoreResult<Option<Timestamp>> {
        self.with_connection(|conn| {
            let text: Option<String> = conn
                .query_row(
                    "SELECT last_sync_at FROM sync_checkpoints WHERE entity_type = ?1",
                    [entity_type.as_str()],
                    |row| row.get(0),
                )
                .optional()?;
            text.map(|t| parse_ts(TABLE, &t)).transpose()
        })
    }

    /// Records the server time of a clean download.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn set_checkpoint(&self, entity_type: EntityType, at: Timestamp) -> StoreResult<()> {
        let now = self.now();
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO sync_checkpoints (entity_type, last_sync_at, updated_at) VALUES (?1, ?2, ?3) \
                 ON CONFLICT(entity_type) DO UPDATE SET last_sync_at = excluded.last_sync_at, \
                 updated_at = excluded.updated_at",
                params![entity_type.as_str(), ts(&at), ts(&now)],
            )?;
            Ok(())
        })
    }

    /// Forgets the checkpoint so the next download starts from the beginning.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn clear_checkpoint(&self, entity_type: EntityType) -> StoreResult<()> {
        self.transaction(|tx| {
            tx.execute(
                "DELETE FROM sync_checkpoints WHERE entity_type = ?1",
                [entity_type.as_str()],
            )?;
            Ok(())
        })
    }
}
