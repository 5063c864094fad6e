//! Conflict history.

use crate::error::{StoreError, StoreResult};
use crate::rows::{opt_ts, parse_enum, parse_json, parse_ts, parse_uuid, to_json, ts};
use crate::store::LocalStore;
use calcsync_core::{ConflictResolution, SyncConflict};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const TABLE: &str = "sync_conflicts";

const COLUMNS: &str = "id, entity_type, entity_id, kind, local_snapshot, remote_snapshot, \
                       detected_at, strategy, resolved_by, resolved_at";

struct ConflictRow {
    id: String,
    entity_type: String,
    entity_id: String,
    kind: String,
    local: String,
    remote: String,
    detected_at: String,
    strategy: Option<String>,
    resolved_by: Option<String>,
    resolved_at: Option<String>,
}

impl ConflictRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            entity_type: row.get(1)?,
            entity_id: row.get(2)?,
            kind: row.get(3)?,
            local: row.get(4)?,
            remote: row.get(5)?,
            detected_at: row.get(6)?,
            strategy: row.get(7)?,
            resolved_by: row.get(8)?,
            resolved_at: row.get(9)?,
        })
    }

    fn into_conflict(self) -> StoreResult<SyncConflict> {
        let resolution = match (self.strategy, self.resolved_at) {
            (Some(strategy), Some(resolved_at)) => Some(ConflictResolution {
                strategy: parse_enum(TABLE, &strategy)?,
                resolved_by: self.resolved_by.unwrap_or_default(),
                resolved_at: parse_ts(TABLE, &resolved_at)?,
            }),
            _ => None,
        };
        Ok(SyncConflict {
            id: parse_uuid(TABLE, &self.id)?,
            entity_type: parse_enum(TABLE, &self.entity_type)?,
            entity_id: parse_enum(TABLE, &self.entity_id)?,
            kind: parse_enum(TABLE, &self.kind)?,
            local: parse_json(TABLE, "local_snapshot", &self.local)?,
            remote: parse_json(TABLE, "remote_snapshot", &self.remote)?,
            detected_at: parse_ts(TABLE, &self.detected_at)?,
            resolution,
        })
    }
}

fn get(conn: &Connection, id: &Uuid) -> StoreResult<Option<SyncConflict>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM sync_conflicts WHERE id = ?1"),
        [id.to_string()],
        ConflictRow::from_row,
    )
    .optional()?
    .map(ConflictRow::into_conflict)
    .transpose()
}

impl LocalStore {
    /// Records a detected conflict, resolved or not.
    ///
    /// # Errors
    ///
    /// Returns SQLite or JSON errors.
    pub fn insert_conflict(&self, conflict: &SyncConflict) -> StoreResult<()> {
        let resolution = conflict.resolution.as_ref();
        self.transaction(|tx| {
            tx.execute(
                &format!("INSERT INTO sync_conflicts ({COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
                params![
                    conflict.id.to_string(),
                    conflict.entity_type.as_str(),
                    conflict.entity_id.to_string(),
                    conflict.kind.as_str(),
                    to_json(&conflict.local)?,
                    to_json(&conflict.remote)?,
                    ts(&conflict.detected_at),
                    resolution.map(|r| r.strategy.as_str()),
                    resolution.map(|r| r.resolved_by.clone()),
                    opt_ts(&resolution.map(|r| r.resolved_at)),
                ],
            )?;
            Ok(())
        })
    }

    /// Loads a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn get_conflict(&self, id: &Uuid) -> StoreResult<Option<SyncConflict>> {
        self.with_connection(|conn| get(conn, id))
    }

    /// Conflicts ordered by detection time, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_conflicts(&self, unresolved_only: bool) -> StoreResult<Vec<SyncConflict>> {
        let filter = if unresolved_only {
            "WHERE resolved_at IS NULL"
        } else {
            ""
        };
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM sync_conflicts {filter} ORDER BY detected_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([], ConflictRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(ConflictRow::into_conflict).collect()
        })
    }

    /// Stores the resolution of a conflict.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the conflict does not exist.
    pub fn record_conflict_resolution(
        &self,
        id: &Uuid,
        resolution: &ConflictResolution,
    ) -> StoreResult<()> {
        self.transaction(|tx| {
            let changed = tx.execute(
                "UPDATE sync_conflicts SET strategy = ?2, resolved_by = ?3, resolved_at = ?4 WHERE id = ?1",
                params![
                    id.to_string(),
                    resolution.strategy.as_str(),
                    resolution.resolved_by,
                    ts(&resolution.resolved_at),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(TABLE, id));
            }
            Ok(())
        })
    }
}
