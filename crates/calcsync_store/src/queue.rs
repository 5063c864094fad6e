//! Offline queue table.

use crate::error::{StoreError, StoreResult};
use crate::rows::{parse_enum, parse_json, parse_ts, parse_uuid, to_json, ts};
use crate::store::LocalStore;
use calcsync_core::{OfflineQueueItem, QueuePriority, QueueStatus, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};
use std::collections::BTreeMap;
use uuid::Uuid;

const TABLE: &str = "offline_queue";

const COLUMNS: &str = "q.id, q.operation, q.entity_type, q.entity_id, q.payload, q.priority, \
                       q.depends_on, q.created_at, q.scheduled_at, q.retry_count, q.max_retries, \
                       q.last_error, q.status, q.updated_at";

struct QueueRow {
    id: String,
    operation: String,
    entity_type: String,
    entity_id: String,
    payload: String,
    priority: String,
    depends_on: Option<String>,
    created_at: String,
    scheduled_at: String,
    retry_count: u32,
    max_retries: u32,
    last_error: Option<String>,
    status: String,
    updated_at: String,
}

impl QueueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            operation: row.get(1)?,
            entity_type: row.get(2)?,
            entity_id: row.get(3)?,
            payload: row.get(4)?,
            priority: row.get(5)?,
            depends_on: row.get(6)?,
            created_at: row.get(7)?,
            scheduled_at: row.get(8)?,
            retry_count: row.get(9)?,
            max_retries: row.get(10)?,
            last_error: row.get(11)?,
            status: row.get(12)?,
            updated_at: row.get(13)?,
        })
    }

    fn into_item(self) -> StoreResult<OfflineQueueItem> {
        Ok(OfflineQueueItem {
            id: parse_uuid(TABLE, &self.id)?,
            operation: parse_enum(TABLE, &self.operation)?,
            entity_type: parse_enum(TABLE, &self.entity_type)?,
            entity_id: self.entity_id,
            payload: parse_json(TABLE, "payload", &self.payload)?,
            priority: parse_enum(TABLE, &self.priority)?,
            depends_on: self
                .depends_on
                .map(|d| parse_uuid(TABLE, &d))
                .transpose()?,
            created_at: parse_ts(TABLE, &self.created_at)?,
            scheduled_at: parse_ts(TABLE, &self.scheduled_at)?,
            retry_count: self.retry_count,
            max_retries: self.max_retries,
            last_error: self.last_error,
            status: parse_enum(TABLE, &self.status)?,
            updated_at: parse_ts(TABLE, &self.updated_at)?,
        })
    }
}

/// Drain order: priority rank descending, then FIFO by creation time, then
/// insertion order.
fn order_by() -> String {
    format!(
        "ORDER BY {} DESC, q.created_at ASC, q.rowid ASC",
        QueuePriority::sql_rank("q.priority")
    )
}

fn select(
    conn: &Connection,
    clause: &str,
    params: &[&dyn ToSql],
) -> StoreResult<Vec<OfflineQueueItem>> {
    let sql = format!("SELECT {COLUMNS} FROM offline_queue q {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, QueueRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(QueueRow::into_item).collect()
}

fn get(conn: &Connection, id: &Uuid) -> StoreResult<Option<OfflineQueueItem>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM offline_queue q WHERE q.id = ?1"),
        [id.to_string()],
        QueueRow::from_row,
    )
    .optional()?
    .map(QueueRow::into_item)
    .transpose()
}

impl LocalStore {
    /// Persists a new queue item.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors, including a primary-key violation for a
    /// duplicate id.
    pub fn insert_queue_item(&self, item: &OfflineQueueItem) -> StoreResult<()> {
        self.transaction(|tx| {
            tx.execute(
                "INSERT INTO offline_queue (id, operation, entity_type, entity_id, payload, priority, \
                 depends_on, created_at, scheduled_at, retry_count, max_retries, last_error, status, updated_at) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    item.id.to_string(),
                    item.operation.as_str(),
                    item.entity_type.as_str(),
                    item.entity_id,
                    to_json(&item.payload)?,
                    item.priority.as_str(),
                    item.depends_on.map(|d| d.to_string()),
                    ts(&item.created_at),
                    ts(&item.scheduled_at),
                    item.retry_count,
                    item.max_retries,
                    item.last_error,
                    item.status.as_str(),
                    ts(&item.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    /// Loads a queue item.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn get_queue_item(&self, id: &Uuid) -> StoreResult<Option<OfflineQueueItem>> {
        self.with_connection(|conn| get(conn, id))
    }

    /// Queue items in drain order, optionally filtered by status.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_queue_items(
        &self,
        status: Option<QueueStatus>,
    ) -> StoreResult<Vec<OfflineQueueItem>> {
        self.with_connection(|conn| match status {
            Some(status) => select(
                conn,
                &format!("WHERE q.status = ?1 {}", order_by()),
                params![status.as_str()],
            ),
            None => select(conn, &order_by(), params![]),
        })
    }

    /// Pending items that may run at `now`, in drain order, at most `limit`.
    ///
    /// An item is eligible when it is `pending`, its `scheduled_at` has
    /// passed and its dependency, if any, exists and is `completed`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn eligible_queue_items(
        &self,
        now: Timestamp,
        limit: usize,
    ) -> StoreResult<Vec<OfflineQueueItem>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        self.with_connection(|conn| {
            select(
                conn,
                &format!(
                    "LEFT JOIN offline_queue d ON d.id = q.depends_on \
                     WHERE q.status = 'pending' AND q.scheduled_at <= ?1 \
                     AND (q.depends_on IS NULL OR d.status = 'completed') \
                     {} LIMIT ?2",
                    order_by()
                ),
                params![ts(&now), limit],
            )
        })
    }

    /// Pending items held back by a dependency that is not completed.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn blocked_queue_item_count(&self) -> StoreResult<u64> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM offline_queue q LEFT JOIN offline_queue d ON d.id = q.depends_on \
                 WHERE q.status = 'pending' AND q.depends_on IS NOT NULL \
                 AND (d.id IS NULL OR d.status != 'completed')",
                [],
                |row| row.get(0),
            )?;
            Ok(u64::try_from(count).unwrap_or(0))
        })
    }

    /// Moves an item from `pending` to `processing`. Returns false if the
    /// item was no longer pending.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn claim_queue_item(&self, id: &Uuid, now: Timestamp) -> StoreResult<bool> {
        self.transaction(|tx| {
            Ok(tx.execute(
                "UPDATE offline_queue SET status = 'processing', updated_at = ?2 \
                 WHERE id = ?1 AND status = 'pending'",
                params![id.to_string(), ts(&now)],
            )? > 0)
        })
    }

    /// Writes the mutable state of an item: status, retry count, schedule,
    /// last error and priority.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the item does not exist.
    pub fn update_queue_item(&self, item: &OfflineQueueItem) -> StoreResult<()> {
        self.transaction(|tx| {
            let changed = tx.execute(
                "UPDATE offline_queue SET status = ?2, retry_count = ?3, max_retries = ?4, \
                 scheduled_at = ?5, last_error = ?6, priority = ?7, updated_at = ?8 WHERE id = ?1",
                params![
                    item.id.to_string(),
                    item.status.as_str(),
                    item.retry_count,
                    item.max_retries,
                    ts(&item.scheduled_at),
                    item.last_error,
                    item.priority.as_str(),
                    ts(&item.updated_at),
                ],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(TABLE, item.id));
            }
            Ok(())
        })
    }

    /// Removes an item. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn delete_queue_item(&self, id: &Uuid) -> StoreResult<bool> {
        self.transaction(|tx| {
            Ok(tx.execute("DELETE FROM offline_queue WHERE id = ?1", [id.to_string()])? > 0)
        })
    }

    /// Deletes completed items last touched before `before`.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn purge_completed_queue_items(&self, before: Timestamp) -> StoreResult<usize> {
        self.transaction(|tx| {
            Ok(tx.execute(
                "DELETE FROM offline_queue WHERE status = 'completed' AND updated_at < ?1 \
                 AND id NOT IN (SELECT depends_on FROM offline_queue \
                                WHERE depends_on IS NOT NULL AND status != 'completed')",
                [ts(&before)],
            )?)
        })
    }

    /// Returns items left `processing` by an interrupted drain to `pending`.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn reset_processing_queue_items(&self, now: Timestamp) -> StoreResult<usize> {
        self.transaction(|tx| {
            Ok(tx.execute(
                "UPDATE offline_queue SET status = 'pending', updated_at = ?1 WHERE status = 'processing'",
                [ts(&now)],
            )?)
        })
    }

    /// Moves failed items back to `pending` with a fresh retry budget.
    /// `None` resets every failed item. Returns the number reset.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn reset_failed_queue_items(
        &self,
        id: Option<&Uuid>,
        now: Timestamp,
    ) -> StoreResult<usize> {
        self.transaction(|tx| {
            let sql = "UPDATE offline_queue SET status = 'pending', retry_count = 0, \
                       last_error = NULL, scheduled_at = ?1, updated_at = ?1 \
                       WHERE status = 'failed'";
            Ok(match id {
                Some(id) => tx.execute(
                    &format!("{sql} AND id = ?2"),
                    params![ts(&now), id.to_string()],
                )?,
                None => tx.execute(sql, [ts(&now)])?,
            })
        })
    }

    /// Returns true if an item with this id exists.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn queue_item_exists(&self, id: &Uuid) -> StoreResult<bool> {
        self.with_connection(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM offline_queue WHERE id = ?1",
                [id.to_string()],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
    }

    /// Number of items per status.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors or [`StoreError::CorruptRow`] for an unknown
    /// status value.
    pub fn queue_counts(&self) -> StoreResult<BTreeMap<QueueStatus, u64>> {
        self.with_connection(|conn| {
            let mut stmt =
                conn.prepare("SELECT status, COUNT(*) FROM offline_queue GROUP BY status")?;
            let rows = stmt
                .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
                .collect::<Result<Vec<_>, _>>()?;
            let mut counts: BTreeMap<QueueStatus, u64> =
                QueueStatus::ALL.iter().map(|s| (*s, 0)).collect();
            for (status, count) in rows {
                let status: QueueStatus = parse_enum(TABLE, &status)?;
                counts.insert(status, u64::try_from(count).unwrap_or(0));
            }
            Ok(counts)
        })
    }
}
