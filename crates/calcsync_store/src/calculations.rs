//! Calculation record persistence.

use crate::error::{StoreError, StoreResult};
use crate::rows::{opt_ts, parse_enum, parse_json, parse_opt_ts, parse_ts, to_json, ts};
use crate::store::LocalStore;
use calcsync_core::{
    CalculationPatch, CalculationRecord, ClientId, DeviceId, SyncStatus, Timestamp,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row, ToSql};

const TABLE: &str = "calculations";

const COLUMNS: &str = "id, server_id, client_id, calculation_type, parameters, result, \
                       project_name, notes, created_at, updated_at, device_id, user_id, \
                       sync_status, server_timestamp";

/// Raw column values of one `calculations` row.
struct CalculationRow {
    id: i64,
    server_id: Option<String>,
    client_id: Option<String>,
    calculation_type: String,
    parameters: String,
    result: String,
    project_name: Option<String>,
    notes: Option<String>,
    created_at: String,
    updated_at: Option<String>,
    device_id: String,
    user_id: Option<String>,
    sync_status: String,
    server_timestamp: Option<String>,
}

impl CalculationRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            server_id: row.get(1)?,
            client_id: row.get(2)?,
            calculation_type: row.get(3)?,
            parameters: row.get(4)?,
            result: row.get(5)?,
            project_name: row.get(6)?,
            notes: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            device_id: row.get(10)?,
            user_id: row.get(11)?,
            sync_status: row.get(12)?,
            server_timestamp: row.get(13)?,
        })
    }

    fn into_record(self) -> StoreResult<CalculationRecord> {
        let client_id = self
            .client_id
            .ok_or_else(|| {
                StoreError::corrupt_row(TABLE, format!("row {} has no client id", self.id))
            })?;
        Ok(CalculationRecord {
            id: Some(self.id),
            server_id: self.server_id,
            client_id: parse_enum(TABLE, &client_id)?,
            calculation_type: parse_enum(TABLE, &self.calculation_type)?,
            parameters: parse_json(TABLE, "parameters", &self.parameters)?,
            result: parse_json(TABLE, "result", &self.result)?,
            project_name: self.project_name,
            notes: self.notes,
            created_at: parse_ts(TABLE, &self.created_at)?,
            updated_at: parse_opt_ts(TABLE, self.updated_at)?,
            device_id: DeviceId::new(self.device_id),
            user_id: self.user_id,
            sync_status: parse_enum(TABLE, &self.sync_status)?,
            server_timestamp: parse_opt_ts(TABLE, self.server_timestamp)?,
        })
    }
}

fn select(
    conn: &Connection,
    clause: &str,
    params: &[&dyn ToSql],
) -> StoreResult<Vec<CalculationRecord>> {
    let sql = format!("SELECT {COLUMNS} FROM {TABLE} {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, CalculationRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(CalculationRow::into_record).collect()
}

pub(crate) fn get(conn: &Connection, id: i64) -> StoreResult<Option<CalculationRecord>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM {TABLE} WHERE id = ?1"),
        [id],
        CalculationRow::from_row,
    )
    .optional()?
    .map(CalculationRow::into_record)
    .transpose()
}

pub(crate) fn find_by_client_id(
    conn: &Connection,
    client_id: &ClientId,
) -> StoreResult<Option<CalculationRecord>> {
    // Duplicates are an integrity defect; the most recently written row wins.
    let mut rows = select(
        conn,
        "WHERE client_id = ?1 ORDER BY COALESCE(updated_at, created_at) DESC, id DESC LIMIT 1",
        &[&client_id.to_string()],
    )?;
    Ok(rows.pop())
}

pub(crate) fn insert(conn: &Connection, record: &CalculationRecord) -> StoreResult<i64> {
    record.validate()?;
    conn.execute(
        "INSERT INTO calculations (server_id, client_id, calculation_type, parameters, result, \
         project_name, notes, created_at, updated_at, device_id, user_id, sync_status, server_timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
        params![
            record.server_id,
            record.client_id.to_string(),
            record.calculation_type.as_str(),
            to_json(&record.parameters)?,
            to_json(&record.result)?,
            record.project_name,
            record.notes,
            ts(&record.created_at),
            opt_ts(&record.updated_at),
            record.device_id.as_str(),
            record.user_id,
            record.sync_status.as_str(),
            opt_ts(&record.server_timestamp),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

pub(crate) fn update(conn: &Connection, record: &CalculationRecord) -> StoreResult<()> {
    let id = record.id.ok_or(StoreError::MissingIdentity)?;
    record.validate()?;
    // Nullable columns coalesce so a record that never loaded a value
    // cannot erase it. Client id, device id and created_at never change.
    let changed = conn.execute(
        "UPDATE calculations SET \
            server_id = COALESCE(?2, server_id), \
            client_id = COALESCE(client_id, ?3), \
            calculation_type = ?4, \
            parameters = ?5, \
            result = ?6, \
            project_name = COALESCE(?7, project_name), \
            notes = COALESCE(?8, notes), \
            updated_at = COALESCE(?9, updated_at), \
            user_id = COALESCE(?10, user_id), \
            sync_status = ?11, \
            server_timestamp = COALESCE(?12, server_timestamp) \
         WHERE id = ?1",
        params![
            id,
            record.server_id,
            record.client_id.to_string(),
            record.calculation_type.as_str(),
            to_json(&record.parameters)?,
            to_json(&record.result)?,
            record.project_name,
            record.notes,
            opt_ts(&record.updated_at),
            record.user_id,
            record.sync_status.as_str(),
            opt_ts(&record.server_timestamp),
        ],
    )?;
    if changed == 0 {
        return Err(StoreError::not_found(TABLE, id));
    }
    Ok(())
}

fn update_fields(
    conn: &Connection,
    id: i64,
    patch: &CalculationPatch,
) -> StoreResult<CalculationRecord> {
    let mut current = get(conn, id)?.ok_or_else(|| StoreError::not_found(TABLE, id))?;
    if patch.is_empty() {
        return Ok(current);
    }

    let mut columns: Vec<&str> = Vec::new();
    let mut values: Vec<SqlValue> = Vec::new();
    let text = |s: &Option<String>| s.clone().map_or(SqlValue::Null, SqlValue::Text);

    if let Some(parameters) = &patch.parameters {
        columns.push("parameters");
        values.push(SqlValue::Text(to_json(parameters)?));
    }
    if let Some(result) = &patch.result {
        columns.push("result");
        values.push(SqlValue::Text(to_json(result)?));
    }
    if let Some(name) = &patch.project_name {
        columns.push("project_name");
        values.push(text(name));
    }
    if let Some(notes) = &patch.notes {
        columns.push("notes");
        values.push(text(notes));
    }
    if let Some(user) = &patch.user_id {
        columns.push("user_id");
        values.push(text(user));
    }
    if let Some(at) = &patch.updated_at {
        columns.push("updated_at");
        values.push(SqlValue::Text(ts(at)));
    }
    if let Some(status) = patch.sync_status {
        columns.push("sync_status");
        values.push(SqlValue::Text(status.as_str().to_string()));
    }

    patch.apply_to(&mut current);
    current.validate()?;

    let assignments = columns
        .iter()
        .enumerate()
        .map(|(i, column)| format!("{column} = ?{}", i + 1))
        .collect::<Vec<_>>()
        .join(", ");
    values.push(SqlValue::Integer(id));
    let sql = format!("UPDATE {TABLE} SET {assignments} WHERE id = ?{}", values.len());
    conn.execute(&sql, params_from_iter(values.iter()))?;
    Ok(current)
}

/// Replaces the row holding `record.client_id` with the given version, or
/// inserts it. Used to apply authoritative remote versions, so nullable
/// columns are written as given.
pub(crate) fn upsert(conn: &Connection, record: &CalculationRecord) -> StoreResult<i64> {
    match find_by_client_id(conn, &record.client_id)? {
        Some(existing) => {
            let id = existing.id.ok_or(StoreError::MissingIdentity)?;
            record.validate()?;
            conn.execute(
                "UPDATE calculations SET server_id = ?2, calculation_type = ?3, parameters = ?4, \
                 result = ?5, project_name = ?6, notes = ?7, created_at = ?8, updated_at = ?9, \
                 device_id = ?10, user_id = ?11, sync_status = ?12, server_timestamp = ?13 \
                 WHERE id = ?1",
                params![
                    id,
                    record.server_id,
                    record.calculation_type.as_str(),
                    to_json(&record.parameters)?,
                    to_json(&record.result)?,
                    record.project_name,
                    record.notes,
                    ts(&record.created_at),
                    opt_ts(&record.updated_at),
                    record.device_id.as_str(),
                    record.user_id,
                    record.sync_status.as_str(),
                    opt_ts(&record.server_timestamp),
                ],
            )?;
            Ok(id)
        }
        None => insert(conn, record),
    }
}

impl LocalStore {
    /// Saves a new calculation and returns its local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Model`] if the record fails validation.
    pub fn save_calculation(&self, record: &CalculationRecord) -> StoreResult<i64> {
        let id = self.transaction(|tx| insert(tx, record))?;
        tracing::debug!(id, client_id = %record.client_id, "saved calculation");
        Ok(id)
    }

    /// Saves several calculations atomically: either all are saved or none.
    ///
    /// # Errors
    ///
    /// Returns the first failure; nothing is written in that case.
    pub fn save_calculations(&self, records: &[CalculationRecord]) -> StoreResult<Vec<i64>> {
        self.transaction(|tx| records.iter().map(|r| insert(tx, r)).collect())
    }

    /// Loads a calculation by local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn get_calculation(&self, id: i64) -> StoreResult<Option<CalculationRecord>> {
        self.with_connection(|conn| get(conn, id))
    }

    /// Loads a calculation by client id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn find_calculation(&self, client_id: &ClientId) -> StoreResult<Option<CalculationRecord>> {
        self.with_connection(|conn| find_by_client_id(conn, client_id))
    }

    /// All calculations, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_calculations(&self) -> StoreResult<Vec<CalculationRecord>> {
        self.with_connection(|conn| select(conn, "ORDER BY created_at DESC, id DESC", &[]))
    }

    /// Calculations in the given status, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_calculations_by_status(
        &self,
        status: SyncStatus,
    ) -> StoreResult<Vec<CalculationRecord>> {
        self.with_connection(|conn| {
            select(
                conn,
                "WHERE sync_status = ?1 ORDER BY created_at ASC, id ASC",
                &[&status.as_str()],
            )
        })
    }

    /// Calculations waiting to be uploaded, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_pending_calculations(&self) -> StoreResult<Vec<CalculationRecord>> {
        self.list_calculations_by_status(SyncStatus::Pending)
    }

    /// Writes a full record over the stored row with the same local id.
    ///
    /// Nullable fields that are `None` in `record` keep their stored values.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingIdentity`] if `record.id` is `None` and
    /// [`StoreError::NotFound`] if no row has that id.
    pub fn update_calculation(&self, record: &CalculationRecord) -> StoreResult<()> {
        self.transaction(|tx| update(tx, record))
    }

    /// Writes only the fields present in `patch` and returns the result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row has that id.
    pub fn update_calculation_fields(
        &self,
        id: i64,
        patch: &CalculationPatch,
    ) -> StoreResult<CalculationRecord> {
        self.transaction(|tx| update_fields(tx, id, patch))
    }

    /// Inserts or replaces by client id. Returns the local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Model`] if the record fails validation.
    pub fn upsert_calculation(&self, record: &CalculationRecord) -> StoreResult<i64> {
        self.transaction(|tx| upsert(tx, record))
    }

    /// Deletes by local id. Returns true if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn delete_calculation(&self, id: i64) -> StoreResult<bool> {
        self.transaction(|tx| Ok(tx.execute("DELETE FROM calculations WHERE id = ?1", [id])? > 0))
    }

    /// Deletes every row with the client id. Returns true if any was removed.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn delete_calculation_by_client_id(&self, client_id: &ClientId) -> StoreResult<bool> {
        self.transaction(|tx| {
            Ok(tx.execute(
                "DELETE FROM calculations WHERE client_id = ?1",
                [client_id.to_string()],
            )? > 0)
        })
    }

    /// Sets the sync status of every row with the client id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row has the client id.
    pub fn set_calculation_status(
        &self,
        client_id: &ClientId,
        status: SyncStatus,
    ) -> StoreResult<()> {
        self.transaction(|tx| {
            let changed = tx.execute(
                "UPDATE calculations SET sync_status = ?2 WHERE client_id = ?1",
                params![client_id.to_string(), status.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(TABLE, client_id));
            }
            Ok(())
        })
    }

    /// Records a successful upload.
    ///
    /// The row becomes `synced` only if it is still `syncing` and its
    /// `updated_at` equals `uploaded_version`; a local edit made while the
    /// upload was in flight keeps it pending. The server id and timestamp are
    /// written either way. Returns true if the row became `synced`.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn mark_calculation_synced(
        &self,
        client_id: &ClientId,
        server_id: &str,
        server_timestamp: Timestamp,
        uploaded_version: Option<Timestamp>,
    ) -> StoreResult<bool> {
        self.transaction(|tx| {
            let synced = tx.execute(
                "UPDATE calculations SET sync_status = 'synced', server_id = ?2, server_timestamp = ?3 \
                 WHERE client_id = ?1 AND sync_status = 'syncing' AND updated_at IS ?4",
                params![
                    client_id.to_string(),
                    server_id,
                    ts(&server_timestamp),
                    opt_ts(&uploaded_version),
                ],
            )?;
            if synced == 0 {
                tx.execute(
                    "UPDATE calculations SET server_id = ?2, server_timestamp = ?3, \
                     sync_status = CASE sync_status WHEN 'syncing' THEN 'pending' ELSE sync_status END \
                     WHERE client_id = ?1",
                    params![client_id.to_string(), server_id, ts(&server_timestamp)],
                )?;
            }
            Ok(synced > 0)
        })
    }

    /// Moves every `failed` calculation back to `pending`.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn reset_failed_calculations(&self) -> StoreResult<usize> {
        self.transaction(|tx| {
            Ok(tx.execute(
                "UPDATE calculations SET sync_status = 'pending' WHERE sync_status = 'failed'",
                [],
            )?)
        })
    }
}
