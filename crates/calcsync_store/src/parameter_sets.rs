//! Parameter set persistence.

use crate::error::{StoreError, StoreResult};
use crate::rows::{opt_ts, parse_enum, parse_json, parse_opt_ts, parse_ts, to_json, ts};
use crate::store::LocalStore;
use calcsync_core::{ClientId, DeviceId, ParameterSet, ParameterSetPatch, SyncStatus, Timestamp};
use rusqlite::{params, Connection, OptionalExtension, Row, ToSql};

const TABLE: &str = "parameter_sets";

const COLUMNS: &str = "id, server_id, client_id, name, calculation_type, parameters, is_preset, \
                       tags, created_at, updated_at, device_id, sync_status, server_timestamp";

struct ParameterSetRow {
    id: i64,
    server_id: Option<String>,
    client_id: Option<String>,
    name: String,
    calculation_type: String,
    parameters: String,
    is_preset: bool,
    tags: String,
    created_at: String,
    updated_at: Option<String>,
    device_id: String,
    sync_status: String,
    server_timestamp: Option<String>,
}

impl ParameterSetRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            server_id: row.get(1)?,
            client_id: row.get(2)?,
            name: row.get(3)?,
            calculation_type: row.get(4)?,
            parameters: row.get(5)?,
            is_preset: row.get(6)?,
            tags: row.get(7)?,
            created_at: row.get(8)?,
            updated_at: row.get(9)?,
            device_id: row.get(10)?,
            sync_status: row.get(11)?,
            server_timestamp: row.get(12)?,
        })
    }

    fn into_set(self) -> StoreResult<ParameterSet> {
        let client_id = self
            .client_id
            .ok_or_else(|| {
                StoreError::corrupt_row(TABLE, format!("row {} has no client id", self.id))
            })?;
        let tags: Vec<String> = serde_json::from_str(&self.tags)
            .map_err(|e| StoreError::corrupt_row(TABLE, format!("tags is not a JSON array: {e}")))?;
        Ok(ParameterSet {
            id: Some(self.id),
            server_id: self.server_id,
            client_id: parse_enum(TABLE, &client_id)?,
            name: self.name,
            calculation_type: parse_enum(TABLE, &self.calculation_type)?,
            parameters: parse_json(TABLE, "parameters", &self.parameters)?,
            is_preset: self.is_preset,
            tags,
            created_at: parse_ts(TABLE, &self.created_at)?,
            updated_at: parse_opt_ts(TABLE, self.updated_at)?,
            device_id: DeviceId::new(self.device_id),
            sync_status: parse_enum(TABLE, &self.sync_status)?,
            server_timestamp: parse_opt_ts(TABLE, self.server_timestamp)?,
        })
    }
}

fn select(
    conn: &Connection,
    clause: &str,
    params: &[&dyn ToSql],
) -> StoreResult<Vec<ParameterSet>> {
    let sql = format!("SELECT {COLUMNS} FROM {TABLE} {clause}");
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(params, ParameterSetRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(ParameterSetRow::into_set).collect()
}

pub(crate) fn get(conn: &Connection, id: i64) -> StoreResult<Option<ParameterSet>> {
    conn.query_row(
        &format!("SELECT {COLUMNS} FROM {TABLE} WHERE id = ?1"),
        [id],
        ParameterSetRow::from_row,
    )
    .optional()?
    .map(ParameterSetRow::into_set)
    .transpose()
}

pub(crate) fn find_by_client_id(
    conn: &Connection,
    client_id: &ClientId,
) -> StoreResult<Option<ParameterSet>> {
    let mut rows = select(
        conn,
        "WHERE client_id = ?1 ORDER BY COALESCE(updated_at, created_at) DESC, id DESC LIMIT 1",
        &[&client_id.to_string()],
    )?;
    Ok(rows.pop())
}

fn tags_json(tags: &[String]) -> StoreResult<String> {
    Ok(serde_json::to_string(tags)?)
}

pub(crate) fn insert(conn: &Connection, set: &ParameterSet) -> StoreResult<i64> {
    set.validate()?;
    conn.execute(
        "INSERT INTO parameter_sets (server_id, client_id, name, calculation_type, parameters, \
         is_preset, tags, created_at, updated_at, device_id, sync_status, server_timestamp) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
        params![
            set.server_id,
            set.client_id.to_string(),
            set.name,
            set.calculation_type.as_str(),
            to_json(&set.parameters)?,
            set.is_preset,
            tags_json(&set.tags)?,
            ts(&set.created_at),
            opt_ts(&set.updated_at),
            set.device_id.as_str(),
            set.sync_status.as_str(),
            opt_ts(&set.server_timestamp),
        ],
    )?;
    Ok(conn.last_insert_rowid())
}

fn ensure_mutable(conn: &Connection, id: i64) -> StoreResult<ParameterSet> {
    let current = get(conn, id)?.ok_or_else(|| StoreError::not_found(TABLE, id))?;
    if current.is_preset {
        return Err(StoreError::PresetImmutable(id));
    }
    Ok(current)
}

pub(crate) fn update(conn: &Connection, set: &ParameterSet) -> StoreResult<()> {
    let id = set.id.ok_or(StoreError::MissingIdentity)?;
    set.validate()?;
    ensure_mutable(conn, id)?;
    conn.execute(
        "UPDATE parameter_sets SET \
            server_id = COALESCE(?2, server_id), \
            client_id = COALESCE(client_id, ?3), \
            name = ?4, \
            calculation_type = ?5, \
            parameters = ?6, \
            tags = ?7, \
            updated_at = COALESCE(?8, updated_at), \
            sync_status = ?9, \
            server_timestamp = COALESCE(?10, server_timestamp) \
         WHERE id = ?1",
        params![
            id,
            set.server_id,
            set.client_id.to_string(),
            set.name,
            set.calculation_type.as_str(),
            to_json(&set.parameters)?,
            tags_json(&set.tags)?,
            opt_ts(&set.updated_at),
            set.sync_status.as_str(),
            opt_ts(&set.server_timestamp),
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert(conn: &Connection, set: &ParameterSet) -> StoreResult<i64> {
    match find_by_client_id(conn, &set.client_id)? {
        Some(existing) if existing.is_preset => {
            Err(StoreError::PresetImmutable(existing.id.unwrap_or_default()))
        }
        Some(existing) => {
            let id = existing.id.ok_or(StoreError::MissingIdentity)?;
            set.validate()?;
            conn.execute(
                "UPDATE parameter_sets SET server_id = ?2, name = ?3, calculation_type = ?4, \
                 parameters = ?5, tags = ?6, created_at = ?7, updated_at = ?8, device_id = ?9, \
                 sync_status = ?10, server_timestamp = ?11 WHERE id = ?1",
                params![
                    id,
                    set.server_id,
                    set.name,
                    set.calculation_type.as_str(),
                    to_json(&set.parameters)?,
                    tags_json(&set.tags)?,
                    ts(&set.created_at),
                    opt_ts(&set.updated_at),
                    set.device_id.as_str(),
                    set.sync_status.as_str(),
                    opt_ts(&set.server_timestamp),
                ],
            )?;
            Ok(id)
        }
        None => insert(conn, set),
    }
}

impl LocalStore {
    /// Saves a new parameter set and returns its local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Model`] if the set fails validation.
    pub fn save_parameter_set(&self, set: &ParameterSet) -> StoreResult<i64> {
        self.transaction(|tx| insert(tx, set))
    }

    /// Loads a parameter set by local id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn get_parameter_set(&self, id: i64) -> StoreResult<Option<ParameterSet>> {
        self.with_connection(|conn| get(conn, id))
    }

    /// Loads a parameter set by client id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn find_parameter_set(&self, client_id: &ClientId) -> StoreResult<Option<ParameterSet>> {
        self.with_connection(|conn| find_by_client_id(conn, client_id))
    }

    /// All parameter sets, presets first, then by name.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_parameter_sets(&self) -> StoreResult<Vec<ParameterSet>> {
        self.with_connection(|conn| select(conn, "ORDER BY is_preset DESC, name ASC", &[]))
    }

    /// Non-preset parameter sets waiting to be uploaded, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_pending_parameter_sets(&self) -> StoreResult<Vec<ParameterSet>> {
        self.with_connection(|conn| {
            select(
                conn,
                "WHERE sync_status = 'pending' AND is_preset = 0 ORDER BY created_at ASC, id ASC",
                &[],
            )
        })
    }

    /// Writes a full parameter set over the stored row.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MissingIdentity`] without an id,
    /// [`StoreError::NotFound`] for an unknown id and
    /// [`StoreError::PresetImmutable`] for presets.
    pub fn update_parameter_set(&self, set: &ParameterSet) -> StoreResult<()> {
        self.transaction(|tx| update(tx, set))
    }

    /// Writes only the fields present in `patch` and returns the result.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] for an unknown id and
    /// [`StoreError::PresetImmutable`] for presets.
    pub fn update_parameter_set_fields(
        &self,
        id: i64,
        patch: &ParameterSetPatch,
    ) -> StoreResult<ParameterSet> {
        self.transaction(|tx| {
            let mut current = ensure_mutable(tx, id)?;
            patch.apply_to(&mut current);
            update(tx, &current)?;
            Ok(current)
        })
    }

    /// Inserts or replaces by client id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PresetImmutable`] if the stored row is a preset.
    pub fn upsert_parameter_set(&self, set: &ParameterSet) -> StoreResult<i64> {
        self.transaction(|tx| upsert(tx, set))
    }

    /// Deletes a parameter set. Returns true if a row was removed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::PresetImmutable`] for presets.
    pub fn delete_parameter_set(&self, id: i64) -> StoreResult<bool> {
        self.transaction(|tx| {
            match get(tx, id)? {
                None => Ok(false),
                Some(set) if set.is_preset => Err(StoreError::PresetImmutable(id)),
                Some(_) => Ok(tx.execute("DELETE FROM parameter_sets WHERE id = ?1", [id])? > 0),
            }
        })
    }

    /// Deletes non-preset rows with the client id.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn delete_parameter_set_by_client_id(&self, client_id: &ClientId) -> StoreResult<bool> {
        self.transaction(|tx| {
            Ok(tx.execute(
                "DELETE FROM parameter_sets WHERE client_id = ?1 AND is_preset = 0",
                [client_id.to_string()],
            )? > 0)
        })
    }

    /// Sets the sync status of every row with the client id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no row has the client id.
    pub fn set_parameter_set_status(
        &self,
        client_id: &ClientId,
        status: SyncStatus,
    ) -> StoreResult<()> {
        self.transaction(|tx| {
            let changed = tx.execute(
                "UPDATE parameter_sets SET sync_status = ?2 WHERE client_id = ?1",
                params![client_id.to_string(), status.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(TABLE, client_id));
            }
            Ok(())
        })
    }

    /// Records a successful upload; see
    /// [`LocalStore::mark_calculation_synced`].
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn mark_parameter_set_synced(
        &self,
        client_id: &ClientId,
        server_id: &str,
        server_timestamp: Timestamp,
        uploaded_version: Option<Timestamp>,
    ) -> StoreResult<bool> {
        self.transaction(|tx| {
            let synced = tx.execute(
                "UPDATE parameter_sets SET sync_status = 'synced', server_id = ?2, server_timestamp = ?3 \
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
                    "UPDATE parameter_sets SET server_id = ?2, server_timestamp = ?3, \
                     sync_status = CASE sync_status WHEN 'syncing' THEN 'pending' ELSE sync_status END \
                     WHERE client_id = ?1",
                    params![client_id.to_string(), server_id, ts(&server_timestamp)],
                )?;
            }
            Ok(synced > 0)
        })
    }

    /// Moves every `failed` parameter set back to `pending`.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn reset_failed_parameter_sets(&self) -> StoreResult<usize> {
        self.transaction(|tx| {
            Ok(tx.execute(
                "UPDATE parameter_sets SET sync_status = 'pending' WHERE sync_status = 'failed'",
                [],
            )?)
        })
    }
}
