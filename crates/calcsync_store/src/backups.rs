//! Backup catalog.

use crate::error::{StoreError, StoreResult};
use crate::rows::{parse_enum, parse_ts, parse_uuid, ts};
use crate::store::LocalStore;
use calcsync_core::DataBackup;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeMap;
use std::path::PathBuf;
use uuid::Uuid;

const TABLE: &str = "data_backups";

const COLUMNS: &str = "id, name, description, file_path, size_bytes, checksum, created_at, \
                       table_counts, automatic, reason";

struct BackupRow {
    id: String,
    name: String,
    description: Option<String>,
    file_path: String,
    size_bytes: i64,
    checksum: String,
    created_at: String,
    table_counts: String,
    automatic: bool,
    reason: String,
}

impl BackupRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            description: row.get(2)?,
            file_path: row.get(3)?,
            size_bytes: row.get(4)?,
            checksum: row.get(5)?,
            created_at: row.get(6)?,
            table_counts: row.get(7)?,
            automatic: row.get(8)?,
            reason: row.get(9)?,
        })
    }

    fn into_backup(self) -> StoreResult<DataBackup> {
        let table_counts: BTreeMap<String, u64> = serde_json::from_str(&self.table_counts)
            .map_err(|e| StoreError::corrupt_row(TABLE, format!("table_counts: {e}")))?;
        Ok(DataBackup {
            id: parse_uuid(TABLE, &self.id)?,
            name: self.name,
            description: self.description,
            file_path: PathBuf::from(self.file_path),
            size_bytes: u64::try_from(self.size_bytes)
                .map_err(|_| StoreError::corrupt_row(TABLE, "negative size"))?,
            checksum: self.checksum,
            created_at: parse_ts(TABLE, &self.created_at)?,
            table_counts,
            automatic: self.automatic,
            reason: parse_enum(TABLE, &self.reason)?,
        })
    }
}

fn insert(conn: &Connection, backup: &DataBackup) -> StoreResult<()> {
    conn.execute(
        &format!(
            "INSERT OR REPLACE INTO data_backups ({COLUMNS}) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"
        ),
        params![
            backup.id.to_string(),
            backup.name,
            backup.description,
            backup.file_path.to_string_lossy().into_owned(),
            i64::try_from(backup.size_bytes).unwrap_or(i64::MAX),
            backup.checksum,
            ts(&backup.created_at),
            serde_json::to_string(&backup.table_counts)?,
            backup.automatic,
            backup.reason.as_str(),
        ],
    )?;
    Ok(())
}

impl LocalStore {
    /// Adds a backup to the catalog, replacing an entry with the same id.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn insert_backup(&self, backup: &DataBackup) -> StoreResult<()> {
        self.transaction(|tx| insert(tx, backup))
    }

    /// Loads one catalog entry.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn get_backup(&self, id: &Uuid) -> StoreResult<Option<DataBackup>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM data_backups WHERE id = ?1"),
                [id.to_string()],
                BackupRow::from_row,
            )
            .optional()?
            .map(BackupRow::into_backup)
            .transpose()
        })
    }

    /// The catalog, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_backups(&self) -> StoreResult<Vec<DataBackup>> {
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM data_backups ORDER BY created_at DESC, rowid DESC"
            ))?;
            let rows = stmt
                .query_map([], BackupRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(BackupRow::into_backup).collect()
        })
    }

    /// Removes a catalog entry. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn delete_backup(&self, id: &Uuid) -> StoreResult<bool> {
        self.transaction(|tx| {
            Ok(tx.execute("DELETE FROM data_backups WHERE id = ?1", [id.to_string()])? > 0)
        })
    }

    /// Replaces the whole catalog. Used after a restore, when the restored
    /// database carries the catalog as it was at backup time.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors. The previous catalog is kept on failure.
    pub fn replace_backups(&self, backups: &[DataBackup]) -> StoreResult<()> {
        self.transaction(|tx| {
            tx.execute("DELETE FROM data_backups", [])?;
            for backup in backups {
                insert(tx, backup)?;
            }
            Ok(())
        })
    }
}
