//! Schema definition and migration.
//!
//! [`EXPECTED_TABLES`] is the one description of the schema. It creates the
//! tables on open and is what the structure integrity check compares the
//! live database against.

use crate::error::{StoreError, StoreResult};
use rusqlite::Connection;

/// Highest schema version this build creates and understands.
pub const SCHEMA_VERSION: u32 = 1;

/// Description of one expected table.
#[derive(Debug, Clone, Copy)]
pub struct TableSpec {
    /// Table name.
    pub name: &'static str,
    /// Columns that must exist.
    pub columns: &'static [&'static str],
    /// `CREATE TABLE` statement.
    pub create: &'static str,
    /// `CREATE INDEX` statements.
    pub indexes: &'static [&'static str],
}

/// Every table the store expects, in creation order.
pub const EXPECTED_TABLES: &[TableSpec] = &[
    TableSpec {
        name: "calculations",
        columns: &[
            "id",
            "server_id",
            "client_id",
            "calculation_type",
            "parameters",
            "result",
            "project_name",
            "notes",
            "created_at",
            "updated_at",
            "device_id",
            "user_id",
            "sync_status",
            "server_timestamp",
        ],
        create: "CREATE TABLE IF NOT EXISTS calculations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id TEXT,
            client_id TEXT,
            calculation_type TEXT NOT NULL,
            parameters TEXT NOT NULL,
            result TEXT NOT NULL,
            project_name TEXT,
            notes TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT,
            device_id TEXT NOT NULL,
            user_id TEXT,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            server_timestamp TEXT
        )",
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_calculations_sync_status ON calculations(sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_calculations_client_id ON calculations(client_id)",
            "CREATE INDEX IF NOT EXISTS idx_calculations_type ON calculations(calculation_type)",
        ],
    },
    TableSpec {
        name: "parameter_sets",
        columns: &[
            "id",
            "server_id",
            "client_id",
            "name",
            "calculation_type",
            "parameters",
            "is_preset",
            "tags",
            "created_at",
            "updated_at",
            "device_id",
            "sync_status",
            "server_timestamp",
        ],
        create: "CREATE TABLE IF NOT EXISTS parameter_sets (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            server_id TEXT,
            client_id TEXT,
            name TEXT NOT NULL,
            calculation_type TEXT NOT NULL,
            parameters TEXT NOT NULL,
            is_preset INTEGER NOT NULL DEFAULT 0,
            tags TEXT NOT NULL DEFAULT '[]',
            created_at TEXT NOT NULL,
            updated_at TEXT,
            device_id TEXT NOT NULL,
            sync_status TEXT NOT NULL DEFAULT 'pending',
            server_timestamp TEXT
        )",
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_parameter_sets_sync_status ON parameter_sets(sync_status)",
            "CREATE INDEX IF NOT EXISTS idx_parameter_sets_client_id ON parameter_sets(client_id)",
            "CREATE INDEX IF NOT EXISTS idx_parameter_sets_type ON parameter_sets(calculation_type)",
        ],
    },
    TableSpec {
        name: "user_settings",
        columns: &["key", "value", "updated_at"],
        create: "CREATE TABLE IF NOT EXISTS user_settings (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        indexes: &[],
    },
    TableSpec {
        name: "offline_queue",
        columns: &[
            "id",
            "operation",
            "entity_type",
            "entity_id",
            "payload",
            "priority",
            "depends_on",
            "created_at",
            "scheduled_at",
            "retry_count",
            "max_retries",
            "last_error",
            "status",
            "updated_at",
        ],
        create: "CREATE TABLE IF NOT EXISTS offline_queue (
            id TEXT PRIMARY KEY,
            operation TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            payload TEXT NOT NULL DEFAULT 'null',
            priority TEXT NOT NULL DEFAULT 'normal',
            depends_on TEXT,
            created_at TEXT NOT NULL,
            scheduled_at TEXT NOT NULL,
            retry_count INTEGER NOT NULL DEFAULT 0,
            max_retries INTEGER NOT NULL DEFAULT 5,
            last_error TEXT,
            status TEXT NOT NULL DEFAULT 'pending',
            updated_at TEXT NOT NULL
        )",
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_offline_queue_status ON offline_queue(status, scheduled_at)",
            "CREATE INDEX IF NOT EXISTS idx_offline_queue_entity ON offline_queue(entity_type, entity_id)",
        ],
    },
    TableSpec {
        name: "sync_checkpoints",
        columns: &["entity_type", "last_sync_at", "updated_at"],
        create: "CREATE TABLE IF NOT EXISTS sync_checkpoints (
            entity_type TEXT PRIMARY KEY,
            last_sync_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        indexes: &[],
    },
    TableSpec {
        name: "sync_conflicts",
        columns: &[
            "id",
            "entity_type",
            "entity_id",
            "kind",
            "local_snapshot",
            "remote_snapshot",
            "detected_at",
            "strategy",
            "resolved_by",
            "resolved_at",
        ],
        create: "CREATE TABLE IF NOT EXISTS sync_conflicts (
            id TEXT PRIMARY KEY,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            kind TEXT NOT NULL,
            local_snapshot TEXT NOT NULL,
            remote_snapshot TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            strategy TEXT,
            resolved_by TEXT,
            resolved_at TEXT
        )",
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_entity ON sync_conflicts(entity_type, entity_id)",
            "CREATE INDEX IF NOT EXISTS idx_sync_conflicts_kind ON sync_conflicts(kind)",
        ],
    },
    TableSpec {
        name: "integrity_issues",
        columns: &[
            "id",
            "category",
            "code",
            "severity",
            "table_name",
            "record_id",
            "description",
            "remedy",
            "detected_at",
            "fixed",
            "fixed_at",
            "fix_method",
        ],
        create: "CREATE TABLE IF NOT EXISTS integrity_issues (
            id TEXT PRIMARY KEY,
            category TEXT NOT NULL,
            code TEXT NOT NULL,
            severity TEXT NOT NULL,
            table_name TEXT NOT NULL,
            record_id TEXT,
            description TEXT NOT NULL,
            remedy TEXT,
            detected_at TEXT NOT NULL,
            fixed INTEGER NOT NULL DEFAULT 0,
            fixed_at TEXT,
            fix_method TEXT
        )",
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_integrity_issues_category ON integrity_issues(category, fixed)",
            "CREATE INDEX IF NOT EXISTS idx_integrity_issues_severity ON integrity_issues(severity)",
        ],
    },
    TableSpec {
        name: "data_backups",
        columns: &[
            "id",
            "name",
            "description",
            "file_path",
            "size_bytes",
            "checksum",
            "created_at",
            "table_counts",
            "automatic",
            "reason",
        ],
        create: "CREATE TABLE IF NOT EXISTS data_backups (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            description TEXT,
            file_path TEXT NOT NULL,
            size_bytes INTEGER NOT NULL,
            checksum TEXT NOT NULL,
            created_at TEXT NOT NULL,
            table_counts TEXT NOT NULL DEFAULT '{}',
            automatic INTEGER NOT NULL DEFAULT 0,
            reason TEXT NOT NULL
        )",
        indexes: &[
            "CREATE INDEX IF NOT EXISTS idx_data_backups_reason ON data_backups(reason, created_at)",
        ],
    },
    TableSpec {
        name: "device_info",
        columns: &[
            "id",
            "device_id",
            "display_name",
            "platform",
            "app_version",
            "updated_at",
        ],
        create: "CREATE TABLE IF NOT EXISTS device_info (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            device_id TEXT NOT NULL,
            display_name TEXT NOT NULL,
            platform TEXT NOT NULL,
            app_version TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        indexes: &[],
    },
];

/// Looks up a table description by name.
#[must_use]
pub fn table_spec(name: &str) -> Option<&'static TableSpec> {
    EXPECTED_TABLES.iter().find(|t| t.name == name)
}

/// Reads `PRAGMA user_version`.
pub fn schema_version(conn: &Connection) -> StoreResult<u32> {
    Ok(conn.pragma_query_value(None, "user_version", |row| row.get(0))?)
}

/// Returns true if the table exists.
pub fn table_exists(conn: &Connection, table: &str) -> StoreResult<bool> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
        [table],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Returns the column names of a table, empty if the table is missing.
pub fn table_columns(conn: &Connection, table: &str) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare("SELECT name FROM pragma_table_info(?1)")?;
    let columns = stmt
        .query_map([table], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

/// Creates missing tables and indexes and stamps the schema version.
///
/// # Errors
///
/// Returns [`StoreError::UnsupportedSchema`] if the database was written by
/// a newer build.
pub(crate) fn migrate(conn: &mut Connection) -> StoreResult<()> {
    let found = schema_version(conn)?;
    if found > SCHEMA_VERSION {
        return Err(StoreError::UnsupportedSchema {
            found,
            supported: SCHEMA_VERSION,
        });
    }

    let tx = conn.transaction()?;
    for table in EXPECTED_TABLES {
        tx.execute_batch(table.create)?;
        for index in table.indexes {
            tx.execute_batch(index)?;
        }
    }
    tx.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    tx.commit()?;

    if found < SCHEMA_VERSION {
        tracing::info!(from = found, to = SCHEMA_VERSION, "migrated store schema");
    }
    Ok(())
}
