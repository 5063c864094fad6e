//! The five integrity checks.
//!
//! Every check reads the live database through a plain [`Connection`] and
//! never writes. Row-level issues carry the row's `rowid` as `record_id`;
//! duplicate-identity issues carry the shared client id.

use calcsync_core::{
    CalculationType, CheckCategory, ConflictKind, EntityType, IntegrityIssue, IssueCode,
    QueueOperation, QueuePriority, QueueStatus, Severity, SyncStatus, Timestamp,
};
use calcsync_store::rusqlite::{Connection, ToSql};
use calcsync_store::schema::{self, EXPECTED_TABLES};
use calcsync_store::StoreResult;
use std::path::Path;
use std::time::{Duration, Instant};

/// Outcome of one check.
#[derive(Debug, Clone)]
pub struct CheckResult {
    /// Which check ran.
    pub category: CheckCategory,
    /// True when no issue is `error` or worse.
    pub passed: bool,
    /// Everything the check found.
    pub issues: Vec<IntegrityIssue>,
    /// Wall time the check took.
    pub duration: Duration,
}

impl CheckResult {
    /// Highest severity found, if any.
    #[must_use]
    pub fn worst(&self) -> Option<Severity> {
        self.issues.iter().map(|issue| issue.severity).max()
    }
}

/// Runs one check against `conn`.
///
/// # Errors
///
/// Returns SQLite errors from the queries themselves. Defects in the data
/// are reported as issues, not errors.
pub fn run_check(
    conn: &Connection,
    category: CheckCategory,
    now: Timestamp,
) -> StoreResult<CheckResult> {
    let started = Instant::now();
    let issues = match category {
        CheckCategory::Structure => structure(conn, now)?,
        CheckCategory::Content => content(conn, now)?,
        CheckCategory::Consistency => consistency(conn, now)?,
        CheckCategory::Corruption => corruption(conn, now)?,
        CheckCategory::Referential => referential(conn, now)?,
    };
    let passed = issues.iter().all(|issue| issue.severity < Severity::Error);
    for issue in &issues {
        tracing::warn!(
            category = %issue.category,
            code = %issue.code,
            severity = %issue.severity,
            table = %issue.table,
            record = ?issue.record_id,
            "{}",
            issue.description
        );
    }
    Ok(CheckResult {
        category,
        passed,
        issues,
        duration: started.elapsed(),
    })
}

/// True when `table` exists with every column in `columns`.
fn has_columns(conn: &Connection, table: &str, columns: &[&str]) -> StoreResult<bool> {
    let present = schema::table_columns(conn, table)?;
    Ok(columns.iter().all(|c| present.iter().any(|p| p == c)))
}

/// Runs `sql` and collects the first column of every row as text.
fn collect_text(conn: &Connection, sql: &str, params: &[&dyn ToSql]) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare(sql)?;
    let values = stmt
        .query_map(params, |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(values)
}

fn rowids(conn: &Connection, table: &str, predicate: &str) -> StoreResult<Vec<String>> {
    collect_text(
        conn,
        &format!("SELECT CAST(rowid AS TEXT) FROM {table} WHERE {predicate}"),
        &[],
    )
}

fn structure(conn: &Connection, now: Timestamp) -> StoreResult<Vec<IntegrityIssue>> {
    let mut issues = Vec::new();
    for table in EXPECTED_TABLES {
        if !schema::table_exists(conn, table.name)? {
            issues.push(
                IntegrityIssue::new(
                    IssueCode::MissingTable,
                    Severity::Critical,
                    table.name,
                    format!("table {} is missing", table.name),
                    now,
                )
                .with_remedy("restore from a backup"),
            );
            continue;
        }
        let present = schema::table_columns(conn, table.name)?;
        for column in table.columns {
            if !present.iter().any(|p| p == column) {
                issues.push(
                    IntegrityIssue::new(
                        IssueCode::MissingColumn,
                        Severity::Critical,
                        table.name,
                        format!("column {}.{column} is missing", table.name),
                        now,
                    )
                    .with_remedy("restore from a backup"),
                );
            }
        }
    }
    Ok(issues)
}

const IDENTITY_TABLES: &[&str] = &["calculations", "parameter_sets"];

pub(crate) const REQUIRED_TEXT: &[(&str, &str)] = &[
    ("calculations", "device_id"),
    ("parameter_sets", "device_id"),
    ("parameter_sets", "name"),
    ("offline_queue", "entity_id"),
    ("device_info", "device_id"),
];

pub(crate) const PAYLOAD_COLUMNS: &[(&str, &str)] = &[
    ("calculations", "parameters"),
    ("calculations", "result"),
    ("parameter_sets", "parameters"),
    ("parameter_sets", "tags"),
    ("user_settings", "value"),
    ("offline_queue", "payload"),
    ("sync_conflicts", "local_snapshot"),
    ("sync_conflicts", "remote_snapshot"),
];

fn content(conn: &Connection, now: Timestamp) -> StoreResult<Vec<IntegrityIssue>> {
    let mut issues = Vec::new();

    for table in IDENTITY_TABLES {
        if !has_columns(conn, table, &["client_id"])? {
            continue;
        }
        for rowid in rowids(conn, table, "client_id IS NULL OR trim(client_id) = ''")? {
            issues.push(
                IntegrityIssue::new(
                    IssueCode::MissingIdentity,
                    Severity::Error,
                    *table,
                    format!("{table} row {rowid} has no client id"),
                    now,
                )
                .with_record(rowid)
                .with_remedy("assign a new client id"),
            );
        }
    }

    for &(table, column) in REQUIRED_TEXT {
        if !has_columns(conn, table, &[column])? {
            continue;
        }
        let predicate = format!("{column} IS NULL OR trim({column}) = ''");
        for rowid in rowids(conn, table, &predicate)? {
            issues.push(
                IntegrityIssue::new(
                    IssueCode::EmptyRequiredField,
                    Severity::Error,
                    table,
                    format!("{table} row {rowid} has an empty {column}"),
                    now,
                )
                .with_record(rowid),
            );
        }
    }

    for &(table, column) in PAYLOAD_COLUMNS {
        if !has_columns(conn, table, &[column])? {
            continue;
        }
        let predicate = format!("{column} IS NOT NULL AND json_valid({column}) = 0");
        for rowid in rowids(conn, table, &predicate)? {
            issues.push(
                IntegrityIssue::new(
                    IssueCode::MalformedPayload,
                    Severity::Error,
                    table,
                    format!("{table} row {rowid}: {column} is not valid JSON"),
                    now,
                )
                .with_record(rowid)
                .with_remedy("drop the row"),
            );
        }
    }

    Ok(issues)
}

fn allowed<T: Copy>(values: &[T], text: fn(T) -> &'static str) -> Vec<&'static str> {
    values.iter().map(|v| text(*v)).collect()
}

/// Enumeration columns and their permitted values.
fn enum_columns() -> Vec<(&'static str, &'static str, Vec<&'static str>)> {
    let types = allowed(CalculationType::ALL, CalculationType::as_str);
    let statuses = allowed(SyncStatus::ALL, SyncStatus::as_str);
    let entities = allowed(EntityType::ALL, EntityType::as_str);
    vec![
        ("calculations", "calculation_type", types.clone()),
        ("calculations", "sync_status", statuses.clone()),
        ("parameter_sets", "calculation_type", types),
        ("parameter_sets", "sync_status", statuses),
        ("offline_queue", "operation", allowed(QueueOperation::ALL, QueueOperation::as_str)),
        ("offline_queue", "entity_type", entities.clone()),
        ("offline_queue", "priority", allowed(QueuePriority::ALL, QueuePriority::as_str)),
        ("offline_queue", "status", allowed(QueueStatus::ALL, QueueStatus::as_str)),
        ("sync_conflicts", "entity_type", entities),
        ("sync_conflicts", "kind", allowed(ConflictKind::ALL, ConflictKind::as_str)),
    ]
}

/// SQL predicate selecting rows whose `column` is outside `values`.
pub(crate) fn outside(column: &str, values: &[&str]) -> String {
    let list = values
        .iter()
        .map(|v| format!("'{v}'"))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{column} IS NULL OR {column} NOT IN ({list})")
}

/// Rows with an enumeration value no build understands, per table.
pub(crate) fn invalid_enum_rows(
    conn: &Connection,
) -> StoreResult<Vec<(&'static str, &'static str, String)>> {
    let mut rows = Vec::new();
    for (table, column, values) in enum_columns() {
        if !has_columns(conn, table, &[column])? {
            continue;
        }
        for rowid in rowids(conn, table, &outside(column, &values))? {
            rows.push((table, column, rowid));
        }
    }
    Ok(rows)
}

fn consistency(conn: &Connection, now: Timestamp) -> StoreResult<Vec<IntegrityIssue>> {
    let mut issues = Vec::new();

    for table in IDENTITY_TABLES {
        if !has_columns(conn, table, &["client_id", "created_at", "updated_at"])? {
            continue;
        }
        let duplicates = collect_text(
            conn,
            &format!(
                "SELECT client_id FROM {table} \
                 WHERE client_id IS NOT NULL AND trim(client_id) <> '' \
                 GROUP BY client_id HAVING COUNT(*) > 1"
            ),
            &[],
        )?;
        for client_id in duplicates {
            issues.push(
                IntegrityIssue::new(
                    IssueCode::DuplicateIdentity,
                    Severity::Warning,
                    *table,
                    format!("several {table} rows share client id {client_id}"),
                    now,
                )
                .with_record(client_id)
                .with_remedy("keep the most recent row"),
            );
        }

        let predicate = "updated_at IS NOT NULL AND updated_at < created_at";
        for rowid in rowids(conn, table, predicate)? {
            issues.push(
                IntegrityIssue::new(
                    IssueCode::TimestampInversion,
                    Severity::Warning,
                    *table,
                    format!("{table} row {rowid} was updated before it was created"),
                    now,
                )
                .with_record(rowid)
                .with_remedy("align updated_at to created_at"),
            );
        }
    }

    for (table, column, rowid) in invalid_enum_rows(conn)? {
        issues.push(
            IntegrityIssue::new(
                IssueCode::InvalidEnumValue,
                Severity::Error,
                table,
                format!("{table} row {rowid} has an unknown {column}"),
                now,
            )
            .with_record(rowid)
            .with_remedy("purge the row with a database repair"),
        );
    }

    Ok(issues)
}

fn corruption(conn: &Connection, now: Timestamp) -> StoreResult<Vec<IntegrityIssue>> {
    let lines = collect_text(conn, "PRAGMA integrity_check", &[])?;
    let issues = lines
        .into_iter()
        .filter(|line| line != "ok")
        .map(|line| {
            if line.to_ascii_lowercase().contains("index") {
                IntegrityIssue::new(IssueCode::IndexCorruption, Severity::Error, "*", line, now)
                    .with_remedy("rebuild indexes with a database repair")
            } else {
                IntegrityIssue::new(
                    IssueCode::StorageCorruption,
                    Severity::Critical,
                    "*",
                    line,
                    now,
                )
                .with_remedy("restore from a backup")
            }
        })
        .collect();
    Ok(issues)
}

pub(crate) const fn record_table(entity: EntityType) -> &'static str {
    match entity {
        EntityType::Calculation => "calculations",
        EntityType::ParameterSet => "parameter_sets",
    }
}

/// Queue items that depend on an item that no longer exists.
pub(crate) const DANGLING_DEPENDENCY: &str = "depends_on IS NOT NULL \
     AND depends_on NOT IN (SELECT id FROM offline_queue)";

fn referential(conn: &Connection, now: Timestamp) -> StoreResult<Vec<IntegrityIssue>> {
    let mut issues = Vec::new();
    let dangling = |table: &str, rowid: String, description: String| {
        IntegrityIssue::new(IssueCode::DanglingReference, Severity::Error, table, description, now)
            .with_record(rowid)
    };

    if has_columns(conn, "offline_queue", &["depends_on", "status"])? {
        for rowid in rowids(conn, "offline_queue", DANGLING_DEPENDENCY)? {
            issues.push(
                dangling(
                    "offline_queue",
                    rowid.clone(),
                    format!("queue row {rowid} depends on a missing item"),
                )
                .with_remedy("purge the row with a database repair"),
            );
        }

        for entity in EntityType::ALL {
            let target = record_table(*entity);
            if !has_columns(conn, target, &["client_id"])? {
                continue;
            }
            let predicate = format!(
                "entity_type = '{entity}' AND operation IN ('update', 'sync') \
                 AND status IN ('pending', 'processing') \
                 AND entity_id NOT IN (SELECT client_id FROM {target} WHERE client_id IS NOT NULL)"
            );
            for rowid in rowids(conn, "offline_queue", &predicate)? {
                issues.push(dangling(
                    "offline_queue",
                    rowid.clone(),
                    format!("queue row {rowid} targets a missing {entity}"),
                ));
            }
        }
    }

    if has_columns(conn, "sync_conflicts", &["entity_type", "entity_id", "resolved_at"])? {
        for entity in EntityType::ALL {
            let target = record_table(*entity);
            if !has_columns(conn, target, &["client_id"])? {
                continue;
            }
            let predicate = format!(
                "resolved_at IS NULL AND entity_type = '{entity}' \
                 AND entity_id NOT IN (SELECT client_id FROM {target} WHERE client_id IS NOT NULL)"
            );
            for rowid in rowids(conn, "sync_conflicts", &predicate)? {
                issues.push(dangling(
                    "sync_conflicts",
                    rowid.clone(),
                    format!("open conflict {rowid} refers to a missing {entity}"),
                ));
            }
        }
    }

    if has_columns(conn, "data_backups", &["id", "file_path"])? {
        let mut stmt = conn.prepare("SELECT CAST(rowid AS TEXT), id, file_path FROM data_backups")?;
        let backups = stmt
            .query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        for (rowid, id, file) in backups {
            if !Path::new(&file).is_file() {
                issues.push(
                    dangling("data_backups", rowid, format!("backup {id} has no file at {file}"))
                        .with_remedy("delete the backup entry"),
                );
            }
        }
    }

    Ok(issues)
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcsync_core::{Clock, ManualClock};
    use calcsync_store::LocalStore;

    fn now() -> Timestamp {
        ManualClock::at_millis(5_000).now()
    }

    fn check(store: &LocalStore, category: CheckCategory) -> CheckResult {
        store
            .with_connection(|conn| run_check(conn, category, now()))
            .unwrap()
    }

    fn exec(store: &LocalStore, sql: &str) {
        store
            .with_connection(|conn| Ok(conn.execute_batch(sql)?))
            .unwrap();
    }

    const CALC: &str = "INSERT INTO calculations \
        (client_id, calculation_type, parameters, result, created_at, updated_at, device_id, sync_status)";

    #[test]
    fn fresh_store_passes_everything() {
        let store = LocalStore::open_in_memory().unwrap();
        for category in CheckCategory::ALL {
            let result = check(&store, *category);
            assert!(result.passed, "{category}");
            assert!(result.issues.is_empty(), "{category}: {:?}", result.issues);
        }
    }

    #[test]
    fn missing_column_is_critical() {
        let store = LocalStore::open_in_memory().unwrap();
        exec(&store, "ALTER TABLE parameter_sets DROP COLUMN tags");
        let result = check(&store, CheckCategory::Structure);
        assert!(!result.passed);
        assert_eq!(result.issues.len(), 1);
        assert_eq!(result.issues[0].code, IssueCode::MissingColumn);
        assert_eq!(result.worst(), Some(Severity::Critical));
    }

    #[test]
    fn missing_table_is_critical() {
        let store = LocalStore::open_in_memory().unwrap();
        exec(&store, "DROP TABLE device_info");
        let result = check(&store, CheckCategory::Structure);
        assert_eq!(result.issues[0].code, IssueCode::MissingTable);
        assert_eq!(result.issues[0].table, "device_info");
    }

    #[test]
    fn content_finds_identity_and_payload_defects() {
        let store = LocalStore::open_in_memory().unwrap();
        exec(
            &store,
            &format!(
                "{CALC} VALUES (NULL, 'grounding', '{{}}', '{{}}', '2024-01-01T00:00:00.000Z', NULL, 'd', 'pending');
                 {CALC} VALUES ('a', 'grounding', '{{oops', '{{}}', '2024-01-01T00:00:00.000Z', NULL, 'd', 'pending');
                 {CALC} VALUES ('b', 'grounding', '{{}}', '{{}}', '2024-01-01T00:00:00.000Z', NULL, ' ', 'pending');"
            ),
        );
        let result = check(&store, CheckCategory::Content);
        let codes: Vec<_> = result.issues.iter().map(|i| i.code).collect();
        assert!(codes.contains(&IssueCode::MissingIdentity));
        assert!(codes.contains(&IssueCode::MalformedPayload));
        assert!(codes.contains(&IssueCode::EmptyRequiredField));
        assert!(result.issues.iter().all(|i| i.severity == Severity::Error));
        assert!(!result.passed);
    }

    #[test]
    fn consistency_finds_duplicates_inversions_and_bad_enums() {
        let store = LocalStore::open_in_memory().unwrap();
        exec(
            &store,
            &format!(
                "{CALC} VALUES ('dup', 'grounding', '{{}}', '{{}}', '2024-01-01T00:00:00.000Z', NULL, 'd', 'pending');
                 {CALC} VALUES ('dup', 'grounding', '{{}}', '{{}}', '2024-01-02T00:00:00.000Z', NULL, 'd', 'pending');
                 {CALC} VALUES ('late', 'grounding', '{{}}', '{{}}', '2024-01-05T00:00:00.000Z', '2024-01-01T00:00:00.000Z', 'd', 'pending');
                 {CALC} VALUES ('odd', 'arc_flash', '{{}}', '{{}}', '2024-01-01T00:00:00.000Z', NULL, 'd', 'pending');"
            ),
        );
        let result = check(&store, CheckCategory::Consistency);
        let dup = result
            .issues
            .iter()
            .find(|i| i.code == IssueCode::DuplicateIdentity)
            .unwrap();
        assert_eq!(dup.record_id.as_deref(), Some("dup"));
        assert_eq!(dup.severity, Severity::Warning);
        assert!(result.issues.iter().any(|i| i.code == IssueCode::TimestampInversion));
        let bad = result
            .issues
            .iter()
            .find(|i| i.code == IssueCode::InvalidEnumValue)
            .unwrap();
        assert!(bad.description.contains("calculation_type"));
        assert!(!result.passed);
    }

    #[test]
    fn warnings_alone_pass() {
        let store = LocalStore::open_in_memory().unwrap();
        exec(
            &store,
            &format!(
                "{CALC} VALUES ('late', 'grounding', '{{}}', '{{}}', '2024-01-05T00:00:00.000Z', '2024-01-01T00:00:00.000Z', 'd', 'pending');"
            ),
        );
        let result = check(&store, CheckCategory::Consistency);
        assert_eq!(result.worst(), Some(Severity::Warning));
        assert!(result.passed);
    }

    #[test]
    fn referential_finds_dangling_rows() {
        let store = LocalStore::open_in_memory().unwrap();
        exec(
            &store,
            "INSERT INTO offline_queue (id, operation, entity_type, entity_id, depends_on, created_at, scheduled_at, updated_at)
             VALUES ('q1', 'create', 'calculation', 'x', 'gone', '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z');
             INSERT INTO offline_queue (id, operation, entity_type, entity_id, created_at, scheduled_at, updated_at)
             VALUES ('q2', 'update', 'parameter_set', 'missing', '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z', '2024-01-01T00:00:00.000Z');
             INSERT INTO sync_conflicts (id, entity_type, entity_id, kind, local_snapshot, remote_snapshot, detected_at)
             VALUES ('c1', 'calculation', 'nobody', 'concurrent_modification', '{}', '{}', '2024-01-01T00:00:00.000Z');
             INSERT INTO data_backups (id, name, file_path, size_bytes, checksum, created_at, reason)
             VALUES ('b1', 'old', '/nonexistent/b1.db', 0, '', '2024-01-01T00:00:00.000Z', 'manual');",
        );
        let result = check(&store, CheckCategory::Referential);
        let tables: Vec<_> = result.issues.iter().map(|i| i.table.as_str()).collect();
        assert_eq!(
            tables,
            ["offline_queue", "offline_queue", "sync_conflicts", "data_backups"]
        );
        assert!(result
            .issues
            .iter()
            .all(|i| i.code == IssueCode::DanglingReference && i.severity == Severity::Error));
    }

    #[test]
    fn predicate_lists_values() {
        assert_eq!(
            outside("status", &["a", "b"]),
            "status IS NULL OR status NOT IN ('a', 'b')"
        );
    }
}
