//! Safe fixes and the destructive steps of a database repair.

use crate::checks::{invalid_enum_rows, DANGLING_DEPENDENCY, PAYLOAD_COLUMNS, REQUIRED_TEXT};
use calcsync_core::{ClientId, FixMethod, IntegrityIssue, IssueCode, Severity};
use calcsync_store::rusqlite::{params, Connection};
use calcsync_store::schema;
use calcsync_store::StoreResult;

/// Returns true if `issue` may be fixed without a person looking at it.
///
/// Critical issues never qualify, whatever the ceiling.
#[must_use]
pub fn auto_fixable(issue: &IntegrityIssue, ceiling: Severity) -> bool {
    !issue.fixed
        && issue.severity < Severity::Critical
        && issue.severity <= ceiling
        && matches!(
            issue.code,
            IssueCode::MissingIdentity
                | IssueCode::MalformedPayload
                | IssueCode::DuplicateIdentity
                | IssueCode::TimestampInversion
        )
}

/// Applies the known safe fix for `issue`.
///
/// Every fix re-checks the defect in its `WHERE` clause, so a row that was
/// corrected after the issue was recorded is left alone. Returns `None`
/// when nothing changed, when the issue has no safe fix, or when it names a
/// table the schema does not know.
pub(crate) fn apply_fix(
    conn: &Connection,
    issue: &IntegrityIssue,
) -> StoreResult<Option<FixMethod>> {
    let Some(table) = schema::table_spec(&issue.table).map(|spec| spec.name) else {
        return Ok(None);
    };
    let Some(record) = issue.record_id.as_deref() else {
        return Ok(None);
    };

    let (changed, method) = match issue.code {
        IssueCode::MissingIdentity => {
            let changed = conn.execute(
                &format!(
                    "UPDATE {table} SET client_id = ?1 \
                     WHERE rowid = ?2 AND (client_id IS NULL OR trim(client_id) = '')"
                ),
                params![ClientId::new().to_string(), record],
            )?;
            (changed, FixMethod::AssignedIdentity)
        }
        IssueCode::MalformedPayload => {
            let Some(malformed) = malformed_payload_predicate(conn, table)? else {
                return Ok(None);
            };
            let changed = conn.execute(
                &format!("DELETE FROM {table} WHERE rowid = ?1 AND ({malformed})"),
                [record],
            )?;
            (changed, FixMethod::DroppedRow)
        }
        IssueCode::DuplicateIdentity => {
            let removed = conn.execute(
                &format!(
                    "DELETE FROM {table} WHERE client_id = ?1 AND rowid <> (\
                         SELECT rowid FROM {table} WHERE client_id = ?1 \
                         ORDER BY coalesce(updated_at, created_at) DESC, rowid DESC LIMIT 1)"
                ),
                [record],
            )?;
            tracing::debug!(table, client_id = record, removed, "removed duplicate rows");
            (removed, FixMethod::Deduplicated)
        }
        IssueCode::TimestampInversion => {
            let changed = conn.execute(
                &format!(
                    "UPDATE {table} SET updated_at = created_at \
                     WHERE rowid = ?1 AND updated_at IS NOT NULL AND updated_at < created_at"
                ),
                [record],
            )?;
            (changed, FixMethod::AlignedTimestamp)
        }
        _ => return Ok(None),
    };

    if changed == 0 {
        tracing::debug!(
            table,
            record,
            code = %issue.code,
            "issue no longer present, nothing fixed"
        );
        return Ok(None);
    }
    Ok(Some(method))
}

/// `OR` of the invalid-JSON tests for the payload columns `table` has.
fn malformed_payload_predicate(conn: &Connection, table: &str) -> StoreResult<Option<String>> {
    let present = schema::table_columns(conn, table)?;
    let tests: Vec<String> = PAYLOAD_COLUMNS
        .iter()
        .filter(|(t, column)| *t == table && present.iter().any(|p| p == column))
        .map(|(_, column)| format!("({column} IS NOT NULL AND json_valid({column}) = 0)"))
        .collect();
    Ok((!tests.is_empty()).then(|| tests.join(" OR ")))
}

/// True if `table` still has a row with this `rowid`.
pub(crate) fn row_exists(conn: &Connection, table: &str, rowid: &str) -> StoreResult<bool> {
    let Some(spec) = schema::table_spec(table) else {
        return Ok(false);
    };
    if !schema::table_exists(conn, spec.name)? {
        return Ok(false);
    }
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE rowid = ?1", spec.name),
        [rowid],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Rebuilds every index.
pub(crate) fn reindex(conn: &Connection) -> StoreResult<()> {
    conn.execute_batch("REINDEX")?;
    Ok(())
}

/// Deletes rows no safe fix can save: unknown enumeration values, empty
/// required fields and queue items whose dependency is gone.
///
/// Returns the number of rows deleted.
pub(crate) fn purge_unrepairable(conn: &Connection) -> StoreResult<usize> {
    let mut purged = 0;

    for (table, column, rowid) in invalid_enum_rows(conn)? {
        purged += conn.execute(&format!("DELETE FROM {table} WHERE rowid = ?1"), [rowid.as_str()])?;
        tracing::info!(table, column, rowid = %rowid, "purged row with unknown value");
    }

    for &(table, column) in REQUIRED_TEXT {
        let present = schema::table_columns(conn, table)?;
        if !present.iter().any(|p| p == column) {
            continue;
        }
        let removed = conn.execute(
            &format!("DELETE FROM {table} WHERE {column} IS NULL OR trim({column}) = ''"),
            [],
        )?;
        if removed > 0 {
            tracing::info!(table, column, removed, "purged rows with empty required field");
        }
        purged += removed;
    }

    if schema::table_exists(conn, "offline_queue")? {
        // Removing an item can orphan its own dependents.
        loop {
            let removed = conn.execute(
                &format!("DELETE FROM offline_queue WHERE {DANGLING_DEPENDENCY}"),
                [],
            )?;
            if removed == 0 {
                break;
            }
            tracing::info!(removed, "purged queue items with missing dependencies");
            purged += removed;
        }
    }

    Ok(purged)
}
