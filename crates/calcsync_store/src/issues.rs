//! Persisted integrity findings.

use crate::error::{StoreError, StoreResult};
use crate::rows::{opt_ts, parse_enum, parse_opt_ts, parse_ts, parse_uuid, ts};
use crate::store::LocalStore;
use calcsync_core::{CheckCategory, FixMethod, IntegrityIssue, Timestamp};
use rusqlite::{params, OptionalExtension, Row};
use uuid::Uuid;

const TABLE: &str = "integrity_issues";

const COLUMNS: &str = "id, category, code, severity, table_name, record_id, description, remedy, \
                       detected_at, fixed, fixed_at, fix_method";

struct IssueRow {
    id: String,
    category: String,
    code: String,
    severity: String,
    table: String,
    record_id: Option<String>,
    description: String,
    remedy: Option<String>,
    detected_at: String,
    fixed: bool,
    fixed_at: Option<String>,
    fix_method: Option<String>,
}

impl IssueRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            category: row.get(1)?,
            code: row.get(2)?,
            severity: row.get(3)?,
            table: row.get(4)?,
            record_id: row.get(5)?,
            description: row.get(6)?,
            remedy: row.get(7)?,
            detected_at: row.get(8)?,
            fixed: row.get(9)?,
            fixed_at: row.get(10)?,
            fix_method: row.get(11)?,
        })
    }

    fn into_issue(self) -> StoreResult<IntegrityIssue> {
        Ok(IntegrityIssue {
            id: parse_uuid(TABLE, &self.id)?,
            category: parse_enum(TABLE, &self.category)?,
            code: parse_enum(TABLE, &self.code)?,
            severity: parse_enum(TABLE, &self.severity)?,
            table: self.table,
            record_id: self.record_id,
            description: self.description,
            remedy: self.remedy,
            detected_at: parse_ts(TABLE, &self.detected_at)?,
            fixed: self.fixed,
            fixed_at: parse_opt_ts(TABLE, self.fixed_at)?,
            fix_method: self
                .fix_method
                .map(|m| parse_enum::<FixMethod>(TABLE, &m))
                .transpose()?,
        })
    }
}

impl LocalStore {
    /// Persists a batch of findings atomically.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors. Nothing is written on failure.
    pub fn insert_issues(&self, issues: &[IntegrityIssue]) -> StoreResult<()> {
        self.transaction(|tx| {
            let mut stmt = tx.prepare(&format!(
                "INSERT OR REPLACE INTO integrity_issues ({COLUMNS}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)"
            ))?;
            for issue in issues {
                stmt.execute(params![
                    issue.id.to_string(),
                    issue.category.as_str(),
                    issue.code.as_str(),
                    issue.severity.as_str(),
                    issue.table,
                    issue.record_id,
                    issue.description,
                    issue.remedy,
                    ts(&issue.detected_at),
                    issue.fixed,
                    opt_ts(&issue.fixed_at),
                    issue.fix_method.map(FixMethod::as_str),
                ])?;
            }
            Ok(())
        })
    }

    /// Loads one finding.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if the row cannot be decoded.
    pub fn get_issue(&self, id: &Uuid) -> StoreResult<Option<IntegrityIssue>> {
        self.with_connection(|conn| {
            conn.query_row(
                &format!("SELECT {COLUMNS} FROM integrity_issues WHERE id = ?1"),
                [id.to_string()],
                IssueRow::from_row,
            )
            .optional()?
            .map(IssueRow::into_issue)
            .transpose()
        })
    }

    /// Findings, newest first, optionally limited to unfixed ones.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::CorruptRow`] if any row cannot be decoded.
    pub fn list_issues(&self, unfixed_only: bool) -> StoreResult<Vec<IntegrityIssue>> {
        let filter = if unfixed_only { "WHERE fixed = 0" } else { "" };
        self.with_connection(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {COLUMNS} FROM integrity_issues {filter} ORDER BY detected_at DESC, rowid ASC"
            ))?;
            let rows = stmt
                .query_map([], IssueRow::from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows.into_iter().map(IssueRow::into_issue).collect()
        })
    }

    /// Marks a finding fixed.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the issue does not exist.
    pub fn mark_issue_fixed(&self, id: &Uuid, method: FixMethod, at: Timestamp) -> StoreResult<()> {
        self.transaction(|tx| {
            let changed = tx.execute(
                "UPDATE integrity_issues SET fixed = 1, fixed_at = ?2, fix_method = ?3 WHERE id = ?1",
                params![id.to_string(), ts(&at), method.as_str()],
            )?;
            if changed == 0 {
                return Err(StoreError::not_found(TABLE, id));
            }
            Ok(())
        })
    }

    /// Drops unfixed findings of one category, or of all categories, so a
    /// re-run replaces rather than duplicates them.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn clear_unfixed_issues(&self, category: Option<CheckCategory>) -> StoreResult<usize> {
        self.transaction(|tx| {
            Ok(match category {
                Some(category) => tx.execute(
                    "DELETE FROM integrity_issues WHERE fixed = 0 AND category = ?1",
                    [category.as_str()],
                )?,
                None => tx.execute("DELETE FROM integrity_issues WHERE fixed = 0", [])?,
            })
        })
    }
}
