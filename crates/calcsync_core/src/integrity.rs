//! Integrity issues.

use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

text_enum! {
    /// Family of integrity check.
    pub enum CheckCategory {
        /// Expected tables and columns.
        Structure => "structure",
        /// Required fields and parseable payloads.
        Content => "content",
        /// Duplicates, timestamp order, enumeration values.
        Consistency => "consistency",
        /// Engine-level corruption.
        Corruption => "corruption",
        /// Dangling references between tables.
        Referential => "referential",
    }
}

text_enum! {
    /// Issue severity, ascending.
    pub enum Severity {
        /// Informational.
        Info => "info",
        /// Degraded but usable.
        Warning => "warning",
        /// Data is wrong.
        Error => "error",
        /// The store cannot be trusted.
        Critical => "critical",
    }
}

text_enum! {
    /// The specific defect an issue describes.
    pub enum IssueCode {
        /// An expected table does not exist.
        MissingTable => "missing_table",
        /// An expected column does not exist.
        MissingColumn => "missing_column",
        /// A row has no client identity.
        MissingIdentity => "missing_identity",
        /// A required text field is empty.
        EmptyRequiredField => "empty_required_field",
        /// A JSON payload column does not parse.
        MalformedPayload => "malformed_payload",
        /// Several rows share one client identity.
        DuplicateIdentity => "duplicate_identity",
        /// `updated_at` precedes `created_at`.
        TimestampInversion => "timestamp_inversion",
        /// An enumeration column holds an unknown value.
        InvalidEnumValue => "invalid_enum_value",
        /// Page or b-tree damage.
        StorageCorruption => "storage_corruption",
        /// Index content disagrees with its table.
        IndexCorruption => "index_corruption",
        /// A reference points at a row or file that does not exist.
        DanglingReference => "dangling_reference",
    }
}

impl IssueCode {
    /// Check family that reports this code.
    #[must_use]
    pub const fn category(self) -> CheckCategory {
        match self {
            IssueCode::MissingTable | IssueCode::MissingColumn => CheckCategory::Structure,
            IssueCode::MissingIdentity
            | IssueCode::EmptyRequiredField
            | IssueCode::MalformedPayload => CheckCategory::Content,
            IssueCode::DuplicateIdentity
            | IssueCode::TimestampInversion
            | IssueCode::InvalidEnumValue => CheckCategory::Consistency,
            IssueCode::StorageCorruption | IssueCode::IndexCorruption => CheckCategory::Corruption,
            IssueCode::DanglingReference => CheckCategory::Referential,
        }
    }
}

text_enum! {
    /// How an issue was fixed.
    pub enum FixMethod {
        /// A fresh client identity was assigned.
        AssignedIdentity => "assigned_identity",
        /// The unparsable row was dropped.
        DroppedRow => "dropped_row",
        /// Duplicates removed, most recent row kept.
        Deduplicated => "deduplicated",
        /// `updated_at` aligned to `created_at`.
        AlignedTimestamp => "aligned_timestamp",
        /// Indexes rebuilt.
        Reindexed => "reindexed",
        /// Unrepairable row purged during repair.
        Purged => "purged",
    }
}

/// A single finding of an integrity check.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntegrityIssue {
    /// Issue id.
    pub id: Uuid,
    /// Check family.
    pub category: CheckCategory,
    /// Exact defect.
    pub code: IssueCode,
    /// Severity.
    pub severity: Severity,
    /// Affected table.
    pub table: String,
    /// Affected row, if the issue is row-level.
    pub record_id: Option<String>,
    /// Human-readable description.
    pub description: String,
    /// Suggested remedy.
    pub remedy: Option<String>,
    /// Detection time.
    pub detected_at: Timestamp,
    /// Whether the issue has been fixed.
    pub fixed: bool,
    /// When it was fixed.
    pub fixed_at: Option<Timestamp>,
    /// How it was fixed.
    pub fix_method: Option<FixMethod>,
}

impl IntegrityIssue {
    /// Creates an unfixed issue.
    pub fn new(
        code: IssueCode,
        severity: Severity,
        table: impl Into<String>,
        description: impl Into<String>,
        detected_at: Timestamp,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            category: code.category(),
            code,
            severity,
            table: table.into(),
            record_id: None,
            description: description.into(),
            remedy: None,
            detected_at,
            fixed: false,
            fixed_at: None,
            fix_method: None,
        }
    }

    /// Attaches the affected row.
    #[must_use]
    pub fn with_record(mut self, record_id: impl Into<String>) -> Self {
        self.record_id = Some(record_id.into());
        self
    }

    /// Attaches a suggested remedy.
    #[must_use]
    pub fn with_remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remedy = Some(remedy.into());
        self
    }

    /// Marks the issue fixed.
    pub fn mark_fixed(&mut self, method: FixMethod, at: Timestamp) {
        self.fixed = true;
        self.fixed_at = Some(at);
        self.fix_method = Some(method);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::{Clock, ManualClock};

    #[test]
    fn severity_is_ordered() {
        assert!(Severity::Critical > Severity::Error);
        assert!(Severity::Error > Severity::Warning);
        assert!(Severity::Warning > Severity::Info);
    }

    #[test]
    fn code_determines_category() {
        let issue = IntegrityIssue::new(
            IssueCode::MissingColumn,
            Severity::Critical,
            "parameter_sets",
            "column tags is missing",
            ManualClock::at_millis(0).now(),
        );
        assert_eq!(issue.category, CheckCategory::Structure);
        assert!(!issue.fixed);
    }

    #[test]
    fn every_code_has_a_category() {
        for code in IssueCode::ALL {
            assert!(CheckCategory::ALL.contains(&code.category()));
        }
    }

    #[test]
    fn mark_fixed_records_method() {
        let clock = ManualClock::at_millis(10);
        let mut issue = IntegrityIssue::new(
            IssueCode::TimestampInversion,
            Severity::Warning,
            "calculations",
            "updated_at precedes created_at",
            clock.now(),
        )
        .with_record("42");
        issue.mark_fixed(FixMethod::AlignedTimestamp, clock.now());
        assert!(issue.fixed);
        assert_eq!(issue.fix_method, Some(FixMethod::AlignedTimestamp));
        assert_eq!(issue.record_id.as_deref(), Some("42"));
    }
}
