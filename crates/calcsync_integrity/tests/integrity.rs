//! End-to-end integrity scenarios against a file-backed store.

use calcsync_core::{
    BackupReason, CalculationRecord, CalculationType, CheckCategory, Clock, DataBackup, DeviceId,
    IntegrityIssue, IssueCode, ManualClock, Severity,
};
use calcsync_integrity::{
    auto_fixable, file_checksum, DataIntegrityService, IntegrityConfig, IntegrityError,
};
use calcsync_store::rusqlite::Connection;
use calcsync_store::{LocalStore, StoreConfig};
use proptest::prelude::*;
use serde_json::json;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use tempfile::tempdir;

fn open(root: &Path, clock: &ManualClock) -> DataIntegrityService {
    let store =
        Arc::new(LocalStore::open_with_clock(StoreConfig::new(root), clock.shared()).unwrap());
    DataIntegrityService::new(store, IntegrityConfig::new())
}

fn save(service: &DataIntegrityService, clock: &ManualClock, notes: &str) {
    let mut record = CalculationRecord::new(
        CalculationType::VoltageDrop,
        json!({"length_m": 45, "current_a": 32}),
        json!({"drop_pct": 2.1}),
        DeviceId::new("tablet"),
        clock.now(),
    );
    record.notes = Some(notes.into());
    service.store().save_calculation(&record).unwrap();
}

fn notes(service: &DataIntegrityService) -> Vec<String> {
    service
        .store()
        .list_calculations()
        .unwrap()
        .into_iter()
        .filter_map(|r| r.notes)
        .collect()
}

#[test]
fn tampered_backup_is_refused_and_store_untouched() {
    let temp = tempdir().unwrap();
    let clock = ManualClock::at_millis(1_000);
    let service = open(temp.path(), &clock);

    save(&service, &clock, "original");
    let backup = service.create_backup("base", None, BackupReason::Manual).unwrap();
    save(&service, &clock, "newer");

    let mut bytes = fs::read(&backup.file_path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0xff;
    fs::write(&backup.file_path, bytes).unwrap();

    assert!(!service.verify_backup(backup.id).unwrap());
    let err = service.restore_backup(backup.id).unwrap_err();
    assert!(matches!(err, IntegrityError::ChecksumMismatch { .. }));
    assert!(err.is_corruption());

    let mut kept = notes(&service);
    kept.sort();
    assert_eq!(kept, ["newer", "original"]);
}

#[test]
fn missing_column_is_critical_and_never_auto_fixed() {
    let temp = tempdir().unwrap();
    let clock = ManualClock::at_millis(1_000);
    let service = open(temp.path(), &clock);
    service
        .store()
        .with_connection(|conn| {
            Ok(conn.execute_batch("ALTER TABLE calculations DROP COLUMN notes")?)
        })
        .unwrap();

    let result = service.run_check(CheckCategory::Structure).unwrap();
    assert!(!result.passed);
    let issue = &result.issues[0];
    assert_eq!(issue.code, IssueCode::MissingColumn);
    assert_eq!(issue.severity, Severity::Critical);

    let report = service.auto_fix_issues(Severity::Error).unwrap();
    assert!(report.fixed.is_empty());
    assert_eq!(report.remaining, 1);
    let open = service.list_issues(true).unwrap();
    assert_eq!(open.len(), 1);
    assert!(!open[0].fixed);
}

#[test]
fn repair_takes_an_emergency_backup_first() {
    let temp = tempdir().unwrap();
    let clock = ManualClock::at_millis(1_000);
    let service = open(temp.path(), &clock);
    save(&service, &clock, "fine");
    service
        .store()
        .with_connection(|conn| {
            Ok(conn.execute_batch(
                "UPDATE calculations SET sync_status = 'misplaced'",
            )?)
        })
        .unwrap();

    let report = service.repair_database().unwrap();
    assert_eq!(report.purged, 1);
    assert!(report.passed);
    assert!(notes(&service).is_empty());

    // The emergency copy still has the row the repair purged.
    let backup = &report.emergency_backup;
    assert!(backup.automatic);
    assert_eq!(backup.table_counts["calculations"], 1);
    let copy = Connection::open(&backup.file_path).unwrap();
    let status: String = copy
        .query_row("SELECT sync_status FROM calculations", [], |row| row.get(0))
        .unwrap();
    assert_eq!(status, "misplaced");
    assert!(service.verify_backup(backup.id).unwrap());
}

#[test]
fn restore_rolls_back_when_the_backup_fails_validation() {
    let temp = tempdir().unwrap();
    let clock = ManualClock::at_millis(1_000);
    let service = open(temp.path(), &clock);
    save(&service, &clock, "live");
    let backup = service.create_backup("broken", None, BackupReason::Manual).unwrap();

    // Damage the copy's schema, then re-record a matching checksum so the
    // file passes verification and fails only the post-restore checks.
    {
        let copy = Connection::open(&backup.file_path).unwrap();
        copy.execute_batch("ALTER TABLE parameter_sets DROP COLUMN tags")
            .unwrap();
    }
    let resealed = DataBackup {
        checksum: file_checksum(&backup.file_path).unwrap(),
        size_bytes: fs::metadata(&backup.file_path).unwrap().len(),
        ..backup.clone()
    };
    service.store().insert_backup(&resealed).unwrap();
    save(&service, &clock, "after backup");

    let err = service.restore_backup(backup.id).unwrap_err();
    assert!(matches!(err, IntegrityError::RestoreRejected(ref msg) if msg.contains("tags")));

    let mut kept = notes(&service);
    kept.sort();
    assert_eq!(kept, ["after backup", "live"]);
    assert!(service.run_check(CheckCategory::Structure).unwrap().passed);
}

proptest! {
    #[test]
    fn critical_issues_are_never_auto_fixable(
        code in prop::sample::select(IssueCode::ALL.to_vec()),
        ceiling in prop::sample::select(Severity::ALL.to_vec()),
    ) {
        let issue = IntegrityIssue::new(
            code,
            Severity::Critical,
            "calculations",
            "generated",
            ManualClock::at_millis(0).now(),
        );
        prop_assert!(!auto_fixable(&issue, ceiling));
    }

    #[test]
    fn fixes_never_exceed_the_ceiling(
        code in prop::sample::select(IssueCode::ALL.to_vec()),
        severity in prop::sample::select(Severity::ALL.to_vec()),
        ceiling in prop::sample::select(Severity::ALL.to_vec()),
    ) {
        let at = ManualClock::at_millis(0).now();
        let issue = IntegrityIssue::new(code, severity, "calculations", "generated", at);
        if auto_fixable(&issue, ceiling) {
            prop_assert!(severity <= ceiling);
        }
    }
}
