//! Integration tests for the local store.

use calcsync_core::{
    CalculationPatch, CalculationRecord, CalculationType, ClientId, Clock, DeviceId, EntityType,
    ManualClock, ParameterSet, SyncStatus,
};
use calcsync_store::{LocalStore, StoreConfig, StoreError, StoredRecord};
use proptest::prelude::*;
use serde_json::json;
use std::time::Duration;
use tempfile::tempdir;

fn calculation(clock: &ManualClock) -> CalculationRecord {
    CalculationRecord::new(
        CalculationType::VoltageDrop,
        json!({"current": 16.0, "length_m": 25.0}),
        json!({"drop_percent": 1.8}),
        DeviceId::new("phone-a"),
        clock.now(),
    )
}

#[test]
fn data_survives_reopen() {
    let dir = tempdir().unwrap();
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let record = calculation(&clock).with_project_name("Warehouse");

    {
        let store =
            LocalStore::open_with_clock(StoreConfig::new(dir.path()), clock.shared()).unwrap();
        store.save_calculation(&record).unwrap();
        store.set_checkpoint(EntityType::Calculation, clock.now()).unwrap();
        store.close().unwrap();
    }

    let store = LocalStore::open(StoreConfig::new(dir.path())).unwrap();
    let loaded = store.find_calculation(&record.client_id).unwrap().unwrap();
    assert_eq!(loaded.project_name.as_deref(), Some("Warehouse"));
    assert_eq!(loaded.created_at, record.created_at);
    assert_eq!(
        store.get_checkpoint(EntityType::Calculation).unwrap(),
        Some(clock.now())
    );
}

#[test]
fn edit_during_upload_stays_pending() {
    let clock = ManualClock::at_millis(0);
    let store = LocalStore::open_with_clock(StoreConfig::in_memory(), clock.shared()).unwrap();
    let record = calculation(&clock);
    let id = store.save_calculation(&record).unwrap();

    store
        .set_calculation_status(&record.client_id, SyncStatus::Syncing)
        .unwrap();
    let uploaded_version = store.get_calculation(id).unwrap().unwrap().updated_at;

    clock.advance(Duration::from_secs(2));
    store
        .update_calculation_fields(
            id,
            &CalculationPatch::new()
                .with_notes(Some("edited mid-flight".into()))
                .with_updated_at(clock.now()),
        )
        .unwrap();

    let became_synced = store
        .mark_calculation_synced(&record.client_id, "srv-1", clock.now(), uploaded_version)
        .unwrap();
    assert!(!became_synced);
    let after = store.get_calculation(id).unwrap().unwrap();
    assert_eq!(after.sync_status, SyncStatus::Pending);
    assert_eq!(after.server_id.as_deref(), Some("srv-1"));
}

#[test]
fn presets_are_protected() {
    let clock = ManualClock::at_millis(0);
    let store = LocalStore::open_in_memory().unwrap();
    let preset = ParameterSet::new(
        "IEC defaults",
        CalculationType::ShortCircuit,
        json!({"voltage": 400}),
        DeviceId::new("phone-a"),
        clock.now(),
    )
    .as_preset();
    let id = store.save_parameter_set(&preset).unwrap();
    assert!(matches!(
        store.delete_parameter_set(id),
        Err(StoreError::PresetImmutable(_))
    ));
    assert!(store
        .list_pending_records(EntityType::ParameterSet)
        .unwrap()
        .is_empty());
}

#[test]
fn generic_upsert_replaces_remote_version() {
    let clock = ManualClock::at_millis(0);
    let store = LocalStore::open_in_memory().unwrap();
    let local = calculation(&clock);
    store.save_calculation(&local).unwrap();

    let mut remote = local.clone();
    remote.notes = Some("from server".into());
    remote.sync_status = SyncStatus::Synced;
    remote.server_id = Some("srv-9".into());
    remote.server_timestamp = Some(clock.now());
    store.upsert_record(&StoredRecord::from(remote)).unwrap();

    let stored = store
        .find_record(EntityType::Calculation, &local.client_id)
        .unwrap()
        .unwrap();
    assert_eq!(stored.sync_status(), SyncStatus::Synced);
    assert_eq!(store.list_calculations().unwrap().len(), 1);
}

#[test]
fn unknown_client_id_status_change_fails() {
    let store = LocalStore::open_in_memory().unwrap();
    assert!(matches!(
        store.set_record_status(EntityType::Calculation, &ClientId::new(), SyncStatus::Synced),
        Err(StoreError::NotFound { .. })
    ));
}

fn calculation_type() -> impl Strategy<Value = CalculationType> {
    prop::sample::select(CalculationType::ALL.to_vec())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn saved_calculations_read_back_unchanged(
        kind in calculation_type(),
        current in 1u32..1000,
        project in proptest::option::of("[a-zA-Z0-9 ]{1,24}"),
        notes in proptest::option::of("[ -~]{0,40}"),
        offset_ms in 0i64..1_000_000,
    ) {
        let clock = ManualClock::at_millis(1_600_000_000_000 + offset_ms);
        let store = LocalStore::open_in_memory().unwrap();
        let mut record = CalculationRecord::new(
            kind,
            json!({"current": current}),
            json!({"ok": true}),
            DeviceId::new("prop-device"),
            clock.now(),
        );
        record.project_name = project;
        record.notes = notes;

        let id = store.save_calculation(&record).unwrap();
        let mut loaded = store.get_calculation(id).unwrap().unwrap();
        prop_assert_eq!(loaded.id, Some(id));
        loaded.id = None;
        prop_assert_eq!(loaded, record);
    }
}
