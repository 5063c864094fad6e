//! Multi-device and failure scenarios.

use calcsync_core::{
    EntityType, NewQueueItem, OfflineQueueItem, QueueOperation, QueuePriority, QueueStatus,
    SyncStatus,
};
use calcsync_engine::{
    OfflineQueueManager, QueueConfig, RetryConfig, SyncConfig, SyncError, SyncResult,
};
use calcsync_testkit::prelude::*;
use parking_lot::Mutex;
use std::time::Duration;
use tracing::Level;

#[test]
fn critical_item_drains_before_older_normal_item() {
    let store = TestStore::memory();
    let queue = OfflineQueueManager::new(store.shared(), QueueConfig::new());

    let normal = queue
        .enqueue(NewQueueItem::new(QueueOperation::Update, EntityType::Calculation, "p2"))
        .unwrap();
    store.clock.advance(Duration::from_secs(1));
    let critical = queue
        .enqueue(
            NewQueueItem::new(QueueOperation::Update, EntityType::Calculation, "p1")
                .with_priority(QueuePriority::Critical),
        )
        .unwrap();

    let order = Mutex::new(Vec::new());
    let executor = |item: &OfflineQueueItem| -> SyncResult<()> {
        order.lock().push(item.id);
        Ok(())
    };
    let report = queue.drain(&executor).unwrap();
    assert_eq!(report.report().unwrap().completed, 2);
    assert_eq!(order.into_inner(), [critical, normal]);
}

#[test]
fn dependent_item_waits_for_its_dependency() {
    let store = TestStore::memory();
    let queue = OfflineQueueManager::new(
        store.shared(),
        QueueConfig::new().with_retry(RetryConfig::immediate()),
    );
    let first = queue
        .enqueue(NewQueueItem::new(QueueOperation::Create, EntityType::ParameterSet, "a"))
        .unwrap();
    let second = queue
        .enqueue(
            NewQueueItem::new(QueueOperation::Update, EntityType::ParameterSet, "a")
                .with_priority(QueuePriority::Critical)
                .depending_on(first),
        )
        .unwrap();

    // The dependency fails once, so the dependent must sit out the drain.
    let attempts = Mutex::new(Vec::new());
    let executor = |item: &OfflineQueueItem| -> SyncResult<()> {
        attempts.lock().push(item.id);
        if item.id == first && item.retry_count == 0 {
            Err(SyncError::network("flaky"))
        } else {
            Ok(())
        }
    };
    queue.drain(&executor).unwrap();
    assert_eq!(*attempts.lock(), [first]);

    queue.drain(&executor).unwrap();
    assert_eq!(*attempts.lock(), [first, first, second]);
    assert_eq!(queue.stats().unwrap().completed, 2);
}

#[test]
fn item_fails_after_exhausting_retries() {
    let fleet = Fleet::new();
    let phone = TestDevice::with_config(
        "phone",
        &fleet.clock,
        &fleet.server,
        SyncConfig::new(),
        QueueConfig::new()
            .with_max_retries(3)
            .with_retry(RetryConfig::immediate()),
    );
    let saved = phone
        .writer
        .save_calculation(sample_calculation("phone", &fleet.clock))
        .unwrap();
    phone.transport().fail_every(1);

    for _ in 0..2 {
        let outcome = phone.sync.drain_queue(&fleet.credentials).unwrap();
        assert_eq!(outcome.report().unwrap().retried, 1);
    }
    let outcome = phone.sync.drain_queue(&fleet.credentials).unwrap();
    assert_eq!(outcome.report().unwrap().failed, 1);

    // A failed item is left alone until someone resets it.
    let outcome = phone.sync.drain_queue(&fleet.credentials).unwrap();
    assert_eq!(outcome.report().unwrap().processed, 0);
    let failed = phone.queue.list(Some(QueueStatus::Failed)).unwrap();
    assert_eq!(failed.len(), 1);
    assert_eq!(failed[0].retry_count, 3);

    // The record itself is still waiting to go up.
    let row = phone.store.find_calculation(&saved.client_id).unwrap().unwrap();
    assert_eq!(row.sync_status, SyncStatus::Pending);

    phone.transport().heal();
    assert_eq!(phone.queue.reset_all_failed().unwrap(), 1);
    let outcome = phone.sync.drain_queue(&fleet.credentials).unwrap();
    assert_eq!(outcome.report().unwrap().completed, 1);
    assert_eq!(fleet.server_records(), 1);
}

#[test]
fn flaky_network_recovers_on_next_pass() {
    let fleet = Fleet::new();
    let phone = fleet.device("phone");
    let saved = phone
        .writer
        .save_calculation(sample_calculation("phone", &fleet.clock))
        .unwrap();

    // Registration and the upload both fail; the download still runs.
    phone.transport().fail_next(2);
    let report = phone.sync(&fleet.credentials);
    assert_eq!(report.deferred, 1);
    assert_eq!(report.uploaded, 0);
    assert_eq!(report.errors.len(), 2);
    assert_eq!(phone.transport().failures(), 2);

    fleet.tick(Duration::from_secs(30));
    let report = phone.sync(&fleet.credentials);
    assert!(report.is_clean());
    assert_eq!(report.uploaded, 1);
    let row = phone.store.find_calculation(&saved.client_id).unwrap().unwrap();
    assert_eq!(row.sync_status, SyncStatus::Synced);
    assert_eq!(fleet.server_records(), 1);
}

#[test]
fn sync_diagnostics_are_captured() {
    let fleet = Fleet::new();
    let phone = fleet.device("phone");
    let saved = phone
        .writer
        .save_calculation(sample_calculation("phone", &fleet.clock))
        .unwrap();

    let (logs, _guard) = LogCapture::start();
    phone.transport().fail_next(2);
    phone.sync(&fleet.credentials);

    assert!(logs.contains("sync pass started"));
    assert!(logs.contains("device registration failed"));

    let uploads = logs.matching("upload failed");
    assert_eq!(uploads.len(), 1);
    assert_eq!(uploads[0].level, Level::WARN);
    let client_id = saved.client_id.to_string();
    assert_eq!(uploads[0].field("client_id"), Some(client_id.as_str()));
    assert_eq!(uploads[0].field("status"), Some("pending"));

    let finished = logs.matching("sync pass finished");
    assert_eq!(finished.len(), 1);
    assert_eq!(finished[0].field("deferred"), Some("1"));
    assert_eq!(finished[0].field("uploaded"), Some("0"));
}

#[test]
fn same_client_id_uploaded_twice_is_one_server_row() {
    let fleet = Fleet::new();
    let phone = fleet.device("phone");
    let saved = phone
        .writer
        .save_calculation(sample_calculation("phone", &fleet.clock))
        .unwrap();
    phone.sync(&fleet.credentials);

    // Pretend the acknowledgement was lost and upload again.
    phone
        .store
        .set_record_status(EntityType::Calculation, &saved.client_id, SyncStatus::Pending)
        .unwrap();
    fleet.tick(Duration::from_secs(5));
    phone.sync(&fleet.credentials);

    assert_eq!(fleet.server_records(), 1);
}

#[test]
fn upload_interrupted_mid_flight_reaches_the_server() {
    let fleet = Fleet::new();
    let phone = fleet.device("phone");
    let saved = phone
        .writer
        .save_calculation(sample_calculation("phone", &fleet.clock))
        .unwrap();
    // The app died after marking the row but before the upload finished.
    phone
        .store
        .set_record_status(EntityType::Calculation, &saved.client_id, SyncStatus::Syncing)
        .unwrap();

    let report = phone.sync(&fleet.credentials);
    assert_eq!(report.uploaded, 1);
    let row = phone.store.find_calculation(&saved.client_id).unwrap().unwrap();
    assert_eq!(row.sync_status, SyncStatus::Synced);
    assert_eq!(fleet.server_records(), 1);
}
