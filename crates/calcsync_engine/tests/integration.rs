//! Integration tests for the sync engine against the reference server.

use calcsync_core::{
    CalculationRecord, CalculationType, Clock, ClientId, DeviceId, DeviceInfo, EntityType,
    ManualClock, Scheduler, SyncStatus,
};
use calcsync_engine::{
    register_periodic_sync, BackgroundRunner, HttpRemoteStore, LocalFirstWriter, LoopbackClient,
    OfflineQueueManager, QueueConfig, RemoteState, SyncConfig, SyncError, SyncOrchestrator,
    SyncOutcome,
};
use calcsync_protocol::{Credentials, HttpRequest, HttpResponse, HttpService, Method};
use calcsync_server::{ServerConfig, SyncServer};
use calcsync_store::{LocalStore, StoreConfig};
use parking_lot::Mutex;
use serde_json::json;
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

type Remote<S> = HttpRemoteStore<LoopbackClient<S>>;

/// One device: its store, writer and orchestrator.
struct Device<S: HttpService> {
    store: Arc<LocalStore>,
    writer: LocalFirstWriter,
    remote: Arc<Remote<S>>,
    sync: SyncOrchestrator<Remote<S>>,
}

impl<S: HttpService> Device<S> {
    fn new(name: &str, clock: &ManualClock, service: S, config: SyncConfig) -> Self {
        let store = Arc::new(
            LocalStore::open_with_clock(StoreConfig::in_memory(), clock.shared()).unwrap(),
        );
        let queue = Arc::new(OfflineQueueManager::new(Arc::clone(&store), QueueConfig::new()));
        let remote = Arc::new(HttpRemoteStore::new(
            LoopbackClient::new(service),
            Duration::from_secs(30),
        ));
        let sync = SyncOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            RemoteState::Ready(Arc::clone(&remote)),
            DeviceInfo::new(DeviceId::new(name), name),
            config,
        );
        Self {
            writer: LocalFirstWriter::new(Arc::clone(&store), queue),
            store,
            remote,
            sync,
        }
    }

    fn pass(&self, credentials: &Credentials) -> calcsync_engine::SyncReport {
        match self.sync.perform_sync_default(credentials).unwrap() {
            SyncOutcome::Completed(report) => report,
            other => panic!("pass did not run: {other:?}"),
        }
    }
}

fn calculation(device: &str, notes: &str, clock: &ManualClock) -> CalculationRecord {
    let mut record = CalculationRecord::new(
        CalculationType::LoadCalculation,
        json!({"connected_kw": 42}),
        json!({"demand_kw": 31.5}),
        DeviceId::new(device),
        clock.now(),
    );
    record.notes = Some(notes.to_string());
    record
}

fn server(clock: &ManualClock) -> Arc<SyncServer> {
    Arc::new(SyncServer::with_clock(ServerConfig::in_memory(), clock.shared()).unwrap())
}

#[test]
fn record_travels_between_devices() {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let server = server(&clock);
    let phone = Device::new("phone", &clock, Arc::clone(&server), SyncConfig::new());
    let tablet = Device::new("tablet", &clock, Arc::clone(&server), SyncConfig::new());
    let creds = Credentials::anonymous();

    let saved = phone
        .writer
        .save_calculation(calculation("phone", "site survey", &clock))
        .unwrap();
    clock.advance(Duration::from_secs(5));

    let report = phone.pass(&creds);
    assert_eq!(report.uploaded, 1);
    assert!(report.is_clean());
    assert_eq!(server.repository().record_count("").unwrap(), 1);
    assert_eq!(server.repository().device_count("").unwrap(), 1);

    clock.advance(Duration::from_secs(5));
    let report = tablet.pass(&creds);
    assert_eq!(report.downloaded, 1);
    let copy = tablet.store.find_calculation(&saved.client_id).unwrap().unwrap();
    assert_eq!(copy.notes.as_deref(), Some("site survey"));
    assert_eq!(copy.sync_status, SyncStatus::Synced);
    assert!(copy.server_id.is_some());

    // Nothing new on either side.
    clock.advance(Duration::from_secs(5));
    let report = tablet.pass(&creds);
    assert_eq!((report.uploaded, report.downloaded), (0, 0));
}

#[test]
fn concurrent_offline_creates_converge_on_newest() {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let server = server(&clock);
    let phone = Device::new("phone", &clock, Arc::clone(&server), SyncConfig::new());
    let tablet = Device::new("tablet", &clock, Arc::clone(&server), SyncConfig::new());
    let creds = Credentials::anonymous();

    // Both devices write the same client id while offline.
    let shared_id = ClientId::new();
    let mut older = calculation("phone", "first draft", &clock);
    older.client_id = shared_id;
    phone.writer.save_calculation(older).unwrap();
    clock.advance(Duration::from_secs(10));
    let mut newer = calculation("tablet", "final", &clock);
    newer.client_id = shared_id;
    tablet.writer.save_calculation(newer).unwrap();
    clock.advance(Duration::from_secs(60));

    phone.pass(&creds);
    clock.advance(Duration::from_secs(1));
    let report = tablet.pass(&creds);
    assert_eq!(report.conflicts.len(), 1);
    assert!(report.conflicts[0].is_resolved());
    let row = tablet.store.find_calculation(&shared_id).unwrap().unwrap();
    assert_eq!(row.sync_status, SyncStatus::Pending);

    // The tablet's version won locally and goes up on the next pass.
    clock.advance(Duration::from_secs(1));
    let report = tablet.pass(&creds);
    assert_eq!(report.uploaded, 1);
    clock.advance(Duration::from_secs(1));
    phone.pass(&creds);

    for device in [&phone, &tablet] {
        let row = device.store.find_calculation(&shared_id).unwrap().unwrap();
        assert_eq!(row.notes.as_deref(), Some("final"));
        assert_eq!(row.sync_status, SyncStatus::Synced);
    }
    assert_eq!(server.repository().record_count("").unwrap(), 1);
    assert_eq!(tablet.store.list_conflicts(false).unwrap().len(), 1);
}

#[test]
fn offline_writes_upload_on_reconnect() {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let server = server(&clock);
    let phone = Device::new("phone", &clock, Arc::clone(&server), SyncConfig::new());
    let creds = Credentials::anonymous();

    phone.remote.client().set_online(false);
    let saved = phone
        .writer
        .save_calculation(calculation("phone", "basement", &clock))
        .unwrap();
    let report = phone.pass(&creds);
    assert_eq!(report.deferred, 1);
    assert!(report.checkpoint_advanced.is_empty());
    assert_eq!(
        phone.store.find_calculation(&saved.client_id).unwrap().unwrap().sync_status,
        SyncStatus::Pending
    );

    clock.advance(Duration::from_secs(30));
    phone.remote.client().set_online(true);
    let outcome = phone.sync.sync_now(&creds).unwrap();
    assert!(outcome.report().is_some());
    assert_eq!(
        phone.store.find_calculation(&saved.client_id).unwrap().unwrap().sync_status,
        SyncStatus::Synced
    );
    assert_eq!(server.repository().record_count("").unwrap(), 1);
    assert_eq!(phone.sync.queue().stats().unwrap().outstanding(), 0);
}

#[test]
fn deletes_propagate_as_tombstones() {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let server = server(&clock);
    let phone = Device::new("phone", &clock, Arc::clone(&server), SyncConfig::new());
    let tablet = Device::new("tablet", &clock, Arc::clone(&server), SyncConfig::new());
    let creds = Credentials::anonymous();

    let saved = phone
        .writer
        .save_calculation(calculation("phone", "temporary", &clock))
        .unwrap();
    clock.advance(Duration::from_secs(1));
    phone.pass(&creds);
    clock.advance(Duration::from_secs(1));
    tablet.pass(&creds);
    assert!(tablet.store.find_calculation(&saved.client_id).unwrap().is_some());

    clock.advance(Duration::from_secs(1));
    assert!(phone
        .writer
        .delete(EntityType::Calculation, &saved.client_id)
        .unwrap());
    phone.sync.sync_now(&creds).unwrap();
    let row = server
        .repository()
        .get("", EntityType::Calculation, &saved.client_id)
        .unwrap()
        .unwrap();
    assert!(row.deleted);

    clock.advance(Duration::from_secs(1));
    tablet.pass(&creds);
    assert!(tablet.store.find_calculation(&saved.client_id).unwrap().is_none());
}

#[test]
fn rejected_token_stops_the_pass() {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let server = Arc::new(
        SyncServer::with_clock(
            ServerConfig::in_memory().with_auth(b"0123456789abcdef0123456789abcdef".to_vec()),
            clock.shared(),
        )
        .unwrap(),
    );
    let phone = Device::new("phone", &clock, Arc::clone(&server), SyncConfig::new());
    phone
        .writer
        .save_calculation(calculation("phone", "secured", &clock))
        .unwrap();

    let err = phone
        .sync
        .perform_sync_default(&Credentials::bearer("forged"))
        .unwrap_err();
    assert!(matches!(err, SyncError::Auth(_)));
    assert_eq!(server.repository().record_count("alice").unwrap(), 0);

    let token = server.issue_token("alice").unwrap();
    let report = phone.pass(&Credentials::bearer(token));
    assert_eq!(report.uploaded, 1);
    assert_eq!(server.repository().record_count("alice").unwrap(), 1);
}

/// Holds the first device registration until released.
struct Gate {
    inner: Arc<SyncServer>,
    entered: Mutex<Option<mpsc::Sender<()>>>,
    release: Mutex<mpsc::Receiver<()>>,
}

impl HttpService for Gate {
    fn handle(&self, request: &HttpRequest) -> HttpResponse {
        if request.method == Method::Post && request.path.ends_with("/devices") {
            if let Some(entered) = self.entered.lock().take() {
                entered.send(()).unwrap();
                self.release.lock().recv().unwrap();
            }
        }
        self.inner.handle(request)
    }
}

#[test]
fn overlapping_pass_is_refused() {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let (entered_tx, entered_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel();
    let gate = Gate {
        inner: server(&clock),
        entered: Mutex::new(Some(entered_tx)),
        release: Mutex::new(release_rx),
    };
    let phone = Device::new("phone", &clock, gate, SyncConfig::new());
    let creds = Credentials::anonymous();

    std::thread::scope(|scope| {
        let first = scope.spawn(|| phone.sync.perform_sync_default(&creds).unwrap());
        entered_rx.recv().unwrap();
        assert!(phone.sync.is_syncing());

        let second = phone.sync.perform_sync_default(&creds).unwrap();
        assert!(matches!(second, SyncOutcome::AlreadyInProgress));

        release_tx.send(()).unwrap();
        assert!(matches!(first.join().unwrap(), SyncOutcome::Completed(_)));
    });
    assert!(!phone.sync.is_syncing());
}

#[tokio::test(start_paused = true)]
async fn periodic_sync_runs_in_the_background() {
    let clock = ManualClock::at_millis(1_700_000_000_000);
    let server = server(&clock);
    let phone = Device::new(
        "phone",
        &clock,
        Arc::clone(&server),
        SyncConfig::new().with_sync_interval(Duration::from_secs(300)),
    );
    phone
        .writer
        .save_calculation(calculation("phone", "scheduled", &clock))
        .unwrap();

    let Device { sync, .. } = phone;
    let scheduler = Arc::new(Mutex::new(Scheduler::new(clock.shared())));
    assert!(register_periodic_sync(
        &mut scheduler.lock(),
        Arc::new(sync),
        Credentials::anonymous(),
    ));
    clock.advance(Duration::from_secs(301));

    let runner = BackgroundRunner::spawn(Arc::clone(&scheduler), Duration::from_secs(1));
    tokio::time::sleep(Duration::from_secs(2)).await;
    runner.shutdown().await;

    assert_eq!(server.repository().record_count("").unwrap(), 1);
}
