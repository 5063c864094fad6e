//! Multi-device scenarios.
//!
//! A [`TestDevice`] is one installation of the app: its own in-memory
//! store, queue, writer and orchestrator, talking to a shared in-process
//! [`SyncServer`] through a [`FlakyClient`]. Every device and the server
//! read the same [`ManualClock`].

use crate::fixtures::test_clock;
use crate::flaky::FlakyClient;
use calcsync_core::{DeviceId, DeviceInfo, ManualClock};
use calcsync_engine::{
    HttpRemoteStore, LocalFirstWriter, LoopbackClient, OfflineQueueManager, QueueConfig,
    RemoteState, SyncConfig, SyncOrchestrator, SyncOutcome, SyncReport,
};
use calcsync_protocol::Credentials;
use calcsync_server::{ServerConfig, SyncServer};
use calcsync_store::{LocalStore, StoreConfig};
use std::sync::Arc;
use std::time::Duration;

/// The transport every test device uses.
pub type TestTransport = FlakyClient<LoopbackClient<Arc<SyncServer>>>;

/// The remote store every test device uses.
pub type TestRemote = HttpRemoteStore<TestTransport>;

/// A reference server on the shared clock.
pub fn test_server(clock: &ManualClock) -> Arc<SyncServer> {
    Arc::new(
        SyncServer::with_clock(ServerConfig::in_memory(), clock.shared())
            .expect("Failed to start reference server"),
    )
}

/// One simulated device.
pub struct TestDevice {
    /// Device identity.
    pub info: DeviceInfo,
    /// Local store.
    pub store: Arc<LocalStore>,
    /// Offline queue.
    pub queue: Arc<OfflineQueueManager>,
    /// Local-first write path.
    pub writer: LocalFirstWriter,
    /// Remote client.
    pub remote: Arc<TestRemote>,
    /// Sync orchestrator.
    pub sync: SyncOrchestrator<TestRemote>,
}

impl TestDevice {
    /// Connects a device with default sync and queue settings.
    pub fn connect(name: &str, clock: &ManualClock, server: &Arc<SyncServer>) -> Self {
        Self::with_config(name, clock, server, SyncConfig::new(), QueueConfig::new())
    }

    /// Connects a device with explicit settings.
    pub fn with_config(
        name: &str,
        clock: &ManualClock,
        server: &Arc<SyncServer>,
        sync: SyncConfig,
        queue: QueueConfig,
    ) -> Self {
        let store = Arc::new(
            LocalStore::open_with_clock(StoreConfig::in_memory(), clock.shared())
                .expect("Failed to open device store"),
        );
        let queue = Arc::new(OfflineQueueManager::new(Arc::clone(&store), queue));
        let transport = FlakyClient::new(LoopbackClient::new(Arc::clone(server)));
        let remote = Arc::new(HttpRemoteStore::new(transport, Duration::from_secs(30)));
        let info = DeviceInfo::new(DeviceId::new(name), name);
        let orchestrator = SyncOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&queue),
            RemoteState::Ready(Arc::clone(&remote)),
            info.clone(),
            sync,
        );
        Self {
            info,
            writer: LocalFirstWriter::new(Arc::clone(&store), Arc::clone(&queue)),
            store,
            queue,
            remote,
            sync: orchestrator,
        }
    }

    /// The device's transport, for injecting failures.
    pub fn transport(&self) -> &TestTransport {
        self.remote.client()
    }

    /// Cuts the device off from the server.
    pub fn go_offline(&self) {
        self.transport().inner().set_online(false);
    }

    /// Reconnects the device.
    pub fn go_online(&self) {
        self.transport().inner().set_online(true);
    }

    /// Runs one sync pass and returns its report.
    ///
    /// # Panics
    ///
    /// Panics if the pass errors or does not run.
    pub fn sync(&self, credentials: &Credentials) -> SyncReport {
        match self.sync.perform_sync_default(credentials) {
            Ok(SyncOutcome::Completed(report)) => report,
            other => panic!("sync pass on {} did not complete: {other:?}", self.info.device_id),
        }
    }
}

/// A server plus a set of devices on one clock.
pub struct Fleet {
    /// Shared clock.
    pub clock: ManualClock,
    /// Reference server.
    pub server: Arc<SyncServer>,
    /// Credentials every device syncs with.
    pub credentials: Credentials,
}

impl Fleet {
    /// Starts an open server at the fixture epoch.
    pub fn new() -> Self {
        let clock = test_clock();
        Self {
            server: test_server(&clock),
            clock,
            credentials: Credentials::anonymous(),
        }
    }

    /// Connects a new device.
    pub fn device(&self, name: &str) -> TestDevice {
        TestDevice::connect(name, &self.clock, &self.server)
    }

    /// Moves time forward.
    pub fn tick(&self, by: Duration) {
        self.clock.advance(by);
    }

    /// Syncs each device once, in order, one second apart.
    pub fn sync_all(&self, devices: &[&TestDevice]) -> Vec<SyncReport> {
        devices
            .iter()
            .map(|device| {
                self.tick(Duration::from_secs(1));
                device.sync(&self.credentials)
            })
            .collect()
    }

    /// Records held by the server.
    pub fn server_records(&self) -> u64 {
        self.server
            .repository()
            .record_count("")
            .expect("Failed to count server records")
    }
}

impl Default for Fleet {
    fn default() -> Self {
        Self::new()
    }
}
