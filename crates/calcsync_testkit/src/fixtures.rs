//! Test fixtures and store helpers.
//!
//! Every fixture runs on a [`ManualClock`] so tests decide when time moves.

use calcsync_core::{
    CalculationRecord, CalculationType, Clock, DeviceId, ManualClock, ParameterSet,
};
use calcsync_store::{LocalStore, StoreConfig};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;
use tempfile::TempDir;

/// Start time of every fixture clock (2023-11-14T22:13:20Z).
pub const EPOCH_MILLIS: i64 = 1_700_000_000_000;

/// Returns a clock frozen at [`EPOCH_MILLIS`].
pub fn test_clock() -> ManualClock {
    ManualClock::at_millis(EPOCH_MILLIS)
}

/// A test store with automatic cleanup.
pub struct TestStore {
    /// The store instance.
    pub store: Arc<LocalStore>,
    /// The clock the store reads.
    pub clock: ManualClock,
    /// The temporary directory (kept alive to prevent cleanup).
    _temp_dir: Option<TempDir>,
}

impl TestStore {
    /// Creates a new in-memory test store.
    pub fn memory() -> Self {
        let clock = test_clock();
        let store = LocalStore::open_with_clock(StoreConfig::in_memory(), clock.shared())
            .expect("Failed to open in-memory store");
        Self {
            store: Arc::new(store),
            clock,
            _temp_dir: None,
        }
    }

    /// Creates a new file-backed test store with a backups directory.
    pub fn file() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp directory");
        let clock = test_clock();
        let store = LocalStore::open_with_clock(StoreConfig::new(temp_dir.path()), clock.shared())
            .expect("Failed to open file store");
        Self {
            store: Arc::new(store),
            clock,
            _temp_dir: Some(temp_dir),
        }
    }

    /// Returns the store directory if file-backed, None if in-memory.
    pub fn path(&self) -> Option<PathBuf> {
        self._temp_dir.as_ref().map(|d| d.path().to_path_buf())
    }

    /// Returns another handle to the store.
    pub fn shared(&self) -> Arc<LocalStore> {
        Arc::clone(&self.store)
    }
}

impl std::ops::Deref for TestStore {
    type Target = LocalStore;

    fn deref(&self) -> &Self::Target {
        &self.store
    }
}

/// Runs a test with a temporary in-memory store.
pub fn with_temp_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::memory();
    f(&store)
}

/// Runs a test with a temporary file-backed store.
pub fn with_file_store<F, R>(f: F) -> R
where
    F: FnOnce(&TestStore) -> R,
{
    let store = TestStore::file();
    f(&store)
}

/// A voltage-drop calculation owned by `device`, created now.
pub fn sample_calculation(device: &str, clock: &ManualClock) -> CalculationRecord {
    CalculationRecord::new(
        CalculationType::VoltageDrop,
        json!({"length_m": 45, "current_a": 32, "conductor": "copper"}),
        json!({"drop_v": 4, "drop_pct": "1.7"}),
        DeviceId::new(device),
        clock.now(),
    )
}

/// A named cable-sizing parameter set owned by `device`, created now.
pub fn sample_parameter_set(device: &str, name: &str, clock: &ManualClock) -> ParameterSet {
    ParameterSet::new(
        name,
        CalculationType::CableSizing,
        json!({"load_a": 63, "installation": "conduit", "ambient_c": 30}),
        DeviceId::new(device),
        clock.now(),
    )
    .with_tags(["site", "default"])
}
