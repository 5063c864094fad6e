//! Store configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration for opening a local store.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Store directory; `None` opens an in-memory store.
    pub path: Option<PathBuf>,

    /// Whether to create the directory if it doesn't exist.
    pub create_if_missing: bool,

    /// How long SQLite waits on a busy database before failing.
    pub busy_timeout: Duration,

    /// Whether to use write-ahead logging.
    pub wal_mode: bool,

    /// How long maintenance waits for running sync passes to finish.
    pub maintenance_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            busy_timeout: Duration::from_secs(5),
            wal_mode: true,
            maintenance_timeout: Duration::from_secs(30),
        }
    }
}

impl StoreConfig {
    /// Configuration for a store in `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: Some(path.as_ref().to_path_buf()),
            ..Self::default()
        }
    }

    /// Configuration for an in-memory store.
    #[must_use]
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Sets whether to create the directory if missing.
    #[must_use]
    pub const fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    /// Sets the busy timeout.
    #[must_use]
    pub const fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Sets whether to use write-ahead logging.
    #[must_use]
    pub const fn wal_mode(mut self, value: bool) -> Self {
        self.wal_mode = value;
        self
    }

    /// Sets the maintenance lock timeout.
    #[must_use]
    pub const fn maintenance_timeout(mut self, timeout: Duration) -> Self {
        self.maintenance_timeout = timeout;
        self
    }
}
