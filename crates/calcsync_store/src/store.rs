//! The local store handle.

use crate::config::StoreConfig;
use crate::dir::StoreDir;
use crate::error::{StoreError, StoreResult};
use crate::pragmas;
use crate::schema::{self, EXPECTED_TABLES};
use calcsync_core::{SharedClock, SystemClock, Timestamp};
use parking_lot::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use rusqlite::{Connection, Transaction};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// The embedded local store.
///
/// A `LocalStore` is opened explicitly and closed explicitly; it is shared
/// between components by `Arc`. All access goes through one connection
/// behind a mutex, so concurrent callers are serialized and every write runs
/// inside a transaction.
///
/// # Example
///
/// ```rust,ignore
/// use calcsync_store::{LocalStore, StoreConfig};
///
/// let store = LocalStore::open(StoreConfig::new("data/calcsync"))?;
/// let pending = store.list_pending_calculations()?;
/// store.close()?;
/// ```
pub struct LocalStore {
    conn: Mutex<Option<Connection>>,
    dir: Mutex<Option<StoreDir>>,
    db_path: Option<PathBuf>,
    backups_dir: Option<PathBuf>,
    maintenance: RwLock<()>,
    config: StoreConfig,
    clock: SharedClock,
}

/// Shared guard held by a sync pass.
///
/// While any `SyncGuard` is alive, maintenance cannot start.
#[must_use]
pub struct SyncGuard<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive guard held by auto-repair, repair and restore.
#[must_use]
pub struct MaintenanceGuard<'a> {
    _guard: RwLockWriteGuard<'a, ()>,
}

impl LocalStore {
    /// Opens a store with the system clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be locked, the database
    /// cannot be opened or the schema is newer than this build.
    pub fn open(config: StoreConfig) -> StoreResult<Self> {
        Self::open_with_clock(config, SystemClock::shared())
    }

    /// Opens an in-memory store.
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite cannot allocate the database.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(StoreConfig::in_memory())
    }

    /// Opens a store that reads time from `clock`.
    ///
    /// # Errors
    ///
    /// See [`LocalStore::open`].
    pub fn open_with_clock(config: StoreConfig, clock: SharedClock) -> StoreResult<Self> {
        let (dir, mut conn) = match &config.path {
            Some(path) => {
                let dir = StoreDir::open(path, config.create_if_missing)?;
                let conn = Connection::open(dir.db_path())?;
                (Some(dir), conn)
            }
            None => (None, Connection::open_in_memory()?),
        };

        pragmas::apply_pragmas(&conn, &config)?;
        schema::migrate(&mut conn)?;

        let db_path = dir.as_ref().map(StoreDir::db_path);
        let backups_dir = dir.as_ref().map(StoreDir::backups_dir);
        tracing::info!(
            path = ?db_path,
            version = schema::SCHEMA_VERSION,
            "opened local store"
        );

        Ok(Self {
            conn: Mutex::new(Some(conn)),
            dir: Mutex::new(dir),
            db_path,
            backups_dir,
            maintenance: RwLock::new(()),
            config,
            clock,
        })
    }

    /// Closes the store and releases the directory lock.
    ///
    /// Later operations fail with [`StoreError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns an error if SQLite fails to close the connection.
    pub fn close(&self) -> StoreResult<()> {
        let conn = self.conn.lock().take();
        if let Some(conn) = conn {
            conn.close().map_err(|(_, e)| StoreError::Sqlite(e))?;
            tracing::info!(path = ?self.db_path, "closed local store");
        }
        self.dir.lock().take();
        Ok(())
    }

    /// Returns true until [`LocalStore::close`] is called.
    pub fn is_open(&self) -> bool {
        self.conn.lock().is_some()
    }

    /// Path of the database file, `None` for in-memory stores.
    pub fn db_path(&self) -> Option<&Path> {
        self.db_path.as_deref()
    }

    /// Directory for backup files, `None` for in-memory stores.
    pub fn backups_dir(&self) -> Option<&Path> {
        self.backups_dir.as_deref()
    }

    /// The configuration the store was opened with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// The store's clock.
    pub fn clock(&self) -> SharedClock {
        self.clock.clone()
    }

    pub(crate) fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// Runs `f` with the connection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after close, or whatever `f` returns.
    pub fn with_connection<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Connection) -> StoreResult<T>,
    {
        let guard = self.conn.lock();
        let conn = guard.as_ref().ok_or(StoreError::Closed)?;
        f(conn)
    }

    /// Runs `f` with exclusive access to the connection.
    ///
    /// Used by operations that replace the database content wholesale.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after close, or whatever `f` returns.
    pub fn with_connection_mut<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&mut Connection) -> StoreResult<T>,
    {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        f(conn)
    }

    /// Runs `f` inside a transaction, committing on `Ok` and rolling back on
    /// `Err`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Closed`] after close, SQLite errors from
    /// begin/commit, or whatever `f` returns.
    pub fn transaction<T, F>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&Transaction<'_>) -> StoreResult<T>,
    {
        let mut guard = self.conn.lock();
        let conn = guard.as_mut().ok_or(StoreError::Closed)?;
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }

    /// Tries to take the shared guard a sync pass holds.
    ///
    /// Returns `None` while maintenance holds the exclusive guard.
    pub fn try_sync_guard(&self) -> Option<SyncGuard<'_>> {
        self.maintenance
            .try_read()
            .map(|guard| SyncGuard { _guard: guard })
    }

    /// Takes the exclusive maintenance guard, waiting up to the configured
    /// timeout for sync passes to finish.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MaintenanceBusy`] on timeout.
    pub fn maintenance_guard(&self) -> StoreResult<MaintenanceGuard<'_>> {
        self.maintenance_guard_within(self.config.maintenance_timeout)
    }

    /// Like [`LocalStore::maintenance_guard`] with an explicit timeout.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::MaintenanceBusy`] on timeout.
    pub fn maintenance_guard_within(&self, timeout: Duration) -> StoreResult<MaintenanceGuard<'_>> {
        match self.maintenance.try_write_for(timeout) {
            Some(guard) => Ok(MaintenanceGuard { _guard: guard }),
            None => {
                tracing::warn!("maintenance lock unavailable, sync pass still running");
                Err(StoreError::MaintenanceBusy)
            }
        }
    }

    /// Returns true while maintenance holds the exclusive guard.
    pub fn is_under_maintenance(&self) -> bool {
        self.maintenance.is_locked_exclusive()
    }

    /// Row count of every expected table that exists.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn table_counts(&self) -> StoreResult<BTreeMap<String, u64>> {
        self.with_connection(|conn| {
            let mut counts = BTreeMap::new();
            for table in EXPECTED_TABLES {
                if !schema::table_exists(conn, table.name)? {
                    continue;
                }
                let count: i64 =
                    conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name), [], |row| {
                        row.get(0)
                    })?;
                counts.insert(table.name.to_string(), u64::try_from(count).unwrap_or(0));
            }
            Ok(counts)
        })
    }

    /// Current schema version.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn schema_version(&self) -> StoreResult<u32> {
        self.with_connection(schema::schema_version)
    }

    /// Current SQLite journal mode.
    ///
    /// # Errors
    ///
    /// Returns SQLite errors.
    pub fn journal_mode(&self) -> StoreResult<String> {
        self.with_connection(pragmas::journal_mode)
    }
}

impl std::fmt::Debug for LocalStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalStore")
            .field("db_path", &self.db_path)
            .field("open", &self.is_open())
            .finish()
    }
}
