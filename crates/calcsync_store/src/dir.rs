//! Store directory management.
//!
//! The LOCK file ensures only one process opens the store at a time.

use crate::error::{StoreError, StoreResult};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const DB_FILE: &str = "calcsync.db";
const BACKUPS_DIR: &str = "backups";

/// Manages the store directory and its exclusive lock.
///
/// Only one `StoreDir` can exist per directory at a time; the lock is
/// released when the value is dropped.
#[derive(Debug)]
pub struct StoreDir {
    path: PathBuf,
    _lock_file: File,
}

impl StoreDir {
    /// Opens or creates a store directory.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The directory doesn't exist and `create_if_missing` is false
    /// - The path exists but is not a directory
    /// - Another process holds the lock (returns `StoreLocked`)
    /// - I/O errors occur
    pub fn open(path: &Path, create_if_missing: bool) -> StoreResult<Self> {
        if !path.exists() {
            if create_if_missing {
                fs::create_dir_all(path)?;
            } else {
                return Err(StoreError::InvalidPath(format!(
                    "store directory does not exist: {}",
                    path.display()
                )));
            }
        }

        if !path.is_dir() {
            return Err(StoreError::InvalidPath(format!(
                "path is not a directory: {}",
                path.display()
            )));
        }

        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path.join(LOCK_FILE))?;

        if lock_file.try_lock_exclusive().is_err() {
            tracing::warn!(path = %path.display(), "store directory is locked by another process");
            return Err(StoreError::StoreLocked);
        }

        fs::create_dir_all(path.join(BACKUPS_DIR))?;

        Ok(Self {
            path: path.to_path_buf(),
            _lock_file: lock_file,
        })
    }

    /// Returns the directory path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the path to the database file.
    #[must_use]
    pub fn db_path(&self) -> PathBuf {
        self.path.join(DB_FILE)
    }

    /// Returns the directory holding backups.
    #[must_use]
    pub fn backups_dir(&self) -> PathBuf {
        self.path.join(BACKUPS_DIR)
    }
}
