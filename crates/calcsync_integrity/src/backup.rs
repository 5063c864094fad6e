//! Backup files, sidecars and restore.
//!
//! A backup is a standalone SQLite file written with the online backup API
//! plus a JSON sidecar carrying the same [`DataBackup`] the catalog row
//! holds. The sidecars let the catalog be rebuilt after a restore has
//! replaced the `data_backups` table with an older copy.

use crate::checks;
use crate::config::IntegrityConfig;
use crate::error::{IntegrityError, IntegrityResult};
use calcsync_core::{BackupReason, CheckCategory, Clock, DataBackup};
use calcsync_store::rusqlite::backup::Backup;
use calcsync_store::rusqlite::{Connection, OpenFlags};
use calcsync_store::schema::{self, EXPECTED_TABLES};
use calcsync_store::{LocalStore, StoreResult};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const PAGES_PER_STEP: std::os::raw::c_int = 100;
const STEP_PAUSE: Duration = Duration::from_millis(10);

/// Creates, verifies, restores and prunes backups of one store.
pub struct BackupManager {
    store: Arc<LocalStore>,
    dir: Option<PathBuf>,
}

impl BackupManager {
    /// Creates a manager writing to the configured directory, or the
    /// store's own `backups/` directory.
    pub fn new(store: Arc<LocalStore>, config: &IntegrityConfig) -> Self {
        let dir = config
            .backups_dir
            .clone()
            .or_else(|| store.backups_dir().map(Path::to_path_buf));
        Self { store, dir }
    }

    /// The backup directory, if there is one.
    pub fn dir(&self) -> Option<&Path> {
        self.dir.as_deref()
    }

    fn require_dir(&self) -> IntegrityResult<&Path> {
        let dir = self.dir.as_deref().ok_or(IntegrityError::NoBackupDir)?;
        fs::create_dir_all(dir)?;
        Ok(dir)
    }

    /// Snapshots the live store.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::NoBackupDir`] without a directory, and
    /// SQLite or I/O errors. A failed backup leaves no catalog entry.
    pub fn create_backup(
        &self,
        name: &str,
        description: Option<&str>,
        reason: BackupReason,
    ) -> IntegrityResult<DataBackup> {
        let dir = self.require_dir()?;
        let id = Uuid::new_v4();
        let file_path = dir.join(format!("{id}.db"));

        let table_counts = self
            .store
            .with_connection(|conn| snapshot(conn, &file_path))
            .inspect_err(|_| {
                let _ = fs::remove_file(&file_path);
            })?;

        let backup = DataBackup {
            id,
            name: name.to_string(),
            description: description.map(str::to_string),
            size_bytes: fs::metadata(&file_path)?.len(),
            checksum: file_checksum(&file_path)?,
            file_path,
            created_at: self.store.clock().now(),
            table_counts,
            automatic: reason.is_automatic(),
            reason,
        };
        fs::write(sidecar_path(&backup.file_path), serde_json::to_vec_pretty(&backup)?)?;
        self.store.insert_backup(&backup)?;

        tracing::info!(
            id = %backup.id,
            name = %backup.name,
            reason = %reason,
            size = backup.size_bytes,
            rows = backup.total_rows(),
            "backup created"
        );
        Ok(backup)
    }

    /// Every cataloged backup, newest first.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn list_backups(&self) -> IntegrityResult<Vec<DataBackup>> {
        Ok(self.store.list_backups()?)
    }

    fn get(&self, id: Uuid) -> IntegrityResult<DataBackup> {
        self.store
            .get_backup(&id)?
            .ok_or(IntegrityError::BackupNotFound(id))
    }

    /// Checks that the backup file exists and matches its checksum.
    ///
    /// # Errors
    ///
    /// Returns [`IntegrityError::BackupNotFound`] for an unknown id and I/O
    /// errors other than a missing file.
    pub fn verify_backup(&self, id: Uuid) -> IntegrityResult<bool> {
        let backup = self.get(id)?;
        match verify_file(&backup) {
            Ok(()) => Ok(true),
            Err(IntegrityError::MissingBackupFile(_) | IntegrityError::ChecksumMismatch { .. }) => {
                Ok(false)
            }
            Err(err) => Err(err),
        }
    }

    /// Replaces the live store with a backup.
    ///
    /// The file is read once under the maintenance lock and its checksum
    /// verified before anything is touched. The live store is
    /// copied aside first; if the swap fails or the restored store fails
    /// the structure or corruption check, the copy is put back and the
    /// error returned. Takes the maintenance lock for the duration.
    ///
    /// # Errors
    ///
    /// - [`IntegrityError::MissingBackupFile`] or
    ///   [`IntegrityError::ChecksumMismatch`] before any change
    /// - [`IntegrityError::RestoreRejected`] after a rollback
    /// - [`calcsync_store::StoreError::MaintenanceBusy`] if a sync pass
    ///   does not finish in time
    pub fn restore_backup(&self, id: Uuid) -> IntegrityResult<DataBackup> {
        let backup = self.get(id)?;
        let dir = self.require_dir()?;
        let _guard = self.store.maintenance_guard()?;

        // Restore from a private copy of the bytes that were verified, not
        // from the catalog path, which may change underneath us.
        let staged = dir.join(format!("restore-staging-{id}.db"));
        if let Err(err) = stage_verified(&backup, &staged) {
            tracing::error!(id = %id, error = %err, "backup failed verification, restore refused");
            return Err(err);
        }

        let safety = dir.join(format!("restore-safety-{id}.db"));
        if let Err(err) = self.store.with_connection(|conn| snapshot(conn, &safety)) {
            let _ = fs::remove_file(&staged);
            return Err(err.into());
        }

        let outcome = self
            .store
            .with_connection_mut(|conn| copy_into(&staged, conn))
            .map_err(IntegrityError::from)
            .and_then(|()| self.validate_live());
        let _ = fs::remove_file(&staged);

        if let Err(err) = outcome {
            tracing::error!(id = %id, error = %err, "restore failed, rolling back");
            self.store
                .with_connection_mut(|conn| copy_into(&safety, conn))?;
            let _ = fs::remove_file(&safety);
            return Err(match err {
                IntegrityError::RestoreRejected(_) => err,
                other => IntegrityError::RestoreRejected(other.to_string()),
            });
        }

        let catalog = self.import_sidecars()?;
        self.store.replace_backups(&catalog)?;
        fs::remove_file(&safety)?;

        tracing::info!(id = %id, name = %backup.name, "backup restored");
        Ok(backup)
    }

    fn validate_live(&self) -> IntegrityResult<()> {
        let now = self.store.clock().now();
        let failures = self.store.with_connection(|conn| {
            let mut failures = Vec::new();
            for category in [CheckCategory::Structure, CheckCategory::Corruption] {
                let result = checks::run_check(conn, category, now)?;
                if !result.passed {
                    failures.extend(result.issues.into_iter().map(|i| i.description));
                }
            }
            Ok(failures)
        })?;
        if failures.is_empty() {
            Ok(())
        } else {
            Err(IntegrityError::RestoreRejected(failures.join("; ")))
        }
    }

    /// Deletes a backup's file, sidecar and catalog entry.
    ///
    /// Returns false if no backup has this id.
    ///
    /// # Errors
    ///
    /// Returns I/O errors other than already-missing files.
    pub fn delete_backup(&self, id: Uuid) -> IntegrityResult<bool> {
        let Some(backup) = self.store.get_backup(&id)? else {
            return Ok(false);
        };
        remove_if_present(&backup.file_path)?;
        remove_if_present(&sidecar_path(&backup.file_path))?;
        self.store.delete_backup(&id)?;
        tracing::info!(id = %id, name = %backup.name, "backup deleted");
        Ok(true)
    }

    /// Deletes all but the newest `keep` automatic backups. Manual
    /// backups are never pruned.
    ///
    /// Returns how many were deleted.
    ///
    /// # Errors
    ///
    /// See [`BackupManager::delete_backup`].
    pub fn prune_automatic(&self, keep: usize) -> IntegrityResult<usize> {
        let stale: Vec<Uuid> = self
            .list_backups()?
            .into_iter()
            .filter(|b| b.automatic)
            .skip(keep)
            .map(|b| b.id)
            .collect();
        let mut deleted = 0;
        for id in stale {
            if self.delete_backup(id)? {
                deleted += 1;
            }
        }
        if deleted > 0 {
            tracing::info!(deleted, keep, "pruned automatic backups");
        }
        Ok(deleted)
    }

    /// Reads every sidecar in the backup directory whose backup file still
    /// exists. Unreadable sidecars are skipped.
    ///
    /// # Errors
    ///
    /// Returns I/O errors listing the directory.
    pub fn import_sidecars(&self) -> IntegrityResult<Vec<DataBackup>> {
        let dir = self.require_dir()?;
        let mut backups = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let parsed = fs::read(&path)
                .map_err(IntegrityError::from)
                .and_then(|bytes| Ok(serde_json::from_slice::<DataBackup>(&bytes)?));
            match parsed {
                Ok(backup) if backup.file_path.is_file() => backups.push(backup),
                Ok(backup) => {
                    tracing::warn!(id = %backup.id, "sidecar without backup file skipped");
                }
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "unreadable sidecar skipped"
                    );
                }
            }
        }
        backups.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(backups)
    }
}

/// Copies the live database into a new file at `path` and returns the row
/// counts of the copy.
fn snapshot(conn: &Connection, path: &Path) -> StoreResult<BTreeMap<String, u64>> {
    let mut dst = Connection::open(path)?;
    Backup::new(conn, &mut dst)?.run_to_completion(PAGES_PER_STEP, STEP_PAUSE, None)?;
    // A copy of a WAL database is itself in WAL mode; switch it back so
    // the file is self-contained.
    let _mode: String = dst.query_row("PRAGMA journal_mode = DELETE", [], |row| row.get(0))?;
    let counts = row_counts(&dst)?;
    dst.close().map_err(|(_, e)| e)?;
    Ok(counts)
}

/// Overwrites the database behind `conn` with the file at `path`.
fn copy_into(path: &Path, conn: &mut Connection) -> StoreResult<()> {
    let src = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    Backup::new(&src, conn)?.run_to_completion(PAGES_PER_STEP, STEP_PAUSE, None)?;
    Ok(())
}

fn row_counts(conn: &Connection) -> StoreResult<BTreeMap<String, u64>> {
    let mut counts = BTreeMap::new();
    for table in EXPECTED_TABLES {
        if !schema::table_exists(conn, table.name)? {
            continue;
        }
        let count: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table.name), [], |row| {
            row.get(0)
        })?;
        counts.insert(table.name.to_string(), u64::try_from(count).unwrap_or(0));
    }
    Ok(counts)
}

fn verify_file(backup: &DataBackup) -> IntegrityResult<()> {
    if !backup.file_path.is_file() {
        return Err(IntegrityError::MissingBackupFile(backup.file_path.clone()));
    }
    let actual = file_checksum(&backup.file_path)?;
    if actual != backup.checksum {
        return Err(IntegrityError::ChecksumMismatch {
            id: backup.id,
            expected: backup.checksum.clone(),
            actual,
        });
    }
    Ok(())
}

/// Reads the backup file once, checks those bytes against the recorded
/// checksum and writes them to `staged`.
fn stage_verified(backup: &DataBackup, staged: &Path) -> IntegrityResult<()> {
    let bytes = match fs::read(&backup.file_path) {
        Ok(bytes) => bytes,
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            return Err(IntegrityError::MissingBackupFile(backup.file_path.clone()));
        }
        Err(err) => return Err(err.into()),
    };
    let actual = hex_digest(Sha256::new().chain_update(&bytes));
    if actual != backup.checksum {
        return Err(IntegrityError::ChecksumMismatch {
            id: backup.id,
            expected: backup.checksum.clone(),
            actual,
        });
    }
    fs::write(staged, &bytes)?;
    Ok(())
}

/// Hex-encoded SHA-256 of a file.
pub fn file_checksum(path: &Path) -> io::Result<String> {
    let mut hasher = Sha256::new();
    io::copy(&mut File::open(path)?, &mut hasher)?;
    Ok(hex_digest(hasher))
}

fn hex_digest(hasher: Sha256) -> String {
    let mut hex = String::with_capacity(64);
    for byte in hasher.finalize() {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn sidecar_path(file: &Path) -> PathBuf {
    file.with_extension("json")
}

fn remove_if_present(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err),
        _ => Ok(()),
    }
}
