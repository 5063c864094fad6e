//! The data integrity service.

use crate::backup::BackupManager;
use crate::checks::{self, CheckResult};
use crate::config::IntegrityConfig;
use crate::error::IntegrityResult;
use crate::repair;
use calcsync_core::{
    BackupReason, CheckCategory, Clock, DataBackup, FixMethod, IntegrityIssue, IssueCode,
    Scheduler, Severity, Timestamp,
};
use calcsync_store::LocalStore;
use std::sync::Arc;
use uuid::Uuid;

/// Scheduler task name for periodic full checks.
pub const CHECK_TASK: &str = "integrity_check";
/// Scheduler task name for automatic backups.
pub const BACKUP_TASK: &str = "automatic_backup";

/// What an auto-fix pass did.
#[derive(Debug, Clone, Default)]
pub struct FixReport {
    /// Issues fixed in this pass, marked fixed.
    pub fixed: Vec<IntegrityIssue>,
    /// Unfixed issues left for manual resolution.
    pub remaining: usize,
}

/// What a database repair did.
#[derive(Debug, Clone)]
pub struct RepairReport {
    /// Backup taken before anything changed.
    pub emergency_backup: DataBackup,
    /// Issues fixed by the safe-fix pass.
    pub fixed: usize,
    /// Rows purged as unrepairable.
    pub purged: usize,
    /// Whether the corruption check passed afterwards.
    pub passed: bool,
    /// Issues the final corruption check still found.
    pub remaining: Vec<IntegrityIssue>,
}

/// Checks, repairs and backs up one local store.
///
/// Checks only read and may run beside a sync pass. Auto-fix, repair and
/// restore take the store's maintenance lock, so they wait for a running
/// pass and block new ones until they finish.
pub struct DataIntegrityService {
    store: Arc<LocalStore>,
    config: IntegrityConfig,
    backups: BackupManager,
}

impl DataIntegrityService {
    /// Creates a service for `store`.
    pub fn new(store: Arc<LocalStore>, config: IntegrityConfig) -> Self {
        let backups = BackupManager::new(Arc::clone(&store), &config);
        Self {
            store,
            config,
            backups,
        }
    }

    /// The store being checked.
    pub fn store(&self) -> &Arc<LocalStore> {
        &self.store
    }

    /// The service configuration.
    pub fn config(&self) -> &IntegrityConfig {
        &self.config
    }

    /// The backup manager.
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    fn now(&self) -> Timestamp {
        self.store.clock().now()
    }

    /// Runs one check and persists its findings, replacing the unfixed
    /// issues an earlier run of the same check recorded.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn run_check(&self, category: CheckCategory) -> IntegrityResult<CheckResult> {
        let now = self.now();
        let result = self
            .store
            .with_connection(|conn| checks::run_check(conn, category, now))?;
        self.store.clear_unfixed_issues(Some(category))?;
        self.store.insert_issues(&result.issues)?;
        tracing::info!(
            category = %category,
            passed = result.passed,
            issues = result.issues.len(),
            duration_ms = result.duration.as_millis() as u64,
            "integrity check finished"
        );
        Ok(result)
    }

    /// Runs every check in turn.
    ///
    /// # Errors
    ///
    /// Stops at the first store error.
    pub fn run_all_checks(&self) -> IntegrityResult<Vec<CheckResult>> {
        CheckCategory::ALL
            .iter()
            .map(|category| self.run_check(*category))
            .collect()
    }

    /// Persisted issues.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn list_issues(&self, unfixed_only: bool) -> IntegrityResult<Vec<IntegrityIssue>> {
        Ok(self.store.list_issues(unfixed_only)?)
    }

    /// Applies the known safe fixes to persisted issues at or below
    /// `max_severity`. Critical issues are never touched.
    ///
    /// # Errors
    ///
    /// Returns [`calcsync_store::StoreError::MaintenanceBusy`] if a sync
    /// pass holds the store too long, and store errors. Fixes run in one
    /// transaction, so an error leaves the data unchanged.
    pub fn auto_fix_issues(&self, max_severity: Severity) -> IntegrityResult<FixReport> {
        let _guard = self.store.maintenance_guard()?;
        self.fix_locked(max_severity)
    }

    fn fix_locked(&self, max_severity: Severity) -> IntegrityResult<FixReport> {
        let open = self.store.list_issues(true)?;
        let candidates: Vec<&IntegrityIssue> = open
            .iter()
            .filter(|issue| repair::auto_fixable(issue, max_severity))
            .collect();

        let applied = self.store.transaction(|tx| {
            let mut applied = Vec::new();
            for issue in &candidates {
                if let Some(method) = repair::apply_fix(tx, issue)? {
                    applied.push(((*issue).clone(), method));
                }
            }
            Ok(applied)
        })?;

        let now = self.now();
        let mut fixed = Vec::with_capacity(applied.len());
        for (mut issue, method) in applied {
            self.store.mark_issue_fixed(&issue.id, method, now)?;
            issue.mark_fixed(method, now);
            fixed.push(issue);
        }

        let report = FixReport {
            remaining: open.len() - fixed.len(),
            fixed,
        };
        tracing::info!(
            ceiling = %max_severity,
            fixed = report.fixed.len(),
            remaining = report.remaining,
            "auto-fix finished"
        );
        Ok(report)
    }

    /// Full repair: emergency backup, safe fixes up to `error`, index
    /// rebuild, purge of unrepairable rows, then a corruption re-check.
    ///
    /// # Errors
    ///
    /// If the emergency backup fails nothing else runs. Otherwise returns
    /// store errors from the individual steps.
    pub fn repair_database(&self) -> IntegrityResult<RepairReport> {
        let _guard = self.store.maintenance_guard()?;
        tracing::warn!("database repair started");

        let emergency_backup = self
            .backups
            .create_backup(
                "emergency",
                Some("taken before database repair"),
                BackupReason::Emergency,
            )
            .inspect_err(|err| {
                tracing::error!(error = %err, "emergency backup failed, repair aborted");
            })?;

        for category in [
            CheckCategory::Content,
            CheckCategory::Consistency,
            CheckCategory::Referential,
        ] {
            self.run_check(category)?;
        }
        let fixed = self.fix_locked(Severity::Error)?.fixed.len();

        self.store.with_connection(repair::reindex)?;
        self.mark_open(&[IssueCode::IndexCorruption], FixMethod::Reindexed, |_| Ok(true))?;

        let purged = self.store.transaction(|tx| repair::purge_unrepairable(tx))?;
        self.mark_open(
            &[
                IssueCode::InvalidEnumValue,
                IssueCode::EmptyRequiredField,
                IssueCode::DanglingReference,
            ],
            FixMethod::Purged,
            |issue| {
                let Some(rowid) = issue.record_id.as_deref() else {
                    return Ok(false);
                };
                let exists = self
                    .store
                    .with_connection(|conn| repair::row_exists(conn, &issue.table, rowid))?;
                Ok(!exists)
            },
        )?;

        let check = self.run_check(CheckCategory::Corruption)?;
        let report = RepairReport {
            emergency_backup,
            fixed,
            purged,
            passed: check.passed,
            remaining: check.issues,
        };
        if report.passed {
            tracing::info!(fixed, purged, "database repair finished");
        } else {
            tracing::error!(
                fixed,
                purged,
                remaining = report.remaining.len(),
                "database repair left corruption behind"
            );
        }
        Ok(report)
    }

    /// Marks open issues with one of `codes` fixed when `resolved` says so.
    fn mark_open<F>(
        &self,
        codes: &[IssueCode],
        method: FixMethod,
        resolved: F,
    ) -> IntegrityResult<()>
    where
        F: Fn(&IntegrityIssue) -> IntegrityResult<bool>,
    {
        let now = self.now();
        for issue in self.store.list_issues(true)? {
            if codes.contains(&issue.code) && resolved(&issue)? {
                self.store.mark_issue_fixed(&issue.id, method, now)?;
            }
        }
        Ok(())
    }

    /// Snapshots the live store. See [`BackupManager::create_backup`].
    ///
    /// # Errors
    ///
    /// See [`BackupManager::create_backup`].
    pub fn create_backup(
        &self,
        name: &str,
        description: Option<&str>,
        reason: BackupReason,
    ) -> IntegrityResult<DataBackup> {
        self.backups.create_backup(name, description, reason)
    }

    /// Replaces the live store with a backup. See
    /// [`BackupManager::restore_backup`].
    ///
    /// # Errors
    ///
    /// See [`BackupManager::restore_backup`].
    pub fn restore_backup(&self, id: Uuid) -> IntegrityResult<DataBackup> {
        self.backups.restore_backup(id)
    }

    /// Every cataloged backup, newest first.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn list_backups(&self) -> IntegrityResult<Vec<DataBackup>> {
        self.backups.list_backups()
    }

    /// Checks a backup file against its checksum.
    ///
    /// # Errors
    ///
    /// See [`BackupManager::verify_backup`].
    pub fn verify_backup(&self, id: Uuid) -> IntegrityResult<bool> {
        self.backups.verify_backup(id)
    }

    /// Deletes a backup.
    ///
    /// # Errors
    ///
    /// See [`BackupManager::delete_backup`].
    pub fn delete_backup(&self, id: Uuid) -> IntegrityResult<bool> {
        self.backups.delete_backup(id)
    }

    /// Deletes all but the newest `keep` automatic backups.
    ///
    /// # Errors
    ///
    /// See [`BackupManager::prune_automatic`].
    pub fn prune_automatic(&self, keep: usize) -> IntegrityResult<usize> {
        self.backups.prune_automatic(keep)
    }

    /// Registers periodic checks and automatic backups at the configured
    /// intervals. Returns the names of the registered tasks.
    ///
    /// A periodic check auto-fixes up to the configured ceiling, if any.
    /// An automatic backup prunes older automatic backups afterwards.
    pub fn register_periodic(self: &Arc<Self>, scheduler: &mut Scheduler) -> Vec<&'static str> {
        let mut registered = Vec::new();

        if let Some(interval) = self.config.check_interval {
            let service = Arc::clone(self);
            scheduler.every(CHECK_TASK, interval, move || service.periodic_check());
            registered.push(CHECK_TASK);
        }

        if let Some(interval) = self.config.backup_interval {
            let service = Arc::clone(self);
            scheduler.every(BACKUP_TASK, interval, move || service.periodic_backup());
            registered.push(BACKUP_TASK);
        }

        registered
    }

    fn periodic_check(&self) {
        let results = match self.run_all_checks() {
            Ok(results) => results,
            Err(err) => {
                tracing::warn!(error = %err, "scheduled integrity check failed");
                return;
            }
        };
        let found = results.iter().any(|r| !r.issues.is_empty());
        if let (true, Some(ceiling)) = (found, self.config.auto_fix_ceiling) {
            if let Err(err) = self.auto_fix_issues(ceiling) {
                tracing::warn!(error = %err, "scheduled auto-fix failed");
            }
        }
    }

    fn periodic_backup(&self) {
        let name = format!("automatic {}", calcsync_core::format_timestamp(&self.now()));
        match self.create_backup(&name, None, BackupReason::Scheduled) {
            Ok(_) => {
                if let Err(err) = self.prune_automatic(self.config.keep_automatic) {
                    tracing::warn!(error = %err, "pruning automatic backups failed");
                }
            }
            Err(err) => tracing::warn!(error = %err, "scheduled backup failed"),
        }
    }
}
