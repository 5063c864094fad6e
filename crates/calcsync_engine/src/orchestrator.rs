//! Sync orchestrator.
//!
//! A pass registers the device, then for each entity type uploads pending
//! records, downloads what changed remotely since the last checkpoint and
//! reconciles the two.

use crate::config::SyncConfig;
use crate::convert::{record_from, snapshot_of, validate};
use crate::error::{SyncError, SyncResult};
use crate::queue::{DrainOutcome, OfflineQueueManager, QueueExecutor};
use crate::remote::{RemoteState, RemoteStore};
use calcsync_core::{
    ClientId, ConflictKind, ConflictResolution, ConflictStrategy, DeviceInfo, EntityType,
    NewQueueItem, OfflineQueueItem, QueueOperation, QueuePriority, SyncConflict, SyncStatus,
    Timestamp,
};
use calcsync_protocol::{
    detect, resolve, Credentials, DetectOptions, MergePolicy, RecordSnapshot, Resolution, Winner,
};
use calcsync_store::{LocalStore, StoredRecord};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use uuid::Uuid;

/// `resolved_by` label for conflicts settled during a pass.
pub const AUTO_RESOLVER: &str = "auto";

/// `resolved_by` label for conflicts settled through
/// [`SyncOrchestrator::resolve_conflict`].
pub const MANUAL_RESOLVER: &str = "user";

/// What the orchestrator is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncState {
    /// No pass is running.
    Idle,
    /// Registering the device.
    Registering,
    /// Uploading pending records.
    Uploading,
    /// Downloading and applying remote changes.
    Downloading,
    /// Draining the offline queue.
    Draining,
    /// The last pass completed.
    Synced,
    /// The last pass was aborted.
    Error,
}

impl SyncState {
    /// Returns true while a pass or drain is running.
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            SyncState::Registering
                | SyncState::Uploading
                | SyncState::Downloading
                | SyncState::Draining
        )
    }
}

/// Advisory counters across passes.
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    /// Passes that ran to the end.
    pub passes_completed: u64,
    /// Records uploaded.
    pub records_uploaded: u64,
    /// Remote versions applied locally.
    pub records_downloaded: u64,
    /// Conflicts detected.
    pub conflicts_detected: u64,
    /// Uploads that failed, retryable or not.
    pub upload_failures: u64,
    /// End of the last completed pass.
    pub last_sync_at: Option<Timestamp>,
    /// Duration of the last completed pass.
    pub last_duration: Option<Duration>,
    /// Most recent remote failure.
    pub last_error: Option<String>,
}

/// What a completed pass did.
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    /// Records uploaded.
    pub uploaded: usize,
    /// Remote versions applied locally.
    pub downloaded: usize,
    /// Conflicts detected, resolved unless resolution is deferred.
    pub conflicts: Vec<SyncConflict>,
    /// Uploads that hit a retryable failure and stay pending.
    pub deferred: usize,
    /// Records that failed for good.
    pub failed: usize,
    /// Entity types whose checkpoint moved forward.
    pub checkpoint_advanced: Vec<EntityType>,
    /// Remote failures absorbed during the pass.
    pub errors: Vec<String>,
    /// Set when local data turned out to be corrupt; the integrity service
    /// should run.
    pub corruption_detected: bool,
    /// Wall time of the pass.
    pub duration: Duration,
}

impl SyncReport {
    /// Returns true if nothing failed or was deferred.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.deferred == 0 && self.errors.is_empty()
    }
}

/// Outcome of [`SyncOrchestrator::perform_sync`].
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The pass ran.
    Completed(SyncReport),
    /// Another pass was running; nothing was done.
    AlreadyInProgress,
    /// Remote sync is switched off.
    Disabled {
        /// Why.
        reason: String,
    },
    /// Maintenance holds the store.
    MaintenanceInProgress,
}

impl SyncOutcome {
    /// The report, if the pass ran.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            SyncOutcome::Completed(report) => Some(report),
            _ => None,
        }
    }
}

/// Cancels a running pass from another thread.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    /// Requests cancellation. The pass stops before the next record.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// What happened to one pushed record.
enum PushOutcome {
    Uploaded,
    Resolved(SyncConflict),
}

/// Clears the in-progress flag when a pass ends.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Coordinates the local store, the offline queue and the remote store.
pub struct SyncOrchestrator<R: RemoteStore> {
    store: Arc<LocalStore>,
    queue: Arc<OfflineQueueManager>,
    remote: RemoteState<R>,
    device: DeviceInfo,
    config: SyncConfig,
    policies: BTreeMap<EntityType, MergePolicy>,
    in_progress: AtomicBool,
    cancelled: Arc<AtomicBool>,
    state: RwLock<SyncState>,
    stats: RwLock<SyncStats>,
}

impl<R: RemoteStore> SyncOrchestrator<R> {
    /// Creates an orchestrator with the stock merge policies.
    pub fn new(
        store: Arc<LocalStore>,
        queue: Arc<OfflineQueueManager>,
        remote: RemoteState<R>,
        device: DeviceInfo,
        config: SyncConfig,
    ) -> Self {
        let policies = EntityType::ALL
            .iter()
            .map(|&entity| (entity, MergePolicy::for_entity(entity)))
            .collect();
        Self {
            store,
            queue,
            remote,
            device,
            config,
            policies,
            in_progress: AtomicBool::new(false),
            cancelled: Arc::new(AtomicBool::new(false)),
            state: RwLock::new(SyncState::Idle),
            stats: RwLock::new(SyncStats::default()),
        }
    }

    /// Replaces the merge policy for one entity type.
    #[must_use]
    pub fn with_merge_policy(mut self, entity_type: EntityType, policy: MergePolicy) -> Self {
        self.policies.insert(entity_type, policy);
        self
    }

    /// Current state.
    pub fn state(&self) -> SyncState {
        *self.state.read()
    }

    /// Advisory statistics.
    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }

    /// The sync configuration.
    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    /// The offline queue this orchestrator feeds.
    pub fn queue(&self) -> &Arc<OfflineQueueManager> {
        &self.queue
    }

    /// Returns true while a pass or drain is running.
    pub fn is_syncing(&self) -> bool {
        self.in_progress.load(Ordering::SeqCst)
    }

    /// Cancels the running pass between records.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    /// A handle that cancels the running pass from elsewhere.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(Arc::clone(&self.cancelled))
    }

    fn check_cancelled(&self) -> SyncResult<()> {
        if self.cancelled.load(Ordering::SeqCst) {
            Err(SyncError::Cancelled)
        } else {
            Ok(())
        }
    }

    fn set_state(&self, state: SyncState) {
        *self.state.write() = state;
    }

    fn policy(&self, entity_type: EntityType) -> MergePolicy {
        self.policies
            .get(&entity_type)
            .cloned()
            .unwrap_or_else(|| MergePolicy::for_entity(entity_type))
    }

    fn detect_options(&self) -> DetectOptions {
        DetectOptions {
            concurrent_window: self.config.concurrent_window,
        }
    }

    /// Claims the in-progress flag, or explains why a pass cannot start.
    fn begin(&self) -> Result<(Arc<R>, PassGuard<'_>), SyncOutcome> {
        let remote = match &self.remote {
            RemoteState::Disabled { reason } => {
                return Err(SyncOutcome::Disabled {
                    reason: reason.clone(),
                })
            }
            RemoteState::Ready(remote) => Arc::clone(remote),
        };
        if self
            .in_progress
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("sync already in progress");
            return Err(SyncOutcome::AlreadyInProgress);
        }
        self.cancelled.store(false, Ordering::SeqCst);
        Ok((remote, PassGuard(&self.in_progress)))
    }

    /// [`SyncOrchestrator::perform_sync`] with the configured strategy.
    ///
    /// # Errors
    ///
    /// See [`SyncOrchestrator::perform_sync`].
    pub fn perform_sync_default(&self, credentials: &Credentials) -> SyncResult<SyncOutcome> {
        self.perform_sync(credentials, self.config.strategy)
    }

    /// Runs one sync pass.
    ///
    /// Remote failures other than authentication are absorbed into record
    /// and queue state and listed in the report.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Auth`] when the credentials are rejected,
    /// [`SyncError::Cancelled`] when the pass was cancelled, and local store
    /// failures.
    pub fn perform_sync(
        &self,
        credentials: &Credentials,
        strategy: ConflictStrategy,
    ) -> SyncResult<SyncOutcome> {
        let (remote, _pass) = match self.begin() {
            Ok(started) => started,
            Err(outcome) => return Ok(outcome),
        };
        let Some(_sync_guard) = self.store.try_sync_guard() else {
            tracing::info!("sync skipped, maintenance in progress");
            return Ok(SyncOutcome::MaintenanceInProgress);
        };

        let started = Instant::now();
        tracing::info!(strategy = %strategy, device = %self.device.device_id, "sync pass started");

        match self.run_pass(remote.as_ref(), credentials, strategy) {
            Ok(mut report) => {
                report.duration = started.elapsed();
                self.finish_pass(&report);
                Ok(SyncOutcome::Completed(report))
            }
            Err(err) => {
                self.set_state(SyncState::Error);
                self.stats.write().last_error = Some(err.to_string());
                tracing::warn!(error = %err, "sync pass aborted");
                Err(err)
            }
        }
    }

    fn run_pass(
        &self,
        remote: &R,
        credentials: &Credentials,
        strategy: ConflictStrategy,
    ) -> SyncResult<SyncReport> {
        let mut report = SyncReport::default();

        let recovered = self.store.recover_syncing_records()?;
        if recovered > 0 {
            tracing::info!(count = recovered, "interrupted uploads returned to pending");
        }

        self.set_state(SyncState::Registering);
        match remote.register_device(&self.device, credentials) {
            Ok(()) => {}
            Err(err) if err.is_auth() => return Err(err),
            Err(err) => {
                tracing::warn!(error = %err, "device registration failed");
                report.errors.push(format!("register device: {err}"));
            }
        }

        let mut checkpoints = Vec::new();
        for &entity in EntityType::ALL {
            self.check_cancelled()?;
            self.set_state(SyncState::Uploading);
            self.upload_pending(remote, entity, credentials, strategy, &mut report)?;
            self.set_state(SyncState::Downloading);
            if let Some(server_time) =
                self.download_changes(remote, entity, credentials, strategy, &mut report)?
            {
                checkpoints.push((entity, server_time));
            }
        }

        // Checkpoints only move after a pass where nothing failed.
        if report.is_clean() {
            for (entity, server_time) in checkpoints {
                self.store.set_checkpoint(entity, server_time)?;
                report.checkpoint_advanced.push(entity);
            }
        } else if !checkpoints.is_empty() {
            tracing::debug!(errors = report.errors.len(), "checkpoints held after partial failure");
        }
        Ok(report)
    }

    fn finish_pass(&self, report: &SyncReport) {
        self.set_state(SyncState::Synced);
        {
            let mut stats = self.stats.write();
            stats.passes_completed += 1;
            stats.records_uploaded += report.uploaded as u64;
            stats.records_downloaded += report.downloaded as u64;
            stats.conflicts_detected += report.conflicts.len() as u64;
            stats.upload_failures += (report.failed + report.deferred) as u64;
            stats.last_sync_at = Some(self.store.clock().now());
            stats.last_duration = Some(report.duration);
            stats.last_error = report.errors.last().cloned();
        }
        tracing::info!(
            uploaded = report.uploaded,
            downloaded = report.downloaded,
            conflicts = report.conflicts.len(),
            deferred = report.deferred,
            failed = report.failed,
            duration_ms = u64::try_from(report.duration.as_millis()).unwrap_or(u64::MAX),
            "sync pass finished"
        );
        if report.corruption_detected {
            tracing::error!("corrupt local rows found during sync; run an integrity check");
        }
    }

    fn upload_pending(
        &self,
        remote: &R,
        entity: EntityType,
        credentials: &Credentials,
        strategy: ConflictStrategy,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        for record in self.store.list_pending_records(entity)? {
            self.check_cancelled()?;
            match self.push_record(remote, &record, credentials, strategy) {
                Ok(PushOutcome::Uploaded) => report.uploaded += 1,
                Ok(PushOutcome::Resolved(conflict)) => report.conflicts.push(conflict),
                Err(err) if err.is_auth() => return Err(err),
                Err(err @ (SyncError::Cancelled | SyncError::Store(_))) => return Err(err),
                Err(err) if err.is_retryable() => {
                    report.deferred += 1;
                    report.errors.push(format!("upload {entity} {}: {err}", record.client_id()));
                }
                Err(err) => {
                    if matches!(err, SyncError::Corruption(_)) {
                        report.corruption_detected = true;
                    }
                    report.failed += 1;
                    report.errors.push(format!("upload {entity} {}: {err}", record.client_id()));
                }
            }
        }
        Ok(())
    }

    /// Uploads one record and settles the status it ends in.
    fn push_record(
        &self,
        remote: &R,
        record: &StoredRecord,
        credentials: &Credentials,
        strategy: ConflictStrategy,
    ) -> SyncResult<PushOutcome> {
        let entity = record.entity_type();
        let client_id = *record.client_id();

        if let Err(err) = validate(record) {
            tracing::warn!(
                entity = %entity,
                client_id = %client_id,
                error = %err,
                "record failed validation"
            );
            self.store.set_record_status(entity, &client_id, SyncStatus::Failed)?;
            return Err(err);
        }

        self.store.set_record_status(entity, &client_id, SyncStatus::Syncing)?;
        let snapshot = snapshot_of(record);
        match remote.upload(entity, &snapshot, record.server_timestamp(), credentials) {
            Ok(ack) => {
                let synced = self.store.mark_record_synced(
                    entity,
                    &client_id,
                    &ack.server_id,
                    ack.server_timestamp,
                    record.updated_at(),
                )?;
                if !synced {
                    tracing::debug!(
                        client_id = %client_id,
                        "record edited during upload, stays pending"
                    );
                }
                Ok(PushOutcome::Uploaded)
            }
            Err(SyncError::Conflict(current)) => {
                let kind = detect(&snapshot, &current, &self.detect_options())
                    .map_or(ConflictKind::VersionMismatch, |d| d.kind);
                let conflict = self.settle(record, *current, kind, strategy)?;
                Ok(PushOutcome::Resolved(conflict))
            }
            Err(err) => {
                let status = if err.is_retryable()
                    || err.is_auth()
                    || matches!(err, SyncError::Cancelled)
                {
                    SyncStatus::Pending
                } else {
                    SyncStatus::Failed
                };
                tracing::warn!(
                    entity = %entity,
                    client_id = %client_id,
                    status = %status,
                    error = %err,
                    "upload failed"
                );
                self.store.set_record_status(entity, &client_id, status)?;
                Err(err)
            }
        }
    }

    /// Applies remote changes for one entity type. Returns the server time
    /// to checkpoint at if every downloaded record was applied.
    fn download_changes(
        &self,
        remote: &R,
        entity: EntityType,
        credentials: &Credentials,
        strategy: ConflictStrategy,
        report: &mut SyncReport,
    ) -> SyncResult<Option<Timestamp>> {
        let since = self.store.get_checkpoint(entity)?;
        let batch = match remote.download(entity, since, credentials) {
            Ok(batch) => batch,
            Err(err) if err.is_auth() => return Err(err),
            Err(err) => {
                tracing::warn!(entity = %entity, error = %err, "download failed");
                report.errors.push(format!("download {entity}: {err}"));
                return Ok(None);
            }
        };

        let mut complete = true;
        for snapshot in &batch.records {
            self.check_cancelled()?;
            if snapshot.entity_type != entity {
                complete = false;
                report.errors.push(format!(
                    "download {entity}: unexpected {} record",
                    snapshot.entity_type
                ));
                continue;
            }
            match self.apply_remote(snapshot, strategy, report) {
                Ok(()) => {}
                Err(err @ (SyncError::Protocol(_) | SyncError::Validation(_))) => {
                    tracing::warn!(
                        client_id = %snapshot.client_id,
                        error = %err,
                        "skipped malformed remote record"
                    );
                    complete = false;
                    report.errors.push(format!("apply {entity} {}: {err}", snapshot.client_id));
                }
                Err(err) => return Err(err),
            }
        }

        Ok(complete.then_some(batch.server_time))
    }

    /// Reconciles one downloaded snapshot with the local row.
    fn apply_remote(
        &self,
        snapshot: &RecordSnapshot,
        strategy: ConflictStrategy,
        report: &mut SyncReport,
    ) -> SyncResult<()> {
        let entity = snapshot.entity_type;
        let Some(local) = self.store.find_record(entity, &snapshot.client_id)? else {
            if !snapshot.deleted {
                self.store
                    .upsert_record(&record_from(snapshot, SyncStatus::Synced)?)?;
                report.downloaded += 1;
            }
            return Ok(());
        };

        if local.sync_status() == SyncStatus::Conflict {
            // Already recorded; waits for resolve_conflict.
            return Ok(());
        }
        let unsynced = local.sync_status().has_local_changes();
        let local_snapshot = snapshot_of(&local);
        if unsynced {
            if let Some(detected) = detect(&local_snapshot, snapshot, &self.detect_options()) {
                let conflict = self.settle(&local, snapshot.clone(), detected.kind, strategy)?;
                report.conflicts.push(conflict);
                return Ok(());
            }
        }

        let remote_advanced = match (snapshot.server_timestamp, local.server_timestamp()) {
            (Some(theirs), Some(ours)) => theirs > ours,
            (Some(_), None) => true,
            (None, _) => false,
        };
        if !remote_advanced {
            return Ok(());
        }

        if unsynced {
            if local_snapshot.same_content(snapshot) {
                // The server already has this content.
                self.store
                    .upsert_record(&record_from(snapshot, SyncStatus::Synced)?)?;
            } else {
                tracing::debug!(client_id = %snapshot.client_id, "keeping unsynced local changes");
            }
            return Ok(());
        }

        if snapshot.deleted {
            self.store.delete_record(entity, &snapshot.client_id)?;
        } else {
            self.store
                .upsert_record(&record_from(snapshot, SyncStatus::Synced)?)?;
        }
        report.downloaded += 1;
        Ok(())
    }

    /// Records a conflict and, unless resolution is deferred, settles it.
    fn settle(
        &self,
        local: &StoredRecord,
        remote: RecordSnapshot,
        kind: ConflictKind,
        strategy: ConflictStrategy,
    ) -> SyncResult<SyncConflict> {
        let entity = local.entity_type();
        let client_id = *local.client_id();
        let local_snapshot = snapshot_of(local);
        let now = self.store.clock().now();
        let mut conflict = SyncConflict::new(
            entity,
            client_id,
            kind,
            local_snapshot.to_value(),
            remote.to_value(),
            now,
        );
        tracing::info!(entity = %entity, client_id = %client_id, kind = %kind, "conflict detected");

        if self.config.defer_conflicts {
            self.store.insert_conflict(&conflict)?;
            self.store
                .set_record_status(entity, &client_id, SyncStatus::Conflict)?;
            return Ok(conflict);
        }

        let resolution = resolve(&local_snapshot, &remote, strategy, &self.policy(entity));
        self.apply_resolution(&resolution)?;
        conflict.resolution = Some(ConflictResolution {
            strategy,
            resolved_by: AUTO_RESOLVER.to_string(),
            resolved_at: now,
        });
        self.store.insert_conflict(&conflict)?;
        Ok(conflict)
    }

    /// Writes a resolution to the local store and re-queues an upload when
    /// the server does not hold the kept version.
    fn apply_resolution(&self, resolution: &Resolution) -> SyncResult<()> {
        let record = &resolution.record;
        let entity = record.entity_type;

        if !resolution.needs_upload() {
            if record.deleted {
                self.store.delete_record(entity, &record.client_id)?;
            } else {
                self.store
                    .upsert_record(&record_from(record, SyncStatus::Synced)?)?;
            }
            tracing::debug!(client_id = %record.client_id, "remote version kept");
            return Ok(());
        }

        self.store
            .upsert_record(&record_from(record, SyncStatus::Pending)?)?;
        let item = NewQueueItem::new(QueueOperation::Sync, entity, record.client_id.to_string())
            .with_priority(QueuePriority::High);
        if let Err(err) = self.queue.enqueue(item) {
            // The row is pending, so the next pass uploads it anyway.
            tracing::warn!(
                client_id = %record.client_id,
                error = %err,
                "could not re-queue resolved record"
            );
        }
        tracing::debug!(
            client_id = %record.client_id,
            winner = ?resolution.winner,
            "local version kept, upload re-queued"
        );
        Ok(())
    }

    /// Settles a conflict recorded while resolution was deferred.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] if the conflict does not exist or
    /// is already resolved, and store errors.
    pub fn resolve_conflict(
        &self,
        conflict_id: &Uuid,
        strategy: ConflictStrategy,
    ) -> SyncResult<Winner> {
        let conflict = self
            .store
            .get_conflict(conflict_id)?
            .ok_or_else(|| SyncError::Validation(format!("conflict {conflict_id} not found")))?;
        if conflict.is_resolved() {
            return Err(SyncError::Validation(format!(
                "conflict {conflict_id} is already resolved"
            )));
        }

        let remote: RecordSnapshot = serde_json::from_value(conflict.remote.clone())
            .map_err(|e| SyncError::Protocol(format!("stored remote snapshot: {e}")))?;
        let local = match self
            .store
            .find_record(conflict.entity_type, &conflict.entity_id)?
        {
            Some(record) => snapshot_of(&record),
            None => serde_json::from_value(conflict.local.clone())
                .map_err(|e| SyncError::Protocol(format!("stored local snapshot: {e}")))?,
        };

        let resolution = resolve(&local, &remote, strategy, &self.policy(conflict.entity_type));
        self.apply_resolution(&resolution)?;
        self.store.record_conflict_resolution(
            conflict_id,
            &ConflictResolution {
                strategy,
                resolved_by: MANUAL_RESOLVER.to_string(),
                resolved_at: self.store.clock().now(),
            },
        )?;
        tracing::info!(
            conflict = %conflict_id,
            strategy = %strategy,
            winner = ?resolution.winner,
            "conflict resolved"
        );
        Ok(resolution.winner)
    }

    /// Conflicts awaiting [`SyncOrchestrator::resolve_conflict`].
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn pending_conflicts(&self) -> SyncResult<Vec<SyncConflict>> {
        Ok(self.store.list_conflicts(true)?)
    }

    /// Moves every `failed` record back to `pending`. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn reset_failed_records(&self) -> SyncResult<usize> {
        let count = self.store.reset_failed_records()?;
        if count > 0 {
            tracing::info!(count, "reset failed records");
        }
        Ok(count)
    }

    /// Drains the offline queue through the remote store.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn drain_queue(&self, credentials: &Credentials) -> SyncResult<DrainOutcome> {
        let (remote, _pass) = match self.begin() {
            Ok(started) => started,
            Err(SyncOutcome::Disabled { reason }) => return Ok(DrainOutcome::Skipped { reason }),
            Err(_) => {
                return Ok(DrainOutcome::Skipped {
                    reason: "sync pass in progress".into(),
                })
            }
        };
        let Some(_sync_guard) = self.store.try_sync_guard() else {
            return Ok(DrainOutcome::Skipped {
                reason: "maintenance in progress".into(),
            });
        };

        self.set_state(SyncState::Draining);
        let executor = SyncQueueExecutor {
            orchestrator: self,
            remote: remote.as_ref(),
            credentials,
            strategy: self.config.strategy,
        };
        let outcome = self.queue.drain(&executor);
        self.set_state(SyncState::Idle);
        outcome
    }

    /// Drains the queue, then runs a pass. The reconnect hook.
    ///
    /// # Errors
    ///
    /// See [`SyncOrchestrator::perform_sync`].
    pub fn sync_now(&self, credentials: &Credentials) -> SyncResult<SyncOutcome> {
        self.drain_queue(credentials)?;
        self.perform_sync_default(credentials)
    }
}

/// Executes queue items against the remote store.
struct SyncQueueExecutor<'a, R: RemoteStore> {
    orchestrator: &'a SyncOrchestrator<R>,
    remote: &'a R,
    credentials: &'a Credentials,
    strategy: ConflictStrategy,
}

impl<R: RemoteStore> QueueExecutor for SyncQueueExecutor<'_, R> {
    fn execute(&self, item: &OfflineQueueItem) -> SyncResult<()> {
        let client_id: ClientId = item.entity_id.parse()?;
        if item.operation == QueueOperation::Delete {
            return self
                .remote
                .delete(item.entity_type, &client_id, self.credentials);
        }

        let store = &self.orchestrator.store;
        let Some(record) = store.find_record(item.entity_type, &client_id)? else {
            // Deleted locally since it was queued.
            return Ok(());
        };
        match record.sync_status() {
            SyncStatus::Pending | SyncStatus::Syncing => self
                .orchestrator
                .push_record(self.remote, &record, self.credentials, self.strategy)
                .map(|_| ()),
            SyncStatus::Synced => Ok(()),
            SyncStatus::Conflict => Err(SyncError::Validation(format!(
                "record {client_id} has an unresolved conflict"
            ))),
            SyncStatus::Failed => Err(SyncError::Validation(format!(
                "record {client_id} failed; reset it before retrying"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::remote::{DownloadBatch, UploadAck};
    use calcsync_core::{
        add_duration, CalculationRecord, CalculationType, Clock, DeviceId, ManualClock,
        SharedClock,
    };
    use calcsync_store::StoreConfig;
    use parking_lot::Mutex;
    use serde_json::json;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Mode {
        Online,
        Offline,
        Unauthorized,
    }

    /// In-memory remote that accepts an upload only when it is based on the
    /// version it holds.
    struct FakeRemote {
        clock: SharedClock,
        mode: Mutex<Mode>,
        reject_registration: Mutex<bool>,
        rows: Mutex<BTreeMap<ClientId, RecordSnapshot>>,
        last: Mutex<Option<Timestamp>>,
        uploads: Mutex<usize>,
    }

    impl FakeRemote {
        fn new(clock: &ManualClock) -> Self {
            Self {
                clock: clock.shared(),
                mode: Mutex::new(Mode::Online),
                reject_registration: Mutex::new(false),
                rows: Mutex::new(BTreeMap::new()),
                last: Mutex::new(None),
                uploads: Mutex::new(0),
            }
        }

        fn set_mode(&self, mode: Mode) {
            *self.mode.lock() = mode;
        }

        fn fail_registration(&self, fail: bool) {
            *self.reject_registration.lock() = fail;
        }

        fn check(&self) -> SyncResult<()> {
            match *self.mode.lock() {
                Mode::Online => Ok(()),
                Mode::Offline => Err(SyncError::network("offline")),
                Mode::Unauthorized => Err(SyncError::Auth("token expired".into())),
            }
        }

        fn next_ts(&self) -> Timestamp {
            let now = self.clock.now();
            let mut last = self.last.lock();
            let ts = match *last {
                Some(prev) if prev >= now => add_duration(prev, Duration::from_millis(1)),
                _ => now,
            };
            *last = Some(ts);
            ts
        }

        /// Simulates another device editing a field.
        fn edit_remotely(&self, client_id: &ClientId, field: &str, value: serde_json::Value) {
            let ts = self.next_ts();
            let mut rows = self.rows.lock();
            let row = rows.get_mut(client_id).unwrap();
            row.data.insert(field.to_string(), value);
            row.device_id = DeviceId::new("other-device");
            row.updated_at = Some(ts);
            row.server_timestamp = Some(ts);
        }

        fn row(&self, client_id: &ClientId) -> Option<RecordSnapshot> {
            self.rows.lock().get(client_id).cloned()
        }
    }

    impl RemoteStore for FakeRemote {
        fn upload(
            &self,
            _entity_type: EntityType,
            record: &RecordSnapshot,
            base: Option<Timestamp>,
            _credentials: &Credentials,
        ) -> SyncResult<UploadAck> {
            self.check()?;
            *self.uploads.lock() += 1;
            let current = self.row(&record.client_id);
            if let Some(current) = &current {
                if current.same_content(record) {
                    return Ok(UploadAck {
                        server_id: current.server_id.clone().unwrap_or_default(),
                        server_timestamp: current.server_timestamp.unwrap_or(current.created_at),
                        created: false,
                    });
                }
                if base != current.server_timestamp {
                    return Err(SyncError::Conflict(Box::new(current.clone())));
                }
            }
            let ts = self.next_ts();
            let mut stored = record.clone();
            stored.server_id = Some(format!("srv-{}", record.client_id));
            stored.server_timestamp = Some(ts);
            let ack = UploadAck {
                server_id: stored.server_id.clone().unwrap_or_default(),
                server_timestamp: ts,
                created: current.is_none(),
            };
            self.rows.lock().insert(record.client_id, stored);
            Ok(ack)
        }

        fn download(
            &self,
            entity_type: EntityType,
            since: Option<Timestamp>,
            _credentials: &Credentials,
        ) -> SyncResult<DownloadBatch> {
            self.check()?;
            let records = self
                .rows
                .lock()
                .values()
                .filter(|r| r.entity_type == entity_type)
                .filter(|r| match (since, r.server_timestamp) {
                    (Some(since), Some(ts)) => ts > since,
                    _ => true,
                })
                .cloned()
                .collect();
            let server_time = self.last.lock().unwrap_or_else(|| self.clock.now());
            Ok(DownloadBatch {
                records,
                server_time: server_time.max(self.clock.now()),
            })
        }

        fn delete(
            &self,
            _entity_type: EntityType,
            client_id: &ClientId,
            _credentials: &Credentials,
        ) -> SyncResult<()> {
            self.check()?;
            self.rows.lock().remove(client_id);
            Ok(())
        }

        fn register_device(
            &self,
            _info: &DeviceInfo,
            _credentials: &Credentials,
        ) -> SyncResult<()> {
            self.check()?;
            if *self.reject_registration.lock() {
                return Err(SyncError::network("registration endpoint unavailable"));
            }
            Ok(())
        }
    }

    struct Fixture {
        clock: ManualClock,
        store: Arc<LocalStore>,
        remote: Arc<FakeRemote>,
        sync: SyncOrchestrator<FakeRemote>,
    }

    fn fixture(config: SyncConfig) -> Fixture {
        let clock = ManualClock::at_millis(1_700_000_000_000);
        let store = Arc::new(
            LocalStore::open_with_clock(StoreConfig::in_memory(), clock.shared()).unwrap(),
        );
        let queue = Arc::new(OfflineQueueManager::new(Arc::clone(&store), QueueConfig::new()));
        let remote = Arc::new(FakeRemote::new(&clock));
        let sync = SyncOrchestrator::new(
            Arc::clone(&store),
            queue,
            RemoteState::Ready(Arc::clone(&remote)),
            DeviceInfo::new(DeviceId::new("phone-1"), "Phone"),
            config,
        );
        Fixture {
            clock,
            store,
            remote,
            sync,
        }
    }

    fn creds() -> Credentials {
        Credentials::bearer("token")
    }

    fn save_calc(fx: &Fixture) -> ClientId {
        let calc = CalculationRecord::new(
            CalculationType::CableSizing,
            json!({"current": 32}),
            json!({"size_mm2": 6}),
            DeviceId::new("phone-1"),
            fx.clock.now(),
        );
        let client_id = calc.client_id;
        fx.store.save_record(&StoredRecord::Calculation(calc)).unwrap();
        client_id
    }

    /// Edits the local copy the way the writer does.
    fn edit_locally(fx: &Fixture, client_id: &ClientId, notes: &str) {
        let Some(StoredRecord::Calculation(mut calc)) = fx
            .store
            .find_record(EntityType::Calculation, client_id)
            .unwrap()
        else {
            panic!("calculation missing");
        };
        calc.notes = Some(notes.to_string());
        calc.touch(fx.clock.now());
        fx.store.upsert_record(&StoredRecord::Calculation(calc)).unwrap();
    }

    fn local(fx: &Fixture, client_id: &ClientId) -> StoredRecord {
        fx.store
            .find_record(EntityType::Calculation, client_id)
            .unwrap()
            .unwrap()
    }

    fn completed(outcome: SyncOutcome) -> SyncReport {
        match outcome {
            SyncOutcome::Completed(report) => report,
            other => panic!("pass did not run: {other:?}"),
        }
    }

    #[test]
    fn disabled_remote_does_nothing() {
        let clock = ManualClock::at_millis(0);
        let store = Arc::new(
            LocalStore::open_with_clock(StoreConfig::in_memory(), clock.shared()).unwrap(),
        );
        let queue = Arc::new(OfflineQueueManager::new(Arc::clone(&store), QueueConfig::new()));
        let sync: SyncOrchestrator<FakeRemote> = SyncOrchestrator::new(
            store,
            queue,
            RemoteState::disabled("not signed in"),
            DeviceInfo::new(DeviceId::new("phone-1"), "Phone"),
            SyncConfig::new(),
        );
        match sync.perform_sync_default(&creds()).unwrap() {
            SyncOutcome::Disabled { reason } => assert_eq!(reason, "not signed in"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            sync.drain_queue(&creds()).unwrap(),
            DrainOutcome::Skipped { .. }
        ));
        assert_eq!(sync.state(), SyncState::Idle);
    }

    #[test]
    fn pending_record_is_uploaded_and_marked_synced() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.uploaded, 1);
        assert!(report.is_clean());
        assert_eq!(report.checkpoint_advanced, EntityType::ALL.to_vec());

        let record = local(&fx, &client_id);
        assert_eq!(record.sync_status(), SyncStatus::Synced);
        assert!(record.server_timestamp().is_some());
        assert!(fx.store.get_checkpoint(EntityType::Calculation).unwrap().is_some());
        assert_eq!(fx.sync.state(), SyncState::Synced);
        assert_eq!(fx.sync.stats().passes_completed, 1);

        // A second pass has nothing to upload and applies nothing.
        let again = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(again.uploaded, 0);
        assert_eq!(again.downloaded, 0);
    }

    #[test]
    fn remote_records_are_downloaded() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        fx.sync.perform_sync_default(&creds()).unwrap();

        fx.clock.advance(Duration::from_secs(60));
        fx.remote.edit_remotely(&client_id, "notes", json!("checked on site"));

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.downloaded, 1);
        assert!(report.conflicts.is_empty());
        let StoredRecord::Calculation(calc) = local(&fx, &client_id) else {
            panic!("wrong entity");
        };
        assert_eq!(calc.notes.as_deref(), Some("checked on site"));
        assert_eq!(calc.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn offline_upload_stays_pending() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        fx.remote.set_mode(Mode::Offline);

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.uploaded, 0);
        assert_eq!(report.deferred, 1);
        assert!(report.checkpoint_advanced.is_empty());
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Pending);
        assert!(fx.store.get_checkpoint(EntityType::Calculation).unwrap().is_none());

        fx.remote.set_mode(Mode::Online);
        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.uploaded, 1);
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Synced);
    }

    #[test]
    fn rejected_credentials_abort_the_pass() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        fx.remote.set_mode(Mode::Unauthorized);

        let err = fx.sync.perform_sync_default(&creds()).unwrap_err();
        assert!(err.is_auth());
        assert_eq!(fx.sync.state(), SyncState::Error);
        assert!(!fx.sync.is_syncing());
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Pending);
        assert!(fx.sync.stats().last_error.is_some());
    }

    #[test]
    fn invalid_record_is_marked_failed_and_can_be_reset() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        // Bypass the store's own validation.
        fx.store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE calculations SET parameters = '[1]' WHERE client_id = ?1",
                    [client_id.to_string()],
                )?;
                Ok(())
            })
            .unwrap();

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.failed, 1);
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Failed);
        assert_eq!(*fx.remote.uploads.lock(), 0);

        assert_eq!(fx.sync.reset_failed_records().unwrap(), 1);
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Pending);
    }

    #[test]
    fn record_left_syncing_is_uploaded_on_next_pass() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        // An upload that never finished.
        fx.store
            .set_record_status(EntityType::Calculation, &client_id, SyncStatus::Syncing)
            .unwrap();

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.uploaded, 1);
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Synced);
        assert!(fx.remote.row(&client_id).is_some());
    }

    #[test]
    fn checkpoint_holds_when_an_upload_fails() {
        let fx = fixture(SyncConfig::new());
        save_calc(&fx);
        let broken = save_calc(&fx);
        fx.store
            .with_connection(|conn| {
                conn.execute(
                    "UPDATE calculations SET parameters = '[1]' WHERE client_id = ?1",
                    [broken.to_string()],
                )?;
                Ok(())
            })
            .unwrap();

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.uploaded, 1);
        assert_eq!(report.failed, 1);
        assert!(report.checkpoint_advanced.is_empty());
        for entity in EntityType::ALL {
            assert!(fx.store.get_checkpoint(*entity).unwrap().is_none());
        }

        // The failed record is parked, so the next pass is clean.
        fx.clock.advance(Duration::from_secs(5));
        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert!(report.is_clean());
        assert_eq!(report.checkpoint_advanced, EntityType::ALL.to_vec());
        assert!(fx.store.get_checkpoint(EntityType::Calculation).unwrap().is_some());
    }

    #[test]
    fn checkpoint_holds_when_registration_fails() {
        let fx = fixture(SyncConfig::new());
        fx.remote.fail_registration(true);

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.errors.len(), 1);
        assert!(report.checkpoint_advanced.is_empty());
        assert!(fx.store.get_checkpoint(EntityType::Calculation).unwrap().is_none());

        fx.remote.fail_registration(false);
        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.checkpoint_advanced, EntityType::ALL.to_vec());
    }

    #[test]
    fn maintenance_blocks_a_pass() {
        let fx = fixture(SyncConfig::new());
        let _guard = fx.store.maintenance_guard().unwrap();
        assert!(matches!(
            fx.sync.perform_sync_default(&creds()).unwrap(),
            SyncOutcome::MaintenanceInProgress
        ));
        assert!(!fx.sync.is_syncing());
    }

    #[test]
    fn concurrent_edit_resolves_to_newest() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        fx.sync.perform_sync_default(&creds()).unwrap();

        fx.clock.advance(Duration::from_secs(60));
        fx.remote.edit_remotely(&client_id, "notes", json!("remote"));
        fx.clock.advance(Duration::from_secs(60));
        edit_locally(&fx, &client_id, "local");

        let report = completed(
            fx.sync
                .perform_sync(&creds(), ConflictStrategy::KeepNewest)
                .unwrap(),
        );
        assert_eq!(report.conflicts.len(), 1);
        assert!(report.conflicts[0].is_resolved());

        // Local was newer: it is re-queued against the remote version.
        let record = local(&fx, &client_id);
        assert_eq!(record.sync_status(), SyncStatus::Pending);
        assert_eq!(
            record.server_timestamp(),
            fx.remote.row(&client_id).unwrap().server_timestamp
        );
        assert_eq!(fx.sync.queue().stats().unwrap().pending, 1);

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.uploaded, 1);
        assert_eq!(
            fx.remote.row(&client_id).unwrap().data["notes"],
            json!("local")
        );
        assert_eq!(fx.store.list_conflicts(false).unwrap().len(), 1);
    }

    #[test]
    fn keep_server_adopts_remote_version() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        fx.sync.perform_sync_default(&creds()).unwrap();

        fx.clock.advance(Duration::from_secs(60));
        edit_locally(&fx, &client_id, "local");
        fx.clock.advance(Duration::from_secs(60));
        fx.remote.edit_remotely(&client_id, "notes", json!("remote"));

        let report = completed(
            fx.sync
                .perform_sync(&creds(), ConflictStrategy::KeepServer)
                .unwrap(),
        );
        assert_eq!(report.conflicts.len(), 1);
        let StoredRecord::Calculation(calc) = local(&fx, &client_id) else {
            panic!("wrong entity");
        };
        assert_eq!(calc.notes.as_deref(), Some("remote"));
        assert_eq!(calc.sync_status, SyncStatus::Synced);
    }

    #[test]
    fn deferred_conflict_waits_for_resolution() {
        let fx = fixture(SyncConfig::new().with_deferred_conflicts(true));
        let client_id = save_calc(&fx);
        fx.sync.perform_sync_default(&creds()).unwrap();

        fx.clock.advance(Duration::from_secs(60));
        fx.remote.edit_remotely(&client_id, "notes", json!("remote"));
        fx.clock.advance(Duration::from_secs(60));
        edit_locally(&fx, &client_id, "local");

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.conflicts.len(), 1);
        assert!(!report.conflicts[0].is_resolved());
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Conflict);

        // Further passes leave the record alone.
        let again = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert!(again.conflicts.is_empty());
        assert_eq!(fx.sync.pending_conflicts().unwrap().len(), 1);

        let conflict_id = fx.sync.pending_conflicts().unwrap()[0].id;
        let winner = fx
            .sync
            .resolve_conflict(&conflict_id, ConflictStrategy::KeepLocal)
            .unwrap();
        assert_eq!(winner, Winner::Local);
        assert!(fx.sync.pending_conflicts().unwrap().is_empty());
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Pending);

        let err = fx
            .sync
            .resolve_conflict(&conflict_id, ConflictStrategy::KeepLocal)
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));

        let report = completed(fx.sync.perform_sync_default(&creds()).unwrap());
        assert_eq!(report.uploaded, 1);
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Synced);
    }

    #[test]
    fn queue_drain_pushes_records() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        fx.sync
            .queue()
            .enqueue(NewQueueItem::new(
                QueueOperation::Create,
                EntityType::Calculation,
                client_id.to_string(),
            ))
            .unwrap();

        let outcome = fx.sync.drain_queue(&creds()).unwrap();
        assert_eq!(outcome.report().unwrap().completed, 1);
        assert_eq!(local(&fx, &client_id).sync_status(), SyncStatus::Synced);
        assert!(fx.remote.row(&client_id).is_some());
    }

    #[test]
    fn queued_delete_reaches_remote() {
        let fx = fixture(SyncConfig::new());
        let client_id = save_calc(&fx);
        fx.sync.perform_sync_default(&creds()).unwrap();
        fx.store
            .delete_record(EntityType::Calculation, &client_id)
            .unwrap();
        fx.sync
            .queue()
            .enqueue(NewQueueItem::new(
                QueueOperation::Delete,
                EntityType::Calculation,
                client_id.to_string(),
            ))
            .unwrap();

        fx.sync.sync_now(&creds()).unwrap();
        assert!(fx.remote.row(&client_id).is_none());
    }

    #[test]
    fn stale_cancel_does_not_block_next_pass() {
        let fx = fixture(SyncConfig::new());
        save_calc(&fx);
        let handle = fx.sync.cancel_handle();
        // Cancellation before start is cleared by the new pass.
        handle.cancel();
        assert!(fx.sync.perform_sync_default(&creds()).is_ok());
    }
}
