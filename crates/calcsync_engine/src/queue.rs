//! Offline queue manager.
//!
//! Remote work that could not happen immediately is persisted as
//! [`OfflineQueueItem`]s and drained later, in priority order, once the
//! remote side is reachable.
//!
//! ## Item Lifecycle
//!
//! ```text
//! pending ──claim──▶ processing ──ok──▶ completed
//!    ▲                    │
//!    └──retryable error───┤
//!                         └──retries exhausted / fatal──▶ failed
//! ```

use crate::config::QueueConfig;
use crate::error::{SyncError, SyncResult};
use calcsync_core::{add_duration, sub_duration, NewQueueItem, OfflineQueueItem, QueueStatus};
use calcsync_store::LocalStore;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Performs the remote work a queue item describes.
pub trait QueueExecutor {
    /// Executes one item.
    ///
    /// # Errors
    ///
    /// Retryable errors reschedule the item; authentication errors halt the
    /// drain; anything else fails the item.
    fn execute(&self, item: &OfflineQueueItem) -> SyncResult<()>;
}

impl<F> QueueExecutor for F
where
    F: Fn(&OfflineQueueItem) -> SyncResult<()>,
{
    fn execute(&self, item: &OfflineQueueItem) -> SyncResult<()> {
        self(item)
    }
}

/// Outcome of [`OfflineQueueManager::drain`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DrainOutcome {
    /// The drain ran.
    Drained(DrainReport),
    /// Another drain was already running; nothing was done.
    AlreadyRunning,
    /// The caller declined to drain, e.g. because remote sync is off.
    Skipped {
        /// Why.
        reason: String,
    },
}

impl DrainOutcome {
    /// The report, if the drain ran.
    pub fn report(&self) -> Option<&DrainReport> {
        match self {
            DrainOutcome::Drained(report) => Some(report),
            _ => None,
        }
    }
}

/// What a drain did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Items executed.
    pub processed: usize,
    /// Items that completed.
    pub completed: usize,
    /// Items rescheduled after a retryable failure.
    pub retried: usize,
    /// Items that became `failed`.
    pub failed: usize,
    /// Why the drain stopped early, if it did.
    pub halted: Option<String>,
}

/// Item counts per status.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueStats {
    /// Waiting items, blocked ones included.
    pub pending: u64,
    /// Items being executed.
    pub processing: u64,
    /// Finished items not yet purged.
    pub completed: u64,
    /// Items that need manual reset.
    pub failed: u64,
    /// Pending items waiting on an unfinished dependency.
    pub blocked: u64,
}

impl QueueStats {
    /// Items still to be done.
    pub fn outstanding(&self) -> u64 {
        self.pending + self.processing
    }
}

/// Persistent, priority-ordered queue of deferred remote work.
pub struct OfflineQueueManager {
    store: Arc<LocalStore>,
    config: QueueConfig,
    draining: AtomicBool,
}

/// Clears the drain flag when the drain ends, however it ends.
struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl OfflineQueueManager {
    /// Creates a queue manager over the store's queue table.
    pub fn new(store: Arc<LocalStore>, config: QueueConfig) -> Self {
        Self {
            store,
            config,
            draining: AtomicBool::new(false),
        }
    }

    /// The queue configuration.
    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns true while a drain is running.
    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    /// Adds an item. Returns its id.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Validation`] for an empty entity id or a
    /// `depends_on` that names no existing item.
    pub fn enqueue(&self, new: NewQueueItem) -> SyncResult<Uuid> {
        if new.entity_id.trim().is_empty() {
            return Err(SyncError::Validation("queue item has no entity id".into()));
        }
        if let Some(dependency) = new.depends_on {
            if !self.store.queue_item_exists(&dependency)? {
                return Err(SyncError::Validation(format!(
                    "queue dependency {dependency} does not exist"
                )));
            }
        }

        let now = self.store.clock().now();
        let item = OfflineQueueItem {
            id: Uuid::new_v4(),
            operation: new.operation,
            entity_type: new.entity_type,
            entity_id: new.entity_id,
            payload: new.payload,
            priority: new.priority,
            depends_on: new.depends_on,
            created_at: now,
            scheduled_at: now,
            retry_count: 0,
            max_retries: new.max_retries.unwrap_or(self.config.max_retries),
            last_error: None,
            status: QueueStatus::Pending,
            updated_at: now,
        };
        self.store.insert_queue_item(&item)?;
        tracing::debug!(
            id = %item.id,
            operation = %item.operation,
            entity = %item.entity_type,
            priority = %item.priority,
            "enqueued item"
        );
        Ok(item.id)
    }

    /// The next items to execute: eligible pending items whose dependency
    /// has completed, by priority then age, capped at the batch size.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn next_batch(&self) -> SyncResult<Vec<OfflineQueueItem>> {
        let now = self.store.clock().now();
        Ok(self.store.eligible_queue_items(now, self.config.batch_size)?)
    }

    /// Executes eligible items until none are left.
    ///
    /// Only one drain runs at a time; a concurrent call returns
    /// [`DrainOutcome::AlreadyRunning`] without touching the queue.
    ///
    /// # Errors
    ///
    /// Returns store errors. Executor errors are recorded on the items.
    pub fn drain(&self, executor: &dyn QueueExecutor) -> SyncResult<DrainOutcome> {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return Ok(DrainOutcome::AlreadyRunning);
        }
        let _guard = DrainGuard(&self.draining);

        let mut report = DrainReport::default();
        let mut attempted = HashSet::new();
        'batches: loop {
            // Items retried with no delay come back eligible; read past them.
            let now = self.store.clock().now();
            let limit = self.config.batch_size.saturating_add(attempted.len());
            let fresh: Vec<_> = self
                .store
                .eligible_queue_items(now, limit)?
                .into_iter()
                .filter(|item| !attempted.contains(&item.id))
                .take(self.config.batch_size)
                .collect();
            if fresh.is_empty() {
                break;
            }

            for item in fresh {
                attempted.insert(item.id);
                if !self.store.claim_queue_item(&item.id, self.store.clock().now())? {
                    continue;
                }
                report.processed += 1;

                match executor.execute(&item) {
                    Ok(()) => {
                        self.complete(item)?;
                        report.completed += 1;
                    }
                    Err(err) if err.is_auth() || matches!(err, SyncError::Cancelled) => {
                        tracing::warn!(id = %item.id, error = %err, "queue drain halted");
                        // Unclaim without counting an attempt.
                        self.store.update_queue_item(&item)?;
                        report.halted = Some(err.to_string());
                        break 'batches;
                    }
                    Err(err) => {
                        if self.record_failure(item, &err)? {
                            report.retried += 1;
                        } else {
                            report.failed += 1;
                        }
                    }
                }
            }
        }

        if report.processed > 0 {
            tracing::info!(
                processed = report.processed,
                completed = report.completed,
                retried = report.retried,
                failed = report.failed,
                "queue drained"
            );
        }
        Ok(DrainOutcome::Drained(report))
    }

    fn complete(&self, mut item: OfflineQueueItem) -> SyncResult<()> {
        item.status = QueueStatus::Completed;
        item.last_error = None;
        item.updated_at = self.store.clock().now();
        self.store.update_queue_item(&item)?;
        Ok(())
    }

    /// Records a failed attempt. Returns true if the item will be retried.
    fn record_failure(&self, mut item: OfflineQueueItem, err: &SyncError) -> SyncResult<bool> {
        let now = self.store.clock().now();
        item.updated_at = now;
        item.last_error = Some(err.to_string());

        let retry = if err.is_retryable() {
            item.retry_count += 1;
            !item.retries_exhausted()
        } else {
            false
        };

        if retry {
            let delay = self.config.retry.delay_for_attempt(item.retry_count);
            item.status = QueueStatus::Pending;
            item.scheduled_at = add_duration(now, delay);
            tracing::debug!(
                id = %item.id,
                retry_count = item.retry_count,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                error = %err,
                "queue item rescheduled"
            );
        } else {
            item.status = QueueStatus::Failed;
            tracing::warn!(
                id = %item.id,
                retry_count = item.retry_count,
                error = %err,
                "queue item failed"
            );
        }
        self.store.update_queue_item(&item)?;
        Ok(retry)
    }

    /// Looks up an item.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn get(&self, id: &Uuid) -> SyncResult<Option<OfflineQueueItem>> {
        Ok(self.store.get_queue_item(id)?)
    }

    /// Items in a status, or all items, in drain order.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn list(&self, status: Option<QueueStatus>) -> SyncResult<Vec<OfflineQueueItem>> {
        Ok(self.store.list_queue_items(status)?)
    }

    /// Returns a failed item to `pending` with a fresh retry budget.
    /// Returns false if the item is not failed.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn reset(&self, id: &Uuid) -> SyncResult<bool> {
        let now = self.store.clock().now();
        Ok(self.store.reset_failed_queue_items(Some(id), now)? > 0)
    }

    /// Returns every failed item to `pending`. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn reset_all_failed(&self) -> SyncResult<usize> {
        let now = self.store.clock().now();
        let count = self.store.reset_failed_queue_items(None, now)?;
        if count > 0 {
            tracing::info!(count, "reset failed queue items");
        }
        Ok(count)
    }

    /// Removes an item. Returns true if it existed.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn remove(&self, id: &Uuid) -> SyncResult<bool> {
        Ok(self.store.delete_queue_item(id)?)
    }

    /// Deletes completed items older than `older_than`, except those a
    /// pending item still depends on. Returns how many.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn purge_completed(&self, older_than: Duration) -> SyncResult<usize> {
        let cutoff = sub_duration(self.store.clock().now(), older_than);
        Ok(self.store.purge_completed_queue_items(cutoff)?)
    }

    /// Item counts per status.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn stats(&self) -> SyncResult<QueueStats> {
        let counts = self.store.queue_counts()?;
        let count = |status| counts.get(&status).copied().unwrap_or(0);
        Ok(QueueStats {
            pending: count(QueueStatus::Pending),
            processing: count(QueueStatus::Processing),
            completed: count(QueueStatus::Completed),
            failed: count(QueueStatus::Failed),
            blocked: self.store.blocked_queue_item_count()?,
        })
    }

    /// Returns items a crash left in `processing` to `pending`.
    ///
    /// Call once at startup, before the first drain.
    ///
    /// # Errors
    ///
    /// Returns store errors.
    pub fn recover_stale(&self) -> SyncResult<usize> {
        if self.is_draining() {
            return Ok(0);
        }
        let now = self.store.clock().now();
        let count = self.store.reset_processing_queue_items(now)?;
        if count > 0 {
            tracing::info!(count, "recovered stale queue items");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use calcsync_core::{Clock, EntityType, ManualClock, QueueOperation, QueuePriority};
    use calcsync_store::StoreConfig;
    use parking_lot::Mutex;

    fn manager(clock: &ManualClock) -> OfflineQueueManager {
        let store =
            LocalStore::open_with_clock(StoreConfig::in_memory(), clock.shared()).unwrap();
        OfflineQueueManager::new(
            Arc::new(store),
            QueueConfig::new()
                .with_max_retries(3)
                .with_retry(RetryConfig::new().with_jitter(false)),
        )
    }

    fn upload(entity_id: &str) -> NewQueueItem {
        NewQueueItem::new(QueueOperation::Create, EntityType::Calculation, entity_id)
    }

    /// Records the entity ids it executes and fails those listed.
    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_with: Option<fn() -> SyncError>,
    }

    impl QueueExecutor for Recorder {
        fn execute(&self, item: &OfflineQueueItem) -> SyncResult<()> {
            self.seen.lock().push(item.entity_id.clone());
            match self.fail_with {
                Some(make) => Err(make()),
                None => Ok(()),
            }
        }
    }

    fn succeed(_: &OfflineQueueItem) -> SyncResult<()> {
        Ok(())
    }

    #[test]
    fn enqueue_rejects_unknown_dependency() {
        let clock = ManualClock::at_millis(0);
        let queue = manager(&clock);
        let err = queue
            .enqueue(upload("a").depending_on(Uuid::new_v4()))
            .unwrap_err();
        assert!(matches!(err, SyncError::Validation(_)));
        assert!(queue.enqueue(upload(" ")).is_err());
    }

    #[test]
    fn critical_drains_before_older_normal() {
        let clock = ManualClock::at_millis(0);
        let queue = manager(&clock);
        queue.enqueue(upload("p2")).unwrap();
        clock.advance(Duration::from_millis(1));
        queue
            .enqueue(upload("p1").with_priority(QueuePriority::Critical))
            .unwrap();

        let recorder = Recorder::default();
        queue.drain(&recorder).unwrap();
        assert_eq!(*recorder.seen.lock(), vec!["p1", "p2"]);
    }

    #[test]
    fn immediate_retries_do_not_hide_later_items() {
        let clock = ManualClock::at_millis(0);
        let store =
            LocalStore::open_with_clock(StoreConfig::in_memory(), clock.shared()).unwrap();
        let queue = OfflineQueueManager::new(
            Arc::new(store),
            QueueConfig::new()
                .with_batch_size(2)
                .with_retry(RetryConfig::immediate()),
        );
        for id in ["a", "b", "c"] {
            queue.enqueue(upload(id)).unwrap();
            clock.advance(Duration::from_millis(1));
        }

        let seen = Mutex::new(Vec::new());
        let executor = |item: &OfflineQueueItem| -> SyncResult<()> {
            seen.lock().push(item.entity_id.clone());
            if item.entity_id == "c" {
                Ok(())
            } else {
                Err(SyncError::network("offline"))
            }
        };
        let outcome = queue.drain(&executor).unwrap();
        assert_eq!(*seen.lock(), vec!["a", "b", "c"]);
        let report = outcome.report().unwrap();
        assert_eq!((report.retried, report.completed), (2, 1));
    }

    #[test]
    fn dependency_runs_first_even_at_lower_priority() {
        let clock = ManualClock::at_millis(0);
        let queue = manager(&clock);
        let create = queue.enqueue(upload("create")).unwrap();
        queue
            .enqueue(
                upload("update")
                    .with_priority(QueuePriority::Critical)
                    .depending_on(create),
            )
            .unwrap();

        let batch = queue.next_batch().unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].entity_id, "create");

        let recorder = Recorder::default();
        let outcome = queue.drain(&recorder).unwrap();
        assert_eq!(*recorder.seen.lock(), vec!["create", "update"]);
        match outcome {
            DrainOutcome::Drained(report) => assert_eq!(report.completed, 2),
            _ => panic!("drain did not run"),
        }
    }

    #[test]
    fn retryable_failures_back_off_then_fail() {
        let clock = ManualClock::at_millis(0);
        let queue = manager(&clock);
        let id = queue.enqueue(upload("flaky")).unwrap();
        let recorder = Recorder {
            fail_with: Some(|| SyncError::network("offline")),
            ..Recorder::default()
        };

        queue.drain(&recorder).unwrap();
        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 1);
        assert_eq!(item.scheduled_at.timestamp_millis(), 1_000);

        // Not yet due.
        queue.drain(&recorder).unwrap();
        assert_eq!(recorder.seen.lock().len(), 1);

        clock.advance(Duration::from_secs(1));
        queue.drain(&recorder).unwrap();
        clock.advance(Duration::from_secs(2));
        queue.drain(&recorder).unwrap();

        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.retry_count, 3);
        assert!(item.last_error.unwrap().contains("offline"));

        // Failed items are excluded from automatic drains.
        clock.advance(Duration::from_secs(3600));
        queue.drain(&recorder).unwrap();
        assert_eq!(recorder.seen.lock().len(), 3);

        assert!(queue.reset(&id).unwrap());
        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 0);
    }

    #[test]
    fn validation_failure_is_immediately_fatal() {
        let clock = ManualClock::at_millis(0);
        let queue = manager(&clock);
        let id = queue.enqueue(upload("bad")).unwrap();
        let recorder = Recorder {
            fail_with: Some(|| SyncError::Validation("result missing".into())),
            ..Recorder::default()
        };
        queue.drain(&recorder).unwrap();
        let item = queue.get(&id).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Failed);
        assert_eq!(item.retry_count, 0);
    }

    #[test]
    fn auth_failure_halts_and_leaves_item_untouched() {
        let clock = ManualClock::at_millis(0);
        let queue = manager(&clock);
        let first = queue.enqueue(upload("one")).unwrap();
        queue.enqueue(upload("two")).unwrap();
        let recorder = Recorder {
            fail_with: Some(|| SyncError::Auth("expired".into())),
            ..Recorder::default()
        };

        let DrainOutcome::Drained(report) = queue.drain(&recorder).unwrap() else {
            panic!("drain did not run");
        };
        assert!(report.halted.unwrap().contains("expired"));
        assert_eq!(recorder.seen.lock().len(), 1);

        let item = queue.get(&first).unwrap().unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert_eq!(queue.stats().unwrap().pending, 2);
    }

    #[test]
    fn concurrent_drain_is_refused() {
        let clock = ManualClock::at_millis(0);
        let queue = Arc::new(manager(&clock));
        queue.enqueue(upload("a")).unwrap();

        let inner = Arc::clone(&queue);
        let nested = Mutex::new(None);
        let executor = |_: &OfflineQueueItem| -> SyncResult<()> {
            *nested.lock() = Some(inner.drain(&succeed).unwrap());
            Ok(())
        };
        queue.drain(&executor).unwrap();
        assert_eq!(nested.lock().take(), Some(DrainOutcome::AlreadyRunning));
        assert!(!queue.is_draining());
    }

    #[test]
    fn stats_and_stale_recovery() {
        let clock = ManualClock::at_millis(0);
        let queue = manager(&clock);
        let a = queue.enqueue(upload("a")).unwrap();
        queue.enqueue(upload("b").depending_on(a)).unwrap();

        let stats = queue.stats().unwrap();
        assert_eq!(stats.pending, 2);
        assert_eq!(stats.blocked, 1);
        assert_eq!(stats.outstanding(), 2);

        // Simulate a crash mid-execution.
        let store = Arc::clone(&queue.store);
        assert!(store.claim_queue_item(&a, clock.now()).unwrap());
        assert_eq!(queue.stats().unwrap().processing, 1);
        assert_eq!(queue.recover_stale().unwrap(), 1);
        assert_eq!(queue.stats().unwrap().processing, 0);
    }

    #[test]
    fn purge_keeps_recent_completions() {
        let clock = ManualClock::at_millis(0);
        let queue = manager(&clock);
        queue.enqueue(upload("a")).unwrap();
        queue.drain(&succeed).unwrap();

        assert_eq!(queue.purge_completed(Duration::from_secs(60)).unwrap(), 0);
        clock.advance(Duration::from_secs(120));
        assert_eq!(queue.purge_completed(Duration::from_secs(60)).unwrap(), 1);
        assert!(queue.list(None).unwrap().is_empty());
    }
}
