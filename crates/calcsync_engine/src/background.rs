//! Tokio driver for the cooperative [`Scheduler`].
//!
//! Scheduled work (sync passes, integrity checks, automatic backups) is
//! blocking, so each tick runs the due tasks on the blocking pool.

use crate::orchestrator::SyncOrchestrator;
use crate::remote::RemoteStore;
use calcsync_core::Scheduler;
use calcsync_protocol::Credentials;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Scheduler task name for periodic sync passes.
pub const SYNC_TASK: &str = "sync";

/// Ticks a shared scheduler until shut down.
pub struct BackgroundRunner {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<u64>,
}

impl BackgroundRunner {
    /// Starts ticking `scheduler` every `tick`. Must be called inside a
    /// tokio runtime.
    pub fn spawn(scheduler: Arc<Mutex<Scheduler>>, tick: Duration) -> Self {
        let (shutdown, mut stop) = watch::channel(false);
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let mut ticks = 0;
            loop {
                tokio::select! {
                    biased;
                    _ = stop.changed() => break,
                    _ = interval.tick() => {
                        let scheduler = Arc::clone(&scheduler);
                        let run = tokio::task::spawn_blocking(move || scheduler.lock().run_due());
                        match run.await {
                            Ok(ran) if !ran.is_empty() => {
                                tracing::debug!(tasks = ?ran, "background tasks ran");
                            }
                            Ok(_) => {}
                            Err(err) => tracing::error!(error = %err, "background task panicked"),
                        }
                        ticks += 1;
                    }
                }
            }
            tracing::debug!(ticks, "background runner stopped");
            ticks
        });
        Self { shutdown, handle }
    }

    /// Stops the runner after the current tick. Returns how many ticks ran.
    pub async fn shutdown(self) -> u64 {
        let _ = self.shutdown.send(true);
        self.handle.await.unwrap_or(0)
    }
}

/// Registers periodic sync passes at the orchestrator's configured
/// interval. Returns false when no interval is configured.
pub fn register_periodic_sync<R>(
    scheduler: &mut Scheduler,
    orchestrator: Arc<SyncOrchestrator<R>>,
    credentials: Credentials,
) -> bool
where
    R: RemoteStore + 'static,
{
    let Some(interval) = orchestrator.config().sync_interval else {
        return false;
    };
    scheduler.every(SYNC_TASK, interval, move || {
        if let Err(err) = orchestrator.perform_sync_default(&credentials) {
            tracing::warn!(error = %err, "scheduled sync failed");
        }
    });
    true
}
