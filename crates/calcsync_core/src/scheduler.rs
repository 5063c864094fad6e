//! Cooperative periodic task scheduler.
//!
//! The scheduler never spawns threads or sleeps. Something else calls
//! [`Scheduler::run_due`]: a tokio interval in production, a test advancing a
//! [`ManualClock`](crate::ManualClock) in tests.

use crate::time::{add_duration, SharedClock, Timestamp};
use std::fmt;
use std::time::Duration;

type Task = Box<dyn FnMut() + Send>;

struct ScheduledTask {
    name: String,
    interval: Duration,
    next_run: Timestamp,
    runs: u64,
    task: Task,
}

/// Runs registered tasks at fixed intervals.
pub struct Scheduler {
    clock: SharedClock,
    tasks: Vec<ScheduledTask>,
}

impl Scheduler {
    /// Creates an empty scheduler reading time from `clock`.
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            tasks: Vec::new(),
        }
    }

    /// Registers a task that first runs one `interval` from now.
    ///
    /// Registering a name twice replaces the earlier task.
    pub fn every<F>(&mut self, name: impl Into<String>, interval: Duration, task: F)
    where
        F: FnMut() + Send + 'static,
    {
        let name = name.into();
        self.cancel(&name);
        let next_run = add_duration(self.clock.now(), interval);
        tracing::debug!(task = %name, interval_ms = interval.as_millis() as u64, "scheduled task");
        self.tasks.push(ScheduledTask {
            name,
            interval,
            next_run,
            runs: 0,
            task: Box::new(task),
        });
    }

    /// Removes a task. Returns true if it existed.
    pub fn cancel(&mut self, name: &str) -> bool {
        let before = self.tasks.len();
        self.tasks.retain(|t| t.name != name);
        before != self.tasks.len()
    }

    /// Runs every task whose next-run time has passed and reschedules it.
    ///
    /// A task that fell several intervals behind runs once and is
    /// rescheduled relative to now. Returns the names of the tasks that ran.
    pub fn run_due(&mut self) -> Vec<String> {
        let now = self.clock.now();
        let mut ran = Vec::new();
        for scheduled in self.tasks.iter_mut().filter(|t| t.next_run <= now) {
            (scheduled.task)();
            scheduled.runs += 1;
            scheduled.next_run = add_duration(now, scheduled.interval);
            ran.push(scheduled.name.clone());
        }
        if !ran.is_empty() {
            tracing::trace!(tasks = ?ran, "ran scheduled tasks");
        }
        ran
    }

    /// Earliest next-run time across all tasks.
    #[must_use]
    pub fn next_due(&self) -> Option<Timestamp> {
        self.tasks.iter().map(|t| t.next_run).min()
    }

    /// How many times a task has run.
    #[must_use]
    pub fn run_count(&self, name: &str) -> Option<u64> {
        self.tasks.iter().find(|t| t.name == name).map(|t| t.runs)
    }

    /// Registered task names.
    #[must_use]
    pub fn task_names(&self) -> Vec<&str> {
        self.tasks.iter().map(|t| t.name.as_str()).collect()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("tasks", &self.task_names())
            .field("next_due", &self.next_due())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    #[test]
    fn task_runs_when_due() {
        let clock = ManualClock::at_millis(0);
        let mut scheduler = Scheduler::new(clock.shared());
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        scheduler.every("check", Duration::from_secs(60), move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        assert!(scheduler.run_due().is_empty());
        clock.advance(Duration::from_secs(59));
        assert!(scheduler.run_due().is_empty());
        clock.advance(Duration::from_secs(1));
        assert_eq!(scheduler.run_due(), vec!["check".to_string()]);
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        // Rescheduled relative to the run.
        clock.advance(Duration::from_secs(30));
        assert!(scheduler.run_due().is_empty());
        clock.advance(Duration::from_secs(30));
        scheduler.run_due();
        assert_eq!(scheduler.run_count("check"), Some(2));
    }

    #[test]
    fn late_task_runs_once() {
        let clock = ManualClock::at_millis(0);
        let mut scheduler = Scheduler::new(clock.shared());
        scheduler.every("backup", Duration::from_secs(10), || {});
        clock.advance(Duration::from_secs(100));
        scheduler.run_due();
        assert_eq!(scheduler.run_count("backup"), Some(1));
    }

    #[test]
    fn register_replaces_and_cancel_removes() {
        let clock = ManualClock::at_millis(0);
        let mut scheduler = Scheduler::new(clock.shared());
        scheduler.every("sync", Duration::from_secs(10), || {});
        scheduler.every("sync", Duration::from_secs(20), || {});
        assert_eq!(scheduler.task_names(), vec!["sync"]);
        assert_eq!(
            scheduler.next_due().map(|t| t.timestamp_millis()),
            Some(20_000)
        );
        assert!(scheduler.cancel("sync"));
        assert!(!scheduler.cancel("sync"));
        assert!(scheduler.next_due().is_none());
    }
}
