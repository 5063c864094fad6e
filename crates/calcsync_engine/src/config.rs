//! Configuration for the sync engine.

use calcsync_core::ConflictStrategy;
use rand::Rng;
use std::time::Duration;

/// Configuration for sync passes.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Request timeout applied to every remote call.
    pub timeout: Duration,
    /// Edits closer together than this are treated as concurrent.
    pub concurrent_window: Duration,
    /// Record conflicts unresolved instead of settling them during the pass.
    pub defer_conflicts: bool,
    /// Strategy used by [`crate::SyncOrchestrator::perform_sync_default`]
    /// and by queued uploads.
    pub strategy: ConflictStrategy,
    /// Interval for periodic passes, if any.
    pub sync_interval: Option<Duration>,
}

impl SyncConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            concurrent_window: Duration::from_secs(5),
            defer_conflicts: false,
            strategy: ConflictStrategy::KeepNewest,
            sync_interval: None,
        }
    }

    /// Sets the request timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Sets the concurrency window.
    #[must_use]
    pub fn with_concurrent_window(mut self, window: Duration) -> Self {
        self.concurrent_window = window;
        self
    }

    /// Defers conflict resolution to [`crate::SyncOrchestrator::resolve_conflict`].
    #[must_use]
    pub fn with_deferred_conflicts(mut self, defer: bool) -> Self {
        self.defer_conflicts = defer;
        self
    }

    /// Sets the default conflict strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: ConflictStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Sets the interval for periodic passes.
    #[must_use]
    pub fn with_sync_interval(mut self, interval: Duration) -> Self {
        self.sync_interval = Some(interval);
        self
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for retry backoff.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Delay after the first failure.
    pub initial_delay: Duration,
    /// Upper bound on any delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
    /// Whether to add up to 25% random jitter.
    pub add_jitter: bool,
}

impl RetryConfig {
    /// Creates the default backoff: 1s doubling up to 5 minutes, jittered.
    #[must_use]
    pub fn new() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            backoff_multiplier: 2.0,
            add_jitter: true,
        }
    }

    /// Backoff that retries immediately. Useful in tests.
    #[must_use]
    pub fn immediate() -> Self {
        Self {
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
            add_jitter: false,
        }
    }

    /// Sets the initial delay.
    #[must_use]
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    #[must_use]
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    #[must_use]
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// Enables or disables jitter.
    #[must_use]
    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.add_jitter = jitter;
        self
    }

    /// Delay before the next attempt after `failures` failures.
    pub fn delay_for_attempt(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(failures.saturating_sub(1)).unwrap_or(i32::MAX);
        let base = self.initial_delay.as_secs_f64() * self.backoff_multiplier.powi(exponent);
        let delay_secs = base.min(self.max_delay.as_secs_f64());

        if self.add_jitter && delay_secs > 0.0 {
            let jitter = delay_secs * rand::thread_rng().gen_range(0.0..=0.25);
            Duration::from_secs_f64(delay_secs + jitter)
        } else {
            Duration::from_secs_f64(delay_secs)
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration for the offline queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Items fetched per batch.
    pub batch_size: usize,
    /// Attempts allowed before an item is marked failed, unless the item
    /// sets its own limit.
    pub max_retries: u32,
    /// Backoff between attempts.
    pub retry: RetryConfig,
}

impl QueueConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self {
            batch_size: 20,
            max_retries: 5,
            retry: RetryConfig::default(),
        }
    }

    /// Sets the batch size.
    #[must_use]
    pub fn with_batch_size(mut self, size: usize) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// Sets the default retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Sets the backoff.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::new()
    }
}
