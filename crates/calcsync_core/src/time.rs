//! Timestamps and clocks.

use crate::error::ModelError;
use chrono::{DateTime, SecondsFormat, TimeZone, Utc};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// A UTC timestamp with millisecond precision.
pub type Timestamp = DateTime<Utc>;

/// Shared handle to a clock.
pub type SharedClock = Arc<dyn Clock>;

/// Source of the current time.
///
/// Everything that compares or schedules against "now" takes a clock, so
/// tests can substitute [`ManualClock`] and move time explicitly.
pub trait Clock: Send + Sync {
    /// Returns the current time, truncated to milliseconds.
    fn now(&self) -> Timestamp;
}

/// Wall-clock time.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Returns a shared system clock.
    #[must_use]
    pub fn shared() -> SharedClock {
        Arc::new(SystemClock)
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        truncate_millis(Utc::now())
    }
}

/// A clock that only moves when told to.
///
/// Cloning shares the underlying time, so a test can keep one handle and
/// hand another to the component under test.
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Timestamp>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Arc::new(Mutex::new(truncate_millis(start))),
        }
    }

    /// Creates a clock frozen at the given Unix time in milliseconds.
    #[must_use]
    pub fn at_millis(millis: i64) -> Self {
        let start = Utc
            .timestamp_millis_opt(millis)
            .single()
            .unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        Self::new(start)
    }

    /// Moves the clock forward.
    pub fn advance(&self, by: Duration) {
        let mut now = self.now.lock();
        *now = add_duration(*now, by);
    }

    /// Sets the clock to an absolute time.
    pub fn set(&self, to: Timestamp) {
        *self.now.lock() = truncate_millis(to);
    }

    /// Returns this clock as a shared handle.
    #[must_use]
    pub fn shared(&self) -> SharedClock {
        Arc::new(self.clone())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}

/// Drops sub-millisecond precision.
#[must_use]
pub fn truncate_millis(ts: Timestamp) -> Timestamp {
    Utc.timestamp_millis_opt(ts.timestamp_millis())
        .single()
        .unwrap_or(ts)
}

/// Adds a std duration, saturating at the representable maximum.
#[must_use]
pub fn add_duration(ts: Timestamp, by: Duration) -> Timestamp {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| ts.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Subtracts a std duration, saturating at the representable minimum.
#[must_use]
pub fn sub_duration(ts: Timestamp, by: Duration) -> Timestamp {
    chrono::Duration::from_std(by)
        .ok()
        .and_then(|delta| ts.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Formats a timestamp as fixed-width RFC 3339 (`2024-05-01T10:00:00.000Z`).
///
/// The fixed width makes lexical order equal chronological order, which the
/// SQL queries rely on.
#[must_use]
pub fn format_timestamp(ts: &Timestamp) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parses an RFC 3339 timestamp into UTC.
///
/// # Errors
///
/// Returns [`ModelError::InvalidTimestamp`] if the text is not RFC 3339.
pub fn parse_timestamp(value: &str) -> Result<Timestamp, ModelError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| truncate_millis(dt.with_timezone(&Utc)))
        .map_err(|e| ModelError::InvalidTimestamp {
            value: value.to_string(),
            reason: e.to_string(),
        })
}
