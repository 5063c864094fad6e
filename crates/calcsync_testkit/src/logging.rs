//! Diagnostics capture.
//!
//! [`LogCapture`] is a `tracing_subscriber` layer that records every event
//! emitted on the current thread while its guard is alive, so tests can
//! assert on what the engine reported instead of scraping output.

use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::field::{Field, Visit};
use tracing::subscriber::DefaultGuard;
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::Registry;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CapturedEvent {
    /// Event level.
    pub level: Level,
    /// Module path the event came from.
    pub target: String,
    /// The formatted message.
    pub message: String,
    /// Structured fields, rendered as text.
    pub fields: BTreeMap<String, String>,
}

impl CapturedEvent {
    /// Returns a field's rendered value.
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

/// Collects `tracing` events for later inspection.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct LogCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl LogCapture {
    /// Creates an empty capture.
    pub fn new() -> Self {
        Self::default()
    }

    /// Installs the capture as this thread's default subscriber.
    ///
    /// Events are recorded until the returned guard is dropped.
    pub fn install(&self) -> DefaultGuard {
        tracing::subscriber::set_default(Registry::default().with(self.clone()))
    }

    /// Creates a capture and installs it.
    pub fn start() -> (Self, DefaultGuard) {
        let capture = Self::new();
        let guard = capture.install();
        (capture, guard)
    }

    /// Every event recorded so far, oldest first.
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().clone()
    }

    /// Events whose message contains `text`.
    pub fn matching(&self, text: &str) -> Vec<CapturedEvent> {
        self.events
            .lock()
            .iter()
            .filter(|event| event.message.contains(text))
            .cloned()
            .collect()
    }

    /// Returns true if any message contains `text`.
    pub fn contains(&self, text: &str) -> bool {
        self.events.lock().iter().any(|event| event.message.contains(text))
    }

    /// Number of events at exactly `level`.
    pub fn count_at(&self, level: Level) -> usize {
        self.events
            .lock()
            .iter()
            .filter(|event| event.level == level)
            .count()
    }

    /// Forgets everything recorded so far.
    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl<S: Subscriber> Layer<S> for LogCapture {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldCollector::default();
        event.record(&mut visitor);
        let metadata = event.metadata();
        self.events.lock().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldCollector {
    message: String,
    fields: BTreeMap<String, String>,
}

impl FieldCollector {
    fn put(&mut self, field: &Field, value: String) {
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

impl Visit for FieldCollector {
    fn record_str(&mut self, field: &Field, value: &str) {
        self.put(field, value.to_string());
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        self.put(field, format!("{value:?}"));
    }
}
