//! Offline queue items.

use crate::status::EntityType;
use crate::time::Timestamp;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

text_enum! {
    /// Remote operation a queue item performs.
    pub enum QueueOperation {
        /// Upload a new record.
        Create => "create",
        /// Upload a changed record.
        Update => "update",
        /// Delete the record remotely.
        Delete => "delete",
        /// Re-upload whatever the local store currently holds.
        Sync => "sync",
    }
}

text_enum! {
    /// Drain priority. Declaration order is ascending priority.
    pub enum QueuePriority {
        /// Background work.
        Low => "low",
        /// Default.
        Normal => "normal",
        /// User-visible work.
        High => "high",
        /// Drained before everything else.
        Critical => "critical",
    }
}

impl QueuePriority {
    /// Numeric rank; higher drains first.
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            QueuePriority::Low => 0,
            QueuePriority::Normal => 1,
            QueuePriority::High => 2,
            QueuePriority::Critical => 3,
        }
    }

    /// SQL expression mapping a priority column to its rank.
    #[must_use]
    pub fn sql_rank(column: &str) -> String {
        let arms: String = Self::ALL
            .iter()
            .map(|p| format!(" WHEN '{}' THEN {}", p.as_str(), p.rank()))
            .collect();
        format!("CASE {column}{arms} ELSE -1 END")
    }
}

impl Default for QueuePriority {
    fn default() -> Self {
        QueuePriority::Normal
    }
}

text_enum! {
    /// Lifecycle of a queue item.
    ///
    /// `pending → processing → completed`, or back to `pending` on a
    /// retryable failure; `failed` once retries are exhausted.
    pub enum QueueStatus {
        /// Waiting to be drained.
        Pending => "pending",
        /// Currently executing.
        Processing => "processing",
        /// Done.
        Completed => "completed",
        /// Gave up; needs manual reset.
        Failed => "failed",
    }
}

/// A persisted unit of deferred remote work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OfflineQueueItem {
    /// Item id.
    pub id: Uuid,
    /// Operation to perform.
    pub operation: QueueOperation,
    /// Entity kind of the target.
    pub entity_type: EntityType,
    /// Client ID of the target, as text.
    pub entity_id: String,
    /// Operation payload.
    pub payload: Value,
    /// Drain priority.
    pub priority: QueuePriority,
    /// Item that must complete first.
    pub depends_on: Option<Uuid>,
    /// Enqueue time.
    pub created_at: Timestamp,
    /// Not eligible before this time.
    pub scheduled_at: Timestamp,
    /// Failed attempts so far.
    pub retry_count: u32,
    /// Attempts allowed before the item is marked failed.
    pub max_retries: u32,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    /// Lifecycle state.
    pub status: QueueStatus,
    /// Last state change.
    pub updated_at: Timestamp,
}

impl OfflineQueueItem {
    /// Returns true once retries are exhausted.
    #[must_use]
    pub fn retries_exhausted(&self) -> bool {
        self.retry_count >= self.max_retries
    }
}

/// Parameters for enqueueing a new item.
#[derive(Debug, Clone, PartialEq)]
pub struct NewQueueItem {
    /// Operation to perform.
    pub operation: QueueOperation,
    /// Entity kind of the target.
    pub entity_type: EntityType,
    /// Client ID of the target, as text.
    pub entity_id: String,
    /// Operation payload.
    pub payload: Value,
    /// Drain priority.
    pub priority: QueuePriority,
    /// Item that must complete first.
    pub depends_on: Option<Uuid>,
    /// Overrides the configured retry limit.
    pub max_retries: Option<u32>,
}

impl NewQueueItem {
    /// Creates a normal-priority item with an empty payload.
    pub fn new(
        operation: QueueOperation,
        entity_type: EntityType,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            operation,
            entity_type,
            entity_id: entity_id.into(),
            payload: Value::Null,
            priority: QueuePriority::Normal,
            depends_on: None,
            max_retries: None,
        }
    }

    /// Sets the priority.
    #[must_use]
    pub fn with_priority(mut self, priority: QueuePriority) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the payload.
    #[must_use]
    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }

    /// Makes this item wait for another.
    #[must_use]
    pub fn depending_on(mut self, id: Uuid) -> Self {
        self.depends_on = Some(id);
        self
    }

    /// Overrides the retry limit.
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_order() {
        assert!(QueuePriority::Critical > QueuePriority::High);
        assert!(QueuePriority::High > QueuePriority::Normal);
        assert!(QueuePriority::Normal > QueuePriority::Low);
        assert_eq!(QueuePriority::default(), QueuePriority::Normal);
    }

    #[test]
    fn priority_rank_matches_order() {
        let mut ranks: Vec<u8> = QueuePriority::ALL.iter().map(|p| p.rank()).collect();
        let sorted = ranks.clone();
        ranks.sort_unstable();
        assert_eq!(ranks, sorted);
    }

    #[test]
    fn sql_rank_expression() {
        let expr = QueuePriority::sql_rank("q.priority");
        assert!(expr.starts_with("CASE q.priority"));
        assert!(expr.contains("WHEN 'critical' THEN 3"));
        assert!(expr.contains("WHEN 'low' THEN 0"));
    }

    #[test]
    fn new_item_builder() {
        let dep = Uuid::new_v4();
        let item = NewQueueItem::new(QueueOperation::Update, EntityType::Calculation, "abc")
            .with_priority(QueuePriority::High)
            .depending_on(dep)
            .with_max_retries(7);
        assert_eq!(item.priority, QueuePriority::High);
        assert_eq!(item.depends_on, Some(dep));
        assert_eq!(item.max_retries, Some(7));
    }
}
