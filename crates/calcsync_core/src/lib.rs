//! # calcsync core
//!
//! Shared domain model for the calcsync offline-first sync subsystem.
//!
//! This crate provides:
//! - Persisted record types (calculations, parameter sets, settings)
//! - Queue, conflict, backup and integrity-issue records
//! - Closed enumerations with one canonical text form each
//! - Client and device identifiers
//! - A `Clock` abstraction with a virtual clock for tests
//! - A cooperative `Scheduler` for periodic background work
//!
//! ## Timestamps
//!
//! Every timestamp is UTC with millisecond precision. Values read back from
//! storage compare equal to the values written.

#![deny(unsafe_code)]
#![warn(missing_docs)]

#[macro_use]
mod macros;

mod backup;
mod calculation;
mod conflict;
mod device;
mod error;
mod ids;
mod integrity;
mod parameter_set;
mod queue;
mod scheduler;
mod status;
mod time;

pub use backup::{BackupReason, DataBackup};
pub use calculation::{CalculationPatch, CalculationRecord, CalculationType};
pub use conflict::{ConflictKind, ConflictResolution, ConflictStrategy, SyncConflict};
pub use device::{DeviceInfo, UserSetting};
pub use error::{ModelError, ModelResult};
pub use ids::{ClientId, DeviceId};
pub use integrity::{CheckCategory, FixMethod, IntegrityIssue, IssueCode, Severity};
pub use parameter_set::{ParameterSet, ParameterSetPatch};
pub use queue::{NewQueueItem, OfflineQueueItem, QueueOperation, QueuePriority, QueueStatus};
pub use scheduler::Scheduler;
pub use status::{EntityType, SyncStatus};
pub use time::{
    add_duration, format_timestamp, parse_timestamp, sub_duration, truncate_millis, Clock,
    ManualClock, SharedClock, SystemClock, Timestamp,
};
