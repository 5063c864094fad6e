//! # calcsync store
//!
//! The embedded local store: the single owner of every persisted row.
//!
//! This crate provides:
//! - Directory layout and exclusive process lock
//! - Schema creation and versioning
//! - Calculation and parameter-set CRUD with partial-update semantics
//! - Offline queue, checkpoint, conflict, integrity-issue and backup tables
//! - A store-wide maintenance lock shared with sync passes
//!
//! ## Directory Layout
//!
//! ```text
//! <store_path>/
//! ├─ LOCK            # Advisory lock, one process at a time
//! ├─ calcsync.db     # SQLite database
//! └─ backups/        # Backup files and JSON sidecars
//! ```
//!
//! ## Key Invariants
//!
//! - Every write runs inside a transaction
//! - Updates never null out fields the caller did not supply
//! - Updating a record without an identity is an error, never a no-op

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod backups;
mod calculations;
mod checkpoints;
mod config;
mod conflicts;
mod dir;
mod error;
mod issues;
mod parameter_sets;
mod pragmas;
mod queue;
mod records;
mod rows;
pub mod schema;
mod settings;
mod store;

pub use config::StoreConfig;
pub use dir::StoreDir;
pub use error::{StoreError, StoreResult};
pub use records::StoredRecord;
pub use store::{LocalStore, MaintenanceGuard, SyncGuard};

/// Re-exported so downstream crates can run raw SQL against the store
/// without a second, possibly mismatched, rusqlite version.
pub use rusqlite;
