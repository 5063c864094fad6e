//! # calcsync integrity
//!
//! Integrity checks, repair and backups for the calcsync local store.
//!
//! This crate provides:
//! - Five independent checks (structure, content, consistency, corruption,
//!   referential) whose findings are persisted as integrity issues
//! - Safe automatic fixes gated by a severity ceiling
//! - A full database repair that starts with an emergency backup
//! - Checksummed backups with JSON sidecars, verified restore with rollback
//! - Periodic checks and automatic backups on the core `Scheduler`
//!
//! ## Safety rules
//!
//! - Critical issues are never fixed automatically
//! - A backup whose checksum does not match is never restored
//! - A restore that fails validation is rolled back to the previous store
//! - Auto-fix, repair and restore hold the store's maintenance lock, so
//!   they never overlap a sync pass
//!
//! ```rust,ignore
//! use calcsync_integrity::{DataIntegrityService, IntegrityConfig};
//!
//! let service = DataIntegrityService::new(store, IntegrityConfig::new());
//! for result in service.run_all_checks()? {
//!     println!("{}: {}", result.category, if result.passed { "ok" } else { "failed" });
//! }
//! let backup = service.create_backup("before upgrade", None, BackupReason::Manual)?;
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod backup;
mod checks;
mod config;
mod error;
mod repair;
mod service;

pub use backup::{file_checksum, BackupManager};
pub use checks::{run_check, CheckResult};
pub use config::IntegrityConfig;
pub use error::{IntegrityError, IntegrityResult};
pub use repair::auto_fixable;
pub use service::{DataIntegrityService, FixReport, RepairReport, BACKUP_TASK, CHECK_TASK};
