//! # calcsync Testkit
//!
//! Test utilities for calcsync.
//!
//! This crate provides:
//! - Store fixtures on a manual clock
//! - Property-based test generators using proptest
//! - A `tracing` layer that captures diagnostics for assertions
//! - A transport that fails on demand
//! - Multi-device scenarios against an in-process reference server
//!
//! ## Usage
//!
//! ```rust,ignore
//! use calcsync_testkit::prelude::*;
//!
//! #[test]
//! fn test_with_store() {
//!     let store = TestStore::memory();
//!     let record = sample_calculation("phone", &store.clock);
//!     store.save_calculation(&record).unwrap();
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod flaky;
pub mod generators;
pub mod logging;
pub mod scenario;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::flaky::*;
    pub use crate::generators::*;
    pub use crate::logging::*;
    pub use crate::scenario::*;
}

pub use fixtures::*;
pub use flaky::*;
pub use generators::*;
pub use logging::*;
pub use scenario::*;
