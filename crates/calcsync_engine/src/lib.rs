//! # calcsync engine
//!
//! Offline queue, remote client and sync orchestrator for calcsync.
//!
//! This crate provides:
//! - The local-first write path (`LocalFirstWriter`)
//! - A persistent offline queue with priorities, dependencies and backoff
//! - A REST remote-store client over an abstract HTTP client
//! - The sync orchestrator (upload, download, conflict settlement)
//! - A network status monitor and a tokio driver for scheduled work
//!
//! ## Architecture
//!
//! The engine runs a **push-then-pull** pass per entity type:
//! 1. Upload every locally pending record, based on the last server
//!    version this device saw
//! 2. Download records changed since the entity's checkpoint
//! 3. Reconcile each with the local row, settling conflicts
//! 4. Advance the checkpoint only if every step for the entity succeeded
//!
//! ## Key Invariants
//!
//! - Local writes never wait for, or fail because of, the network
//! - The server is authoritative; a version it rejected is never marked synced
//! - Uploads are idempotent per client id
//! - At most one pass or queue drain runs at a time
//! - Authentication failures stop sync; other remote failures are retried

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod background;
mod config;
mod convert;
mod error;
mod http;
mod network;
mod orchestrator;
mod queue;
mod remote;
mod writer;

pub use background::{register_periodic_sync, BackgroundRunner, SYNC_TASK};
pub use config::{QueueConfig, RetryConfig, SyncConfig};
pub use error::{SyncError, SyncResult};
pub use http::{HttpClient, LoopbackClient};
pub use network::{ConnectivityDriver, NetworkMonitor, NetworkStatus};
pub use orchestrator::{
    CancelHandle, SyncOrchestrator, SyncOutcome, SyncReport, SyncState, SyncStats, AUTO_RESOLVER,
    MANUAL_RESOLVER,
};
pub use queue::{DrainOutcome, DrainReport, OfflineQueueManager, QueueExecutor, QueueStats};
pub use remote::{DownloadBatch, HttpRemoteStore, RemoteState, RemoteStore, UploadAck};
pub use writer::LocalFirstWriter;
