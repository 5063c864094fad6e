//! # calcsync server
//!
//! Reference REST sync backend for calcsync.
//!
//! This crate provides:
//! - The `/api/sync/{entityType}` and `/api/devices` endpoints
//! - SQLite persistence keyed on client ids
//! - Authentication middleware (HMAC-SHA256 bearer tokens)
//! - Optimistic concurrency on uploads
//!
//! # Protocol
//!
//! Every accepted write is stamped with a server timestamp strictly greater
//! than any issued before it. Clients:
//! 1. Upload records together with the server version they were based on;
//!    a stale base is answered with `409` and the current row
//! 2. Download rows changed after their checkpoint, tombstones included
//! 3. Keep the listing's `server_time` as the next checkpoint
//!
//! # Authentication
//!
//! Authentication is optional. When enabled, every request needs a bearer
//! token and rows are scoped to the token's user:
//!
//! ```rust
//! use calcsync_core::{Clock, SystemClock};
//! use calcsync_server::{ServerConfig, SyncServer};
//!
//! let secret = b"my-secure-secret-32-bytes-long!".to_vec();
//! let server = SyncServer::new(ServerConfig::in_memory().with_auth(secret)).unwrap();
//! let token = server.issue_token("alice").unwrap();
//! let issuer = server.token_issuer().unwrap();
//! assert_eq!(issuer.validate(&token, SystemClock.now()).unwrap(), "alice");
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

mod auth;
mod config;
mod error;
mod handler;
mod repository;
mod server;

pub use auth::{AuthConfig, TokenIssuer};
pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use handler::{HandlerContext, RequestHandler};
pub use repository::{ChangeSet, RecordRepository, UpsertOutcome};
pub use server::SyncServer;
