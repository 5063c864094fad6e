//! # calcsync protocol
//!
//! Wire types and conflict resolution for calcsync.
//!
//! This crate provides:
//! - `RecordSnapshot`, the entity-neutral form records travel in
//! - Request and response bodies for the REST surface
//! - `Endpoint` routing between paths and operations
//! - A minimal HTTP request/response model and the `HttpService` seam
//! - Conflict detection and resolution
//!
//! This is a pure protocol crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod conflict;
mod error;
mod http;
mod messages;
mod routes;
mod snapshot;

pub use conflict::{
    detect, resolve, DetectOptions, DetectedConflict, FieldRule, MergePolicy, Resolution, Winner,
};
pub use error::{ProtocolError, ProtocolResult};
pub use http::{headers, HttpRequest, HttpResponse, HttpService, Method};
pub use messages::{
    ConflictResponse, Credentials, DeviceRegistration, DownloadResponse, ErrorBody, UploadRequest,
    UploadResponse,
};
pub use routes::Endpoint;
pub use snapshot::{RecordSnapshot, Syncable};

/// Prefix shared by every sync route.
pub const API_PREFIX: &str = "/api";
