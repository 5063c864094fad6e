//! HTTP transport seam.
//!
//! The remote client builds [`HttpRequest`]s and hands them to an
//! [`HttpClient`]. The actual client is abstracted so the engine can run
//! over any HTTP library, or over no network at all.

use crate::error::{SyncError, SyncResult};
use calcsync_protocol::{HttpRequest, HttpResponse, HttpService};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

/// HTTP client abstraction.
pub trait HttpClient: Send + Sync {
    /// Sends a request and waits at most `timeout` for the response.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Network`] when the server cannot be reached and
    /// [`SyncError::Timeout`] when no answer arrived in time. Error statuses
    /// are not errors at this level.
    fn send(&self, request: &HttpRequest, timeout: Duration) -> SyncResult<HttpResponse>;
}

/// A client that routes requests straight to an in-process service.
///
/// Useful for tests and for the reference server without network overhead.
/// It can be switched offline to simulate losing connectivity.
pub struct LoopbackClient<S: HttpService> {
    service: S,
    online: AtomicBool,
}

impl<S: HttpService> LoopbackClient<S> {
    /// Creates a loopback client connected to the given service.
    pub fn new(service: S) -> Self {
        Self {
            service,
            online: AtomicBool::new(true),
        }
    }

    /// Simulates gaining or losing connectivity.
    pub fn set_online(&self, online: bool) {
        self.online.store(online, Ordering::SeqCst);
    }

    /// Returns true unless switched offline.
    pub fn is_online(&self) -> bool {
        self.online.load(Ordering::SeqCst)
    }

    /// The wrapped service.
    pub fn service(&self) -> &S {
        &self.service
    }
}

impl<S: HttpService> HttpClient for LoopbackClient<S> {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> SyncResult<HttpResponse> {
        if !self.is_online() {
            return Err(SyncError::network("loopback client is offline"));
        }
        let started = Instant::now();
        let response = self.service.handle(request);
        // A late answer is discarded; the caller must not assume it landed.
        if started.elapsed() > timeout {
            return Err(SyncError::Timeout);
        }
        Ok(response)
    }
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> SyncResult<HttpResponse> {
        (**self).send(request, timeout)
    }
}
