//! A transport that fails on demand.

use calcsync_engine::{HttpClient, SyncError, SyncResult};
use calcsync_protocol::{HttpRequest, HttpResponse};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// How an injected failure looks to the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailureMode {
    /// The server cannot be reached.
    #[default]
    Network,
    /// The request timed out.
    Timeout,
}

impl FailureMode {
    fn error(self) -> SyncError {
        match self {
            FailureMode::Network => SyncError::network("injected network failure"),
            FailureMode::Timeout => SyncError::Timeout,
        }
    }
}

/// Wraps a client and fails some of its requests before they are sent.
///
/// Failed requests never reach the wrapped client.
#[derive(Debug)]
pub struct FlakyClient<C> {
    inner: C,
    mode: FailureMode,
    fail_next: AtomicUsize,
    fail_every: AtomicUsize,
    calls: AtomicUsize,
    failures: AtomicUsize,
}

impl<C: HttpClient> FlakyClient<C> {
    /// Wraps `inner`; nothing fails until told to.
    pub fn new(inner: C) -> Self {
        Self {
            inner,
            mode: FailureMode::Network,
            fail_next: AtomicUsize::new(0),
            fail_every: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
        }
    }

    /// Sets how failures look.
    #[must_use]
    pub fn with_mode(mut self, mode: FailureMode) -> Self {
        self.mode = mode;
        self
    }

    /// Fails the next `count` requests.
    pub fn fail_next(&self, count: usize) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Fails every `nth` request from now on; `0` turns this off.
    pub fn fail_every(&self, nth: usize) {
        self.fail_every.store(nth, Ordering::SeqCst);
    }

    /// Stops injecting failures.
    pub fn heal(&self) {
        self.fail_next.store(0, Ordering::SeqCst);
        self.fail_every.store(0, Ordering::SeqCst);
    }

    /// Requests seen, failed ones included.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Requests failed by injection.
    pub fn failures(&self) -> usize {
        self.failures.load(Ordering::SeqCst)
    }

    /// The wrapped client.
    pub fn inner(&self) -> &C {
        &self.inner
    }

    fn should_fail(&self, call: usize) -> bool {
        let pending = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let every = self.fail_every.load(Ordering::SeqCst);
        pending || (every > 0 && call % every == 0)
    }
}

impl<C: HttpClient> HttpClient for FlakyClient<C> {
    fn send(&self, request: &HttpRequest, timeout: Duration) -> SyncResult<HttpResponse> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if self.should_fail(call) {
            self.failures.fetch_add(1, Ordering::SeqCst);
            tracing::debug!(
                call,
                path = %request.path,
                mode = ?self.mode,
                "injected transport failure"
            );
            return Err(self.mode.error());
        }
        self.inner.send(request, timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calcsync_engine::LoopbackClient;
    use calcsync_protocol::{HttpService, Method};

    struct Ok204;

    impl HttpService for Ok204 {
        fn handle(&self, _request: &HttpRequest) -> HttpResponse {
            HttpResponse::empty(204)
        }
    }

    fn get(client: &FlakyClient<LoopbackClient<Ok204>>) -> SyncResult<HttpResponse> {
        client.send(&HttpRequest::new(Method::Get, "/api/devices"), Duration::from_secs(1))
    }

    #[test]
    fn fails_the_next_requests_then_recovers() {
        let client = FlakyClient::new(LoopbackClient::new(Ok204));
        client.fail_next(2);
        assert!(get(&client).unwrap_err().is_retryable());
        assert!(get(&client).is_err());
        assert_eq!(get(&client).unwrap().status, 204);
        assert_eq!((client.calls(), client.failures()), (3, 2));
    }

    #[test]
    fn fails_every_nth_request() {
        let client = FlakyClient::new(LoopbackClient::new(Ok204)).with_mode(FailureMode::Timeout);
        client.fail_every(3);
        let outcomes: Vec<bool> = (0..6).map(|_| get(&client).is_ok()).collect();
        assert_eq!(outcomes, [true, true, false, true, true, false]);
        assert!(matches!(get(&client), Ok(_)));
        client.heal();
        assert!((0..5).all(|_| get(&client).is_ok()));
    }
}
