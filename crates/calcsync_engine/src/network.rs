//! Network status monitor.
//!
//! The platform reports connectivity into a [`NetworkMonitor`]; a
//! [`ConnectivityDriver`] watches it and runs the reconnect hook each time
//! the device comes back online.

use tokio::sync::watch;

/// Connectivity as last reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NetworkStatus {
    /// Nothing reported yet.
    #[default]
    Unknown,
    /// Connected.
    Online,
    /// Not connected.
    Offline,
}

impl NetworkStatus {
    /// Returns true when connected.
    pub fn is_online(self) -> bool {
        self == NetworkStatus::Online
    }
}

/// Publishes connectivity changes.
#[derive(Debug)]
pub struct NetworkMonitor {
    tx: watch::Sender<NetworkStatus>,
}

impl NetworkMonitor {
    /// Creates a monitor in the `Unknown` state.
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(NetworkStatus::Unknown);
        Self { tx }
    }

    /// Reports a status. Returns true if it changed.
    pub fn set(&self, status: NetworkStatus) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == status {
                false
            } else {
                *current = status;
                true
            }
        });
        if changed {
            tracing::info!(status = ?status, "network status changed");
        }
        changed
    }

    /// The last reported status.
    pub fn status(&self) -> NetworkStatus {
        *self.tx.borrow()
    }

    /// A receiver for status changes.
    pub fn subscribe(&self) -> watch::Receiver<NetworkStatus> {
        self.tx.subscribe()
    }

    /// A driver that runs `on_reconnect` whenever the status turns online.
    pub fn driver<F>(&self, on_reconnect: F) -> ConnectivityDriver<F>
    where
        F: FnMut() + Send,
    {
        ConnectivityDriver::new(self.subscribe(), on_reconnect)
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Runs a hook on every transition into [`NetworkStatus::Online`].
pub struct ConnectivityDriver<F> {
    rx: watch::Receiver<NetworkStatus>,
    last: NetworkStatus,
    on_reconnect: F,
}

impl<F> ConnectivityDriver<F>
where
    F: FnMut() + Send,
{
    /// Creates a driver over a status receiver.
    ///
    /// The status seen here is the starting point; anything reported after
    /// this call counts as a transition, even before [`Self::run`] is polled.
    pub fn new(mut rx: watch::Receiver<NetworkStatus>, on_reconnect: F) -> Self {
        let last = *rx.borrow_and_update();
        Self {
            rx,
            last,
            on_reconnect,
        }
    }

    /// Watches until the monitor is dropped. Returns how many times the hook
    /// ran.
    pub async fn run(mut self) -> u64 {
        let mut last = self.last;
        let mut fired = 0;
        while self.rx.changed().await.is_ok() {
            let status = *self.rx.borrow_and_update();
            if status.is_online() && !last.is_online() {
                tracing::debug!(previous = ?last, "connectivity restored");
                (self.on_reconnect)();
                fired += 1;
            }
            last = status;
        }
        fired
    }
}
