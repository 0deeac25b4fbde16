//! # Network Status Monitor
//!
//! Tracks whether the remote backend is reachable and tells the rest of the
//! engine about transitions.
//!
//! ## Signal Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Network Monitor                                   │
//! │                                                                         │
//! │   periodic probe ──┐                                                    │
//! │   (every 30s)      │                                                    │
//! │                    ├──► monitor task ──► state changed?                 │
//! │   report() from ───┘         │               │                          │
//! │   request failures           │          yes: │  no: drop                │
//! │                              │               ▼                          │
//! │                              │     ┌── watch channel (is_online)        │
//! │                              │     └── on_change listeners              │
//! │                                                                         │
//! │  Only TRANSITIONS are published. Thirty consecutive "still online"      │
//! │  probes produce zero notifications.                                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The probe is a trait so tests (and embedders with their own reachability
//! signal) can inject one; production uses [`HttpProbe`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{SyncError, SyncResult};

// =============================================================================
// Connectivity Probe
// =============================================================================

/// A single reachability check against the backend.
#[async_trait]
pub trait ConnectivityProbe: Send + Sync {
    /// Returns `Ok(true)` when the backend is reachable, `Ok(false)` when it
    /// is not, and `Err` when the check itself could not run (the monitor
    /// then keeps its previous state).
    async fn check(&self) -> SyncResult<bool>;
}

/// Probe that issues an HTTP HEAD against the configured probe URL.
///
/// Any HTTP response at all counts as reachable - a 500 from the backend
/// still proves the network path works, and the export job will find out
/// about server health on its own.
pub struct HttpProbe {
    client: reqwest::Client,
    url: Url,
}

impl HttpProbe {
    pub fn new(url: Url, timeout: Duration) -> SyncResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(HttpProbe { client, url })
    }
}

#[async_trait]
impl ConnectivityProbe for HttpProbe {
    async fn check(&self) -> SyncResult<bool> {
        match self.client.head(self.url.clone()).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.is_timeout() || e.is_connect() || e.is_request() => {
                debug!(error = %e, "Connectivity probe failed");
                Ok(false)
            }
            Err(e) => Err(e.into()),
        }
    }
}

// =============================================================================
// Network Monitor
// =============================================================================

/// Callback invoked on every online/offline transition.
pub type ChangeListener = Box<dyn Fn(bool) + Send + Sync>;

enum MonitorCommand {
    /// Out-of-band observation from a request path (e.g. a write that hit a
    /// connection error reports `false` without waiting for the next poll).
    Report(bool),
    Shutdown,
}

/// Background monitor polling a [`ConnectivityProbe`].
pub struct NetworkMonitor {
    probe: Arc<dyn ConnectivityProbe>,
    poll_interval: Duration,
    listeners: Vec<ChangeListener>,
}

impl NetworkMonitor {
    pub fn new(probe: Arc<dyn ConnectivityProbe>, poll_interval: Duration) -> Self {
        NetworkMonitor {
            probe,
            poll_interval,
            listeners: Vec::new(),
        }
    }

    /// Registers a listener invoked on every transition, with the new state.
    /// Must be called before [`start`](Self::start).
    pub fn on_change(mut self, listener: ChangeListener) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Runs the initial probe and spawns the polling task.
    ///
    /// If the initial probe itself errors, the monitor starts optimistic
    /// (online); the first successful poll corrects it. Listeners only fire
    /// on transitions, never for the initial state.
    pub async fn start(self) -> NetworkMonitorHandle {
        let initial = match self.probe.check().await {
            Ok(online) => online,
            Err(e) => {
                warn!(error = %e, "Initial connectivity probe errored, assuming online");
                true
            }
        };
        info!(online = initial, "Network monitor starting");

        let (state_tx, state_rx) = watch::channel(initial);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let task = tokio::spawn(monitor_loop(
            self.probe,
            self.poll_interval,
            self.listeners,
            state_tx,
            cmd_rx,
        ));

        NetworkMonitorHandle {
            state_rx,
            cmd_tx,
            task,
        }
    }
}

async fn monitor_loop(
    probe: Arc<dyn ConnectivityProbe>,
    poll_interval: Duration,
    listeners: Vec<ChangeListener>,
    state_tx: watch::Sender<bool>,
    mut cmd_rx: mpsc::Receiver<MonitorCommand>,
) {
    let mut ticker = tokio::time::interval(poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first tick fires immediately; the initial probe already ran.
    ticker.tick().await;

    loop {
        let observation = tokio::select! {
            _ = ticker.tick() => match probe.check().await {
                Ok(online) => Some(online),
                Err(e) => {
                    warn!(error = %e, "Connectivity probe errored, keeping previous state");
                    None
                }
            },
            cmd = cmd_rx.recv() => match cmd {
                Some(MonitorCommand::Report(online)) => Some(online),
                Some(MonitorCommand::Shutdown) | None => {
                    debug!("Network monitor shutting down");
                    return;
                }
            },
        };

        let Some(online) = observation else { continue };

        let changed = *state_tx.borrow() != online;
        if changed {
            info!(online, "Network state changed");
            let _ = state_tx.send(online);
            notify(&listeners, online);
        }
    }
}

/// A panicking listener must not take down the monitor task.
fn notify(listeners: &[ChangeListener], online: bool) {
    for listener in listeners {
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| listener(online)));
        if result.is_err() {
            warn!("Network change listener panicked");
        }
    }
}

// =============================================================================
// Monitor Handle
// =============================================================================

/// Handle to a running [`NetworkMonitor`].
pub struct NetworkMonitorHandle {
    state_rx: watch::Receiver<bool>,
    cmd_tx: mpsc::Sender<MonitorCommand>,
    task: JoinHandle<()>,
}

impl NetworkMonitorHandle {
    /// Current belief about connectivity.
    pub fn is_online(&self) -> bool {
        *self.state_rx.borrow()
    }

    /// A watch receiver for components that want to await transitions.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.state_rx.clone()
    }

    /// Feeds an out-of-band observation into the monitor (e.g. a request
    /// path that just saw a connection error).
    pub async fn report(&self, online: bool) {
        if self
            .cmd_tx
            .send(MonitorCommand::Report(online))
            .await
            .is_err()
        {
            debug!("Network monitor already stopped, dropping report");
        }
    }

    /// Stops the monitor task.
    pub async fn shutdown(self) {
        let _ = self.cmd_tx.send(MonitorCommand::Shutdown).await;
        let _ = self.task.await;
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
