//! Reachability contract and monitors.
//!
//! The session only reads connectivity state; whoever owns the monitor
//! decides when it changes. Both monitors publish through a `watch` channel
//! and only notify subscribers on an actual transition.

use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};
use url::Url;

/// Current connectivity to a service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReachabilityStatus {
    Reachable,
    Unreachable,
}

impl ReachabilityStatus {
    pub fn is_reachable(&self) -> bool {
        matches!(self, Self::Reachable)
    }
}

/// Read-only view of a connectivity monitor.
pub trait Reachability: Send + Sync {
    /// Status right now.
    fn status(&self) -> ReachabilityStatus;

    /// Receiver that wakes on every transition.
    fn subscribe(&self) -> watch::Receiver<ReachabilityStatus>;
}

/// Publish `status` if it differs from the current one.
fn publish(tx: &watch::Sender<ReachabilityStatus>, status: ReachabilityStatus) -> bool {
    let changed = tx.send_if_modified(|current| {
        if *current == status {
            false
        } else {
            *current = status;
            true
        }
    });
    if changed {
        info!(?status, "Reachability changed");
    }
    changed
}

/// Monitor driven by the application.
///
/// Useful when connectivity comes from somewhere the session cannot see,
/// such as an OS network callback, and as the in-memory monitor in tests.
#[derive(Clone)]
pub struct ManualReachability {
    tx: Arc<watch::Sender<ReachabilityStatus>>,
}

impl ManualReachability {
    pub fn new(initial: ReachabilityStatus) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx: Arc::new(tx) }
    }

    /// Set the status. Returns whether this was a transition.
    pub fn set(&self, status: ReachabilityStatus) -> bool {
        publish(&self.tx, status)
    }

    pub fn set_reachable(&self) -> bool {
        self.set(ReachabilityStatus::Reachable)
    }

    pub fn set_unreachable(&self) -> bool {
        self.set(ReachabilityStatus::Unreachable)
    }
}

impl Reachability for ManualReachability {
    fn status(&self) -> ReachabilityStatus {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ReachabilityStatus> {
        self.tx.subscribe()
    }
}

/// Probe settings.
#[derive(Debug, Clone)]
pub struct ProbeConfig {
    /// Time between probes.
    pub interval: Duration,
    /// Connect timeout for a single probe.
    pub timeout: Duration,
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(10),
            timeout: Duration::from_secs(3),
        }
    }
}

/// Monitor that periodically opens a TCP connection to the service host.
///
/// The probe task stops when the monitor is dropped.
pub struct ProbeReachability {
    tx: Arc<watch::Sender<ReachabilityStatus>>,
    target: String,
    task: JoinHandle<()>,
}

impl ProbeReachability {
    /// Probe `host:port` once, then keep probing in the background.
    pub async fn start(host: &str, port: u16, config: ProbeConfig) -> Self {
        let target = format!("{host}:{port}");
        let initial = probe(&target, config.timeout).await;
        let (tx, _rx) = watch::channel(initial);
        let tx = Arc::new(tx);

        info!(target = %target, status = ?initial, "Reachability probe started");

        let task = {
            let tx = tx.clone();
            let target = target.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(config.interval);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    let status = probe(&target, config.timeout).await;
                    publish(&tx, status);
                }
            })
        };

        Self { tx, target, task }
    }

    /// Probe the host and port of a URL (port defaults by scheme).
    pub async fn for_url(url: &Url, config: ProbeConfig) -> Option<Self> {
        let host = url.host_str()?;
        let port = url.port_or_known_default()?;
        Some(Self::start(host, port, config).await)
    }

    pub fn target(&self) -> &str {
        &self.target
    }
}

impl Reachability for ProbeReachability {
    fn status(&self) -> ReachabilityStatus {
        *self.tx.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<ReachabilityStatus> {
        self.tx.subscribe()
    }
}

impl Drop for ProbeReachability {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn probe(target: &str, timeout: Duration) -> ReachabilityStatus {
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(_)) => ReachabilityStatus::Reachable,
        Ok(Err(e)) => {
            debug!(target = %target, error = %e, "Probe failed");
            ReachabilityStatus::Unreachable
        }
        Err(_) => {
            debug!(target = %target, "Probe timed out");
            ReachabilityStatus::Unreachable
        }
    }
}
