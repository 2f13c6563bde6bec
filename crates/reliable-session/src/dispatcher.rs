//! Send-or-enqueue dispatch and ordered replay.
//!
//! Flow for a fresh request:
//!
//! ```text
//! unreachable ──────────────────────────────► append ─► Queued
//! reachable ─► transport ─┬─ status accepted ───────► response
//!                         ├─ status rejected ───────► UnacceptableStatus
//!                         └─ connectivity failure ─► append ─► Transport
//! ```
//!
//! A drain replays the stored packages oldest first, one at a time, and
//! removes each one once its replay has an outcome. Only one drain runs at a
//! time.

use crate::policy::{AcceptableStatusCodes, RequeuePolicy};
use crate::reachability::Reachability;
use crate::request::{HttpResponse, RequestDescriptor};
use crate::transport::{HttpTransport, TransportError};
use crate::{SessionError, SessionResult};
use package_store::{Package, PackageId, PackageStore};
use parking_lot::RwLock;
use std::sync::{Arc, Weak};
use tokio::sync::{broadcast, Mutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Buffered replay events per subscriber before the oldest are dropped.
const REPLAY_CHANNEL_CAPACITY: usize = 256;

/// How the replay of one package ended.
#[derive(Debug, Clone)]
pub enum ReplayOutcome {
    /// Accepted by the service; the package is gone.
    Delivered(HttpResponse),
    /// Answered with an unacceptable status; the package is gone.
    Rejected(HttpResponse),
    /// Failed again and moved to the tail as `new_id`.
    Requeued {
        new_id: PackageId,
        error: TransportError,
    },
    /// Failed again and left at the head; the drain stopped.
    Retained { error: TransportError },
    /// Could never be replayed (unreadable row, unsendable request); the package is gone.
    Discarded { reason: String },
}

/// Replay result published to [`subscribe_replays`](crate::ReliableSessionManager::subscribe_replays) receivers.
#[derive(Debug, Clone)]
pub struct ReplayEvent {
    pub package_id: PackageId,
    /// `None` when the stored row could not be decoded.
    pub request: Option<RequestDescriptor>,
    pub outcome: ReplayOutcome,
}

/// Why a drain stopped before reaching the end of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainHalt {
    /// Reachability dropped; the remaining packages stay in place.
    Unreachable,
    /// A replay failed under [`RequeuePolicy::InPlace`].
    Retained,
}

/// Counters for one drain.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DrainReport {
    pub delivered: usize,
    pub rejected: usize,
    pub requeued: usize,
    pub discarded: usize,
    pub halted: Option<DrainHalt>,
}

impl DrainReport {
    /// Packages that left the queue for good.
    pub fn removed(&self) -> usize {
        self.delivered + self.rejected + self.discarded
    }
}

/// Mutable settings read on every send.
#[derive(Debug, Clone)]
pub(crate) struct DispatchSettings {
    pub authorization_header: Option<String>,
    pub acceptable_status_codes: AcceptableStatusCodes,
    pub requeue_policy: RequeuePolicy,
}

/// Result of one trip through the transport.
enum Attempt {
    Delivered(HttpResponse),
    Rejected(HttpResponse),
    Failed(TransportError),
}

pub(crate) struct Dispatcher {
    store: PackageStore,
    transport: Arc<dyn HttpTransport>,
    reachability: Arc<dyn Reachability>,
    settings: RwLock<DispatchSettings>,
    drain_lock: Arc<Mutex<()>>,
    replays: broadcast::Sender<ReplayEvent>,
}

impl Dispatcher {
    pub fn new(
        store: PackageStore,
        transport: Arc<dyn HttpTransport>,
        reachability: Arc<dyn Reachability>,
        settings: DispatchSettings,
    ) -> Self {
        let (replays, _) = broadcast::channel(REPLAY_CHANNEL_CAPACITY);
        Self {
            store,
            transport,
            reachability,
            settings: RwLock::new(settings),
            drain_lock: Arc::new(Mutex::new(())),
            replays,
        }
    }

    pub fn store(&self) -> &PackageStore {
        &self.store
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        &self.transport
    }

    pub fn reachability(&self) -> &Arc<dyn Reachability> {
        &self.reachability
    }

    pub fn settings(&self) -> &RwLock<DispatchSettings> {
        &self.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ReplayEvent> {
        self.replays.subscribe()
    }

    /// Send now if reachable, otherwise (or on a connectivity failure) store.
    pub async fn dispatch(&self, request: &RequestDescriptor) -> SessionResult<HttpResponse> {
        if !self.reachability.status().is_reachable() {
            let package_id = self.store.append(request).await?;
            info!(
                service = %self.store.service(),
                package_id = %package_id,
                url = %request.url(),
                "Service unreachable, request queued"
            );
            return Err(SessionError::Queued { package_id });
        }

        match self.attempt(request).await {
            Attempt::Delivered(response) => Ok(response),
            Attempt::Rejected(response) => Err(SessionError::UnacceptableStatus {
                status: response.status,
                response,
            }),
            Attempt::Failed(error) if error.is_retryable() => {
                let package_id = self.store.append(request).await?;
                warn!(
                    service = %self.store.service(),
                    package_id = %package_id,
                    error = %error,
                    "Send failed, request queued"
                );
                Err(SessionError::Transport {
                    source: error,
                    package_id,
                })
            }
            Attempt::Failed(error) => Err(SessionError::Encoding(error.to_string())),
        }
    }

    /// One send with the current authorization header, classified by policy.
    async fn attempt(&self, request: &RequestDescriptor) -> Attempt {
        let authorization = self.settings.read().authorization_header.clone();
        let outgoing;
        let request = match authorization {
            Some(value) => {
                outgoing = request.clone().with_header("Authorization", &value);
                &outgoing
            }
            None => request,
        };

        match self.transport.send(request).await {
            Ok(response) => {
                if self.settings.read().acceptable_status_codes.contains(response.status) {
                    debug!(status = response.status, url = %request.url(), "Request delivered");
                    Attempt::Delivered(response)
                } else {
                    warn!(status = response.status, url = %request.url(), "Unacceptable status");
                    Attempt::Rejected(response)
                }
            }
            Err(error) => Attempt::Failed(error),
        }
    }

    /// Replay stored packages in order.
    ///
    /// Returns `None` when another drain is already running.
    pub async fn drain(&self) -> SessionResult<Option<DrainReport>> {
        let Ok(guard) = self.drain_lock.clone().try_lock_owned() else {
            debug!(service = %self.store.service(), "Drain already running");
            return Ok(None);
        };
        self.drain_locked(guard).await.map(Some)
    }

    /// Replay stored packages once any running drain has finished.
    ///
    /// The running drain only replays its own snapshot, so packages stored
    /// while it ran are picked up here.
    async fn drain_after_current(&self) -> SessionResult<DrainReport> {
        let guard = self.drain_lock.clone().lock_owned().await;
        self.drain_locked(guard).await
    }

    async fn drain_locked(&self, _guard: OwnedMutexGuard<()>) -> SessionResult<DrainReport> {
        let packages = self.store.snapshot().await?;
        let mut report = DrainReport::default();
        if packages.is_empty() {
            return Ok(report);
        }

        let policy = self.settings.read().requeue_policy;
        info!(
            service = %self.store.service(),
            count = packages.len(),
            policy = %policy,
            "Draining packages"
        );

        for raw in packages {
            if !self.reachability.status().is_reachable() {
                report.halted = Some(DrainHalt::Unreachable);
                info!(service = %self.store.service(), "Service unreachable, drain paused");
                break;
            }

            let package: Package<RequestDescriptor> = match raw.decode() {
                Ok(package) => package,
                Err(e) => {
                    warn!(package_id = %raw.id, error = %e, "Discarding unreadable package");
                    self.store.remove(raw.id).await?;
                    report.discarded += 1;
                    self.publish(raw.id, None, ReplayOutcome::Discarded {
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let outcome = match self.attempt(&package.request).await {
                Attempt::Delivered(response) => {
                    self.store.remove(package.id).await?;
                    report.delivered += 1;
                    ReplayOutcome::Delivered(response)
                }
                Attempt::Rejected(response) => {
                    self.store.remove(package.id).await?;
                    report.rejected += 1;
                    ReplayOutcome::Rejected(response)
                }
                Attempt::Failed(error) if error.is_retryable() => match policy {
                    RequeuePolicy::Tail => match self.store.requeue(&package).await? {
                        Some(new_id) => {
                            warn!(
                                package_id = %package.id,
                                new_id = %new_id,
                                error = %error,
                                "Replay failed, package re-queued"
                            );
                            report.requeued += 1;
                            ReplayOutcome::Requeued { new_id, error }
                        }
                        None => continue,
                    },
                    RequeuePolicy::InPlace => {
                        warn!(package_id = %package.id, error = %error, "Replay failed, drain stopped");
                        report.halted = Some(DrainHalt::Retained);
                        self.publish(package.id, Some(package.request), ReplayOutcome::Retained {
                            error,
                        });
                        break;
                    }
                },
                Attempt::Failed(error) => {
                    warn!(package_id = %package.id, error = %error, "Discarding unsendable package");
                    self.store.remove(package.id).await?;
                    report.discarded += 1;
                    ReplayOutcome::Discarded {
                        reason: error.to_string(),
                    }
                }
            };

            self.publish(package.id, Some(package.request), outcome);
        }

        info!(
            service = %self.store.service(),
            delivered = report.delivered,
            rejected = report.rejected,
            requeued = report.requeued,
            discarded = report.discarded,
            halted = ?report.halted,
            "Drain finished"
        );
        Ok(report)
    }

    fn publish(&self, package_id: PackageId, request: Option<RequestDescriptor>, outcome: ReplayOutcome) {
        // No receivers is fine.
        let _ = self.replays.send(ReplayEvent {
            package_id,
            request,
            outcome,
        });
    }

    /// Drain whenever the service becomes reachable, and once at start if it already is.
    ///
    /// The start-up drain claims the drain lock before this returns, so a
    /// [`drain`](Self::drain) issued right after construction waits its turn
    /// instead of racing it. A transition seen while another drain runs
    /// drains again once that one releases the lock. The task holds only a
    /// weak reference and ends when the dispatcher is gone.
    pub fn spawn_reachability_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        let mut rx = self.reachability.subscribe();
        let startup = if rx.borrow_and_update().is_reachable() {
            self.drain_lock.clone().try_lock_owned().ok()
        } else {
            None
        };

        tokio::spawn(async move {
            if let Some(guard) = startup {
                let Some(dispatcher) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = dispatcher.drain_locked(guard).await {
                    error!(service = %dispatcher.store.service(), error = %e, "Start-up drain failed");
                }
            }

            // Monitors only notify on a real change, so a notification that
            // reads reachable always follows a period of unreachability.
            while rx.changed().await.is_ok() {
                let reachable = rx.borrow_and_update().is_reachable();
                if reachable && !drain_once(&weak).await {
                    return;
                }
            }
            debug!("Reachability monitor closed");
        })
    }
}

async fn drain_once(weak: &Weak<Dispatcher>) -> bool {
    let Some(dispatcher) = weak.upgrade() else {
        return false;
    };
    if let Err(e) = dispatcher.drain_after_current().await {
        error!(service = %dispatcher.store.service(), error = %e, "Drain failed");
    }
    true
}
