//! Reliable session manager.

use crate::builder::RequestBuilder;
use crate::config::SessionConfig;
use crate::dispatcher::{DispatchSettings, Dispatcher, DrainReport, ReplayEvent};
use crate::multipart::MultipartFormData;
use crate::policy::{AcceptableStatusCodes, RequeuePolicy};
use crate::reachability::Reachability;
use crate::request::{HttpResponse, Method, RequestDescriptor};
use crate::transport::HttpTransport;
use crate::{SessionError, SessionResult};
use package_store::{log_recovered, Package, PackageId, PackageStore, StoreExecutor};
use serde_json::Value;
use std::ops::ControlFlow;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::info;

/// What a completion callback receives.
#[derive(Debug)]
pub struct Completed {
    /// The request as it was handed to [`ReliableSessionManager::save_package`].
    pub request: RequestDescriptor,
    pub result: SessionResult<HttpResponse>,
}

/// Invoked exactly once per [`ReliableSessionManager::save_package`] call.
pub type Completion = Box<dyn FnOnce(Completed) + Send + 'static>;

/// HTTP session for one service that stores requests it cannot deliver and
/// replays them, in order, when the service becomes reachable again.
///
/// Dropping the manager stops its reachability listener. Stored packages
/// stay on disk and are replayed by the next manager opened on the same
/// database and service.
pub struct ReliableSessionManager {
    service: String,
    dispatcher: Arc<Dispatcher>,
    builder: RequestBuilder,
    listener: JoinHandle<()>,
}

impl ReliableSessionManager {
    /// Open the package database at `config.database_path` and start listening
    /// for reachability changes.
    pub async fn open(
        config: SessionConfig,
        transport: Arc<dyn HttpTransport>,
        reachability: Arc<dyn Reachability>,
    ) -> SessionResult<Self> {
        let executor = StoreExecutor::open(&config.database_path).await?;
        Self::new(config, transport, reachability, executor).await
    }

    /// Build a manager on an already opened executor.
    ///
    /// Must be called inside a tokio runtime.
    pub async fn new(
        config: SessionConfig,
        transport: Arc<dyn HttpTransport>,
        reachability: Arc<dyn Reachability>,
        executor: StoreExecutor,
    ) -> SessionResult<Self> {
        if config.service.trim().is_empty() {
            return Err(SessionError::Config("service name must not be empty".into()));
        }

        let store = PackageStore::new(executor, &config.service);
        log_recovered(&store).await?;

        let settings = DispatchSettings {
            authorization_header: config.authorization_header,
            acceptable_status_codes: config.acceptable_status_codes,
            requeue_policy: config.requeue_policy,
        };
        let dispatcher = Arc::new(Dispatcher::new(store, transport, reachability, settings));
        let listener = dispatcher.spawn_reachability_listener();

        info!(service = %config.service, "Reliable session started");

        Ok(Self {
            service: config.service,
            dispatcher,
            builder: RequestBuilder::new(config.base_url, config.parameter_encoding),
            listener,
        })
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn transport(&self) -> &Arc<dyn HttpTransport> {
        self.dispatcher.transport()
    }

    pub fn reachability(&self) -> &Arc<dyn Reachability> {
        self.dispatcher.reachability()
    }

    pub fn request_builder(&self) -> &RequestBuilder {
        &self.builder
    }

    pub fn authorization_header(&self) -> Option<String> {
        self.dispatcher.settings().read().authorization_header.clone()
    }

    /// Set or clear the `Authorization` value merged into every send,
    /// including replays of packages stored earlier.
    pub fn set_authorization_header(&self, header: Option<String>) {
        self.dispatcher.settings().write().authorization_header = header;
    }

    pub fn acceptable_status_codes(&self) -> AcceptableStatusCodes {
        self.dispatcher.settings().read().acceptable_status_codes.clone()
    }

    pub fn set_acceptable_status_codes(&self, codes: AcceptableStatusCodes) {
        self.dispatcher.settings().write().acceptable_status_codes = codes;
    }

    pub fn requeue_policy(&self) -> RequeuePolicy {
        self.dispatcher.settings().read().requeue_policy
    }

    pub fn set_requeue_policy(&self, policy: RequeuePolicy) {
        self.dispatcher.settings().write().requeue_policy = policy;
    }

    /// Number of stored packages for this service.
    pub async fn pending_package_count(&self) -> SessionResult<usize> {
        Ok(self.dispatcher.store().count().await?)
    }

    /// Dispatch `request` in the background and report the outcome to `completion`.
    ///
    /// The callback runs on a runtime worker, not on the caller's task. The
    /// returned handle resolves after the callback has run.
    pub fn save_package(
        &self,
        request: RequestDescriptor,
        completion: Option<Completion>,
    ) -> JoinHandle<()> {
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let result = dispatcher.dispatch(&request).await;
            if let Some(completion) = completion {
                completion(Completed { request, result });
            }
        })
    }

    /// Dispatch `request` and wait for the outcome.
    pub async fn send(&self, request: &RequestDescriptor) -> SessionResult<HttpResponse> {
        self.dispatcher.dispatch(request).await
    }

    /// Visit stored requests oldest first; return `ControlFlow::Break` to stop.
    pub async fn enumerate_packages<F>(&self, visitor: F) -> SessionResult<()>
    where
        F: FnMut(Package<RequestDescriptor>) -> ControlFlow<()>,
    {
        Ok(self.dispatcher.store().enumerate(visitor).await?)
    }

    /// Drop a stored package without sending it. Unknown ids are ignored.
    pub async fn discard_package(&self, id: PackageId) -> SessionResult<()> {
        Ok(self.dispatcher.store().remove(id).await?)
    }

    /// Replay stored packages now.
    ///
    /// Returns `None` when a drain is already running.
    pub async fn drain_now(&self) -> SessionResult<Option<DrainReport>> {
        self.dispatcher.drain().await
    }

    /// Outcomes of replayed packages.
    pub fn subscribe_replays(&self) -> broadcast::Receiver<ReplayEvent> {
        self.dispatcher.subscribe()
    }

    pub fn get(&self, url: &str, parameters: Option<&Value>) -> SessionResult<RequestDescriptor> {
        self.builder.build(Method::Get, url, parameters)
    }

    pub fn head(&self, url: &str, parameters: Option<&Value>) -> SessionResult<RequestDescriptor> {
        self.builder.build(Method::Head, url, parameters)
    }

    pub fn post(&self, url: &str, parameters: Option<&Value>) -> SessionResult<RequestDescriptor> {
        self.builder.build(Method::Post, url, parameters)
    }

    /// Multipart POST; `construct` appends the parts after the parameters.
    pub fn post_multipart<F>(
        &self,
        url: &str,
        parameters: Option<&Value>,
        construct: F,
    ) -> SessionResult<RequestDescriptor>
    where
        F: FnOnce(&mut MultipartFormData) -> SessionResult<()>,
    {
        self.builder.build_multipart(url, parameters, construct)
    }

    pub fn put(&self, url: &str, parameters: Option<&Value>) -> SessionResult<RequestDescriptor> {
        self.builder.build(Method::Put, url, parameters)
    }

    pub fn patch(&self, url: &str, parameters: Option<&Value>) -> SessionResult<RequestDescriptor> {
        self.builder.build(Method::Patch, url, parameters)
    }

    pub fn delete(&self, url: &str, parameters: Option<&Value>) -> SessionResult<RequestDescriptor> {
        self.builder.build(Method::Delete, url, parameters)
    }
}

impl Drop for ReliableSessionManager {
    fn drop(&mut self) {
        self.listener.abort();
    }
}

impl std::fmt::Debug for ReliableSessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReliableSessionManager")
            .field("service", &self.service)
            .field("store", self.dispatcher.store())
            .finish()
    }
}
