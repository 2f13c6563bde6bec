//! Durable, ordered package queue for one service.

use crate::{queries, Package, PackageId, RawPackage, StoreExecutor, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows fetched per round trip while enumerating.
pub const ENUMERATE_PAGE_SIZE: usize = 64;

/// Package queue scoped to a single service.
///
/// Several stores may share one [`StoreExecutor`] (one database file, many
/// services). All mutations go through the executor thread, which serializes
/// them.
#[derive(Clone)]
pub struct PackageStore {
    executor: StoreExecutor,
    service: Arc<str>,
}

impl PackageStore {
    /// Open the database at `path` and bind a store to `service`.
    pub async fn open(path: &Path, service: &str) -> StoreResult<Self> {
        let executor = StoreExecutor::open(path).await?;
        Ok(Self::new(executor, service))
    }

    /// In-memory store for tests.
    pub async fn open_in_memory(service: &str) -> StoreResult<Self> {
        let executor = StoreExecutor::open_in_memory().await?;
        Ok(Self::new(executor, service))
    }

    /// Bind a store to `service` on an existing executor.
    pub fn new(executor: StoreExecutor, service: &str) -> Self {
        Self {
            executor,
            service: Arc::from(service),
        }
    }

    /// The service this store is scoped to.
    pub fn service(&self) -> &str {
        &self.service
    }

    /// The underlying executor.
    pub fn executor(&self) -> &StoreExecutor {
        &self.executor
    }

    /// Persist a request at the tail of the queue.
    ///
    /// Returns once the row is committed. On error nothing was queued.
    pub async fn append<T: Serialize>(&self, request: &T) -> StoreResult<PackageId> {
        let payload = serde_json::to_string(request)?;
        let service = self.service.clone();

        let id = self
            .executor
            .call(move |conn| queries::insert_package(conn, &service, &payload, 0))
            .await?;

        debug!(service = %self.service, package_id = %id, "Package appended");
        Ok(id)
    }

    /// Move a package to the tail as a new entry, bumping its replay count.
    ///
    /// Insert and delete commit in one transaction, so a crash leaves either
    /// the old entry or the new one, never neither. Returns `None` when the
    /// package was removed in the meantime; nothing is re-inserted then.
    pub async fn requeue<T: Serialize>(
        &self,
        package: &Package<T>,
    ) -> StoreResult<Option<PackageId>> {
        let payload = serde_json::to_string(&package.request)?;
        let service = self.service.clone();
        let old_id = package.id;
        let attempts = package.replay_attempts.saturating_add(1);

        let new_id = self
            .executor
            .call(move |conn| {
                let tx = conn.unchecked_transaction()?;
                if !queries::delete_package(&tx, &service, old_id)? {
                    return Ok(None);
                }
                let new_id = queries::insert_package(&tx, &service, &payload, attempts)?;
                tx.commit()?;
                Ok(Some(new_id))
            })
            .await?;

        match new_id {
            Some(new_id) => debug!(
                service = %self.service,
                old_id = %old_id,
                new_id = %new_id,
                replay_attempts = attempts,
                "Package re-queued at tail"
            ),
            None => debug!(service = %self.service, package_id = %old_id, "Package discarded before re-queue"),
        }
        Ok(new_id)
    }

    /// Visit packages oldest first until the visitor breaks or the queue ends.
    ///
    /// Rows are fetched page by page, so an early break never reads the rest
    /// of the queue. Nothing is removed. Rows whose payload cannot be decoded
    /// are logged and skipped.
    pub async fn enumerate<T, F>(&self, mut visitor: F) -> StoreResult<()>
    where
        T: DeserializeOwned,
        F: FnMut(Package<T>) -> ControlFlow<()>,
    {
        let mut cursor = 0i64;

        loop {
            let page = self.page_after(cursor, ENUMERATE_PAGE_SIZE).await?;
            let Some(last) = page.last() else {
                return Ok(());
            };
            cursor = last.id.as_i64();
            let exhausted = page.len() < ENUMERATE_PAGE_SIZE;

            for raw in page {
                match raw.decode::<T>() {
                    Ok(package) => {
                        if visitor(package).is_break() {
                            return Ok(());
                        }
                    }
                    Err(e) => {
                        warn!(service = %self.service, package_id = %raw.id, error = %e, "Skipping unreadable package");
                    }
                }
            }

            if exhausted {
                return Ok(());
            }
        }
    }

    /// All rows for this service, oldest first, payloads undecoded.
    pub async fn snapshot(&self) -> StoreResult<Vec<RawPackage>> {
        let mut all = Vec::new();
        let mut cursor = 0i64;

        loop {
            let page = self.page_after(cursor, ENUMERATE_PAGE_SIZE).await?;
            let exhausted = page.len() < ENUMERATE_PAGE_SIZE;
            if let Some(last) = page.last() {
                cursor = last.id.as_i64();
            }
            all.extend(page);
            if exhausted {
                return Ok(all);
            }
        }
    }

    /// Fetch one package by id.
    pub async fn get<T: DeserializeOwned>(&self, id: PackageId) -> StoreResult<Option<Package<T>>> {
        let service = self.service.clone();
        let raw = self
            .executor
            .call(move |conn| queries::get_package(conn, &service, id))
            .await?;

        raw.map(|raw| raw.decode()).transpose()
    }

    /// Whether `id` is stored, without decoding its payload.
    pub async fn contains(&self, id: PackageId) -> StoreResult<bool> {
        let service = self.service.clone();
        self.executor
            .call(move |conn| Ok(queries::get_package(conn, &service, id)?.is_some()))
            .await
    }

    /// Delete one package. Removing an id that is not stored is a no-op.
    pub async fn remove(&self, id: PackageId) -> StoreResult<()> {
        let service = self.service.clone();
        let removed = self
            .executor
            .call(move |conn| queries::delete_package(conn, &service, id))
            .await?;

        if removed {
            debug!(service = %self.service, package_id = %id, "Package removed");
        } else {
            debug!(service = %self.service, package_id = %id, "Package already gone");
        }
        Ok(())
    }

    /// Number of stored packages, readable or not.
    pub async fn count(&self) -> StoreResult<usize> {
        let service = self.service.clone();
        self.executor
            .call(move |conn| queries::count_packages(conn, &service))
            .await
    }

    /// Services with at least one package in the same database.
    pub async fn services(&self) -> StoreResult<Vec<String>> {
        self.executor.call(|conn| queries::list_services(conn)).await
    }

    async fn page_after(&self, cursor: i64, limit: usize) -> StoreResult<Vec<RawPackage>> {
        let service = self.service.clone();
        self.executor
            .call(move |conn| queries::list_packages_after(conn, &service, cursor, limit))
            .await
    }
}

impl std::fmt::Debug for PackageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PackageStore")
            .field("service", &self.service)
            .field("path", &self.executor.path())
            .finish()
    }
}

/// Log how many packages a freshly opened store holds.
pub async fn log_recovered(store: &PackageStore) -> StoreResult<usize> {
    let count = store.count().await?;
    if count > 0 {
        info!(service = %store.service(), count, "Recovered pending packages");
    }
    Ok(count)
}
