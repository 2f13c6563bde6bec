//! Durable package queue for the reliable session manager.
//!
//! A package is a request that could not be delivered yet. This crate keeps
//! them in SQLite, per service, in insertion order:
//!
//! - `StoreExecutor`: dedicated SQLite thread; every statement is serialized
//!   through it, which makes it the single writer for the queue
//! - `PackageStore`: append / enumerate / remove for one service
//! - Versioned migrations tracked in the `migrations` table
//!
//! ```ignore
//! let store = PackageStore::open(path, "orders").await?;
//! let id = store.append(&request).await?;
//! store.enumerate(|package: Package<Request>| {
//!     println!("{} {:?}", package.id, package.request);
//!     ControlFlow::Continue(())
//! }).await?;
//! store.remove(id).await?;
//! ```
//!
//! Payloads are stored as JSON. A row that no longer decodes is skipped by
//! enumeration instead of failing the whole scan.

mod error;
mod executor;
mod migrations;
mod models;
pub mod queries;
mod store;

pub use error::{StoreError, StoreResult};
pub use executor::StoreExecutor;
pub use migrations::{run_migrations, CURRENT_VERSION};
pub use models::{Package, PackageId, RawPackage};
pub use store::{log_recovered, PackageStore, ENUMERATE_PAGE_SIZE};
