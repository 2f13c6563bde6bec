//! Async SQLite executor using a dedicated background thread.
//!
//! Every statement runs on one thread fed through a channel, in FIFO order.
//! That thread is the single writer for the packages table: appends from
//! callers and removals from a drain can never interleave mid-statement.
//!
//! Only SQL runs inside `call()`. Serialization of payloads happens on the
//! caller's side before the closure is sent.

use crate::{migrations, StoreError, StoreResult};
use std::path::Path;
use tokio_rusqlite::Connection;
use tracing::{debug, info};

/// Convert a tokio_rusqlite::Error to StoreError.
fn from_tokio_rusqlite(e: tokio_rusqlite::Error) -> StoreError {
    match e {
        tokio_rusqlite::Error::Rusqlite(e) => StoreError::Sqlite(e),
        tokio_rusqlite::Error::Close(_) => StoreError::Connection("Connection closed".to_string()),
        other => StoreError::Connection(other.to_string()),
    }
}

/// Handle to the dedicated SQLite thread. Cheap to clone.
#[derive(Clone)]
pub struct StoreExecutor {
    conn: Connection,
    path: String,
}

impl StoreExecutor {
    /// Open (or create) the store database at the given path and run migrations.
    pub async fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let path_str = path.to_string_lossy().to_string();
        info!(path = %path_str, "Opening package store");

        let conn = Connection::open(&path_str)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        // FULL sync: an append must survive power loss once it returns.
        conn.call(|conn| {
            conn.execute_batch(
                "
                PRAGMA journal_mode = WAL;
                PRAGMA synchronous = FULL;
                PRAGMA busy_timeout = 5000;
                ",
            )?;
            Ok(())
        })
        .await
        .map_err(from_tokio_rusqlite)?;

        let executor = Self {
            conn,
            path: path_str,
        };
        executor.migrate().await?;

        info!(path = %executor.path, "Package store initialized");
        Ok(executor)
    }

    /// Open an in-memory store for tests.
    pub async fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory()
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;

        let executor = Self {
            conn,
            path: ":memory:".to_string(),
        };
        executor.migrate().await?;
        Ok(executor)
    }

    async fn migrate(&self) -> StoreResult<()> {
        self.call(|conn| migrations::run_migrations(conn))
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))
    }

    /// Execute a closure on the store connection.
    ///
    /// The closure runs on the dedicated SQLite thread; the caller's task is
    /// parked, not blocked, until the result is ready.
    pub async fn call<F, T>(&self, f: F) -> StoreResult<T>
    where
        F: FnOnce(&rusqlite::Connection) -> StoreResult<T> + Send + 'static,
        T: Send + 'static,
    {
        // Our result rides inside tokio_rusqlite's Ok so both error types survive.
        let outer_result = self.conn.call(move |conn| Ok(f(conn))).await;

        match outer_result {
            Ok(inner) => inner,
            Err(e) => Err(from_tokio_rusqlite(e)),
        }
    }

    /// Get the database file path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check that the executor thread still answers.
    pub async fn health_check(&self) -> StoreResult<()> {
        self.call(|conn| Ok(conn.execute_batch("SELECT 1")?)).await?;
        debug!("Package store health check passed");
        Ok(())
    }

    /// Close the connection after pending operations drain.
    pub async fn close(self) -> StoreResult<()> {
        self.conn
            .close()
            .await
            .map_err(|e| StoreError::Connection(format!("Failed to close store: {:?}", e)))?;
        info!(path = %self.path, "Package store closed");
        Ok(())
    }
}
