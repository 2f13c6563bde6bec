//! SQL helpers for the packages table.
//!
//! Every function takes a plain `&Connection` and runs on the executor thread.
//! All queries are scoped by service.

use crate::{PackageId, RawPackage, StoreResult};
use chrono::{DateTime, Utc};
use rusqlite::types::ValueRef;
use rusqlite::{params, Connection, OptionalExtension, Row};

const PACKAGE_COLUMNS: &str = "id, service, payload, replay_attempts, created_at";

/// Insert a package and return its id.
pub fn insert_package(
    conn: &Connection,
    service: &str,
    payload: &str,
    replay_attempts: u32,
) -> StoreResult<PackageId> {
    let now = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO packages (service, payload, replay_attempts, created_at)
         VALUES (?1, ?2, ?3, ?4)",
        params![service, payload, replay_attempts, now],
    )?;
    Ok(PackageId(conn.last_insert_rowid()))
}

/// Read up to `limit` packages with an id greater than `after`, oldest first.
pub fn list_packages_after(
    conn: &Connection,
    service: &str,
    after: i64,
    limit: usize,
) -> StoreResult<Vec<RawPackage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PACKAGE_COLUMNS}
         FROM packages
         WHERE service = ?1 AND id > ?2
         ORDER BY id ASC
         LIMIT ?3"
    ))?;

    let packages = stmt
        .query_map(params![service, after, limit as i64], map_raw_package)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(packages)
}

/// Get a single package by id.
pub fn get_package(
    conn: &Connection,
    service: &str,
    id: PackageId,
) -> StoreResult<Option<RawPackage>> {
    let mut stmt = conn.prepare_cached(&format!(
        "SELECT {PACKAGE_COLUMNS} FROM packages WHERE service = ?1 AND id = ?2"
    ))?;

    Ok(stmt
        .query_row(params![service, id.as_i64()], map_raw_package)
        .optional()?)
}

/// Delete a package. Returns whether a row was removed.
pub fn delete_package(conn: &Connection, service: &str, id: PackageId) -> StoreResult<bool> {
    let count = conn.execute(
        "DELETE FROM packages WHERE service = ?1 AND id = ?2",
        params![service, id.as_i64()],
    )?;
    Ok(count > 0)
}

/// Count packages for a service.
pub fn count_packages(conn: &Connection, service: &str) -> StoreResult<usize> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM packages WHERE service = ?1",
        params![service],
        |row| row.get(0),
    )?;
    Ok(count as usize)
}

/// List every service that has at least one stored package.
pub fn list_services(conn: &Connection) -> StoreResult<Vec<String>> {
    let mut stmt = conn.prepare_cached("SELECT DISTINCT service FROM packages ORDER BY service")?;
    let services = stmt
        .query_map([], |row| row.get(0))?
        .collect::<Result<Vec<String>, _>>()?;
    Ok(services)
}

/// Map a row without assuming the payload column holds valid text.
///
/// A damaged payload still yields a row, so one bad entry never hides its
/// neighbours; decoding happens later in [`RawPackage::decode`].
fn map_raw_package(row: &Row<'_>) -> rusqlite::Result<RawPackage> {
    let payload = match row.get_ref(2)? {
        ValueRef::Text(bytes) | ValueRef::Blob(bytes) => bytes.to_vec(),
        _ => Vec::new(),
    };
    let replay_attempts: i64 = row.get::<_, Option<i64>>(3)?.unwrap_or(0);
    let created_at = match row.get_ref(4)? {
        ValueRef::Text(bytes) => parse_datetime(&String::from_utf8_lossy(bytes)),
        _ => Utc::now(),
    };

    Ok(RawPackage {
        id: PackageId(row.get(0)?),
        service: row.get(1)?,
        payload,
        replay_attempts: replay_attempts.max(0) as u32,
        created_at,
    })
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
