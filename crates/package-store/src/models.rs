//! Package model types.

use crate::{StoreError, StoreResult};
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity and ordering token of a stored package.
///
/// Ids are assigned monotonically by the store and never reused, so comparing
/// two ids of the same service compares their insertion order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PackageId(pub i64);

impl PackageId {
    pub fn as_i64(&self) -> i64 {
        self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for PackageId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

/// A row as it sits on disk, before its payload is decoded.
#[derive(Debug, Clone)]
pub struct RawPackage {
    pub id: PackageId,
    pub service: String,
    pub payload: Vec<u8>,
    pub replay_attempts: u32,
    pub created_at: DateTime<Utc>,
}

impl RawPackage {
    /// Decode the payload into a typed package.
    pub fn decode<T: DeserializeOwned>(&self) -> StoreResult<Package<T>> {
        let request = serde_json::from_slice(&self.payload).map_err(|e| {
            StoreError::InvalidData(format!("package {} payload unreadable: {}", self.id, e))
        })?;

        Ok(Package {
            id: self.id,
            service: self.service.clone(),
            request,
            replay_attempts: self.replay_attempts,
            created_at: self.created_at,
        })
    }
}

/// A persisted, not-yet-delivered request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package<T> {
    pub id: PackageId,
    pub service: String,
    pub request: T,
    /// Number of replays this request has already been through.
    pub replay_attempts: u32,
    pub created_at: DateTime<Utc>,
}
