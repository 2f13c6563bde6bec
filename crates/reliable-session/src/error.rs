//! Session error types.

use crate::request::HttpResponse;
use crate::transport::TransportError;
use package_store::{PackageId, StoreError};
use thiserror::Error;

/// Outcome classes a dispatch can end in, besides a delivered response.
#[derive(Error, Debug)]
pub enum SessionError {
    /// The URL could not be resolved against the service base
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Parameters or body could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Service unreachable; the request was stored for replay
    #[error("Service unreachable, request queued as package {package_id}")]
    Queued { package_id: PackageId },

    /// Network-level failure; the request was stored for replay
    #[error("Transport failure (queued as package {package_id}): {source}")]
    Transport {
        #[source]
        source: TransportError,
        package_id: PackageId,
    },

    /// A response arrived but its status is outside the acceptable set
    #[error("Unacceptable status code {status}")]
    UnacceptableStatus { status: u16, response: HttpResponse },

    /// The package store failed; the request was not queued
    #[error("Persistence failure: {0}")]
    Persistence(#[from] StoreError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl SessionError {
    /// Package the request was stored as, when it was stored.
    pub fn package_id(&self) -> Option<PackageId> {
        match self {
            Self::Queued { package_id } | Self::Transport { package_id, .. } => Some(*package_id),
            _ => None,
        }
    }

    /// Response carried by a policy rejection.
    pub fn response(&self) -> Option<&HttpResponse> {
        match self {
            Self::UnacceptableStatus { response, .. } => Some(response),
            _ => None,
        }
    }

    /// Whether the request now sits in the package store.
    pub fn is_queued(&self) -> bool {
        self.package_id().is_some()
    }
}

/// Result type alias using SessionError.
pub type SessionResult<T> = Result<T, SessionError>;
