//! Reliable HTTP session for a named backend service.
//!
//! Requests are sent right away when the service is reachable. When it is
//! not, or when the send fails at the network level, the request is stored
//! as a package and replayed once the service is reachable again.
//!
//! # Guarantees
//!
//! 1. **At-least-once persistence**: a request that could not be delivered
//!    is in the package store before its completion fires
//! 2. **Ordered replay**: packages are replayed oldest first, one in flight
//! 3. **Single drain**: a reachability flap never starts a second drain
//!    concurrently; it drains again after the running one
//! 4. **Policy rejections are final**: a response outside the acceptable
//!    status codes is reported, never stored
//!
//! # Architecture
//!
//! ```text
//! caller -> RequestBuilder -> Dispatcher -> HttpTransport
//!                                 |  ^
//!                   append/remove v  | drain on reachable
//!                            PackageStore <- Reachability
//! ```

pub mod builder;
pub mod config;
pub mod dispatcher;
pub mod encoding;
pub mod error;
pub mod manager;
pub mod multipart;
pub mod policy;
pub mod reachability;
pub mod request;
pub mod transport;

#[cfg(test)]
mod tests;

pub use builder::RequestBuilder;
pub use config::SessionConfig;
pub use dispatcher::{DrainHalt, DrainReport, ReplayEvent, ReplayOutcome};
pub use encoding::ParameterEncoding;
pub use error::{SessionError, SessionResult};
pub use manager::{Completed, Completion, ReliableSessionManager};
pub use multipart::{FormPart, MultipartFormData, PartSource};
pub use policy::{AcceptableStatusCodes, RequeuePolicy};
pub use reachability::{
    ManualReachability, ProbeConfig, ProbeReachability, Reachability, ReachabilityStatus,
};
pub use request::{HttpResponse, Method, RequestBody, RequestDescriptor};
pub use transport::{HttpTransport, ReqwestTransport, TransportError};

pub use package_store::{Package, PackageId};
