//! HTTP transport contract and the reqwest-backed implementation.

use crate::multipart::{MultipartFormData, PartSource};
use crate::request::{HttpResponse, RequestBody, RequestDescriptor};
use crate::{SessionError, SessionResult};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Why a request never produced a response.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TransportError {
    /// No response within the request timeout
    #[error("request timed out")]
    Timeout,

    /// Connection refused, DNS failure, TLS handshake failure
    #[error("connection failed: {0}")]
    Connect(String),

    /// Any other failure after the request left the process
    #[error("transport error: {0}")]
    Other(String),

    /// The request could not be turned into a wire request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// A body part could not be read (e.g. a multipart file is gone)
    #[error("request body unavailable: {0}")]
    Body(String),
}

impl TransportError {
    /// Connectivity failures are worth replaying; malformed requests never are.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout | Self::Connect(_) | Self::Other(_))
    }
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_connect() {
            Self::Connect(e.to_string())
        } else if e.is_builder() {
            Self::InvalidRequest(e.to_string())
        } else {
            Self::Other(e.to_string())
        }
    }
}

/// Sends a request and reports either a response or a transport failure.
///
/// Any status code counts as a response here; acceptance is decided by the
/// dispatcher.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransportError>;
}

/// Production transport on a shared `reqwest::Client`.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    /// Create a transport with the given per-request timeout.
    pub fn new(timeout: Duration) -> SessionResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SessionError::Config(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }

    /// Wrap an existing client (connection pool, TLS and proxy settings are the caller's).
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: &RequestDescriptor) -> Result<HttpResponse, TransportError> {
        let method = reqwest::Method::from_bytes(request.method().as_str().as_bytes())
            .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;

        let mut builder = self.client.request(method, request.url().clone());
        for (name, value) in request.headers() {
            builder = builder.header(name.as_str(), value.as_str());
        }

        builder = match request.body() {
            RequestBody::Empty => builder,
            RequestBody::Bytes { data } => builder.body(data.clone()),
            RequestBody::Multipart(form) => builder.multipart(build_form(form).await?),
        };

        debug!(method = %request.method(), url = %request.url(), "Sending request");

        let response = builder.send().await?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).into_owned(),
                )
            })
            .collect();
        let body = response.bytes().await?.to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
        })
    }
}

async fn build_form(form: &MultipartFormData) -> Result<Form, TransportError> {
    let mut out = Form::new();

    for part in form.parts() {
        let data = match &part.source {
            PartSource::Bytes { data } => data.clone(),
            PartSource::File { path } => tokio::fs::read(path)
                .await
                .map_err(|e| TransportError::Body(format!("{}: {}", path.display(), e)))?,
        };

        let mut wire = Part::bytes(data);
        if let Some(filename) = &part.filename {
            wire = wire.file_name(filename.clone());
        }
        if let Some(content_type) = &part.content_type {
            wire = wire
                .mime_str(content_type)
                .map_err(|e| TransportError::InvalidRequest(e.to_string()))?;
        }
        out = out.part(part.name.clone(), wire);
    }

    Ok(out)
}
