//! Request construction.

use crate::encoding::{self, ParameterEncoding};
use crate::multipart::MultipartFormData;
use crate::request::{Method, RequestBody, RequestDescriptor};
use crate::{SessionError, SessionResult};
use serde_json::Value;
use url::Url;

/// Builds [`RequestDescriptor`]s relative to a service base URL.
#[derive(Debug, Clone)]
pub struct RequestBuilder {
    base_url: Option<Url>,
    encoding: ParameterEncoding,
}

impl RequestBuilder {
    pub fn new(base_url: Option<Url>, encoding: ParameterEncoding) -> Self {
        Self { base_url, encoding }
    }

    pub fn base_url(&self) -> Option<&Url> {
        self.base_url.as_ref()
    }

    pub fn encoding(&self) -> ParameterEncoding {
        self.encoding
    }

    /// Resolve an absolute URL or one relative to the base URL.
    pub fn resolve(&self, url: &str) -> SessionResult<Url> {
        match Url::parse(url) {
            Ok(absolute) => Ok(absolute),
            Err(url::ParseError::RelativeUrlWithoutBase) => {
                let base = self.base_url.as_ref().ok_or_else(|| {
                    SessionError::InvalidUrl(format!("relative URL '{url}' without a base URL"))
                })?;
                base.join(url)
                    .map_err(|e| SessionError::InvalidUrl(format!("'{url}': {e}")))
            }
            Err(e) => Err(SessionError::InvalidUrl(format!("'{url}': {e}"))),
        }
    }

    /// Build a request; parameters go to the query string or the body by verb.
    pub fn build(
        &self,
        method: Method,
        url: &str,
        parameters: Option<&Value>,
    ) -> SessionResult<RequestDescriptor> {
        let mut url = self.resolve(url)?;
        let parameters = parameters.filter(|p| !p.is_null());

        if method.encodes_parameters_in_uri() {
            if let Some(parameters) = parameters {
                let pairs = encoding::query_pairs(parameters)?;
                if !pairs.is_empty() {
                    encoding::append_pairs(&mut url.query_pairs_mut(), &pairs);
                }
            }
            return Ok(RequestDescriptor::new(method, url));
        }

        let request = RequestDescriptor::new(method, url);
        match parameters {
            Some(parameters) => {
                let data = self.encoding.encode_body(parameters)?;
                Ok(request
                    .with_header("Content-Type", self.encoding.content_type())
                    .with_body(RequestBody::Bytes { data }))
            }
            None => Ok(request),
        }
    }

    /// Build a multipart POST.
    ///
    /// Parameters become leading text parts; `construct` then appends the
    /// remaining parts in order.
    pub fn build_multipart<F>(
        &self,
        url: &str,
        parameters: Option<&Value>,
        construct: F,
    ) -> SessionResult<RequestDescriptor>
    where
        F: FnOnce(&mut MultipartFormData) -> SessionResult<()>,
    {
        let url = self.resolve(url)?;
        let mut form = MultipartFormData::new();

        if let Some(parameters) = parameters {
            for (key, value) in encoding::query_pairs(parameters)? {
                form.append_text(&key, value.as_deref().unwrap_or(""));
            }
        }
        construct(&mut form)?;

        Ok(RequestDescriptor::new(Method::Post, url).with_body(RequestBody::Multipart(form)))
    }
}
