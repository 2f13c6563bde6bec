//! Session configuration.

use crate::encoding::ParameterEncoding;
use crate::policy::{AcceptableStatusCodes, RequeuePolicy};
use crate::{SessionError, SessionResult};
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

/// Database file name under the data directory.
pub const DATABASE_FILE: &str = "packages.db";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_PROBE_INTERVAL_SECS: u64 = 10;
const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 3;

/// Configuration for one session manager.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Name of the backend service; scopes the stored packages
    pub service: String,

    /// Base for relative request URLs
    pub base_url: Option<Url>,

    /// SQLite database holding the packages
    pub database_path: PathBuf,

    /// Per-request timeout of the default transport
    pub request_timeout: Duration,

    /// Body encoding for POST/PUT/PATCH parameters
    pub parameter_encoding: ParameterEncoding,

    /// What a drain does with a package that fails again
    pub requeue_policy: RequeuePolicy,

    /// Status codes counted as delivered
    pub acceptable_status_codes: AcceptableStatusCodes,

    /// `Authorization` value merged into every send
    pub authorization_header: Option<String>,

    /// Interval of the TCP reachability probe
    pub probe_interval: Duration,

    /// Connect timeout of a single probe
    pub probe_timeout: Duration,
}

impl SessionConfig {
    /// Create a config for `service` with defaults, then override from environment.
    pub fn new(service: &str, base_url: Option<&str>) -> SessionResult<Self> {
        let mut config = Self::with_defaults(service, base_url)?;
        config.apply_env_with(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Create a config for `service` with defaults only.
    pub fn with_defaults(service: &str, base_url: Option<&str>) -> SessionResult<Self> {
        if service.trim().is_empty() {
            return Err(SessionError::Config("service name must not be empty".into()));
        }

        let base_url = base_url
            .map(|u| Url::parse(u).map_err(|e| SessionError::InvalidUrl(format!("'{u}': {e}"))))
            .transpose()?;

        Ok(Self {
            service: service.to_string(),
            base_url,
            database_path: default_database_path()?,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            parameter_encoding: ParameterEncoding::default(),
            requeue_policy: RequeuePolicy::default(),
            acceptable_status_codes: AcceptableStatusCodes::default(),
            authorization_header: None,
            probe_interval: Duration::from_secs(DEFAULT_PROBE_INTERVAL_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        })
    }

    /// Override fields from `RSM_*` variables read through `lookup`.
    pub fn apply_env_with<F>(&mut self, lookup: F) -> SessionResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("RSM_DATABASE_PATH") {
            self.database_path = PathBuf::from(path);
        }
        if let Some(secs) = lookup("RSM_REQUEST_TIMEOUT_SECS") {
            self.request_timeout = parse_secs("RSM_REQUEST_TIMEOUT_SECS", &secs)?;
        }
        if let Some(encoding) = lookup("RSM_PARAMETER_ENCODING") {
            self.parameter_encoding = encoding.parse()?;
        }
        if let Some(policy) = lookup("RSM_REQUEUE_POLICY") {
            self.requeue_policy = policy.parse()?;
        }
        if let Some(secs) = lookup("RSM_PROBE_INTERVAL_SECS") {
            self.probe_interval = parse_secs("RSM_PROBE_INTERVAL_SECS", &secs)?;
        }
        if let Some(header) = lookup("RSM_AUTHORIZATION") {
            self.authorization_header = Some(header).filter(|h| !h.is_empty());
        }
        Ok(())
    }
}

fn parse_secs(key: &str, value: &str) -> SessionResult<Duration> {
    match value.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(Duration::from_secs(secs)),
        _ => Err(SessionError::Config(format!(
            "{key} must be a positive number of seconds, got '{value}'"
        ))),
    }
}

/// `<data dir>/reliable-session/packages.db`.
pub fn default_database_path() -> SessionResult<PathBuf> {
    let base = dirs::data_local_dir()
        .or_else(dirs::home_dir)
        .ok_or_else(|| SessionError::Config("could not determine a data directory".into()))?;
    Ok(base.join("reliable-session").join(DATABASE_FILE))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = SessionConfig::with_defaults("orders", Some("https://api.example.com/")).unwrap();

        assert_eq!(config.service, "orders");
        assert_eq!(config.base_url.unwrap().host_str(), Some("api.example.com"));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert_eq!(config.parameter_encoding, ParameterEncoding::Form);
        assert_eq!(config.requeue_policy, RequeuePolicy::Tail);
        assert!(config.acceptable_status_codes.contains(201));
        assert!(config.authorization_header.is_none());
        assert!(config.database_path.ends_with("reliable-session/packages.db"));
    }

    #[test]
    fn test_empty_service_rejected() {
        let err = SessionConfig::with_defaults("  ", None).unwrap_err();
        assert!(matches!(err, SessionError::Config(_)));
    }

    #[test]
    fn test_bad_base_url_rejected() {
        let err = SessionConfig::with_defaults("orders", Some("not a url")).unwrap_err();
        assert!(matches!(err, SessionError::InvalidUrl(_)));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = SessionConfig::with_defaults("orders", None).unwrap();
        config
            .apply_env_with(env(&[
                ("RSM_DATABASE_PATH", "/tmp/rsm.db"),
                ("RSM_REQUEST_TIMEOUT_SECS", "5"),
                ("RSM_PARAMETER_ENCODING", "json"),
                ("RSM_REQUEUE_POLICY", "in-place"),
                ("RSM_PROBE_INTERVAL_SECS", "2"),
                ("RSM_AUTHORIZATION", "Bearer abc"),
            ]))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("/tmp/rsm.db"));
        assert_eq!(config.request_timeout, Duration::from_secs(5));
        assert_eq!(config.parameter_encoding, ParameterEncoding::Json);
        assert_eq!(config.requeue_policy, RequeuePolicy::InPlace);
        assert_eq!(config.probe_interval, Duration::from_secs(2));
        assert_eq!(config.authorization_header.as_deref(), Some("Bearer abc"));
    }

    #[test]
    fn test_invalid_env_values() {
        let mut config = SessionConfig::with_defaults("orders", None).unwrap();
        assert!(config
            .apply_env_with(env(&[("RSM_REQUEST_TIMEOUT_SECS", "soon")]))
            .is_err());
        assert!(config
            .apply_env_with(env(&[("RSM_PROBE_INTERVAL_SECS", "0")]))
            .is_err());
        assert!(config
            .apply_env_with(env(&[("RSM_PARAMETER_ENCODING", "xml")]))
            .is_err());
    }

    #[test]
    fn test_empty_authorization_clears() {
        let mut config = SessionConfig::with_defaults("orders", None).unwrap();
        config.authorization_header = Some("Bearer old".into());
        config.apply_env_with(env(&[("RSM_AUTHORIZATION", "")])).unwrap();
        assert!(config.authorization_header.is_none());
    }
}
