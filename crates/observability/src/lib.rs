//! # Observability
//!
//! Logging setup for the reliable-session binaries.
//!
//! Libraries in this workspace only emit `tracing` events. Binaries call
//! `observability::init()` once at startup to decide where they go.
//!
//! ## Usage
//!
//! ```rust,ignore
//! fn main() {
//!     observability::init("rsm");
//!     tracing::info!("ready");
//! }
//! ```
//!
//! Or with configuration:
//!
//! ```rust,ignore
//! observability::init_with_config(observability::LogConfig {
//!     service_name: "rsm".into(),
//!     default_level: "debug".into(),
//!     json: true,
//!     ..Default::default()
//! });
//! ```

mod writer;

pub use writer::AppendWriter;

use std::path::PathBuf;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer, Registry};

/// Configuration for the logging system.
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Name of the binary, logged once at startup.
    pub service_name: String,

    /// Default log level filter (e.g., "debug", "info", "warn").
    /// Can be overridden by `RUST_LOG` environment variable.
    pub default_level: String,

    /// Optional log file, appended to.
    pub log_path: Option<PathBuf>,

    /// Also emit logs to stderr when a log file is set.
    /// Without a log file, stderr is always used.
    pub also_stderr: bool,

    /// Emit JSON lines instead of the compact text format.
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            service_name: "unknown".into(),
            default_level: "info".into(),
            log_path: None,
            also_stderr: false,
            json: false,
        }
    }
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Initialize logging with default settings (compact text on stderr).
pub fn init(service_name: &str) -> bool {
    init_with_config(LogConfig {
        service_name: service_name.into(),
        ..Default::default()
    })
}

/// Initialize logging with custom configuration.
///
/// Returns `false` when a global subscriber was already installed; the
/// existing one stays in place. A log file that cannot be opened falls back
/// to stderr.
pub fn init_with_config(config: LogConfig) -> bool {
    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut file_error = None;

    if let Some(path) = &config.log_path {
        match AppendWriter::open(path) {
            Ok(writer) => layers.push(format_layer(config.json, writer, false)),
            Err(e) => file_error = Some(e),
        }
    }
    if config.also_stderr || layers.is_empty() {
        layers.push(format_layer(config.json, std::io::stderr, !config.json));
    }

    let installed = tracing_subscriber::registry()
        .with(layers)
        .with(env_filter(&config.default_level))
        .try_init()
        .is_ok();

    if installed {
        tracing::debug!(service = %config.service_name, "observability initialized");
        if let (Some(path), Some(e)) = (&config.log_path, file_error) {
            tracing::warn!(path = %path.display(), error = %e, "Log file unavailable, using stderr");
        }
    }
    installed
}

/// `RUST_LOG` when set and valid, `default_level` otherwise.
pub fn env_filter(default_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
}

fn format_layer<W>(json: bool, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(ansi)
        .with_writer(writer);

    if json {
        layer.json().boxed()
    } else {
        layer.compact().boxed()
    }
}

/// Re-export tracing macros for convenience.
pub use tracing::{debug, error, info, instrument, trace, warn};

/// Re-export Level for advanced filtering.
pub use tracing::Level;
