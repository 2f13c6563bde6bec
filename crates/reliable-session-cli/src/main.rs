//! `rsm` binary entry point.
//!
//! Usage: rsm --service <name> <command>
//!
//! Inspects and edits the package queue of one service, and sends requests
//! through a reliable session (queued when the service is unreachable).

mod commands;

use anyhow::Context;
use clap::{Parser, Subcommand};
use reliable_session::{Method, SessionConfig};
use std::path::PathBuf;
use tracing::debug;

/// Reliable session manager command line.
#[derive(Parser, Debug)]
#[command(name = "rsm")]
#[command(about = "Inspect and replay queued HTTP requests of a reliable session")]
struct Args {
    /// Backend service whose packages to work on.
    #[arg(long, env = "RSM_SERVICE")]
    service: String,

    /// Package database (defaults to the platform data directory).
    #[arg(long, env = "RSM_DATABASE_PATH")]
    database: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "warn")]
    log_level: String,

    /// Log as JSON lines.
    #[arg(long)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the number of stored packages.
    Count,

    /// List stored packages, oldest first.
    List {
        /// Print one JSON object per package.
        #[arg(long)]
        json: bool,
    },

    /// List every service with packages in the database.
    Services,

    /// Remove a stored package without sending it.
    Discard {
        /// Package id as shown by `list`.
        id: i64,
    },

    /// Send a request, queueing it when the service is unreachable.
    Send {
        /// Base URL for relative paths; also the reachability probe target.
        #[arg(long, env = "RSM_BASE_URL")]
        base_url: String,

        /// HTTP method.
        #[arg(value_parser = parse_method)]
        method: Method,

        /// Path relative to the base URL, or an absolute URL.
        path: String,

        /// Request parameter as key=value (repeatable).
        #[arg(long = "param", value_parser = parse_param)]
        params: Vec<(String, String)>,

        /// Authorization header value.
        #[arg(long, env = "RSM_AUTHORIZATION")]
        authorization: Option<String>,
    },

    /// Replay stored packages if the service is reachable.
    Drain {
        /// Base URL of the service; the reachability probe target.
        #[arg(long, env = "RSM_BASE_URL")]
        base_url: String,
    },
}

fn parse_method(s: &str) -> Result<Method, String> {
    match s.to_ascii_uppercase().as_str() {
        "GET" => Ok(Method::Get),
        "HEAD" => Ok(Method::Head),
        "POST" => Ok(Method::Post),
        "PUT" => Ok(Method::Put),
        "PATCH" => Ok(Method::Patch),
        "DELETE" => Ok(Method::Delete),
        other => Err(format!("unsupported method '{other}'")),
    }
}

fn parse_param(s: &str) -> Result<(String, String), String> {
    let (key, value) = s
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{s}'"))?;
    if key.is_empty() {
        return Err(format!("empty key in '{s}'"));
    }
    Ok((key.to_string(), value.to_string()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    observability::init_with_config(observability::LogConfig {
        service_name: "rsm".into(),
        default_level: args.log_level.clone(),
        also_stderr: true,
        json: args.json_logs,
        ..Default::default()
    });

    let base_url = match &args.command {
        Command::Send { base_url, .. } | Command::Drain { base_url } => Some(base_url.as_str()),
        _ => None,
    };
    let mut config = SessionConfig::new(&args.service, base_url).context("invalid configuration")?;
    if let Some(database) = args.database {
        config.database_path = database;
    }
    debug!(
        service = %config.service,
        database = %config.database_path.display(),
        "Configuration loaded"
    );

    match args.command {
        Command::Count => commands::count(&config).await,
        Command::List { json } => commands::list(&config, json).await,
        Command::Services => commands::services(&config).await,
        Command::Discard { id } => commands::discard(&config, id).await,
        Command::Send {
            method,
            path,
            params,
            authorization,
            ..
        } => {
            if authorization.is_some() {
                config.authorization_header = authorization;
            }
            commands::send(config, method, &path, params).await
        }
        Command::Drain { .. } => commands::drain(config).await,
    }
}
