//! Subcommand implementations.

use anyhow::{bail, Context};
use package_store::{Package, PackageId, PackageStore};
use reliable_session::encoding::to_parameters;
use reliable_session::{
    DrainReport, Method, ProbeConfig, ProbeReachability, ReliableSessionManager, ReqwestTransport,
    RequestDescriptor, SessionConfig, SessionError,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

async fn open_store(config: &SessionConfig) -> anyhow::Result<PackageStore> {
    PackageStore::open(&config.database_path, &config.service)
        .await
        .with_context(|| format!("opening {}", config.database_path.display()))
}

pub async fn count(config: &SessionConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    println!("{}", store.count().await?);
    Ok(())
}

pub async fn list(config: &SessionConfig, json: bool) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let mut lines = Vec::new();
    let mut encode_error = None;

    store
        .enumerate(|package: Package<RequestDescriptor>| {
            if json {
                match serde_json::to_string(&package) {
                    Ok(line) => lines.push(line),
                    Err(e) => {
                        encode_error = Some(e);
                        return ControlFlow::Break(());
                    }
                }
            } else {
                lines.push(summary(&package));
            }
            ControlFlow::Continue(())
        })
        .await?;

    if let Some(e) = encode_error {
        return Err(e.into());
    }
    for line in lines {
        println!("{line}");
    }
    Ok(())
}

fn summary(package: &Package<RequestDescriptor>) -> String {
    format!(
        "{:>6}  {}  {:<6} {}  (replays: {})",
        package.id.as_i64(),
        package.created_at.format("%Y-%m-%d %H:%M:%S"),
        package.request.method().as_str(),
        package.request.url(),
        package.replay_attempts,
    )
}

pub async fn services(config: &SessionConfig) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    for service in store.services().await? {
        println!("{service}");
    }
    Ok(())
}

pub async fn discard(config: &SessionConfig, id: i64) -> anyhow::Result<()> {
    let store = open_store(config).await?;
    let id = PackageId(id);
    if !store.contains(id).await? {
        bail!("no package {id} for service {}", config.service);
    }
    store.remove(id).await?;
    info!(service = %config.service, package_id = %id, "Package discarded");
    println!("discarded {id}");
    Ok(())
}

/// Parameters from `key=value` pairs; a repeated key keeps its last value.
pub fn parameters(params: Vec<(String, String)>) -> anyhow::Result<Option<Value>> {
    if params.is_empty() {
        return Ok(None);
    }
    let map: BTreeMap<String, String> = params.into_iter().collect();
    Ok(Some(to_parameters(&map)?))
}

async fn open_session(config: SessionConfig) -> anyhow::Result<ReliableSessionManager> {
    let base_url = config
        .base_url
        .clone()
        .context("a base URL is required")?;
    let probe = ProbeConfig {
        interval: config.probe_interval,
        timeout: config.probe_timeout,
    };
    let reachability = ProbeReachability::for_url(&base_url, probe)
        .await
        .with_context(|| format!("cannot probe {base_url}: no host or port"))?;
    let transport = ReqwestTransport::new(config.request_timeout)?;

    Ok(ReliableSessionManager::open(config, Arc::new(transport), Arc::new(reachability)).await?)
}

/// Wait for the start-up drain a reachable session runs, then drain once more.
///
/// `None` when the service is unreachable.
async fn settle(session: &ReliableSessionManager) -> anyhow::Result<Option<DrainReport>> {
    if !session.reachability().status().is_reachable() {
        return Ok(None);
    }
    loop {
        if let Some(report) = session.drain_now().await? {
            return Ok(Some(report));
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

pub async fn send(
    config: SessionConfig,
    method: Method,
    path: &str,
    params: Vec<(String, String)>,
) -> anyhow::Result<()> {
    let session = open_session(config).await?;
    // Stored packages go out before this request, and the process does not
    // exit mid-replay.
    settle(&session).await?;
    let parameters = parameters(params)?;
    let request = match method {
        Method::Get => session.get(path, parameters.as_ref()),
        Method::Head => session.head(path, parameters.as_ref()),
        Method::Post => session.post(path, parameters.as_ref()),
        Method::Put => session.put(path, parameters.as_ref()),
        Method::Patch => session.patch(path, parameters.as_ref()),
        Method::Delete => session.delete(path, parameters.as_ref()),
    }?;

    match session.send(&request).await {
        Ok(response) => {
            println!("{}", response.status);
            if !response.body.is_empty() {
                println!("{}", response.text());
            }
            Ok(())
        }
        Err(e @ (SessionError::Queued { .. } | SessionError::Transport { .. })) => {
            println!("{e}");
            Ok(())
        }
        Err(SessionError::UnacceptableStatus { status, response }) => {
            bail!("rejected with status {status}: {}", response.text())
        }
        Err(e) => Err(e.into()),
    }
}

pub async fn drain(config: SessionConfig) -> anyhow::Result<()> {
    let session = open_session(config).await?;
    let Some(report) = settle(&session).await? else {
        println!("service unreachable, {} pending", session.pending_package_count().await?);
        return Ok(());
    };
    if let Some(halt) = report.halted {
        println!("drain stopped: {halt:?}");
    }
    println!("{} pending", session.pending_package_count().await?);
    Ok(())
}
