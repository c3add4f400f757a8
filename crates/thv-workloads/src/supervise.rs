//! The detached supervisor process: owns a workload's proxy after
//! `run` returns, and tears it down on signal or container exit.

use std::sync::Arc;
use std::time::Duration;

use thv_core::{Result, ThvError, WorkloadStatus};
use thv_groups::GroupManager;
use thv_runtime::{ContainerRuntime, ContainerState, WorkloadFilter, labels};
use thv_state::StateStore;
use tokio::signal::unix::{SignalKind, signal};

use crate::proxy_setup;

const CONTAINER_POLL_INTERVAL: Duration = Duration::from_secs(5);
const SHUTDOWN_DRAIN: Duration = Duration::from_secs(5);

/// Serve the proxy for `name` until a signal arrives or the container goes
/// away. On SIGINT/SIGTERM the listener closes immediately, then in-flight
/// requests drain for up to five seconds before the server is cut.
pub async fn run_supervisor(
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<StateStore>,
    groups: Arc<GroupManager>,
    name: &str,
) -> Result<()> {
    let config = store.load_run_config(name)?;
    let proxy = Arc::new(proxy_setup::build_proxy(&config).await?);
    let serve = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.start().await })
    };

    if let Err(e) = groups.upsert_workload(&config).await {
        tracing::warn!(workload = name, error = %e, "client config update failed");
    }
    store.save_status(name, WorkloadStatus::Running)?;

    let mut sigterm = signal(SignalKind::terminate()).map_err(ThvError::internal)?;
    let mut poll = tokio::time::interval(CONTAINER_POLL_INTERVAL);
    poll.tick().await; // first tick fires immediately

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::info!(workload = name, "SIGINT, shutting down proxy");
                break;
            }
            _ = sigterm.recv() => {
                tracing::info!(workload = name, "SIGTERM, shutting down proxy");
                break;
            }
            _ = poll.tick() => {
                if config.remote_url.is_none()
                    && !container_alive(runtime.as_ref(), name).await
                {
                    tracing::info!(workload = name, "container gone, shutting down proxy");
                    break;
                }
            }
        }
    }

    proxy.close_listener();
    if !proxy.stop(SHUTDOWN_DRAIN).await {
        tracing::warn!(workload = name, "drain deadline hit, cutting in-flight requests");
        serve.abort();
    }
    let _ = serve.await;
    store.save_status(name, WorkloadStatus::Stopped)?;
    Ok(())
}

async fn container_alive(runtime: &dyn ContainerRuntime, name: &str) -> bool {
    let filter = WorkloadFilter {
        label_selectors: vec![
            (labels::LABEL_MANAGED.to_string(), "true".to_string()),
            (labels::LABEL_NAME.to_string(), name.to_string()),
        ],
    };
    match runtime.list_workloads(&filter).await {
        Ok(containers) => containers
            .first()
            .is_some_and(|c| !matches!(c.state, ContainerState::Exited | ContainerState::Removing)),
        Err(e) => {
            tracing::warn!(workload = name, error = %e, "container poll failed");
            // Runtime hiccups do not tear the proxy down.
            true
        }
    }
}
