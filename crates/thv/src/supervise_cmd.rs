//! Hidden `thv supervise <name>`: the detached proxy owner re-exec'd by
//! `thv run`. Logs go to `<state-dir>/logs/<name>.log`.

use thv_core::{Result, ThvError};
use tracing_subscriber::EnvFilter;

use crate::context::AppContext;

pub async fn handle_supervise(name: &str) -> Result<()> {
    let ctx = AppContext::init()?;

    let log_path = ctx.store.proxy_log_path(name);
    let log_dir = log_path.parent().expect("log path has a parent");
    let file_name = log_path.file_name().expect("log path has a file name");
    let appender = tracing_appender::rolling::never(log_dir, file_name);
    let (writer, _guard) = tracing_appender::non_blocking(appender);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_ansi(false)
        .with_env_filter(filter)
        .try_init()
        .map_err(ThvError::internal)?;

    tracing::info!(workload = name, "supervisor starting");
    let result = thv_workloads::run_supervisor(
        ctx.runtime.clone(),
        ctx.store.clone(),
        ctx.groups.clone(),
        name,
    )
    .await;
    match &result {
        Ok(()) => tracing::info!(workload = name, "supervisor exiting"),
        Err(e) => tracing::error!(workload = name, error = %e, "supervisor failed"),
    }
    result
}
