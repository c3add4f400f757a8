//! `thv stop|rm|restart` and `thv list`.

use thv_core::{Result, ThvError};
use tokio_util::sync::CancellationToken;

use crate::context::AppContext;

pub async fn handle_stop(ctx: &AppContext, name: &str) -> Result<()> {
    ctx.manager.stop_workloads(&[name.to_string()]).wait().await?;
    println!("{name} stopped");
    Ok(())
}

pub async fn handle_rm(ctx: &AppContext, name: &str) -> Result<()> {
    ctx.manager
        .delete_workloads(&[name.to_string()])
        .wait()
        .await?;
    println!("{name} removed");
    Ok(())
}

pub async fn handle_restart(ctx: &AppContext, name: &str) -> Result<()> {
    ctx.manager
        .restart_workload(CancellationToken::new(), name)
        .await?;
    println!("{name} restarted");
    Ok(())
}

pub async fn handle_list(ctx: &AppContext, all: bool, raw_labels: &[String]) -> Result<Vec<thv_core::Workload>> {
    let mut filters = Vec::with_capacity(raw_labels.len());
    for raw in raw_labels {
        let (key, value) = raw.split_once('=').ok_or_else(|| {
            ThvError::invalid_config("labels", format!("'{raw}' must be key=value"))
        })?;
        filters.push((key.to_string(), value.to_string()));
    }
    ctx.manager.list_workloads(all, &filters).await
}
