//! `thv logs`: container or proxy logs, optional follow, prune.

use std::time::Duration;

use thv_core::{Result, ThvError};

use crate::context::AppContext;

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub async fn handle_logs(
    ctx: &AppContext,
    name: &str,
    follow: bool,
    proxy: bool,
    tail: Option<u64>,
) -> Result<()> {
    if proxy {
        let logs = ctx
            .manager
            .get_proxy_logs(name, tail.map(|t| t as usize))?;
        println!("{logs}");
        return Ok(());
    }

    let mut printed = print_new(ctx, name, tail, 0).await?;
    if !follow {
        return Ok(());
    }
    loop {
        tokio::time::sleep(FOLLOW_POLL_INTERVAL).await;
        match print_new(ctx, name, None, printed).await {
            Ok(len) => printed = len,
            // The workload went away while following.
            Err(ThvError::NotFound { .. }) => return Ok(()),
            Err(e) => return Err(e),
        }
    }
}

/// Print anything past `seen` bytes and return the new high-water mark.
async fn print_new(
    ctx: &AppContext,
    name: &str,
    tail: Option<u64>,
    seen: usize,
) -> Result<usize> {
    let logs = ctx.manager.get_logs(name, tail).await?;
    if logs.len() > seen {
        print!("{}", &logs[seen..]);
    }
    Ok(logs.len().max(seen))
}

pub fn handle_logs_prune(ctx: &AppContext) -> Result<()> {
    let pruned = ctx.manager.prune_logs()?;
    if pruned.is_empty() {
        println!("Nothing to prune");
    } else {
        for path in &pruned {
            println!("removed {}", path.display());
        }
    }
    Ok(())
}
