//! `thv group {create|list|rm|run}`.

use thv_core::Result;

use crate::context::AppContext;

pub fn handle_group_create(ctx: &AppContext, name: &str) -> Result<()> {
    ctx.groups.create(name)?;
    println!("group {name} created");
    Ok(())
}

pub fn handle_group_list(ctx: &AppContext) -> Result<()> {
    for name in ctx.groups.list()? {
        let members = ctx.groups.members(&name)?;
        println!("{name} ({} workload(s))", members.len());
    }
    Ok(())
}

/// `rm --with-workloads` cascades; otherwise members move to `default` and
/// their client-config entries follow.
pub async fn handle_group_rm(ctx: &AppContext, name: &str, with_workloads: bool) -> Result<()> {
    if with_workloads {
        let members = ctx.groups.members(name)?;
        if !members.is_empty() {
            ctx.manager.delete_workloads(&members).wait().await?;
        }
        ctx.groups.delete(name, false).await?;
        println!("group {name} and {} workload(s) removed", members.len());
    } else {
        let moved = ctx.groups.delete(name, true).await?;
        println!("group {name} removed, {} workload(s) moved to default", moved.len());
    }
    Ok(())
}

pub fn handle_group_run(ctx: &AppContext, name: &str) -> Result<()> {
    for member in ctx.groups.members(name)? {
        println!("{member}");
    }
    Ok(())
}
