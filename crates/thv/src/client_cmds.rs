//! `thv client {status|setup|register|remove|list-registered}`.

use thv_core::{Result, ThvError};
use thv_groups::{ClientConfigFile, ClientKind, default_client_path};

use crate::context::AppContext;

pub fn handle_client_status() -> Result<()> {
    for kind in ClientKind::ALL {
        match default_client_path(*kind) {
            Some(path) if path.exists() => {
                println!("{kind}: {} (present)", path.display());
            }
            Some(path) => println!("{kind}: {} (missing)", path.display()),
            None => println!("{kind}: no config path"),
        }
    }
    Ok(())
}

/// Register every client whose config file already exists on this machine.
pub fn handle_client_setup(ctx: &AppContext) -> Result<()> {
    let detected: Vec<String> = ClientKind::ALL
        .iter()
        .filter(|kind| default_client_path(**kind).is_some_and(|p| p.exists()))
        .map(|kind| kind.as_str().to_string())
        .collect();
    if detected.is_empty() {
        println!("No MCP clients detected");
        return Ok(());
    }
    ctx.groups
        .register_clients(&["default".to_string()], &detected)?;
    println!("registered: {}", detected.join(", "));
    Ok(())
}

pub fn handle_client_register(
    ctx: &AppContext,
    clients: &[String],
    groups: &[String],
) -> Result<()> {
    ctx.groups.register_clients(groups, clients)?;
    println!(
        "registered {} client(s) on {} group(s)",
        clients.len(),
        groups.len()
    );
    Ok(())
}

pub fn handle_client_remove(client: &str, workload: &str) -> Result<()> {
    let kind: ClientKind = client.parse()?;
    let path = default_client_path(kind).ok_or_else(|| {
        ThvError::not_found(thv_core::ResourceKind::Client, client)
    })?;
    ClientConfigFile::at(path).remove_server(workload)?;
    println!("removed {workload} from {client}");
    Ok(())
}

pub fn handle_client_list_registered(ctx: &AppContext) -> Result<()> {
    for group in ctx.groups.list()? {
        let clients = ctx.groups.registered_clients(&group)?;
        if clients.is_empty() {
            println!("{group}: (none)");
        } else {
            println!("{group}: {}", clients.join(", "));
        }
    }
    Ok(())
}
