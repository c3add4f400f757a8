//! `thv secret {setup|set|get|delete|list|provider|reset-keyring}`.

use std::io::BufRead;

use thv_core::{Result, ThvError};
use thv_secrets::FileProvider;

use crate::context::AppContext;

fn file_provider(ctx: &AppContext) -> FileProvider {
    FileProvider::new(thv_config::paths::secrets_path(ctx.store.base_dir()))
}

pub fn handle_secret_setup(ctx: &AppContext) -> Result<()> {
    let provider = file_provider(ctx);
    if provider.path().exists() {
        println!("secret store already initialized at {}", provider.path().display());
        return Ok(());
    }
    provider.reset()?;
    println!("secret store initialized at {}", provider.path().display());
    Ok(())
}

pub async fn handle_secret_set(ctx: &AppContext, name: &str, value: Option<String>) -> Result<()> {
    let value = match value {
        Some(value) => value,
        None => {
            // Read a single line from stdin so values stay out of argv.
            let mut line = String::new();
            std::io::stdin()
                .lock()
                .read_line(&mut line)
                .map_err(ThvError::internal)?;
            line.trim_end_matches('\n').to_string()
        }
    };
    ctx.secrets.set(name, &value).await?;
    println!("secret {name} stored");
    Ok(())
}

pub async fn handle_secret_get(ctx: &AppContext, name: &str) -> Result<()> {
    println!("{}", ctx.secrets.get(name).await?);
    Ok(())
}

pub async fn handle_secret_delete(ctx: &AppContext, name: &str) -> Result<()> {
    ctx.secrets.delete(name).await?;
    println!("secret {name} deleted");
    Ok(())
}

pub async fn handle_secret_list(ctx: &AppContext) -> Result<()> {
    for name in ctx.secrets.list().await? {
        println!("{name}");
    }
    Ok(())
}

pub fn handle_secret_provider(ctx: &AppContext) -> Result<()> {
    let caps = ctx.secrets.capabilities();
    let provider = ctx
        .config
        .secrets_provider
        .as_deref()
        .unwrap_or("file");
    println!(
        "provider: {provider} (read={}, write={}, delete={}, list={})",
        caps.can_read, caps.can_write, caps.can_delete, caps.can_list
    );
    Ok(())
}

pub fn handle_secret_reset(ctx: &AppContext) -> Result<()> {
    let provider = file_provider(ctx);
    provider.reset()?;
    println!("secret store reset at {}", provider.path().display());
    Ok(())
}
