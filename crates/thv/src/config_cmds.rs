//! `thv config {get|set|unset|list}` and `thv export`.

use thv_core::{Result, ThvError};

use crate::context::{AppContext, CONFIG};

pub fn handle_config_get(key: &str) -> Result<()> {
    let config = CONFIG.get().map_err(ThvError::internal)?;
    match config.get_key(key) {
        Some(value) => println!("{value}"),
        None => println!("(unset)"),
    }
    Ok(())
}

pub fn handle_config_set(key: &str, value: &str) -> Result<()> {
    CONFIG
        .update(|config| config.set_key(key, value))
        .map_err(|e| ThvError::invalid_config(key, e.to_string()))?;
    println!("{key} = {value}");
    Ok(())
}

pub fn handle_config_unset(key: &str) -> Result<()> {
    CONFIG
        .update(|config| config.unset_key(key))
        .map_err(|e| ThvError::invalid_config(key, e.to_string()))?;
    println!("{key} unset");
    Ok(())
}

pub fn handle_config_list() -> Result<()> {
    let config = CONFIG.get().map_err(ThvError::internal)?;
    let entries = config.list_keys();
    if entries.is_empty() {
        println!("No settings configured");
    }
    for (key, value) in entries {
        println!("{key} = {value}");
    }
    Ok(())
}

pub fn handle_export(ctx: &AppContext, name: &str, path: &str) -> Result<()> {
    let config = ctx.store.load_run_config(name)?;
    config.write_to(std::path::Path::new(path))?;
    println!("{name} exported to {path}");
    Ok(())
}
