//! XDG path resolution for config and persisted state.
//!
//! `directories` honors `XDG_CONFIG_HOME` / `XDG_STATE_HOME` / `XDG_DATA_HOME`
//! on Linux, so tests can redirect the whole tree through the environment.

use std::path::PathBuf;

/// Canonical XDG app name.
pub const APP_NAME: &str = "toolhive";

fn project_dirs() -> Option<directories::ProjectDirs> {
    directories::ProjectDirs::from("", "", APP_NAME)
}

/// Config directory (`~/.config/toolhive` on Linux).
pub fn config_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| dirs.config_dir().to_path_buf())
}

/// State directory (`~/.local/state/toolhive` on Linux, data dir elsewhere).
pub fn state_dir() -> Option<PathBuf> {
    project_dirs().map(|dirs| {
        dirs.state_dir()
            .unwrap_or_else(|| dirs.data_local_dir())
            .to_path_buf()
    })
}

/// Path of the global config file.
pub fn global_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// `<state-dir>/runconfigs`: persisted RunConfig JSON documents.
pub fn runconfigs_dir(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("runconfigs")
}

/// `<state-dir>/groups`: group records.
pub fn groups_dir(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("groups")
}

/// `<state-dir>/statuses`: last-known workload status cache.
pub fn statuses_dir(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("statuses")
}

/// `<state-dir>/logs`: proxy logs.
pub fn logs_dir(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("logs")
}

/// `<state-dir>/secrets.json`: keyring-file secrets backend.
pub fn secrets_path(state_dir: &std::path::Path) -> PathBuf {
    state_dir.join("secrets.json")
}
