use std::collections::HashSet;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thv_core::{ResourceKind, Result, ThvError, WorkloadStatus};
use thv_runconfig::RunConfig;

use crate::group::Group;

/// Last-known status snapshot, kept only for crash recovery; the runtime is
/// authoritative whenever it knows the workload.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusRecord {
    status: WorkloadStatus,
    updated_at: DateTime<Utc>,
}

/// Filesystem-backed store keyed by workload / group name.
///
/// Layout under the base directory:
/// `runconfigs/<name>.json`, `groups/<name>.json`, `statuses/<name>.json`,
/// `logs/<name>.log`.
#[derive(Debug, Clone)]
pub struct StateStore {
    base: PathBuf,
}

impl StateStore {
    /// Open (and create) a store rooted at `base`.
    pub fn open(base: impl Into<PathBuf>) -> Result<Self> {
        let base = base.into();
        for dir in [
            thv_config::paths::runconfigs_dir(&base),
            thv_config::paths::groups_dir(&base),
            thv_config::paths::statuses_dir(&base),
            thv_config::paths::logs_dir(&base),
        ] {
            std::fs::create_dir_all(&dir).map_err(ThvError::internal)?;
        }
        Ok(Self { base })
    }

    /// Open the store at the XDG state directory.
    pub fn open_default() -> Result<Self> {
        let base = thv_config::paths::state_dir()
            .ok_or_else(|| ThvError::Internal("cannot determine a state directory".into()))?;
        Self::open(base)
    }

    pub fn base_dir(&self) -> &Path {
        &self.base
    }

    fn runconfig_path(&self, name: &str) -> PathBuf {
        thv_config::paths::runconfigs_dir(&self.base).join(format!("{name}.json"))
    }

    fn group_path(&self, name: &str) -> PathBuf {
        thv_config::paths::groups_dir(&self.base).join(format!("{name}.json"))
    }

    fn status_path(&self, name: &str) -> PathBuf {
        thv_config::paths::statuses_dir(&self.base).join(format!("{name}.json"))
    }

    /// `<state-dir>/logs/<name>.log`, where the detached supervisor writes.
    pub fn proxy_log_path(&self, name: &str) -> PathBuf {
        thv_config::paths::logs_dir(&self.base).join(format!("{name}.log"))
    }

    // --- RunConfigs ---

    /// Create-flavor save: a name collision is a hard failure.
    pub fn create_run_config(&self, config: &RunConfig) -> Result<()> {
        let path = self.runconfig_path(&config.name);
        let _guard =
            thv_lock::lock_path(&path, "runconfig create").map_err(ThvError::internal)?;
        if path.exists() {
            return Err(ThvError::already_exists(ResourceKind::Workload, &config.name));
        }
        self.write_run_config_locked(&path, config)
    }

    /// Upsert-flavor save used by edit paths and group moves.
    pub fn save_run_config(&self, config: &RunConfig) -> Result<()> {
        let path = self.runconfig_path(&config.name);
        let _guard = thv_lock::lock_path(&path, "runconfig save").map_err(ThvError::internal)?;
        self.write_run_config_locked(&path, config)
    }

    fn write_run_config_locked(&self, path: &Path, config: &RunConfig) -> Result<()> {
        config.validate()?;
        let json = config.to_json()?;
        thv_lock::atomic_write(path, json.as_bytes()).map_err(ThvError::internal)
    }

    pub fn load_run_config(&self, name: &str) -> Result<RunConfig> {
        let path = self.runconfig_path(name);
        if !path.exists() {
            return Err(ThvError::not_found(ResourceKind::Workload, name));
        }
        let content = std::fs::read_to_string(&path).map_err(ThvError::internal)?;
        RunConfig::from_json(&content).map_err(|e| ThvError::StateCorrupt {
            path,
            reason: e.to_string(),
        })
    }

    /// Idempotent delete; also clears the status cache entry.
    pub fn delete_run_config(&self, name: &str) -> Result<()> {
        let path = self.runconfig_path(name);
        let _guard =
            thv_lock::lock_path(&path, "runconfig delete").map_err(ThvError::internal)?;
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ThvError::internal(e)),
        }
        let _ = std::fs::remove_file(self.status_path(name));
        let _ = std::fs::remove_file(thv_lock::lock_path_for(&path));
        Ok(())
    }

    pub fn list_names(&self) -> Result<Vec<String>> {
        self.list_json_stems(&thv_config::paths::runconfigs_dir(&self.base))
    }

    // --- Groups ---

    pub fn create_group(&self, group: &Group) -> Result<()> {
        let path = self.group_path(&group.name);
        let _guard = thv_lock::lock_path(&path, "group create").map_err(ThvError::internal)?;
        if path.exists() {
            return Err(ThvError::already_exists(ResourceKind::Group, &group.name));
        }
        self.write_group_locked(&path, group)
    }

    pub fn save_group(&self, group: &Group) -> Result<()> {
        let path = self.group_path(&group.name);
        let _guard = thv_lock::lock_path(&path, "group save").map_err(ThvError::internal)?;
        self.write_group_locked(&path, group)
    }

    fn write_group_locked(&self, path: &Path, group: &Group) -> Result<()> {
        let json = serde_json::to_string_pretty(group).map_err(ThvError::internal)?;
        thv_lock::atomic_write(path, json.as_bytes()).map_err(ThvError::internal)
    }

    pub fn load_group(&self, name: &str) -> Result<Group> {
        let path = self.group_path(name);
        if !path.exists() {
            return Err(ThvError::not_found(ResourceKind::Group, name));
        }
        let content = std::fs::read_to_string(&path).map_err(ThvError::internal)?;
        serde_json::from_str(&content).map_err(|e| ThvError::StateCorrupt {
            path,
            reason: e.to_string(),
        })
    }

    pub fn delete_group(&self, name: &str) -> Result<()> {
        let path = self.group_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(ThvError::internal(e)),
        }
        let _ = std::fs::remove_file(thv_lock::lock_path_for(&path));
        Ok(())
    }

    pub fn group_exists(&self, name: &str) -> bool {
        self.group_path(name).exists()
    }

    pub fn list_groups(&self) -> Result<Vec<String>> {
        self.list_json_stems(&thv_config::paths::groups_dir(&self.base))
    }

    // --- Status cache ---

    pub fn save_status(&self, name: &str, status: WorkloadStatus) -> Result<()> {
        let record = StatusRecord {
            status,
            updated_at: Utc::now(),
        };
        let json = serde_json::to_string(&record).map_err(ThvError::internal)?;
        thv_lock::atomic_write(&self.status_path(name), json.as_bytes())
            .map_err(ThvError::internal)
    }

    /// Last-known status; `None` when never recorded or unreadable.
    pub fn load_status(&self, name: &str) -> Option<WorkloadStatus> {
        let content = std::fs::read_to_string(self.status_path(name)).ok()?;
        serde_json::from_str::<StatusRecord>(&content)
            .ok()
            .map(|record| record.status)
    }

    // --- Logs ---

    /// Delete proxy logs whose workload no longer exists. Returns the pruned
    /// paths.
    pub fn prune_logs(&self, live_names: &HashSet<String>) -> Result<Vec<PathBuf>> {
        let logs_dir = thv_config::paths::logs_dir(&self.base);
        let mut pruned = Vec::new();
        for entry in std::fs::read_dir(&logs_dir).map_err(ThvError::internal)? {
            let entry = entry.map_err(ThvError::internal)?;
            let path = entry.path();
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.extension().and_then(|e| e.to_str()) == Some("log")
                && !live_names.contains(stem)
            {
                std::fs::remove_file(&path).map_err(ThvError::internal)?;
                pruned.push(path);
            }
        }
        Ok(pruned)
    }

    fn list_json_stems(&self, dir: &Path) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for entry in std::fs::read_dir(dir).map_err(ThvError::internal)? {
            let entry = entry.map_err(ThvError::internal)?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json")
                && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
            {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
