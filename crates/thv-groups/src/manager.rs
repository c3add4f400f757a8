use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use thv_core::{ResourceKind, Result, ThvError, validate_name};
use thv_runconfig::RunConfig;
use thv_state::{DEFAULT_GROUP, Group, StateStore};

use crate::client_config::{ClientConfigFile, ClientKind, default_client_path};

type ClientOp = Box<dyn FnOnce() -> Result<()> + Send>;

/// Groups as sets of workload names, plus the propagation of workload URLs
/// into the config files of each group's registered clients.
///
/// Cross-references are by name only; membership lives in each workload's
/// RunConfig and is discovered by scanning, never cached.
pub struct GroupManager {
    store: Arc<StateStore>,
    client_paths: HashMap<String, PathBuf>,
}

impl GroupManager {
    pub fn new(store: Arc<StateStore>) -> Self {
        let mut client_paths = HashMap::new();
        for kind in ClientKind::ALL {
            if let Some(path) = default_client_path(*kind) {
                client_paths.insert(kind.as_str().to_string(), path);
            }
        }
        Self {
            store,
            client_paths,
        }
    }

    /// Override a client's config path (tests, non-standard installs).
    pub fn with_client_path(mut self, client: impl Into<String>, path: PathBuf) -> Self {
        self.client_paths.insert(client.into(), path);
        self
    }

    pub fn create(&self, name: &str) -> Result<()> {
        validate_name(name)?;
        if name == DEFAULT_GROUP {
            return Err(ThvError::already_exists(ResourceKind::Group, name));
        }
        self.store.create_group(&Group::new(name))
    }

    /// The implicit default group always exists.
    pub fn exists(&self, name: &str) -> bool {
        name == DEFAULT_GROUP || self.store.group_exists(name)
    }

    pub fn list(&self) -> Result<Vec<String>> {
        let mut names = self.store.list_groups()?;
        if !names.iter().any(|n| n == DEFAULT_GROUP) {
            names.insert(0, DEFAULT_GROUP.to_string());
        }
        Ok(names)
    }

    /// Workload names whose RunConfig points at this group.
    pub fn members(&self, name: &str) -> Result<Vec<String>> {
        let mut members = Vec::new();
        for workload in self.store.list_names()? {
            let config = self.store.load_run_config(&workload)?;
            if config.group_or_default() == name {
                members.push(workload);
            }
        }
        Ok(members)
    }

    /// Delete a group. With members present the caller must have chosen:
    /// either the workloads were already cascade-deleted, or
    /// `move_members_to_default` rehomes them (and their client-config
    /// entries) first. A silent orphan is refused.
    pub async fn delete(&self, name: &str, move_members_to_default: bool) -> Result<Vec<String>> {
        if name == DEFAULT_GROUP {
            return Err(ThvError::invalid_config(
                "group",
                "the default group cannot be deleted",
            ));
        }
        if !self.store.group_exists(name) {
            return Err(ThvError::not_found(ResourceKind::Group, name));
        }

        let members = self.members(name)?;
        if !members.is_empty() {
            if !move_members_to_default {
                return Err(ThvError::invalid_config(
                    "group",
                    format!(
                        "group '{name}' still has {} workload(s); delete them or move them to '{DEFAULT_GROUP}'",
                        members.len()
                    ),
                ));
            }
            self.move_members_to_default(name, &members).await?;
        }

        self.store.delete_group(name)?;
        Ok(members)
    }

    async fn move_members_to_default(&self, from: &str, members: &[String]) -> Result<()> {
        let old_clients = self.registered_clients(from)?;
        let new_clients = self.registered_clients(DEFAULT_GROUP)?;

        let mut ops: Vec<(String, ClientOp)> = Vec::new();
        for member in members {
            let mut config = self.store.load_run_config(member)?;
            config.group = None;
            self.store.save_run_config(&config)?;

            for client in &new_clients {
                ops.push(self.upsert_op(client, &config)?);
            }
            for client in old_clients.iter().filter(|c| !new_clients.contains(c)) {
                ops.push(self.remove_op(client, &config.name)?);
            }
        }
        fan_out(ops).await
    }

    /// Register clients on each listed group, creating the (implicit)
    /// default record on first use.
    pub fn register_clients(&self, groups: &[String], clients: &[String]) -> Result<()> {
        for client in clients {
            if !self.client_paths.contains_key(client) {
                // Unknown clients are accepted only when a path override
                // exists; otherwise the entry would be unreconcilable.
                client.parse::<ClientKind>()?;
            }
        }
        for group_name in groups {
            let mut group = if self.store.group_exists(group_name) {
                self.store.load_group(group_name)?
            } else if group_name == DEFAULT_GROUP {
                Group::new(DEFAULT_GROUP)
            } else {
                return Err(ThvError::not_found(ResourceKind::Group, group_name));
            };
            for client in clients {
                if !group.registered_clients.contains(client) {
                    group.registered_clients.push(client.clone());
                }
            }
            self.store.save_group(&group)?;
        }
        Ok(())
    }

    pub fn registered_clients(&self, group: &str) -> Result<Vec<String>> {
        if !self.store.group_exists(group) {
            return Ok(Vec::new());
        }
        Ok(self.store.load_group(group)?.registered_clients)
    }

    pub fn get_workload_group(&self, workload: &str) -> Result<String> {
        let config = self.store.load_run_config(workload)?;
        Ok(config.group_or_default().to_string())
    }

    /// Propagate a workload's URL into every registered client of its group.
    pub async fn upsert_workload(&self, config: &RunConfig) -> Result<()> {
        let clients = self.registered_clients(config.group_or_default())?;
        let mut ops: Vec<(String, ClientOp)> = Vec::new();
        for client in &clients {
            ops.push(self.upsert_op(client, config)?);
        }
        fan_out(ops).await
    }

    /// Drop a workload's entry from every registered client of its group.
    pub async fn remove_workload(&self, group: &str, workload: &str) -> Result<()> {
        let clients = self.registered_clients(group)?;
        let mut ops: Vec<(String, ClientOp)> = Vec::new();
        for client in &clients {
            ops.push(self.remove_op(client, workload)?);
        }
        fan_out(ops).await
    }

    fn client_file(&self, client: &str) -> Result<ClientConfigFile> {
        let path = self.client_paths.get(client).ok_or_else(|| {
            ThvError::not_found(ResourceKind::Client, client)
        })?;
        Ok(ClientConfigFile::at(path.clone()))
    }

    fn upsert_op(&self, client: &str, config: &RunConfig) -> Result<(String, ClientOp)> {
        let file = self.client_file(client)?;
        let label = file.path().display().to_string();
        let name = config.name.clone();
        let url = config.url();
        let transport = facing_transport(config);
        Ok((
            label,
            Box::new(move || file.upsert_server(&name, &url, &transport)),
        ))
    }

    fn remove_op(&self, client: &str, workload: &str) -> Result<(String, ClientOp)> {
        let file = self.client_file(client)?;
        let label = file.path().display().to_string();
        let name = workload.to_string();
        Ok((label, Box::new(move || file.remove_server(&name))))
    }
}

/// The transport type advertised to clients: the proxy's outward flavor.
fn facing_transport(config: &RunConfig) -> String {
    match (config.transport, config.proxy_mode) {
        (thv_core::TransportType::Stdio, Some(mode)) => mode.as_str().to_string(),
        (transport, _) => transport.as_str().to_string(),
    }
}

/// Run per-file ops in parallel; different files proceed concurrently while
/// same-file ops serialize on the path lock. Never fails fast.
async fn fan_out(ops: Vec<(String, ClientOp)>) -> Result<()> {
    let mut join_set = tokio::task::JoinSet::new();
    for (label, op) in ops {
        join_set.spawn_blocking(move || (label, op()));
    }

    let mut failures = Vec::new();
    while let Some(joined) = join_set.join_next().await {
        match joined {
            Ok((_, Ok(()))) => {}
            Ok((label, Err(e))) => failures.push((label, e.to_string())),
            Err(e) => failures.push(("<worker>".to_string(), e.to_string())),
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(ThvError::PartialFailure { failures })
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
