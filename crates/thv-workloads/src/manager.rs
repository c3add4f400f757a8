use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use thv_core::{
    ResourceKind, Result, ThvError, Workload, WorkloadStatus, workload_url,
};
use thv_groups::GroupManager;
use thv_proxy::TransparentProxy;
use thv_runconfig::RunConfig;
use thv_runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, Mount, RuntimeError,
    WorkloadFilter, labels,
};
use thv_secrets::SecretsProvider;
use thv_state::StateStore;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::name_mutex::NameMutexMap;
use crate::proxy_setup;
use crate::wait_group::{WaitGroup, worker_limit};

/// Grace period handed to the runtime when stopping containers.
pub const STOP_GRACE: Duration = Duration::from_secs(10);

const PROXY_DRAIN: Duration = Duration::from_secs(5);
const PORT_WAIT_DEADLINE: Duration = Duration::from_secs(30);
const PORT_POLL_INTERVAL: Duration = Duration::from_millis(250);
const EXIT_POLL_INTERVAL: Duration = Duration::from_millis(500);

type SupervisorSpawner = Box<dyn Fn(&RunConfig) -> Result<u32> + Send + Sync>;

struct ActiveProxy {
    proxy: Arc<TransparentProxy>,
    task: tokio::task::JoinHandle<Result<()>>,
}

/// Orchestrates workload lifecycle across the runtime driver, state store,
/// proxy and client configs. Safe for concurrent callers; per-name
/// operations serialize on a lazy mutex map.
pub struct WorkloadManager {
    runtime: Arc<dyn ContainerRuntime>,
    store: Arc<StateStore>,
    groups: Arc<GroupManager>,
    secrets: Arc<dyn SecretsProvider>,
    locks: NameMutexMap,
    proxies: StdMutex<HashMap<String, ActiveProxy>>,
    supervisor_spawner: SupervisorSpawner,
}

impl WorkloadManager {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        store: Arc<StateStore>,
        groups: Arc<GroupManager>,
        secrets: Arc<dyn SecretsProvider>,
    ) -> Arc<Self> {
        Arc::new(Self {
            runtime,
            store,
            groups,
            secrets,
            locks: NameMutexMap::default(),
            proxies: StdMutex::new(HashMap::new()),
            supervisor_spawner: Box::new(spawn_supervisor_process),
        })
    }

    /// Replace the detached-supervisor spawner (tests).
    pub fn with_supervisor_spawner(
        mut self: Arc<Self>,
        spawner: impl Fn(&RunConfig) -> Result<u32> + Send + Sync + 'static,
    ) -> Arc<Self> {
        Arc::get_mut(&mut self)
            .expect("spawner must be replaced before the manager is shared")
            .supervisor_spawner = Box::new(spawner);
        self
    }

    pub fn store(&self) -> &Arc<StateStore> {
        &self.store
    }

    pub fn groups(&self) -> &Arc<GroupManager> {
        &self.groups
    }

    /// Foreground run: container, proxy and client configs come up, then
    /// this blocks until the container exits (or `ctx` cancels) and returns
    /// the container's exit code.
    pub async fn run_workload(
        self: &Arc<Self>,
        ctx: CancellationToken,
        config: RunConfig,
    ) -> Result<i32> {
        let (config, container_id) = {
            let _guard = self.locks.lock(&config.name).await;
            let (config, container_id) = self.create_and_start(&ctx, config, true).await?;

            let proxy = Arc::new(match proxy_setup::build_proxy(&config).await {
                Ok(proxy) => proxy,
                Err(e) => {
                    self.rollback_container(container_id.as_deref()).await;
                    self.store.delete_run_config(&config.name)?;
                    return Err(e);
                }
            });
            self.spawn_proxy(&config.name, proxy);

            if let Err(e) = self.groups.upsert_workload(&config).await {
                tracing::warn!(workload = %config.name, error = %e, "client config update failed");
            }
            self.store.save_status(&config.name, WorkloadStatus::Running)?;
            (config, container_id)
        };
        // The name lock is released while we block, so stop/rm for this name
        // can proceed and end the wait.

        let exit_code = match &container_id {
            Some(id) => self.wait_for_exit(&ctx, id).await,
            // Remote workloads have no container; run until cancelled.
            None => {
                ctx.cancelled().await;
                0
            }
        };

        let _guard = self.locks.lock(&config.name).await;
        self.stop_proxy(&config.name).await;
        self.store.save_status(&config.name, WorkloadStatus::Stopped)?;
        Ok(exit_code)
    }

    /// Start the container, then hand the proxy to a detached supervisor
    /// process and return its pid immediately.
    pub async fn run_workload_detached(
        self: &Arc<Self>,
        ctx: CancellationToken,
        config: RunConfig,
    ) -> Result<u32> {
        let _guard = self.locks.lock(&config.name).await;
        let (config, _container_id) = self.create_and_start(&ctx, config, true).await?;
        let pid = (self.supervisor_spawner)(&config)?;
        tracing::info!(workload = %config.name, pid, "detached supervisor started");
        Ok(pid)
    }

    /// Stop-then-start with the persisted config. When stop succeeds but
    /// start fails, the workload remains stopped.
    pub async fn restart_workload(self: &Arc<Self>, ctx: CancellationToken, name: &str) -> Result<()> {
        let config = self.store.load_run_config(name)?;
        let _guard = self.locks.lock(name).await;

        if let Some(container) = self.find_container(name).await? {
            self.runtime
                .stop_container(&container.id, STOP_GRACE)
                .await
                .map_err(ThvError::from)?;
            self.remove_quiet(&container.id).await;
        }
        self.stop_proxy(name).await;
        self.store.save_status(name, WorkloadStatus::Stopped)?;

        let (config, _container_id) = self.create_and_start(&ctx, config, false).await?;
        (self.supervisor_spawner)(&config)?;
        Ok(())
    }

    /// Merge state-store names with the runtime's view. Runtime status wins
    /// when both know a name; the store supplies declarative fields.
    pub async fn list_workloads(
        &self,
        include_stopped: bool,
        label_filters: &[(String, String)],
    ) -> Result<Vec<Workload>> {
        let filter = WorkloadFilter {
            label_selectors: vec![(labels::LABEL_MANAGED.to_string(), "true".to_string())],
        };
        let containers = self.runtime.list_workloads(&filter).await.map_err(ThvError::from)?;
        let mut by_name: HashMap<String, ContainerInfo> = containers
            .into_iter()
            .filter_map(|container| {
                let name = labels::workload_name(&container.labels)?.to_string();
                Some((name, container))
            })
            .collect();

        let mut workloads = Vec::new();
        for name in self.store.list_names()? {
            let config = match self.store.load_run_config(&name) {
                Ok(config) => config,
                Err(e) => {
                    tracing::warn!(workload = %name, error = %e, "skipping unreadable run config");
                    continue;
                }
            };
            let container = by_name.remove(&name);
            let status = match &container {
                Some(c) => c.state.to_workload_status(),
                None => self
                    .store
                    .load_status(&name)
                    .unwrap_or(WorkloadStatus::Stopped),
            };
            workloads.push(workload_from(&config, container.as_ref(), status));
        }
        // Containers with our labels but no recorded config: surface them,
        // never auto-delete.
        for (name, container) in by_name {
            tracing::warn!(workload = %name, container = %container.id, "unrecorded managed container");
            workloads.push(workload_from_container(&name, &container));
        }

        workloads.retain(|w| {
            (include_stopped
                || matches!(w.status, WorkloadStatus::Running | WorkloadStatus::Starting))
                && label_filters
                    .iter()
                    .all(|(k, v)| w.labels.get(k).is_some_and(|actual| actual == v))
        });
        workloads.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(workloads)
    }

    pub async fn get_workload(&self, name: &str) -> Result<Workload> {
        let container = self.find_container(name).await?;
        match self.store.load_run_config(name) {
            Ok(config) => {
                let status = match &container {
                    Some(c) => c.state.to_workload_status(),
                    None => self
                        .store
                        .load_status(name)
                        .unwrap_or(WorkloadStatus::Stopped),
                };
                Ok(workload_from(&config, container.as_ref(), status))
            }
            Err(ThvError::NotFound { .. }) => match container {
                Some(c) => Ok(workload_from_container(name, &c)),
                None => Err(ThvError::not_found(ResourceKind::Workload, name)),
            },
            Err(e) => Err(e),
        }
    }

    pub async fn does_workload_exist(&self, name: &str) -> Result<bool> {
        if self.store.load_run_config(name).is_ok() {
            return Ok(true);
        }
        Ok(self.find_container(name).await?.is_some())
    }

    /// Stop containers in parallel (bounded workers), leaving state-store
    /// entries intact. The returned wait-group aggregates per-name errors.
    pub fn stop_workloads(self: &Arc<Self>, names: &[String]) -> WaitGroup {
        self.fan_out(names, |manager, name| async move {
            let _guard = manager.locks.lock(&name).await;
            manager.stop_one(&name).await
        })
    }

    /// Stop, remove the container, drop the RunConfig, then clean client
    /// configs. Deleting a missing workload succeeds (idempotent).
    pub fn delete_workloads(self: &Arc<Self>, names: &[String]) -> WaitGroup {
        self.fan_out(names, |manager, name| async move {
            let _guard = manager.locks.lock(&name).await;
            manager.delete_one(&name).await
        })
    }

    /// Rewrite the `group` field in each workload's RunConfig. Running
    /// workloads are not restarted.
    pub fn move_to_group(&self, names: &[String], from: &str, to: &str) -> Result<()> {
        if !self.groups.exists(to) {
            return Err(ThvError::not_found(ResourceKind::Group, to));
        }
        for name in names {
            let mut config = self.store.load_run_config(name)?;
            if config.group_or_default() != from {
                return Err(ThvError::invalid_config(
                    "group",
                    format!("workload '{name}' is not in group '{from}'"),
                ));
            }
            config.group = (to != thv_state::DEFAULT_GROUP).then(|| to.to_string());
            self.store.save_run_config(&config)?;
        }
        Ok(())
    }

    /// Container log snapshot (last `tail` lines when set).
    pub async fn get_logs(&self, name: &str, tail: Option<u64>) -> Result<String> {
        let container = self
            .find_container(name)
            .await?
            .ok_or_else(|| ThvError::not_found(ResourceKind::Workload, name))?;
        self.runtime
            .container_logs(&container.id, tail)
            .await
            .map_err(ThvError::from)
    }

    /// Proxy log tail from the state directory.
    pub fn get_proxy_logs(&self, name: &str, max_lines: Option<usize>) -> Result<String> {
        let path = self.store.proxy_log_path(name);
        if !path.exists() {
            return Err(ThvError::not_found(ResourceKind::Workload, name));
        }
        let content = std::fs::read_to_string(&path).map_err(ThvError::internal)?;
        match max_lines {
            None => Ok(content),
            Some(n) => {
                let lines: Vec<&str> = content.lines().collect();
                let start = lines.len().saturating_sub(n);
                Ok(lines[start..].join("\n"))
            }
        }
    }

    /// Remove proxy logs for workloads that no longer exist.
    pub fn prune_logs(&self) -> Result<Vec<std::path::PathBuf>> {
        let live = self.store.list_names()?.into_iter().collect();
        self.store.prune_logs(&live)
    }

    // --- internals ---

    /// State-store write happens before the container starts, so a crash in
    /// between cannot produce a container the store has never heard of.
    async fn create_and_start(
        &self,
        ctx: &CancellationToken,
        mut config: RunConfig,
        create: bool,
    ) -> Result<(RunConfig, Option<String>)> {
        if config.remote_url.is_none() && config.target_port == 0 {
            config.target_port = ephemeral_port(&config.target_host)?;
        }
        if create {
            self.store.create_run_config(&config)?;
        } else {
            self.store.save_run_config(&config)?;
        }

        if config.remote_url.is_some() {
            return Ok((config, None));
        }

        match self.start_container(ctx, &config).await {
            Ok(id) => {
                self.store.save_status(&config.name, WorkloadStatus::Starting)?;
                Ok((config, Some(id)))
            }
            Err(e) => {
                if create {
                    // Explicit failure path (not a crash): return to a clean
                    // slate so the next run does not hit AlreadyExists.
                    self.store.delete_run_config(&config.name)?;
                }
                Err(e)
            }
        }
    }

    async fn start_container(&self, ctx: &CancellationToken, config: &RunConfig) -> Result<String> {
        let image = config
            .image
            .clone()
            .ok_or_else(|| ThvError::invalid_config("image", "no image to run"))?;

        // Secret values exist only in this env map, for this start.
        let mut env = config.env_vars.clone();
        let resolved =
            thv_secrets::resolve_refs(self.secrets.as_ref(), &config.secrets).await?;
        env.extend(resolved);

        let mut container_labels = labels::standard_labels(
            &config.name,
            config.transport,
            thv_core::ToolType::Mcp,
            Some(config.target_port),
            config.group_or_default(),
        );
        container_labels.extend(config.labels.clone());

        let mut mounts = Vec::with_capacity(config.volumes.len());
        for volume in &config.volumes {
            mounts.push(Mount::parse(volume)?);
        }

        let spec = ContainerSpec {
            name: config.name.clone(),
            image,
            cmd_args: config.cmd_args.clone(),
            env,
            labels: container_labels,
            mounts,
            exposed_port: Some(config.target_port),
            network_isolation: config.network_isolation,
            pod_patch: config.k8s_pod_patch.clone(),
            attach_stdio: config.transport == thv_core::TransportType::Stdio,
        };

        let id = self.runtime.create_container(&spec).await.map_err(ThvError::from)?;
        if ctx.is_cancelled() {
            self.rollback_container(Some(&id)).await;
            return Err(ThvError::Internal("cancelled before start".into()));
        }
        if let Err(e) = self.runtime.start_container(&id).await {
            self.rollback_container(Some(&id)).await;
            return Err(e.into());
        }
        if let Err(e) = self
            .wait_for_port(ctx, &config.target_host, config.target_port)
            .await
        {
            self.rollback_container(Some(&id)).await;
            return Err(e);
        }
        Ok(id)
    }

    /// Cancellation / failure rollback: stop and remove, best effort.
    async fn rollback_container(&self, id: Option<&str>) {
        let Some(id) = id else { return };
        if let Err(e) = self.runtime.stop_container(id, STOP_GRACE).await
            && !matches!(e, RuntimeError::NotFound(_))
        {
            tracing::warn!(container = id, error = %e, "rollback stop failed");
        }
        self.remove_quiet(id).await;
    }

    async fn remove_quiet(&self, id: &str) {
        if let Err(e) = self.runtime.remove_container(id).await
            && !matches!(e, RuntimeError::NotFound(_))
        {
            tracing::warn!(container = id, error = %e, "container remove failed");
        }
    }

    async fn wait_for_port(&self, ctx: &CancellationToken, host: &str, port: u16) -> Result<()> {
        let deadline = tokio::time::Instant::now() + PORT_WAIT_DEADLINE;
        loop {
            if ctx.is_cancelled() {
                return Err(ThvError::Internal("cancelled while waiting for target port".into()));
            }
            if tokio::net::TcpStream::connect((host, port)).await.is_ok() {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                return Err(ThvError::RuntimeUnavailable(format!(
                    "target port {host}:{port} did not accept connections"
                )));
            }
            tokio::time::sleep(PORT_POLL_INTERVAL).await;
        }
    }

    async fn wait_for_exit(&self, ctx: &CancellationToken, id: &str) -> i32 {
        let mut stop_requested = false;
        loop {
            if ctx.is_cancelled() && !stop_requested {
                stop_requested = true;
                if let Err(e) = self.runtime.stop_container(id, STOP_GRACE).await
                    && !matches!(e, RuntimeError::NotFound(_))
                {
                    tracing::warn!(container = id, error = %e, "stop on cancel failed");
                }
            }
            match self.runtime.get_container(id).await {
                Ok(info) if info.state == ContainerState::Exited => {
                    return info.exit_code.unwrap_or(0);
                }
                Ok(_) => {}
                Err(RuntimeError::NotFound(_)) => return 0,
                Err(e) => {
                    tracing::warn!(container = id, error = %e, "exit poll failed");
                    return 0;
                }
            }
            tokio::time::sleep(EXIT_POLL_INTERVAL).await;
        }
    }

    async fn stop_one(&self, name: &str) -> Result<()> {
        let known = self.store.load_run_config(name).is_ok();
        let container = self.find_container(name).await?;
        if container.is_none() && !known {
            return Err(ThvError::not_found(ResourceKind::Workload, name));
        }
        if let Some(container) = container {
            self.runtime
                .stop_container(&container.id, STOP_GRACE)
                .await
                .map_err(ThvError::from)?;
        }
        self.stop_proxy(name).await;
        if known {
            self.store.save_status(name, WorkloadStatus::Stopped)?;
        }
        Ok(())
    }

    async fn delete_one(&self, name: &str) -> Result<()> {
        let group = self
            .store
            .load_run_config(name)
            .map(|config| config.group_or_default().to_string())
            .ok();

        if let Some(container) = self.find_container(name).await? {
            match self.runtime.stop_container(&container.id, STOP_GRACE).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
            match self.runtime.remove_container(&container.id).await {
                Ok(()) | Err(RuntimeError::NotFound(_)) => {}
                Err(e) => return Err(e.into()),
            }
        }
        self.stop_proxy(name).await;
        self.store.delete_run_config(name)?;

        // Client configs only after the container is confirmed gone.
        let group = group.unwrap_or_else(|| thv_state::DEFAULT_GROUP.to_string());
        self.groups.remove_workload(&group, name).await
    }

    async fn find_container(&self, name: &str) -> Result<Option<ContainerInfo>> {
        let filter = WorkloadFilter {
            label_selectors: vec![
                (labels::LABEL_MANAGED.to_string(), "true".to_string()),
                (labels::LABEL_NAME.to_string(), name.to_string()),
            ],
        };
        let mut containers = self.runtime.list_workloads(&filter).await.map_err(ThvError::from)?;
        Ok(containers.pop())
    }

    fn fan_out<F, Fut>(self: &Arc<Self>, names: &[String], worker: F) -> WaitGroup
    where
        F: Fn(Arc<Self>, String) -> Fut + Send + Sync + Clone + 'static,
        Fut: std::future::Future<Output = Result<()>> + Send + 'static,
    {
        let semaphore = Arc::new(Semaphore::new(worker_limit()));
        let mut tasks = JoinSet::new();
        for name in names {
            let manager = Arc::clone(self);
            let semaphore = Arc::clone(&semaphore);
            let worker = worker.clone();
            let name = name.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire().await.expect("semaphore closed");
                let result = worker(manager, name.clone()).await;
                (name, result)
            });
        }
        WaitGroup::new(tasks)
    }

    fn spawn_proxy(&self, name: &str, proxy: Arc<TransparentProxy>) {
        let task = {
            let proxy = Arc::clone(&proxy);
            tokio::spawn(async move { proxy.start().await })
        };
        self.proxies
            .lock()
            .expect("proxy map poisoned")
            .insert(name.to_string(), ActiveProxy { proxy, task });
    }

    /// Stop an in-process proxy if this manager owns one for the name. The
    /// port is only considered released once the listener is fully closed.
    async fn stop_proxy(&self, name: &str) {
        let active = self.proxies.lock().expect("proxy map poisoned").remove(name);
        if let Some(active) = active {
            if !active.proxy.stop(PROXY_DRAIN).await {
                tracing::warn!(workload = name, "proxy drain deadline hit, force closing");
                active.task.abort();
            }
            let _ = active.task.await;
        }
    }
}

/// Bind-then-close allocation for the container's bridged target port.
fn ephemeral_port(host: &str) -> Result<u16> {
    let listener = std::net::TcpListener::bind((host, 0)).map_err(|e| {
        ThvError::ProxyBindFailed {
            addr: format!("{host}:0"),
            reason: e.to_string(),
        }
    })?;
    Ok(listener.local_addr().map_err(ThvError::internal)?.port())
}

/// Detached supervisor: re-exec the CLI with the same environment and cwd,
/// addressable later by workload name, stoppable by signal.
fn spawn_supervisor_process(config: &RunConfig) -> Result<u32> {
    let exe = std::env::current_exe().map_err(ThvError::internal)?;
    let child = std::process::Command::new(exe)
        .arg("supervise")
        .arg(&config.name)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()
        .map_err(ThvError::internal)?;
    Ok(child.id())
}

fn workload_from(
    config: &RunConfig,
    container: Option<&ContainerInfo>,
    status: WorkloadStatus,
) -> Workload {
    Workload {
        name: config.name.clone(),
        image: config
            .image
            .clone()
            .or_else(|| config.remote_url.clone())
            .unwrap_or_default(),
        container_id: container.map(|c| c.id.clone()),
        status,
        transport: config.transport,
        proxy_mode: config.proxy_mode,
        host: config.host.clone(),
        proxy_port: config.proxy_port,
        target_port: config.target_port,
        target_host: Some(config.target_host.clone()),
        created_at: config.created_at,
        url: config.url(),
        group: Some(config.group_or_default().to_string()),
        labels: config.labels.clone(),
        tool_type: if config.remote_url.is_some() {
            thv_core::ToolType::Remote
        } else {
            thv_core::ToolType::Mcp
        },
    }
}

/// Best-effort view of a managed container the store has no record of.
fn workload_from_container(name: &str, container: &ContainerInfo) -> Workload {
    let transport = container
        .labels
        .get(labels::LABEL_TRANSPORT)
        .and_then(|t| t.parse().ok())
        .unwrap_or(thv_core::TransportType::Stdio);
    Workload {
        name: name.to_string(),
        image: container.image.clone(),
        container_id: Some(container.id.clone()),
        status: container.state.to_workload_status(),
        transport,
        proxy_mode: None,
        host: String::new(),
        proxy_port: 0,
        target_port: 0,
        target_host: None,
        created_at: container.created_at,
        url: workload_url(transport, None, "", 0, name),
        group: labels::group_name(&container.labels).map(String::from),
        labels: container.labels.clone(),
        tool_type: thv_core::ToolType::Mcp,
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
