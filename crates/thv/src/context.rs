//! Shared wiring for every command: config provider, state store, runtime
//! driver, group manager, secrets backend and the workload manager.

use std::sync::Arc;

use thv_config::{ConfigProvider, GlobalConfig};
use thv_core::{Result, ThvError};
use thv_groups::GroupManager;
use thv_registry::{RegistryClient, RegistryResolver, RegistrySource, VerifyMode};
use thv_runtime::ContainerRuntime;
use thv_secrets::{ProviderKind, SecretsProvider};
use thv_state::StateStore;
use thv_workloads::WorkloadManager;

use crate::docker::DockerCliRuntime;

/// Process-wide settings holder; copy-on-write on `thv config set`.
pub static CONFIG: ConfigProvider = ConfigProvider::new();

pub struct AppContext {
    pub config: Arc<GlobalConfig>,
    pub store: Arc<StateStore>,
    pub groups: Arc<GroupManager>,
    pub secrets: Arc<dyn SecretsProvider>,
    pub runtime: Arc<dyn ContainerRuntime>,
    pub manager: Arc<WorkloadManager>,
}

impl AppContext {
    /// Wire everything against the real runtime CLI and the XDG state dir.
    pub fn init() -> Result<Self> {
        let config = CONFIG.get().map_err(ThvError::internal)?;
        let store = Arc::new(StateStore::open_default()?);
        let groups = Arc::new(GroupManager::new(Arc::clone(&store)));

        let provider_kind = match config.secrets_provider.as_deref() {
            Some(raw) => raw.parse()?,
            None => ProviderKind::File,
        };
        let secrets = thv_secrets::open_provider(provider_kind, store.base_dir());

        let runtime: Arc<dyn ContainerRuntime> =
            Arc::new(DockerCliRuntime::detect().map_err(ThvError::from)?);
        let manager = WorkloadManager::new(
            Arc::clone(&runtime),
            Arc::clone(&store),
            Arc::clone(&groups),
            Arc::clone(&secrets),
        );

        Ok(Self {
            config,
            store,
            groups,
            secrets,
            runtime,
            manager,
        })
    }

    /// Registry resolver honoring the configured registry location.
    pub fn registry_resolver(&self, verify_mode: VerifyMode) -> RegistryResolver {
        let source = if let Some(path) = &self.config.registry.file {
            RegistrySource::File(path.clone())
        } else if let Some(url) = &self.config.registry.url {
            RegistrySource::Url(url.clone())
        } else {
            RegistrySource::None
        };
        RegistryResolver::new(
            RegistryClient::new(source),
            Arc::clone(&self.runtime),
            verify_mode,
        )
    }
}
