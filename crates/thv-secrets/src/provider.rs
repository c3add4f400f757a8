use std::path::Path;
use std::sync::Arc;

use thv_core::{Result, ThvError};

/// What a backend can do. Read-only backends reject `set`/`delete` up front
/// instead of failing deep inside a workload start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProviderCapabilities {
    pub can_read: bool,
    pub can_write: bool,
    pub can_delete: bool,
    pub can_list: bool,
}

impl ProviderCapabilities {
    pub const READ_ONLY: Self = Self {
        can_read: true,
        can_write: false,
        can_delete: false,
        can_list: false,
    };

    pub const FULL: Self = Self {
        can_read: true,
        can_write: true,
        can_delete: true,
        can_list: true,
    };
}

/// A named-secret backend.
#[async_trait::async_trait]
pub trait SecretsProvider: Send + Sync {
    async fn get(&self, name: &str) -> Result<String>;
    async fn set(&self, name: &str, value: &str) -> Result<()>;
    async fn delete(&self, name: &str) -> Result<()>;
    async fn list(&self) -> Result<Vec<String>>;
    fn capabilities(&self) -> ProviderCapabilities;
}

/// Built-in backend selection. 1Password and other external managers plug in
/// behind [`SecretsProvider`]; they are not implemented here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ProviderKind {
    #[default]
    File,
    Environment,
}

impl std::str::FromStr for ProviderKind {
    type Err = ThvError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "file" => Ok(Self::File),
            "environment" | "env" => Ok(Self::Environment),
            other => Err(ThvError::invalid_config(
                "secrets.provider",
                format!("unknown provider '{other}'. Valid values: file, environment"),
            )),
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::File => f.write_str("file"),
            Self::Environment => f.write_str("environment"),
        }
    }
}

/// Open the backend for `kind`, rooted in `state_dir` where applicable.
pub fn open_provider(kind: ProviderKind, state_dir: &Path) -> Arc<dyn SecretsProvider> {
    match kind {
        ProviderKind::File => Arc::new(crate::FileProvider::new(state_dir.join("secrets.json"))),
        ProviderKind::Environment => Arc::new(crate::EnvironmentProvider),
    }
}
