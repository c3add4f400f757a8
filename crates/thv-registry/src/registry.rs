use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thv_core::{Result, ThvError, TransportType};
use tokio::sync::RwLock;

/// Provenance information the registry vouches for.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default)]
    pub verified: bool,
    #[serde(default)]
    pub sigstore_url: Option<String>,
}

/// One server entry in the registry document.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryEntry {
    pub image: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub transport: Option<TransportType>,
    #[serde(default)]
    pub target_port: Option<u16>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub provenance: Option<Provenance>,
}

/// The registry document: a name → entry mapping.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registry {
    #[serde(default)]
    pub servers: HashMap<String, RegistryEntry>,
}

/// Where registry metadata is loaded from.
#[derive(Debug, Clone, Default)]
pub enum RegistrySource {
    Url(String),
    File(PathBuf),
    /// No registry configured; only direct references and schemes resolve.
    #[default]
    None,
}

/// Loads the registry document once per process and serves lookups from the
/// cached copy.
pub struct RegistryClient {
    source: RegistrySource,
    http: reqwest::Client,
    cache: RwLock<Option<Arc<Registry>>>,
}

impl RegistryClient {
    pub fn new(source: RegistrySource) -> Self {
        Self {
            source,
            http: reqwest::Client::new(),
            cache: RwLock::new(None),
        }
    }

    pub async fn find(&self, name: &str) -> Result<Option<RegistryEntry>> {
        let registry = self.load().await?;
        Ok(registry.servers.get(name).cloned())
    }

    async fn load(&self) -> Result<Arc<Registry>> {
        if let Some(registry) = self.cache.read().await.as_ref() {
            return Ok(Arc::clone(registry));
        }
        let mut cache = self.cache.write().await;
        if let Some(registry) = cache.as_ref() {
            return Ok(Arc::clone(registry));
        }
        let registry = Arc::new(self.fetch().await?);
        *cache = Some(Arc::clone(&registry));
        Ok(registry)
    }

    async fn fetch(&self) -> Result<Registry> {
        match &self.source {
            RegistrySource::None => Ok(Registry::default()),
            RegistrySource::File(path) => {
                let content = std::fs::read_to_string(path).map_err(|e| {
                    ThvError::invalid_config(
                        "registry.file",
                        format!("cannot read {}: {e}", path.display()),
                    )
                })?;
                serde_json::from_str(&content).map_err(|e| ThvError::StateCorrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })
            }
            RegistrySource::Url(url) => {
                let response = self
                    .http
                    .get(url)
                    .timeout(Duration::from_secs(10))
                    .send()
                    .await
                    .map_err(|e| ThvError::Internal(format!("GET {url}: {e}")))?;
                if !response.status().is_success() {
                    return Err(ThvError::Internal(format!(
                        "GET {url}: status {}",
                        response.status()
                    )));
                }
                response
                    .json()
                    .await
                    .map_err(|e| ThvError::Internal(format!("invalid registry from {url}: {e}")))
            }
        }
    }
}
