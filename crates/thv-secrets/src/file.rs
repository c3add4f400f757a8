use std::collections::BTreeMap;
use std::path::PathBuf;

use thv_core::{ResourceKind, Result, ThvError};

use crate::provider::{ProviderCapabilities, SecretsProvider};

/// File-backed secret store (`<state-dir>/secrets.json`, mode 0600).
///
/// Every operation re-reads the file under an advisory lock so multiple
/// `thv` processes stay consistent. At-rest encryption is delegated to the
/// operator (keyring passphrase or an external manager).
pub struct FileProvider {
    path: PathBuf,
}

impl FileProvider {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Create an empty store, replacing any existing one.
    pub fn reset(&self) -> Result<()> {
        self.write_all(&BTreeMap::new())
    }

    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    fn read_all(&self) -> Result<BTreeMap<String, String>> {
        if !self.path.exists() {
            return Ok(BTreeMap::new());
        }
        let content = std::fs::read_to_string(&self.path).map_err(ThvError::internal)?;
        serde_json::from_str(&content).map_err(|e| ThvError::StateCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })
    }

    fn write_all(&self, secrets: &BTreeMap<String, String>) -> Result<()> {
        let content = serde_json::to_vec_pretty(secrets).map_err(ThvError::internal)?;
        thv_lock::atomic_write(&self.path, &content).map_err(ThvError::internal)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&self.path, std::fs::Permissions::from_mode(0o600))
                .map_err(ThvError::internal)?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl SecretsProvider for FileProvider {
    async fn get(&self, name: &str) -> Result<String> {
        let _guard = thv_lock::lock_path(&self.path, "secret get").map_err(ThvError::internal)?;
        self.read_all()?
            .get(name)
            .cloned()
            .ok_or_else(|| ThvError::not_found(ResourceKind::Secret, name))
    }

    async fn set(&self, name: &str, value: &str) -> Result<()> {
        let _guard = thv_lock::lock_path(&self.path, "secret set").map_err(ThvError::internal)?;
        let mut secrets = self.read_all()?;
        secrets.insert(name.to_string(), value.to_string());
        self.write_all(&secrets)
    }

    async fn delete(&self, name: &str) -> Result<()> {
        let _guard =
            thv_lock::lock_path(&self.path, "secret delete").map_err(ThvError::internal)?;
        let mut secrets = self.read_all()?;
        if secrets.remove(name).is_none() {
            return Err(ThvError::not_found(ResourceKind::Secret, name));
        }
        self.write_all(&secrets)
    }

    async fn list(&self) -> Result<Vec<String>> {
        let _guard = thv_lock::lock_path(&self.path, "secret list").map_err(ThvError::internal)?;
        Ok(self.read_all()?.into_keys().collect())
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::FULL
    }
}
