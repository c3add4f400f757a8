//! Global configuration (`~/.config/toolhive/config.toml`).
//!
//! User-level settings that apply across all workloads: registry location,
//! CA cert path, default secrets backend, image build options and OTel
//! defaults. Distinct from per-workload RunConfigs, which live in the state
//! store.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, RwLock};

use crate::paths;

/// Global configuration loaded from `~/.config/toolhive/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GlobalConfig {
    #[serde(default)]
    pub registry: RegistrySettings,
    /// Extra CA certificate bundle for registry and IdP connections.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert_path: Option<PathBuf>,
    /// Default secrets backend: `file` or `environment`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_provider: Option<String>,
    #[serde(default)]
    pub build: BuildSettings,
    #[serde(default)]
    pub otel: OtelSettings,
}

/// Where registry metadata comes from: a remote URL or a local file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistrySettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

/// Options applied to protocol-scheme image builds.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BuildSettings {
    /// Environment passed into synthesized Dockerfile builds.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    /// Registry auth file forwarded to the runtime during builds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auth_file: Option<PathBuf>,
}

/// OpenTelemetry defaults merged into RunConfigs when flags are absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct OtelSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_ratio: Option<f64>,
}

impl GlobalConfig {
    /// Load from the canonical path, or `Default` when the file (or a home
    /// directory) does not exist.
    pub fn load() -> Result<Self> {
        match paths::global_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read global config {}", path.display()))?;
        let config: Self = toml::from_str(&content)
            .with_context(|| format!("failed to parse global config {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("failed to serialize global config")?;
        thv_lock::atomic_write(path, content.as_bytes())
    }

    /// Nested-key read used by `thv config get`.
    pub fn get_key(&self, key: &str) -> Option<String> {
        match key {
            "registry.url" => self.registry.url.clone(),
            "registry.file" => self.registry.file.as_ref().map(|p| p.display().to_string()),
            "ca-cert" => self.ca_cert_path.as_ref().map(|p| p.display().to_string()),
            "secrets.provider" => self.secrets_provider.clone(),
            "build.auth-file" => self.build.auth_file.as_ref().map(|p| p.display().to_string()),
            "otel.endpoint" => self.otel.endpoint.clone(),
            "otel.service-name" => self.otel.service_name.clone(),
            "otel.sampling-ratio" => self.otel.sampling_ratio.map(|r| r.to_string()),
            _ => key
                .strip_prefix("build.env.")
                .and_then(|name| self.build.env.get(name).cloned()),
        }
    }

    /// Nested-key write used by `thv config set`. Unknown keys are rejected.
    pub fn set_key(&mut self, key: &str, value: &str) -> Result<()> {
        match key {
            "registry.url" => self.registry.url = Some(value.to_string()),
            "registry.file" => self.registry.file = Some(PathBuf::from(value)),
            "ca-cert" => self.ca_cert_path = Some(PathBuf::from(value)),
            "secrets.provider" => self.secrets_provider = Some(value.to_string()),
            "build.auth-file" => self.build.auth_file = Some(PathBuf::from(value)),
            "otel.endpoint" => self.otel.endpoint = Some(value.to_string()),
            "otel.service-name" => self.otel.service_name = Some(value.to_string()),
            "otel.sampling-ratio" => {
                let ratio: f64 = value
                    .parse()
                    .with_context(|| format!("'{value}' is not a valid sampling ratio"))?;
                self.otel.sampling_ratio = Some(ratio);
            }
            _ => {
                if let Some(name) = key.strip_prefix("build.env.") {
                    self.build.env.insert(name.to_string(), value.to_string());
                } else {
                    anyhow::bail!("unknown config key '{key}'");
                }
            }
        }
        Ok(())
    }

    /// Nested-key removal used by `thv config unset`.
    pub fn unset_key(&mut self, key: &str) -> Result<()> {
        match key {
            "registry.url" => self.registry.url = None,
            "registry.file" => self.registry.file = None,
            "ca-cert" => self.ca_cert_path = None,
            "secrets.provider" => self.secrets_provider = None,
            "build.auth-file" => self.build.auth_file = None,
            "otel.endpoint" => self.otel.endpoint = None,
            "otel.service-name" => self.otel.service_name = None,
            "otel.sampling-ratio" => self.otel.sampling_ratio = None,
            _ => {
                if let Some(name) = key.strip_prefix("build.env.") {
                    self.build.env.remove(name);
                } else {
                    anyhow::bail!("unknown config key '{key}'");
                }
            }
        }
        Ok(())
    }

    /// All set keys and values, for `thv config list`.
    pub fn list_keys(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        let fixed = [
            "registry.url",
            "registry.file",
            "ca-cert",
            "secrets.provider",
            "build.auth-file",
            "otel.endpoint",
            "otel.service-name",
            "otel.sampling-ratio",
        ];
        for key in fixed {
            if let Some(value) = self.get_key(key) {
                out.push((key.to_string(), value));
            }
        }
        let mut env_keys: Vec<_> = self.build.env.keys().collect();
        env_keys.sort();
        for name in env_keys {
            out.push((format!("build.env.{name}"), self.build.env[name].clone()));
        }
        out
    }
}

/// Process-wide config holder: lazy-load on first access, copy-on-write
/// replace on update. Readers clone an `Arc` and never block writers past
/// the pointer swap.
#[derive(Default)]
pub struct ConfigProvider {
    current: RwLock<Option<Arc<GlobalConfig>>>,
}

impl ConfigProvider {
    pub const fn new() -> Self {
        Self {
            current: RwLock::new(None),
        }
    }

    /// Current config, loading from disk on first access.
    pub fn get(&self) -> Result<Arc<GlobalConfig>> {
        if let Some(config) = self.current.read().expect("config lock poisoned").as_ref() {
            return Ok(Arc::clone(config));
        }
        let loaded = Arc::new(GlobalConfig::load()?);
        let mut slot = self.current.write().expect("config lock poisoned");
        // Another thread may have loaded while we were reading the file.
        if let Some(config) = slot.as_ref() {
            return Ok(Arc::clone(config));
        }
        *slot = Some(Arc::clone(&loaded));
        Ok(loaded)
    }

    /// Mutate a copy, persist it, then swap the shared pointer.
    pub fn update(&self, mutate: impl FnOnce(&mut GlobalConfig) -> Result<()>) -> Result<Arc<GlobalConfig>> {
        let mut next = self.get()?.as_ref().clone();
        mutate(&mut next)?;
        if let Some(path) = paths::global_config_path() {
            next.save_to(&path)?;
        }
        let next = Arc::new(next);
        *self.current.write().expect("config lock poisoned") = Some(Arc::clone(&next));
        Ok(next)
    }

    /// Drop the cached value so the next `get` re-reads from disk.
    pub fn invalidate(&self) {
        *self.current.write().expect("config lock poisoned") = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toml_round_trip() {
        let mut config = GlobalConfig::default();
        config.registry.url = Some("https://registry.example/registry.json".into());
        config.build.env.insert("GOPROXY".into(), "direct".into());
        config.otel.sampling_ratio = Some(0.25);

        let text = toml::to_string_pretty(&config).unwrap();
        let parsed: GlobalConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_get_set_unset_keys() {
        let mut config = GlobalConfig::default();
        config.set_key("registry.url", "https://r.example/r.json").unwrap();
        config.set_key("build.env.NPM_TOKEN", "tok").unwrap();
        assert_eq!(
            config.get_key("registry.url").as_deref(),
            Some("https://r.example/r.json")
        );
        assert_eq!(config.get_key("build.env.NPM_TOKEN").as_deref(), Some("tok"));

        config.unset_key("registry.url").unwrap();
        assert_eq!(config.get_key("registry.url"), None);
        assert!(config.set_key("no.such.key", "x").is_err());
    }

    #[test]
    fn test_list_keys_sorted_and_complete() {
        let mut config = GlobalConfig::default();
        config.set_key("otel.endpoint", "http://collector:4318").unwrap();
        config.set_key("build.env.B", "2").unwrap();
        config.set_key("build.env.A", "1").unwrap();
        let keys: Vec<String> = config.list_keys().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["otel.endpoint", "build.env.A", "build.env.B"]);
    }

    #[test]
    fn test_save_and_load_from_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = GlobalConfig::default();
        config.secrets_provider = Some("file".into());
        config.save_to(&path).unwrap();
        let loaded = GlobalConfig::load_from(&path).unwrap();
        assert_eq!(loaded, config);
    }
}
