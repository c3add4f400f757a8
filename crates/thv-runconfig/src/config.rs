use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thv_auth::{OidcConfig, RemoteAuthConfig, TokenExchangeConfig};
use thv_core::{ProxyMode, Result, ThvError, TransportType, validate_name, workload_url};
use thv_secrets::{SecretRef, validate_env_var_name};

use crate::permissions::PermissionProfile;

/// Current RunConfig schema. Loads reject any other value.
pub const SCHEMA_VERSION: u32 = 1;

/// OpenTelemetry export settings carried per workload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OtelConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sampling_ratio: Option<f64>,
    #[serde(default)]
    pub insecure: bool,
}

/// The normalized, versioned description of a workload. This is what gets
/// persisted, exported and re-imported; secret values never appear here,
/// only references.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RunConfig {
    pub schema_version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    /// Original `uvx://`/`npx://`/… identifier when the image was built
    /// from a protocol scheme.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol_scheme: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_url: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cmd_args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env_vars: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretRef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_profile: Option<PermissionProfile>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authz_config: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audit_config: Option<PathBuf>,
    #[serde(default)]
    pub enable_audit: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oidc: Option<OidcConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_auth: Option<RemoteAuthConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_exchange: Option<TokenExchangeConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub otel: Option<OtelConfig>,
    pub transport: TransportType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_mode: Option<ProxyMode>,
    pub host: String,
    pub proxy_port: u16,
    #[serde(default)]
    pub target_port: u16,
    #[serde(default = "default_target_host")]
    pub target_host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tools_filter: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub k8s_pod_patch: Option<String>,
    #[serde(default)]
    pub network_isolation: bool,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
}

fn default_target_host() -> String {
    "127.0.0.1".to_string()
}

impl RunConfig {
    /// Structural invariants beyond what serde enforces.
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ThvError::invalid_config(
                "schemaVersion",
                format!("expected {SCHEMA_VERSION}, got {}", self.schema_version),
            ));
        }
        validate_name(&self.name)?;

        let payloads = [
            self.image.is_some(),
            self.protocol_scheme.is_some(),
            self.remote_url.is_some(),
        ]
        .into_iter()
        .filter(|set| *set)
        .count();
        // A scheme-built payload keeps both the built image and its origin.
        let payload_ok = match (payloads, self.protocol_scheme.is_some()) {
            (1, _) => true,
            (2, true) => self.image.is_some(),
            _ => false,
        };
        if !payload_ok {
            return Err(ThvError::invalid_config(
                "image",
                "exactly one of image, protocolScheme or remoteUrl must identify the payload",
            ));
        }

        if self.proxy_mode.is_some() && self.transport != TransportType::Stdio {
            return Err(ThvError::invalid_config(
                "proxyMode",
                "only meaningful when transport is stdio",
            ));
        }
        for secret in &self.secrets {
            validate_env_var_name(&secret.target)?;
        }
        for name in self.env_vars.keys() {
            validate_env_var_name(name)?;
        }
        if let Some(group) = &self.group {
            validate_name(group)?;
        }
        if let Some(oidc) = &self.oidc {
            oidc.validate()?;
        }
        if let Some(remote_auth) = &self.remote_auth {
            remote_auth.validate()?;
        }
        if let Some(exchange) = &self.token_exchange {
            exchange.validate()?;
        }
        Ok(())
    }

    /// The group this workload belongs to (`default` when unset).
    pub fn group_or_default(&self) -> &str {
        self.group.as_deref().unwrap_or("default")
    }

    /// Client-facing URL derived from transport, host and proxy port.
    pub fn url(&self) -> String {
        workload_url(
            self.transport,
            self.proxy_mode,
            &self.host,
            self.proxy_port,
            &self.name,
        )
    }

    /// Strict JSON serialization used by the state store and `export`.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(ThvError::internal)
    }

    /// Strict parse: unknown fields and foreign schema versions are errors.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| ThvError::invalid_config("runConfig", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn write_to(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        thv_lock::atomic_write(path, json.as_bytes()).map_err(ThvError::internal)
    }

    pub fn read_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ThvError::invalid_config("fromConfig", format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
