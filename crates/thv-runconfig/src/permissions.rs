//! Filesystem and network permission profiles applied to containers.

use serde::{Deserialize, Serialize};
use thv_core::{Result, ThvError};

/// What a workload container may touch. Resolved from a builtin name or a
/// JSON file at build time and persisted inline in the RunConfig.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PermissionProfile {
    /// Host paths mounted read-only.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub read: Vec<String>,
    /// Host paths mounted read-write.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub write: Vec<String>,
    #[serde(default)]
    pub network: NetworkPermissions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NetworkPermissions {
    #[serde(default)]
    pub outbound: OutboundPermissions,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OutboundPermissions {
    #[serde(default)]
    pub insecure_allow_all: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_host: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub allow_port: Vec<u16>,
}

impl PermissionProfile {
    /// `none`: no mounts, no outbound network.
    pub fn none() -> Self {
        Self::default()
    }

    /// `network`: no mounts, unrestricted outbound network.
    pub fn network() -> Self {
        Self {
            network: NetworkPermissions {
                outbound: OutboundPermissions {
                    insecure_allow_all: true,
                    ..Default::default()
                },
            },
            ..Default::default()
        }
    }

    pub fn builtin(name: &str) -> Option<Self> {
        match name {
            "none" => Some(Self::none()),
            "network" => Some(Self::network()),
            _ => None,
        }
    }

    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ThvError::invalid_config(
                "permissionProfile",
                format!("cannot read {}: {e}", path.display()),
            )
        })?;
        serde_json::from_str(&content).map_err(|e| {
            ThvError::invalid_config(
                "permissionProfile",
                format!("invalid profile {}: {e}", path.display()),
            )
        })
    }

    /// A builtin name or a path to a JSON profile.
    pub fn resolve(spec: &str) -> Result<Self> {
        if let Some(profile) = Self::builtin(spec) {
            return Ok(profile);
        }
        Self::from_file(std::path::Path::new(spec))
    }
}
