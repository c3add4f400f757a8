use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thv_core::{ThvError, WorkloadStatus};

/// Failure kinds a driver surfaces upward. Everything else a driver hits is
/// folded into `Unavailable` with the underlying cause.
#[derive(thiserror::Error, Debug)]
pub enum RuntimeError {
    #[error("container '{0}' not found")]
    NotFound(String),

    #[error("container '{0}' already exists")]
    AlreadyExists(String),

    #[error("image pull failed for '{image}': {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("runtime unavailable: {0}")]
    Unavailable(String),
}

impl From<RuntimeError> for ThvError {
    fn from(err: RuntimeError) -> Self {
        match err {
            RuntimeError::NotFound(name) => {
                ThvError::not_found(thv_core::ResourceKind::Workload, name)
            }
            RuntimeError::AlreadyExists(name) => {
                ThvError::already_exists(thv_core::ResourceKind::Workload, name)
            }
            RuntimeError::ImagePullFailed { image, reason } => {
                ThvError::ImagePullFailed { image, reason }
            }
            RuntimeError::PermissionDenied(reason) => ThvError::RuntimeUnavailable(reason),
            RuntimeError::Unavailable(reason) => ThvError::RuntimeUnavailable(reason),
        }
    }
}

/// A bind mount in `HOST:CONTAINER[:ro]` form.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mount {
    pub host: PathBuf,
    pub container: String,
    pub read_only: bool,
}

impl Mount {
    pub fn parse(raw: &str) -> Result<Self, ThvError> {
        let parts: Vec<&str> = raw.split(':').collect();
        let (host, container, read_only) = match parts.as_slice() {
            [host, container] => (host, container, false),
            [host, container, "ro"] => (host, container, true),
            [host, container, "rw"] => (host, container, false),
            _ => {
                return Err(ThvError::invalid_config(
                    "volumes",
                    format!("'{raw}' must be HOST:CONTAINER[:ro]"),
                ));
            }
        };
        if host.is_empty() || container.is_empty() {
            return Err(ThvError::invalid_config(
                "volumes",
                format!("'{raw}' has an empty host or container path"),
            ));
        }
        Ok(Self {
            host: PathBuf::from(host),
            container: (*container).to_string(),
            read_only,
        })
    }
}

/// Everything a driver needs to create a workload container.
#[derive(Debug, Clone, Default)]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    pub cmd_args: Vec<String>,
    pub env: HashMap<String, String>,
    pub labels: HashMap<String, String>,
    pub mounts: Vec<Mount>,
    /// Container port the MCP server listens on (None for pure stdio).
    pub exposed_port: Option<u16>,
    pub network_isolation: bool,
    /// Raw strategic-merge patch applied to the pod on Kubernetes drivers.
    pub pod_patch: Option<String>,
    /// Wire the container's stdio to the proxy (stdio transport).
    pub attach_stdio: bool,
}

/// Runtime-reported container state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Created,
    Running,
    Paused,
    Restarting,
    Exited,
    Removing,
    Unknown,
}

impl ContainerState {
    /// Collapse runtime states onto the workload status model.
    pub fn to_workload_status(self) -> WorkloadStatus {
        match self {
            Self::Created => WorkloadStatus::Starting,
            Self::Running | Self::Restarting => WorkloadStatus::Running,
            Self::Paused => WorkloadStatus::Stopping,
            Self::Removing => WorkloadStatus::Stopping,
            Self::Exited => WorkloadStatus::Stopped,
            Self::Unknown => WorkloadStatus::Unknown,
        }
    }
}

/// What a driver reports about an existing container.
#[derive(Debug, Clone)]
pub struct ContainerInfo {
    pub id: String,
    pub name: String,
    pub image: String,
    pub state: ContainerState,
    pub labels: HashMap<String, String>,
    pub created_at: DateTime<Utc>,
    pub exit_code: Option<i32>,
}

/// Label selectors ANDed together when listing workload containers.
#[derive(Debug, Clone, Default)]
pub struct WorkloadFilter {
    pub label_selectors: Vec<(String, String)>,
}

impl WorkloadFilter {
    pub fn matches(&self, labels: &HashMap<String, String>) -> bool {
        self.label_selectors
            .iter()
            .all(|(k, v)| labels.get(k).is_some_and(|actual| actual == v))
    }
}

/// Capability set the core depends on. Drivers must be safe for concurrent
/// callers; the workload manager serializes per-name operations itself.
#[async_trait::async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError>;
    async fn start_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError>;
    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError>;
    async fn list_workloads(&self, filter: &WorkloadFilter)
    -> Result<Vec<ContainerInfo>, RuntimeError>;
    async fn get_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError>;
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError>;
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError>;
    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError>;
    /// Snapshot of container logs; `tail` limits to the last N lines.
    async fn container_logs(&self, id: &str, tail: Option<u64>) -> Result<String, RuntimeError>;
    fn is_kubernetes(&self) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mount_parse_forms() {
        let m = Mount::parse("/data:/srv/data").unwrap();
        assert_eq!(m.container, "/srv/data");
        assert!(!m.read_only);

        let m = Mount::parse("/data:/srv/data:ro").unwrap();
        assert!(m.read_only);

        assert!(Mount::parse("/only-host").is_err());
        assert!(Mount::parse(":/ctr").is_err());
        assert!(Mount::parse("/h:/c:rx").is_err());
    }

    #[test]
    fn test_filter_is_conjunctive() {
        let mut labels = HashMap::new();
        labels.insert("toolhive".to_string(), "true".to_string());
        labels.insert("toolhive-group".to_string(), "default".to_string());

        let filter = WorkloadFilter {
            label_selectors: vec![
                ("toolhive".into(), "true".into()),
                ("toolhive-group".into(), "default".into()),
            ],
        };
        assert!(filter.matches(&labels));

        let filter = WorkloadFilter {
            label_selectors: vec![("toolhive-group".into(), "prod".into())],
        };
        assert!(!filter.matches(&labels));
    }

    #[test]
    fn test_state_collapse() {
        assert_eq!(
            ContainerState::Exited.to_workload_status(),
            WorkloadStatus::Stopped
        );
        assert_eq!(
            ContainerState::Running.to_workload_status(),
            WorkloadStatus::Running
        );
    }
}
