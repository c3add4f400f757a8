use std::path::PathBuf;

/// What kind of named resource an operation was addressing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Workload,
    Group,
    Secret,
    Client,
    Image,
}

impl std::fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Workload => "workload",
            Self::Group => "group",
            Self::Secret => "secret",
            Self::Client => "client",
            Self::Image => "image",
        };
        f.write_str(s)
    }
}

/// Error taxonomy surfaced to callers.
///
/// Fan-out operations never fail fast: they run every worker, aggregate, and
/// return [`ThvError::PartialFailure`] with per-name results. Transient I/O
/// is retried inside the component that owns it; after exhaustion the last
/// underlying cause is attached to the variant below.
#[derive(thiserror::Error, Debug)]
pub enum ThvError {
    #[error("invalid configuration at '{field}': {reason}")]
    InvalidConfig { field: String, reason: String },

    #[error("{kind} '{name}' not found")]
    NotFound { kind: ResourceKind, name: String },

    #[error("{kind} '{name}' already exists")]
    AlreadyExists { kind: ResourceKind, name: String },

    #[error("container runtime unavailable: {0}")]
    RuntimeUnavailable(String),

    #[error("failed to pull image '{image}': {reason}")]
    ImagePullFailed { image: String, reason: String },

    #[error("failed to build image '{tag}': {reason}")]
    ImageBuildFailed { tag: String, reason: String },

    #[error("provenance verification failed for '{image}': {reason}")]
    VerificationFailed { image: String, reason: String },

    #[error("identifier '{0}' could not be resolved to an image")]
    Unresolvable(String),

    #[error("authorization flow timed out after {0}s")]
    AuthTimeout(u64),

    #[error("token rejected: {0}")]
    AuthRejected(String),

    #[error("could not bind proxy on {addr}: {reason}")]
    ProxyBindFailed { addr: String, reason: String },

    #[error("operation partially failed for {} target(s)", .failures.len())]
    PartialFailure { failures: Vec<(String, String)> },

    #[error("persisted state at {} is corrupt: {reason}", .path.display())]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("{0}")]
    Internal(String),
}

impl ThvError {
    pub fn invalid_config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            field: field.into(),
            reason: reason.into(),
        }
    }

    pub fn not_found(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            name: name.into(),
        }
    }

    pub fn already_exists(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self::AlreadyExists {
            kind,
            name: name.into(),
        }
    }

    pub fn internal(err: impl std::fmt::Display) -> Self {
        Self::Internal(err.to_string())
    }

    /// Stable machine-readable kind used in the JSON error envelope.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidConfig { .. } => "invalid_config",
            Self::NotFound { .. } => "not_found",
            Self::AlreadyExists { .. } => "already_exists",
            Self::RuntimeUnavailable(_) => "runtime_unavailable",
            Self::ImagePullFailed { .. } => "image_pull_failed",
            Self::ImageBuildFailed { .. } => "image_build_failed",
            Self::VerificationFailed { .. } => "verification_failed",
            Self::Unresolvable(_) => "unresolvable",
            Self::AuthTimeout(_) => "auth_timeout",
            Self::AuthRejected(_) => "auth_rejected",
            Self::ProxyBindFailed { .. } => "proxy_bind_failed",
            Self::PartialFailure { .. } => "partial_failure",
            Self::StateCorrupt { .. } => "state_corrupt",
            Self::Internal(_) => "internal",
        }
    }

    /// Process exit code for the CLI: 2 invalid configuration, 3 runtime
    /// unavailable, 1 everything else.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::InvalidConfig { .. } => 2,
            Self::RuntimeUnavailable(_) => 3,
            _ => 1,
        }
    }

    /// Details payload for the JSON error envelope (per-name results for
    /// partial failures, field path for validation errors).
    pub fn details(&self) -> serde_json::Value {
        match self {
            Self::InvalidConfig { field, .. } => serde_json::json!({ "field": field }),
            Self::PartialFailure { failures } => {
                let map: serde_json::Map<String, serde_json::Value> = failures
                    .iter()
                    .map(|(name, err)| (name.clone(), serde_json::Value::String(err.clone())))
                    .collect();
                serde_json::Value::Object(map)
            }
            Self::StateCorrupt { path, .. } => {
                serde_json::json!({ "path": path.display().to_string() })
            }
            _ => serde_json::Value::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_invalid_config() {
        let err = ThvError::invalid_config("oidc.issuer", "must be an https URL");
        assert_eq!(
            err.to_string(),
            "invalid configuration at 'oidc.issuer': must be an https URL"
        );
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn test_display_not_found() {
        let err = ThvError::not_found(ResourceKind::Workload, "echo");
        assert_eq!(err.to_string(), "workload 'echo' not found");
        assert_eq!(err.kind(), "not_found");
    }

    #[test]
    fn test_display_partial_failure_counts_targets() {
        let err = ThvError::PartialFailure {
            failures: vec![
                ("a".into(), "stuck".into()),
                ("b".into(), "gone".into()),
            ],
        };
        assert_eq!(err.to_string(), "operation partially failed for 2 target(s)");
        assert_eq!(err.details()["a"], "stuck");
    }

    #[test]
    fn test_runtime_unavailable_exit_code() {
        let err = ThvError::RuntimeUnavailable("socket refused".into());
        assert_eq!(err.exit_code(), 3);
        assert_eq!(err.kind(), "runtime_unavailable");
    }
}
