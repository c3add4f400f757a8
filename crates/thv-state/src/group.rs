use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The implicit group every workload falls back to. Cannot be deleted.
pub const DEFAULT_GROUP: &str = "default";

/// A named set of workloads sharing lifecycle and client-config scope.
/// Membership is stored on each workload's RunConfig, not here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Group {
    pub name: String,
    pub created_at: DateTime<Utc>,
    /// MCP client names whose config files receive this group's URLs.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub registered_clients: Vec<String>,
}

impl Group {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            created_at: Utc::now(),
            registered_clients: Vec::new(),
        }
    }
}
