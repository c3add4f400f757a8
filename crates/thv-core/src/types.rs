use chrono::{DateTime, Utc};
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::OnceLock;

use crate::error::ThvError;

/// Wire format between the MCP client and the proxy.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportType {
    Stdio,
    Sse,
    StreamableHttp,
}

impl TransportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stdio => "stdio",
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

impl std::fmt::Display for TransportType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "stdio" => Ok(Self::Stdio),
            "sse" => Ok(Self::Sse),
            "streamable-http" => Ok(Self::StreamableHttp),
            other => Err(format!(
                "invalid transport '{other}'. Valid values: stdio, sse, streamable-http"
            )),
        }
    }
}

/// Outward-facing HTTP flavor of the proxy when the container speaks stdio.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProxyMode {
    Sse,
    StreamableHttp,
}

impl ProxyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sse => "sse",
            Self::StreamableHttp => "streamable-http",
        }
    }
}

impl std::fmt::Display for ProxyMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runtime status of a workload, derived from the container runtime on every
/// list. The state store only persists a last-known copy for crash recovery.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkloadStatus {
    Starting,
    Running,
    Stopping,
    Stopped,
    Error,
    #[default]
    Unknown,
}

impl WorkloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Stopped => "stopped",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for WorkloadStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a workload's payload was materialized.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolType {
    #[default]
    Mcp,
    Remote,
}

impl ToolType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mcp => "mcp",
            Self::Remote => "remote",
        }
    }
}

/// Output format for CLI responses.
#[derive(Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
    /// Ready-to-paste `mcpServers` client config fragment.
    Mcpservers,
}

/// A running MCP server instance: container (or remote endpoint) plus proxy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Workload {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub container_id: Option<String>,
    pub status: WorkloadStatus,
    pub transport: TransportType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy_mode: Option<ProxyMode>,
    pub host: String,
    pub proxy_port: u16,
    #[serde(default)]
    pub target_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_host: Option<String>,
    pub created_at: DateTime<Utc>,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub labels: HashMap<String, String>,
    #[serde(default)]
    pub tool_type: ToolType,
}

fn name_pattern() -> &'static regex::Regex {
    static PATTERN: OnceLock<regex::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| regex::Regex::new(r"^[a-z0-9][a-z0-9-]{0,62}$").unwrap())
}

/// Validate a workload or group name (DNS-label form, max 63 chars).
pub fn validate_name(name: &str) -> Result<(), ThvError> {
    if name_pattern().is_match(name) {
        Ok(())
    } else {
        Err(ThvError::invalid_config(
            "name",
            format!(
                "'{name}' must match ^[a-z0-9][a-z0-9-]{{0,62}}$ (lowercase DNS label, max 63 chars)"
            ),
        ))
    }
}

/// Derive the client-facing URL for a workload.
///
/// SSE-facing workloads advertise `/sse` with the name carried in the
/// fragment so clients can disambiguate; streamable HTTP advertises `/mcp`.
pub fn workload_url(
    transport: TransportType,
    proxy_mode: Option<ProxyMode>,
    host: &str,
    proxy_port: u16,
    name: &str,
) -> String {
    let facing = match transport {
        TransportType::Stdio => proxy_mode.unwrap_or(ProxyMode::StreamableHttp),
        TransportType::Sse => ProxyMode::Sse,
        TransportType::StreamableHttp => ProxyMode::StreamableHttp,
    };
    match facing {
        ProxyMode::Sse => format!("http://{host}:{proxy_port}/sse#name={name}"),
        ProxyMode::StreamableHttp => format!("http://{host}:{proxy_port}/mcp"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_transport_round_trip() {
        for t in ["stdio", "sse", "streamable-http"] {
            assert_eq!(<TransportType as FromStr>::from_str(t).unwrap().as_str(), t);
        }
        assert!(<TransportType as FromStr>::from_str("http").is_err());
    }

    #[test]
    fn test_validate_name_accepts_dns_labels() {
        assert!(validate_name("echo").is_ok());
        assert!(validate_name("a").is_ok());
        assert!(validate_name("my-server-2").is_ok());
        assert!(validate_name(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_validate_name_rejects_bad_forms() {
        assert!(validate_name("").is_err());
        assert!(validate_name("-leading").is_err());
        assert!(validate_name("UPPER").is_err());
        assert!(validate_name("has_underscore").is_err());
        assert!(validate_name(&"a".repeat(64)).is_err());
    }

    #[test]
    fn test_workload_url_sse_carries_name_fragment() {
        let url = workload_url(
            TransportType::Stdio,
            Some(ProxyMode::Sse),
            "127.0.0.1",
            40000,
            "echo",
        );
        assert_eq!(url, "http://127.0.0.1:40000/sse#name=echo");
    }

    #[test]
    fn test_workload_url_streamable_http() {
        let url = workload_url(TransportType::StreamableHttp, None, "127.0.0.1", 8080, "x");
        assert_eq!(url, "http://127.0.0.1:8080/mcp");
    }

    #[test]
    fn test_workload_serde_uses_camel_case() {
        let w = Workload {
            name: "echo".into(),
            image: "example/mcp-echo:1".into(),
            container_id: Some("abc123".into()),
            status: WorkloadStatus::Running,
            transport: TransportType::Stdio,
            proxy_mode: Some(ProxyMode::Sse),
            host: "127.0.0.1".into(),
            proxy_port: 40000,
            target_port: 9090,
            target_host: None,
            created_at: Utc::now(),
            url: "http://127.0.0.1:40000/sse#name=echo".into(),
            group: Some("default".into()),
            labels: HashMap::new(),
            tool_type: ToolType::Mcp,
        };
        let value = serde_json::to_value(&w).unwrap();
        assert_eq!(value["proxyPort"], 40000);
        assert_eq!(value["transport"], "stdio");
        assert_eq!(value["proxyMode"], "sse");
        assert_eq!(value["toolType"], "mcp");
    }
}
