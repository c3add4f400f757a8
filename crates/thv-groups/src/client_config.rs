//! Locked, atomic upserts into external MCP client config files.
//!
//! A client config is a JSON file with an `mcpServers` mapping. Updates
//! leave every sibling key untouched, write through a temp file + rename,
//! and serialize on an advisory lock per path so concurrent `thv` processes
//! cannot interleave read-modify-write cycles.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value, json};
use thv_core::{Result, ThvError};

const MCP_SERVERS_KEY: &str = "mcpServers";

/// MCP clients with a well-known config location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientKind {
    ClaudeCode,
    Cursor,
    VsCode,
    Windsurf,
}

impl ClientKind {
    pub const ALL: &[ClientKind] = &[
        ClientKind::ClaudeCode,
        ClientKind::Cursor,
        ClientKind::VsCode,
        ClientKind::Windsurf,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ClaudeCode => "claude-code",
            Self::Cursor => "cursor",
            Self::VsCode => "vscode",
            Self::Windsurf => "windsurf",
        }
    }
}

impl std::str::FromStr for ClientKind {
    type Err = ThvError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "claude-code" => Ok(Self::ClaudeCode),
            "cursor" => Ok(Self::Cursor),
            "vscode" => Ok(Self::VsCode),
            "windsurf" => Ok(Self::Windsurf),
            other => Err(ThvError::invalid_config(
                "client",
                format!(
                    "unknown client '{other}'. Valid values: claude-code, cursor, vscode, windsurf"
                ),
            )),
        }
    }
}

impl std::fmt::Display for ClientKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical config file path for a client, under the user's home.
pub fn default_client_path(kind: ClientKind) -> Option<PathBuf> {
    let base = directories::BaseDirs::new()?;
    let home = base.home_dir();
    let path = match kind {
        ClientKind::ClaudeCode => home.join(".claude.json"),
        ClientKind::Cursor => home.join(".cursor").join("mcp.json"),
        ClientKind::VsCode => base.config_dir().join("Code").join("User").join("mcp.json"),
        ClientKind::Windsurf => home
            .join(".codeium")
            .join("windsurf")
            .join("mcp_config.json"),
    };
    Some(path)
}

/// One client config file, addressed by path.
#[derive(Debug, Clone)]
pub struct ClientConfigFile {
    path: PathBuf,
}

impl ClientConfigFile {
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Insert or replace the entry for `name`. Creates the file (and the
    /// `mcpServers` key) when missing.
    pub fn upsert_server(&self, name: &str, url: &str, transport: &str) -> Result<()> {
        self.modify(|servers| {
            servers.insert(
                name.to_string(),
                json!({ "url": url, "type": transport }),
            );
        })
    }

    /// Remove the entry for `name`; a missing entry is not an error.
    pub fn remove_server(&self, name: &str) -> Result<()> {
        if !self.path.exists() {
            return Ok(());
        }
        self.modify(|servers| {
            servers.remove(name);
        })
    }

    /// Current `mcpServers` mapping (empty when the file is missing).
    pub fn servers(&self) -> Result<Map<String, Value>> {
        let root = self.read_root()?;
        Ok(root
            .get(MCP_SERVERS_KEY)
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default())
    }

    fn modify(&self, mutate: impl FnOnce(&mut Map<String, Value>)) -> Result<()> {
        let _guard = thv_lock::lock_path(&self.path, "client config update")
            .map_err(ThvError::internal)?;

        let mut root = self.read_root()?;
        let servers = root
            .as_object_mut()
            .expect("read_root returns an object")
            .entry(MCP_SERVERS_KEY)
            .or_insert_with(|| Value::Object(Map::new()));
        let Some(servers) = servers.as_object_mut() else {
            return Err(ThvError::StateCorrupt {
                path: self.path.clone(),
                reason: format!("'{MCP_SERVERS_KEY}' is not an object"),
            });
        };
        mutate(servers);

        let content = serde_json::to_vec_pretty(&root).map_err(ThvError::internal)?;
        thv_lock::atomic_write(&self.path, &content).map_err(ThvError::internal)
    }

    /// Parse the file; a parse failure leaves it untouched and surfaces as
    /// corruption so the fan-out can report a partial failure.
    fn read_root(&self) -> Result<Value> {
        if !self.path.exists() {
            return Ok(json!({}));
        }
        let content = std::fs::read_to_string(&self.path).map_err(ThvError::internal)?;
        let value: Value = serde_json::from_str(&content).map_err(|e| ThvError::StateCorrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        if value.is_object() {
            Ok(value)
        } else {
            Err(ThvError::StateCorrupt {
                path: self.path.clone(),
                reason: "root is not a JSON object".to_string(),
            })
        }
    }
}
