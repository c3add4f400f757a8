//! Groups of workloads and the reconciliation of their URLs into external
//! MCP client config files.

mod client_config;
mod manager;

pub use client_config::{ClientConfigFile, ClientKind, default_client_path};
pub use manager::GroupManager;
