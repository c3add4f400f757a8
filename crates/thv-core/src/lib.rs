//! Shared types and the error taxonomy for the ToolHive workspace.

pub mod error;
pub mod types;
pub mod values;

pub use error::{ResourceKind, ThvError};
pub use types::{
    OutputFormat, ProxyMode, ToolType, TransportType, Workload, WorkloadStatus, validate_name,
    workload_url,
};
pub use values::MetaValue;

/// Convenience alias used by every library crate in the workspace.
pub type Result<T> = std::result::Result<T, ThvError>;
