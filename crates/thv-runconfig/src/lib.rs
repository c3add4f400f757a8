//! The declarative, persisted description of a workload and its builder.

pub mod builder;
pub mod config;
pub mod permissions;

pub use builder::{ImageResolver, ResolvedImage, RunConfigBuilder, ServerMetadata};
pub use config::{OtelConfig, RunConfig, SCHEMA_VERSION};
pub use permissions::{NetworkPermissions, OutboundPermissions, PermissionProfile};
