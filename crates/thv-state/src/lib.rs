//! Persisted state: RunConfigs, group records and last-known status.
//!
//! The store answers "what configurations exist"; the container runtime
//! answers "what is currently running". Writes are atomic per key and
//! serialized by per-key advisory locks.

mod group;
mod store;

pub use group::{DEFAULT_GROUP, Group};
pub use store::StateStore;
