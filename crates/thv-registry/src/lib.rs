//! Registry resolution: `server-name | image | scheme://pkg` to a concrete
//! container image plus metadata.

mod registry;
mod resolver;
mod templates;

pub use registry::{Provenance, Registry, RegistryClient, RegistryEntry, RegistrySource};
pub use resolver::{RegistryResolver, VerifyMode};
pub use templates::{build_tag, dockerfile_for, parse_scheme};
