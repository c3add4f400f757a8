//! Transparent authenticating HTTP proxy in front of a workload.
//!
//! Middleware chain, outermost first: inbound auth validator, auth-info
//! route, optional token exchange, optional direct token injection, request
//! forwarder. Paths and query strings pass through untouched.

mod forward;
mod proxy;

pub use forward::RESTRICTED_HEADERS;
pub use proxy::{ProxyConfig, TransparentProxy};
