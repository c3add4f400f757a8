//! OAuth Protected Resource metadata (RFC 9728).
//!
//! MCP clients fetch this document from the proxy to discover which
//! authorization server to obtain tokens from.

use axum::{Json, Router, extract::State, routing::get};
use serde::{Deserialize, Serialize};

use crate::config::OidcConfig;

pub const WELL_KNOWN_PATH: &str = "/.well-known/oauth-protected-resource";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectedResourceMetadata {
    pub resource: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub authorization_servers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bearer_methods_supported: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes_supported: Vec<String>,
}

impl ProtectedResourceMetadata {
    /// Derive the document from the validator config. `fallback_resource`
    /// is the proxy's own URL, used when no explicit resource URL is set.
    pub fn from_oidc(config: &OidcConfig, fallback_resource: &str) -> Self {
        Self {
            resource: config
                .resource_url
                .clone()
                .unwrap_or_else(|| fallback_resource.to_string()),
            authorization_servers: config.issuer.iter().cloned().collect(),
            bearer_methods_supported: vec!["header".to_string()],
            scopes_supported: Vec::new(),
        }
    }

    /// Router serving the well-known path.
    pub fn router(self) -> Router {
        Router::new()
            .route(WELL_KNOWN_PATH, get(serve_metadata))
            .with_state(self)
    }
}

async fn serve_metadata(
    State(metadata): State<ProtectedResourceMetadata>,
) -> Json<ProtectedResourceMetadata> {
    Json(metadata)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_oidc_prefers_explicit_resource() {
        let config = OidcConfig {
            issuer: Some("https://idp.example".into()),
            resource_url: Some("https://thv.local/mcp".into()),
            ..Default::default()
        };
        let metadata = ProtectedResourceMetadata::from_oidc(&config, "http://127.0.0.1:40000");
        assert_eq!(metadata.resource, "https://thv.local/mcp");
        assert_eq!(metadata.authorization_servers, vec!["https://idp.example"]);
    }

    #[test]
    fn test_from_oidc_falls_back_to_proxy_url() {
        let config = OidcConfig {
            jwks_url: Some("https://idp.example/jwks".into()),
            ..Default::default()
        };
        let metadata = ProtectedResourceMetadata::from_oidc(&config, "http://127.0.0.1:40000");
        assert_eq!(metadata.resource, "http://127.0.0.1:40000");
        assert!(metadata.authorization_servers.is_empty());
    }

    #[test]
    fn test_document_shape() {
        let config = OidcConfig {
            issuer: Some("https://idp.example".into()),
            ..Default::default()
        };
        let metadata = ProtectedResourceMetadata::from_oidc(&config, "http://x");
        let value = serde_json::to_value(&metadata).unwrap();
        assert_eq!(value["authorization_servers"][0], "https://idp.example");
        assert_eq!(value["bearer_methods_supported"][0], "header");
    }
}
