use serde::{Deserialize, Serialize};
use thv_core::{Result, ThvError};

/// Inbound token validation settings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct OidcConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audience: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jwks_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub introspection_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    /// Advertised in `WWW-Authenticate: Bearer resource="…"` on rejection.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_url: Option<String>,
    #[serde(default)]
    pub allow_opaque_tokens: bool,
}

impl OidcConfig {
    /// The validator needs at least one verification path.
    pub fn validate(&self) -> Result<()> {
        if self.issuer.is_none() && self.jwks_url.is_none() && self.introspection_url.is_none() {
            return Err(ThvError::invalid_config(
                "oidc",
                "at least one of issuer, jwksUrl or introspectionUrl is required",
            ));
        }
        Ok(())
    }
}

/// Where the exchanged token lands on the forwarded request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderStrategy {
    /// Replace `Authorization: Bearer …`.
    #[default]
    Replace,
    /// Write a named header, leaving the original Authorization untouched.
    Custom,
}

/// RFC 8693 token-exchange settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct TokenExchangeConfig {
    pub token_url: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    pub audience: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default = "default_subject_token_type")]
    pub subject_token_type: String,
    #[serde(default)]
    pub header_strategy: HeaderStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_token_header_name: Option<String>,
}

fn default_subject_token_type() -> String {
    "urn:ietf:params:oauth:token-type:access_token".to_string()
}

impl TokenExchangeConfig {
    /// Invariant: `headerStrategy=custom ⇔ externalTokenHeaderName≠""`.
    pub fn validate(&self) -> Result<()> {
        let has_name = self
            .external_token_header_name
            .as_deref()
            .is_some_and(|n| !n.is_empty());
        match self.header_strategy {
            HeaderStrategy::Custom if !has_name => Err(ThvError::invalid_config(
                "tokenExchange.externalTokenHeaderName",
                "required when headerStrategy is 'custom'",
            )),
            HeaderStrategy::Replace if has_name => Err(ThvError::invalid_config(
                "tokenExchange.externalTokenHeaderName",
                "only meaningful when headerStrategy is 'custom'",
            )),
            _ => Ok(()),
        }
    }
}

/// Outbound auth settings persisted in a RunConfig (mirrors the inbound OIDC
/// flags for the remote side).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RemoteAuthConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub issuer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub authorize_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_url: Option<String>,
    pub client_id: String,
    /// Falls back to `TOOLHIVE_REMOTE_OAUTH_CLIENT_SECRET` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_secret: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub scopes: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub callback_port: Option<u16>,
    #[serde(default)]
    pub skip_browser: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

impl RemoteAuthConfig {
    /// Either discovery (issuer) or a manual endpoint pair must be present.
    /// An empty config is also valid: the proxy then relies on
    /// WWW-Authenticate sniffing to find the issuer.
    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            return Err(ThvError::invalid_config(
                "remoteAuth.clientId",
                "client id is required",
            ));
        }
        let manual = self.authorize_url.is_some() || self.token_url.is_some();
        if manual && (self.authorize_url.is_none() || self.token_url.is_none()) {
            return Err(ThvError::invalid_config(
                "remoteAuth",
                "authorizeUrl and tokenUrl must be set together",
            ));
        }
        if manual && self.issuer.is_some() {
            return Err(ThvError::invalid_config(
                "remoteAuth",
                "set either issuer (discovery) or authorizeUrl/tokenUrl, not both",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_oidc_requires_a_verification_path() {
        let config = OidcConfig::default();
        assert!(config.validate().is_err());

        let config = OidcConfig {
            issuer: Some("https://idp.example".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        let config = OidcConfig {
            introspection_url: Some("https://idp.example/introspect".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_token_exchange_header_strategy_invariant() {
        let base = TokenExchangeConfig {
            token_url: "https://idp.example/token".into(),
            client_id: "abc".into(),
            client_secret: None,
            audience: "svc-b".into(),
            scopes: vec![],
            subject_token_type: default_subject_token_type(),
            header_strategy: HeaderStrategy::Custom,
            external_token_header_name: None,
        };
        assert!(base.validate().is_err());

        let ok = TokenExchangeConfig {
            external_token_header_name: Some("X-Upstream-Token".into()),
            ..base.clone()
        };
        assert!(ok.validate().is_ok());

        let bad = TokenExchangeConfig {
            header_strategy: HeaderStrategy::Replace,
            external_token_header_name: Some("X-Upstream-Token".into()),
            ..base
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_remote_auth_endpoint_pairing() {
        let config = RemoteAuthConfig {
            client_id: "abc".into(),
            authorize_url: Some("https://idp.example/authorize".into()),
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = RemoteAuthConfig {
            client_id: "abc".into(),
            authorize_url: Some("https://idp.example/authorize".into()),
            token_url: Some("https://idp.example/token".into()),
            ..Default::default()
        };
        assert!(config.validate().is_ok());

        // Sniffing-only config: just a client id.
        let config = RemoteAuthConfig {
            client_id: "abc".into(),
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_strict_deserialization() {
        let err = serde_json::from_str::<OidcConfig>("{\"unknown\":1}");
        assert!(err.is_err());
    }
}
