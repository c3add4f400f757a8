//! RFC 8693 token exchange for the outbound request pipeline.
//!
//! Exchanged tokens are cached per (subject-token hash, audience, scope)
//! until 30 seconds before their expiry, so bursts of requests from the same
//! user ride one upstream token.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use http::HeaderMap;
use http::header::AUTHORIZATION;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use thv_core::{Result, ThvError};

use crate::config::{HeaderStrategy, TokenExchangeConfig};

const GRANT_TYPE: &str = "urn:ietf:params:oauth:grant-type:token-exchange";
const REQUESTED_TOKEN_TYPE: &str = "urn:ietf:params:oauth:token-type:access_token";

/// Expiry safety margin for cached exchanged tokens.
const EXPIRY_MARGIN: Duration = Duration::from_secs(30);

/// Fallback lifetime when the response carries no expiry at all.
const DEFAULT_LIFETIME: Duration = Duration::from_secs(60);

#[derive(Debug, Deserialize)]
struct ExchangeResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<u64>,
}

struct CachedExchange {
    access_token: String,
    expires_at: Instant,
}

/// Exchanges a subject token for one scoped to a different audience.
pub struct TokenExchanger {
    config: TokenExchangeConfig,
    http: reqwest::Client,
    cache: tokio::sync::Mutex<HashMap<String, CachedExchange>>,
}

impl TokenExchanger {
    pub fn new(config: TokenExchangeConfig) -> Result<Self> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(ThvError::internal)?;
        Ok(Self {
            config,
            http,
            cache: tokio::sync::Mutex::new(HashMap::new()),
        })
    }

    pub fn config(&self) -> &TokenExchangeConfig {
        &self.config
    }

    /// Exchange `subject_token`, serving cache hits while fresh.
    pub async fn exchange(&self, subject_token: &str) -> Result<String> {
        let key = self.cache_key(subject_token);
        {
            let cache = self.cache.lock().await;
            if let Some(entry) = cache.get(&key)
                && Instant::now() + EXPIRY_MARGIN < entry.expires_at
            {
                tracing::debug!(audience = %self.config.audience, "token exchange cache hit");
                return Ok(entry.access_token.clone());
            }
        }

        let scope = self.config.scopes.join(" ");
        let mut form: Vec<(&str, &str)> = vec![
            ("grant_type", GRANT_TYPE),
            ("subject_token", subject_token),
            ("subject_token_type", &self.config.subject_token_type),
            ("requested_token_type", REQUESTED_TOKEN_TYPE),
            ("audience", &self.config.audience),
        ];
        if !scope.is_empty() {
            form.push(("scope", &scope));
        }
        // Confidential clients authenticate via basic auth; public clients
        // carry their id in the body.
        if self.config.client_secret.is_none() {
            form.push(("client_id", &self.config.client_id));
        }
        let mut request = self.http.post(&self.config.token_url).form(&form);
        if let Some(secret) = &self.config.client_secret {
            request = request.basic_auth(&self.config.client_id, Some(secret));
        }

        let response = request
            .send()
            .await
            .map_err(|e| ThvError::AuthRejected(format!("token exchange request failed: {e}")))?;
        if !response.status().is_success() {
            return Err(ThvError::AuthRejected(format!(
                "token exchange returned status {}",
                response.status()
            )));
        }
        let body: ExchangeResponse = response
            .json()
            .await
            .map_err(|e| ThvError::AuthRejected(format!("invalid token exchange response: {e}")))?;

        let lifetime = body
            .expires_in
            .map(Duration::from_secs)
            .or_else(|| jwt_remaining_lifetime(&body.access_token))
            .unwrap_or(DEFAULT_LIFETIME);
        let entry = CachedExchange {
            access_token: body.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        };
        self.cache.lock().await.insert(key, entry);
        Ok(body.access_token)
    }

    /// Place the exchanged token according to the header strategy. The
    /// original Authorization header survives the custom strategy untouched.
    pub fn apply_headers(&self, headers: &mut HeaderMap, token: &str) -> Result<()> {
        let value = match self.config.header_strategy {
            HeaderStrategy::Replace => format!("Bearer {token}"),
            HeaderStrategy::Custom => token.to_string(),
        };
        let value = http::HeaderValue::from_str(&value)
            .map_err(|_| ThvError::AuthRejected("exchanged token is not header-safe".into()))?;
        match self.config.header_strategy {
            HeaderStrategy::Replace => {
                headers.insert(AUTHORIZATION, value);
            }
            HeaderStrategy::Custom => {
                let name = self
                    .config
                    .external_token_header_name
                    .as_deref()
                    .expect("validated: custom strategy has a header name");
                let name = http::HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                    ThvError::invalid_config(
                        "tokenExchange.externalTokenHeaderName",
                        "not a valid header name",
                    )
                })?;
                headers.insert(name, value);
            }
        }
        Ok(())
    }

    fn cache_key(&self, subject_token: &str) -> String {
        let digest = Sha256::digest(subject_token.as_bytes());
        let mut key = String::with_capacity(64 + 2 + self.config.audience.len());
        for byte in digest {
            key.push_str(&format!("{byte:02x}"));
        }
        key.push('|');
        key.push_str(&self.config.audience);
        key.push('|');
        key.push_str(&self.config.scopes.join(" "));
        key
    }
}

/// Best-effort exp extraction from a JWT payload, already net of now.
fn jwt_remaining_lifetime(token: &str) -> Option<Duration> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload).ok()?;
    #[derive(Deserialize)]
    struct ExpOnly {
        exp: u64,
    }
    let claims: ExpOnly = serde_json::from_slice(&bytes).ok()?;
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .ok()?
        .as_secs();
    claims.exp.checked_sub(now).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(token_url: String) -> TokenExchangeConfig {
        TokenExchangeConfig {
            token_url,
            client_id: "proxy".into(),
            client_secret: None,
            audience: "svc-b".into(),
            scopes: vec!["read".into()],
            subject_token_type: "urn:ietf:params:oauth:token-type:access_token".into(),
            header_strategy: HeaderStrategy::Replace,
            external_token_header_name: None,
        }
    }

    #[tokio::test]
    async fn test_exchange_and_cache_hit() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=urn%3Aietf%3Aparams%3Aoauth%3Agrant-type%3Atoken-exchange"))
            .and(body_string_contains("audience=svc-b"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "svc-b-token",
                "issued_token_type": REQUESTED_TOKEN_TYPE,
                "token_type": "Bearer",
                "expires_in": 3600,
            })))
            .expect(1)
            .mount(&server)
            .await;

        let exchanger = TokenExchanger::new(config(format!("{}/token", server.uri()))).unwrap();
        assert_eq!(exchanger.exchange("user-jwt").await.unwrap(), "svc-b-token");
        // Second call within the expiry window must not hit the endpoint.
        assert_eq!(exchanger.exchange("user-jwt").await.unwrap(), "svc-b-token");
    }

    #[tokio::test]
    async fn test_distinct_subjects_do_not_share_cache() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "tok",
                "expires_in": 3600,
            })))
            .expect(2)
            .mount(&server)
            .await;

        let exchanger = TokenExchanger::new(config(format!("{}/token", server.uri()))).unwrap();
        exchanger.exchange("user-a").await.unwrap();
        exchanger.exchange("user-b").await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(403))
            .mount(&server)
            .await;

        let exchanger = TokenExchanger::new(config(format!("{}/token", server.uri()))).unwrap();
        assert!(matches!(
            exchanger.exchange("user-jwt").await,
            Err(ThvError::AuthRejected(_))
        ));
    }

    #[test]
    fn test_apply_headers_replace() {
        let exchanger = TokenExchanger::new(config("https://idp/token".into())).unwrap();
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer original".parse().unwrap());
        exchanger.apply_headers(&mut headers, "exchanged").unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer exchanged");
    }

    #[test]
    fn test_apply_headers_custom_keeps_authorization() {
        let mut cfg = config("https://idp/token".into());
        cfg.header_strategy = HeaderStrategy::Custom;
        cfg.external_token_header_name = Some("X-Upstream-Token".into());
        let exchanger = TokenExchanger::new(cfg).unwrap();

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, "Bearer original".parse().unwrap());
        exchanger.apply_headers(&mut headers, "exchanged").unwrap();
        assert_eq!(headers[AUTHORIZATION], "Bearer original");
        assert_eq!(headers["X-Upstream-Token"], "exchanged");
    }

    #[test]
    fn test_jwt_remaining_lifetime_parses_exp() {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_secs();
        let payload = URL_SAFE_NO_PAD.encode(format!("{{\"exp\":{}}}", now + 300));
        let token = format!("h.{payload}.s");
        let lifetime = jwt_remaining_lifetime(&token).unwrap();
        assert!(lifetime <= Duration::from_secs(300));
        assert!(lifetime > Duration::from_secs(290));
    }
}
