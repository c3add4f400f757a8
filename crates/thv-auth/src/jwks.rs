//! JWKS fetching with TTL caching and rate-limited refresh.

use std::time::{Duration, Instant};

use jsonwebtoken::jwk::JwkSet;
use tokio::sync::RwLock;

use crate::validator::AuthError;

const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(600);
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(5);

struct CachedJwks {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Caching client for a JWKS endpoint.
///
/// Keys are cached for ten minutes; a failed validation can force a refresh
/// (key rotation) but refreshes are rate limited so a flood of bad tokens
/// cannot hammer the authorization server.
pub struct JwksClient {
    jwks_uri: String,
    http: reqwest::Client,
    cache: RwLock<Option<CachedJwks>>,
    cache_ttl: Duration,
}

impl JwksClient {
    pub fn new(jwks_uri: String, http: reqwest::Client) -> Self {
        Self {
            jwks_uri,
            http,
            cache: RwLock::new(None),
            cache_ttl: DEFAULT_CACHE_TTL,
        }
    }

    pub fn jwks_uri(&self) -> &str {
        &self.jwks_uri
    }

    /// Current key set, fetching on miss or expiry.
    pub async fn get(&self) -> Result<JwkSet, AuthError> {
        if let Some(cached) = self.cache.read().await.as_ref()
            && cached.fetched_at.elapsed() < self.cache_ttl
        {
            return Ok(cached.jwks.clone());
        }
        self.refresh(false).await
    }

    /// Drop the cache and refetch, unless a refresh just happened.
    /// Used when a kid is missing from the cached set.
    pub async fn force_refresh(&self) -> Result<JwkSet, AuthError> {
        self.refresh(true).await
    }

    async fn refresh(&self, forced: bool) -> Result<JwkSet, AuthError> {
        let mut cache = self.cache.write().await;
        // Another task may have refreshed while we waited for the lock; a
        // forced refresh also backs off if the set is younger than the
        // rate-limit window.
        if let Some(cached) = cache.as_ref() {
            let age = cached.fetched_at.elapsed();
            if age < MIN_REFRESH_INTERVAL || (!forced && age < self.cache_ttl) {
                return Ok(cached.jwks.clone());
            }
        }

        tracing::debug!(jwks_uri = %self.jwks_uri, forced, "fetching JWKS");
        let response = self
            .http
            .get(&self.jwks_uri)
            .timeout(Duration::from_secs(10))
            .send()
            .await
            .map_err(|e| AuthError::Jwks(format!("GET {}: {e}", self.jwks_uri)))?;
        if !response.status().is_success() {
            return Err(AuthError::Jwks(format!(
                "GET {}: status {}",
                self.jwks_uri,
                response.status()
            )));
        }
        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| AuthError::Jwks(format!("invalid JWKS from {}: {e}", self.jwks_uri)))?;

        *cache = Some(CachedJwks {
            jwks: jwks.clone(),
            fetched_at: Instant::now(),
        });
        Ok(jwks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn empty_jwks() -> serde_json::Value {
        serde_json::json!({ "keys": [] })
    }

    #[tokio::test]
    async fn test_get_caches_across_calls() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}/jwks", server.uri()), reqwest::Client::new());
        client.get().await.unwrap();
        client.get().await.unwrap();
        // MockServer verifies the single expected call on drop.
    }

    #[tokio::test]
    async fn test_force_refresh_is_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/jwks"))
            .respond_with(ResponseTemplate::new(200).set_body_json(empty_jwks()))
            .expect(1)
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}/jwks", server.uri()), reqwest::Client::new());
        client.get().await.unwrap();
        // Within the rate-limit window the forced refresh reuses the cache.
        client.force_refresh().await.unwrap();
    }

    #[tokio::test]
    async fn test_error_status_surfaces() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = JwksClient::new(format!("{}/jwks", server.uri()), reqwest::Client::new());
        assert!(matches!(client.get().await, Err(AuthError::Jwks(_))));
    }
}
