//! Inbound token validation: JWT against JWKS first, introspection fallback
//! for opaque tokens, structured rejection kinds for the proxy's 401 path.

use std::time::Duration;

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode, decode_header};
use serde::{Deserialize, Deserializer, Serialize};
use thv_core::ThvError;
use tokio::sync::OnceCell;

use crate::config::OidcConfig;
use crate::discovery;
use crate::jwks::JwksClient;

const CLOCK_SKEW_LEEWAY_SECS: u64 = 60;
const INTROSPECTION_TIMEOUT: Duration = Duration::from_secs(5);
const ALLOWED_ALGORITHMS: &[Algorithm] = &[Algorithm::RS256, Algorithm::ES256, Algorithm::PS256];

/// Why a token was rejected (or could not be checked).
#[derive(thiserror::Error, Debug)]
pub enum AuthError {
    #[error("no bearer token presented")]
    MissingToken,

    #[error("malformed token")]
    MalformedToken,

    #[error("token expired or not yet valid")]
    ExpiredToken,

    #[error("token signature invalid")]
    InvalidSignature,

    #[error("token audience mismatch")]
    AudienceMismatch,

    #[error("token issuer mismatch")]
    IssuerMismatch,

    #[error("opaque tokens are not accepted")]
    OpaqueToken,

    #[error("introspection failed: {0}")]
    Introspection(String),

    #[error("OIDC discovery failed: {0}")]
    Discovery(String),

    #[error("JWKS unavailable: {0}")]
    Jwks(String),
}

impl From<AuthError> for ThvError {
    fn from(err: AuthError) -> Self {
        ThvError::AuthRejected(err.to_string())
    }
}

/// Claims the proxy cares about. Everything else rides along in `extra` for
/// downstream consumers (token exchange, audit).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Claims {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, deserialize_with = "string_or_vec", skip_serializing_if = "Vec::is_empty")]
    pub aud: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nbf: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

fn string_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Aud {
        One(String),
        Many(Vec<String>),
    }
    Ok(match Option::<Aud>::deserialize(deserializer)? {
        None => Vec::new(),
        Some(Aud::One(s)) => vec![s],
        Some(Aud::Many(v)) => v,
    })
}

/// RFC 7662 introspection response.
#[derive(Debug, Deserialize)]
struct IntrospectionResponse {
    active: bool,
    #[serde(default)]
    sub: Option<String>,
    #[serde(default)]
    iss: Option<String>,
    #[serde(default, deserialize_with = "string_or_vec")]
    aud: Vec<String>,
    #[serde(default)]
    exp: Option<u64>,
    #[serde(default)]
    scope: Option<String>,
}

/// Validates inbound bearer tokens for the proxy.
pub struct TokenValidator {
    config: OidcConfig,
    http: reqwest::Client,
    jwks: OnceCell<JwksClient>,
}

impl TokenValidator {
    pub fn new(config: OidcConfig) -> Result<Self, ThvError> {
        config.validate()?;
        let http = reqwest::Client::builder()
            .build()
            .map_err(ThvError::internal)?;
        Ok(Self {
            config,
            http,
            jwks: OnceCell::new(),
        })
    }

    pub fn config(&self) -> &OidcConfig {
        &self.config
    }

    /// `WWW-Authenticate` value for 401 responses (RFC 9728).
    pub fn challenge_header(&self) -> String {
        match &self.config.resource_url {
            Some(resource) => format!("Bearer resource=\"{resource}\""),
            None => "Bearer".to_string(),
        }
    }

    /// Validate a bearer token, trying JWT verification first and falling
    /// back to introspection (or the opaque allowance) for non-JWT tokens.
    pub async fn validate(&self, token: &str) -> Result<Claims, AuthError> {
        if token.is_empty() {
            return Err(AuthError::MissingToken);
        }
        if looks_like_jwt(token) {
            return self.validate_jwt(token).await;
        }
        if self.config.introspection_url.is_some() {
            return self.introspect(token).await;
        }
        if self.config.allow_opaque_tokens {
            tracing::debug!("accepting opaque token without introspection");
            return Ok(Claims::default());
        }
        Err(AuthError::OpaqueToken)
    }

    async fn jwks_client(&self) -> Result<&JwksClient, AuthError> {
        self.jwks
            .get_or_try_init(|| async {
                if let Some(url) = &self.config.jwks_url {
                    return Ok(JwksClient::new(url.clone(), self.http.clone()));
                }
                let issuer = self
                    .config
                    .issuer
                    .as_deref()
                    .ok_or_else(|| AuthError::Jwks("no jwksUrl and no issuer to discover one".into()))?;
                let doc = discovery::discover(&self.http, issuer).await?;
                Ok(JwksClient::new(doc.jwks_uri, self.http.clone()))
            })
            .await
    }

    async fn validate_jwt(&self, token: &str) -> Result<Claims, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::MalformedToken)?;
        if !ALLOWED_ALGORITHMS.contains(&header.alg) {
            return Err(AuthError::InvalidSignature);
        }

        let client = self.jwks_client().await?;
        let mut jwks = client.get().await?;
        let jwk = match &header.kid {
            Some(kid) => {
                if jwks.find(kid).is_none() {
                    // Key rotation: the kid may be newer than our cache.
                    jwks = client.force_refresh().await?;
                }
                jwks.find(kid).ok_or(AuthError::InvalidSignature)?
            }
            None => jwks.keys.first().ok_or(AuthError::InvalidSignature)?,
        };
        let key = DecodingKey::from_jwk(jwk).map_err(|_| AuthError::InvalidSignature)?;

        let mut validation = Validation::new(header.alg);
        validation.leeway = CLOCK_SKEW_LEEWAY_SECS;
        if let Some(issuer) = &self.config.issuer {
            validation.set_issuer(&[issuer]);
        }
        match &self.config.audience {
            Some(audience) => validation.set_audience(&[audience]),
            None => validation.validate_aud = false,
        }

        let data = decode::<Claims>(token, &key, &validation).map_err(map_jwt_error)?;
        Ok(data.claims)
    }

    async fn introspect(&self, token: &str) -> Result<Claims, AuthError> {
        let url = self
            .config
            .introspection_url
            .as_deref()
            .ok_or_else(|| AuthError::Introspection("no introspection endpoint".into()))?;

        let mut request = self
            .http
            .post(url)
            .timeout(INTROSPECTION_TIMEOUT)
            .form(&[("token", token), ("token_type_hint", "access_token")]);
        if let Some(client_id) = &self.config.client_id {
            request = request.basic_auth(client_id, self.config.client_secret.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| AuthError::Introspection(format!("POST {url}: {e}")))?;
        if !response.status().is_success() {
            return Err(AuthError::Introspection(format!(
                "POST {url}: status {}",
                response.status()
            )));
        }
        let body: IntrospectionResponse = response
            .json()
            .await
            .map_err(|e| AuthError::Introspection(format!("invalid response from {url}: {e}")))?;

        if !body.active {
            return Err(AuthError::ExpiredToken);
        }
        if let Some(expected) = &self.config.issuer
            && body.iss.as_deref().is_some_and(|iss| iss != expected)
        {
            return Err(AuthError::IssuerMismatch);
        }
        if let Some(expected) = &self.config.audience
            && !body.aud.is_empty()
            && !body.aud.iter().any(|aud| aud == expected)
        {
            return Err(AuthError::AudienceMismatch);
        }

        Ok(Claims {
            sub: body.sub,
            iss: body.iss,
            aud: body.aud,
            exp: body.exp,
            scope: body.scope,
            ..Claims::default()
        })
    }
}

fn looks_like_jwt(token: &str) -> bool {
    token.bytes().filter(|&b| b == b'.').count() == 2
}

fn map_jwt_error(err: jsonwebtoken::errors::Error) -> AuthError {
    use jsonwebtoken::errors::ErrorKind;
    match err.kind() {
        ErrorKind::ExpiredSignature | ErrorKind::ImmatureSignature => AuthError::ExpiredToken,
        ErrorKind::InvalidAudience => AuthError::AudienceMismatch,
        ErrorKind::InvalidIssuer => AuthError::IssuerMismatch,
        ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) | ErrorKind::InvalidToken => {
            AuthError::MalformedToken
        }
        _ => AuthError::InvalidSignature,
    }
}
