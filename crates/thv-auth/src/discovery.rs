//! OIDC discovery (RFC 8414) and `WWW-Authenticate` challenge sniffing.

use std::time::Duration;

use serde::Deserialize;

use crate::validator::AuthError;

const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(10);

/// The slice of the OIDC discovery document the core consumes.
#[derive(Debug, Clone, Deserialize)]
pub struct DiscoveryDocument {
    pub issuer: String,
    #[serde(default)]
    pub authorization_endpoint: Option<String>,
    #[serde(default)]
    pub token_endpoint: Option<String>,
    pub jwks_uri: String,
    #[serde(default)]
    pub introspection_endpoint: Option<String>,
}

/// Fetch `{issuer}/.well-known/openid-configuration`.
pub async fn discover(client: &reqwest::Client, issuer: &str) -> Result<DiscoveryDocument, AuthError> {
    let url = format!(
        "{}/.well-known/openid-configuration",
        issuer.trim_end_matches('/')
    );
    tracing::debug!(issuer, url = %url, "running OIDC discovery");

    let response = client
        .get(&url)
        .timeout(DISCOVERY_TIMEOUT)
        .send()
        .await
        .map_err(|e| AuthError::Discovery(format!("GET {url}: {e}")))?;
    if !response.status().is_success() {
        return Err(AuthError::Discovery(format!(
            "GET {url}: status {}",
            response.status()
        )));
    }
    let doc: DiscoveryDocument = response
        .json()
        .await
        .map_err(|e| AuthError::Discovery(format!("invalid discovery document from {url}: {e}")))?;
    Ok(doc)
}

/// Auth scheme advertised by a 401 challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeScheme {
    Bearer,
    Basic,
    Digest,
}

/// Parsed `WWW-Authenticate` challenge. The realm doubles as the issuer when
/// the operator only supplied a client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    pub scheme: ChallengeScheme,
    pub realm: Option<String>,
}

/// Parse the first recognized challenge out of a `WWW-Authenticate` value.
pub fn parse_www_authenticate(header: &str) -> Option<AuthChallenge> {
    let trimmed = header.trim();
    let (scheme_str, params) = match trimmed.split_once(char::is_whitespace) {
        Some((s, rest)) => (s, rest),
        None => (trimmed, ""),
    };
    let scheme = match scheme_str.to_ascii_lowercase().as_str() {
        "bearer" => ChallengeScheme::Bearer,
        "basic" => ChallengeScheme::Basic,
        "digest" => ChallengeScheme::Digest,
        _ => return None,
    };
    let realm = params.split(',').find_map(|param| {
        let (key, value) = param.split_once('=')?;
        if key.trim().eq_ignore_ascii_case("realm") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    });
    Some(AuthChallenge { scheme, realm })
}

/// Probe `target` with a GET; on 401, surface the parsed challenge.
pub async fn detect_challenge(
    client: &reqwest::Client,
    target: &str,
) -> Result<Option<AuthChallenge>, AuthError> {
    let response = client
        .get(target)
        .send()
        .await
        .map_err(|e| AuthError::Discovery(format!("GET {target}: {e}")))?;
    if response.status() != reqwest::StatusCode::UNAUTHORIZED {
        return Ok(None);
    }
    let challenge = response
        .headers()
        .get(reqwest::header::WWW_AUTHENTICATE)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_www_authenticate);
    Ok(challenge)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_parse_bearer_with_realm() {
        let challenge =
            parse_www_authenticate("Bearer realm=\"https://idp.example\", error=\"invalid_token\"")
                .unwrap();
        assert_eq!(challenge.scheme, ChallengeScheme::Bearer);
        assert_eq!(challenge.realm.as_deref(), Some("https://idp.example"));
    }

    #[test]
    fn test_parse_scheme_only() {
        let challenge = parse_www_authenticate("Basic").unwrap();
        assert_eq!(challenge.scheme, ChallengeScheme::Basic);
        assert_eq!(challenge.realm, None);
    }

    #[test]
    fn test_parse_unknown_scheme() {
        assert_eq!(parse_www_authenticate("Negotiate abc"), None);
    }

    #[tokio::test]
    async fn test_discover_reads_document() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/.well-known/openid-configuration"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "issuer": server.uri(),
                "authorization_endpoint": format!("{}/authorize", server.uri()),
                "token_endpoint": format!("{}/token", server.uri()),
                "jwks_uri": format!("{}/jwks", server.uri()),
            })))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let doc = discover(&client, &server.uri()).await.unwrap();
        assert_eq!(doc.jwks_uri, format!("{}/jwks", server.uri()));
        assert_eq!(
            doc.token_endpoint.as_deref(),
            Some(format!("{}/token", server.uri()).as_str())
        );
    }

    #[tokio::test]
    async fn test_detect_challenge_on_401() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(401)
                    .insert_header("WWW-Authenticate", "Bearer realm=\"https://idp.example\""),
            )
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        let challenge = detect_challenge(&client, &server.uri()).await.unwrap();
        assert_eq!(
            challenge,
            Some(AuthChallenge {
                scheme: ChallengeScheme::Bearer,
                realm: Some("https://idp.example".into()),
            })
        );
    }

    #[tokio::test]
    async fn test_detect_challenge_none_on_200() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let client = reqwest::Client::new();
        assert_eq!(detect_challenge(&client, &server.uri()).await.unwrap(), None);
    }
}
