//! Outbound OAuth 2.0 / OIDC authorization-code flow.
//!
//! PKCE is always enabled, even when a client secret is present. The flow
//! binds a one-shot callback listener on localhost, opens the system browser
//! unless skipped, enforces the CSRF `state` check, and returns a token
//! source that refreshes itself ahead of expiry.

use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::extract::Query;
use axum::response::Html;
use axum::{Router, routing::get};
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, RedirectUrl, RefreshToken, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use thv_core::{Result, ThvError};
use tokio_util::sync::CancellationToken;

use crate::discovery;

pub const DEFAULT_FLOW_TIMEOUT: Duration = Duration::from_secs(30);

/// Refresh this far ahead of token expiry.
const REFRESH_MARGIN: Duration = Duration::from_secs(30);

type ConfiguredClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

/// Resolved inputs for one authorization-code flow.
#[derive(Debug, Clone)]
pub struct OAuthFlowConfig {
    /// OIDC discovery root; alternative to the manual endpoint pair.
    pub issuer: Option<String>,
    pub authorize_url: Option<String>,
    pub token_url: Option<String>,
    pub client_id: String,
    pub client_secret: Option<String>,
    pub scopes: Vec<String>,
    /// Explicit callback port; a free ephemeral port when `None`.
    pub callback_port: Option<u16>,
    pub skip_browser: bool,
    pub timeout: Duration,
}

#[derive(Debug, Deserialize)]
struct CallbackParams {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Auto-refreshing holder for the tokens minted by [`run_flow`].
#[derive(Debug)]
pub struct TokenSource {
    client: ConfiguredClient,
    http: reqwest::Client,
    state: tokio::sync::Mutex<TokenState>,
}

#[derive(Debug)]
struct TokenState {
    access_token: String,
    refresh_token: Option<String>,
    expires_at: Option<Instant>,
}

impl TokenSource {
    /// Current access token, refreshed when within the expiry margin.
    pub async fn bearer_token(&self) -> Result<String> {
        let mut state = self.state.lock().await;
        let needs_refresh = state
            .expires_at
            .is_some_and(|at| at.saturating_duration_since(Instant::now()) < REFRESH_MARGIN);
        if needs_refresh && let Some(refresh_token) = state.refresh_token.clone() {
            tracing::debug!("refreshing outbound access token");
            let response = self
                .client
                .exchange_refresh_token(&RefreshToken::new(refresh_token))
                .request_async(&self.http)
                .await
                .map_err(|e| ThvError::AuthRejected(format!("token refresh failed: {e}")))?;
            state.access_token = response.access_token().secret().clone();
            if let Some(rt) = response.refresh_token() {
                state.refresh_token = Some(rt.secret().clone());
            }
            state.expires_at = response.expires_in().map(|d| Instant::now() + d);
        }
        Ok(state.access_token.clone())
    }
}

/// Run the flow end to end and return a refreshing token source.
pub async fn run_flow(config: OAuthFlowConfig) -> Result<TokenSource> {
    let skip_browser = config.skip_browser;
    run_flow_inner(config, move |url| {
        tracing::info!(url = %url, "authorize in your browser");
        if !skip_browser {
            open_browser(url);
        }
    })
    .await
}

async fn run_flow_inner(
    config: OAuthFlowConfig,
    on_authorize: impl FnOnce(&url::Url) + Send,
) -> Result<TokenSource> {
    let http = reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(ThvError::internal)?;

    let (authorize_endpoint, token_endpoint) = resolve_endpoints(&config, &http).await?;

    // Bind the one-shot listener first so the redirect URI carries the real
    // port even when an ephemeral one was requested.
    let listener =
        tokio::net::TcpListener::bind(("127.0.0.1", config.callback_port.unwrap_or(0)))
            .await
            .map_err(|e| ThvError::ProxyBindFailed {
                addr: format!("127.0.0.1:{}", config.callback_port.unwrap_or(0)),
                reason: e.to_string(),
            })?;
    let callback_port = listener.local_addr().map_err(ThvError::internal)?.port();
    let redirect_uri = format!("http://127.0.0.1:{callback_port}/callback");

    let client = {
        let base = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_auth_uri(
                AuthUrl::new(authorize_endpoint.clone())
                    .map_err(|_| ThvError::invalid_config("remoteAuth.authorizeUrl", "invalid URL"))?,
            )
            .set_token_uri(
                TokenUrl::new(token_endpoint.clone())
                    .map_err(|_| ThvError::invalid_config("remoteAuth.tokenUrl", "invalid URL"))?,
            )
            .set_redirect_uri(RedirectUrl::new(redirect_uri).map_err(ThvError::internal)?);
        match &config.client_secret {
            Some(secret) => base.set_client_secret(ClientSecret::new(secret.clone())),
            None => base,
        }
    };

    // PKCE always, client secret or not.
    let (pkce_challenge, pkce_verifier) = PkceCodeChallenge::new_random_sha256();
    let (authorize_url, csrf_state) = {
        let mut request = client
            .authorize_url(CsrfToken::new_random)
            .set_pkce_challenge(pkce_challenge);
        for scope in &config.scopes {
            request = request.add_scope(Scope::new(scope.clone()));
        }
        request.url()
    };

    let (params_tx, params_rx) = tokio::sync::oneshot::channel::<CallbackParams>();
    let params_tx = Arc::new(std::sync::Mutex::new(Some(params_tx)));
    let shutdown = CancellationToken::new();

    let app = Router::new().route(
        "/callback",
        get(move |Query(params): Query<CallbackParams>| {
            let params_tx = Arc::clone(&params_tx);
            async move {
                if let Some(tx) = params_tx.lock().expect("callback lock poisoned").take() {
                    let _ = tx.send(params);
                }
                Html(CALLBACK_PAGE)
            }
        }),
    );
    let server_shutdown = shutdown.clone();
    let server = tokio::spawn(async move {
        let _ = axum::serve(listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;
    });

    on_authorize(&authorize_url);

    let params = match tokio::time::timeout(config.timeout, params_rx).await {
        Ok(Ok(params)) => params,
        Ok(Err(_)) => {
            shutdown.cancel();
            return Err(ThvError::AuthRejected("callback listener closed".into()));
        }
        Err(_) => {
            shutdown.cancel();
            return Err(ThvError::AuthTimeout(config.timeout.as_secs()));
        }
    };
    shutdown.cancel();
    let _ = server.await;

    if let Some(error) = params.error {
        let detail = params.error_description.unwrap_or_default();
        return Err(ThvError::AuthRejected(format!(
            "authorization server returned '{error}' {detail}"
        )));
    }
    if params.state.as_deref() != Some(csrf_state.secret()) {
        return Err(ThvError::AuthRejected("state parameter mismatch".into()));
    }
    let code = params
        .code
        .ok_or_else(|| ThvError::AuthRejected("callback carried no code".into()))?;

    let response = client
        .exchange_code(AuthorizationCode::new(code))
        .set_pkce_verifier(pkce_verifier)
        .request_async(&http)
        .await
        .map_err(|e| ThvError::AuthRejected(format!("code exchange failed: {e}")))?;

    Ok(TokenSource {
        client,
        http,
        state: tokio::sync::Mutex::new(TokenState {
            access_token: response.access_token().secret().clone(),
            refresh_token: response.refresh_token().map(|rt| rt.secret().clone()),
            expires_at: response.expires_in().map(|d| Instant::now() + d),
        }),
    })
}

async fn resolve_endpoints(
    config: &OAuthFlowConfig,
    http: &reqwest::Client,
) -> Result<(String, String)> {
    if let (Some(authorize), Some(token)) = (&config.authorize_url, &config.token_url) {
        return Ok((authorize.clone(), token.clone()));
    }
    let issuer = config.issuer.as_deref().ok_or_else(|| {
        ThvError::invalid_config(
            "remoteAuth",
            "need either an issuer or authorizeUrl/tokenUrl",
        )
    })?;
    let doc = discovery::discover(http, issuer)
        .await
        .map_err(|e| ThvError::Internal(e.to_string()))?;
    let authorize = doc.authorization_endpoint.ok_or_else(|| {
        ThvError::invalid_config("remoteAuth.issuer", "issuer advertises no authorization endpoint")
    })?;
    let token = doc.token_endpoint.ok_or_else(|| {
        ThvError::invalid_config("remoteAuth.issuer", "issuer advertises no token endpoint")
    })?;
    Ok((authorize, token))
}

fn open_browser(url: &url::Url) {
    let Some(opener) = ["xdg-open", "open"]
        .iter()
        .find_map(|candidate| which::which(candidate).ok())
    else {
        tracing::warn!("no browser opener found; visit the URL manually");
        return;
    };
    let result = std::process::Command::new(opener)
        .arg(url.as_str())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn();
    if let Err(e) = result {
        tracing::warn!(error = %e, "could not open browser");
    }
}

const CALLBACK_PAGE: &str = "<!DOCTYPE html><html><body>\
<h3>Authentication complete.</h3><p>You can close this tab and return to the terminal.</p>\
</body></html>";

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn flow_config(token_url: String) -> OAuthFlowConfig {
        OAuthFlowConfig {
            issuer: None,
            authorize_url: Some("https://idp.example/authorize".into()),
            token_url: Some(token_url),
            client_id: "abc".into(),
            client_secret: None,
            scopes: vec!["openid".into()],
            callback_port: None,
            skip_browser: true,
            timeout: Duration::from_secs(5),
        }
    }

    fn query_param(url: &url::Url, key: &str) -> Option<String> {
        url.query_pairs()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.into_owned())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flow_completes_via_callback() {
        let idp = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/token"))
            .and(body_string_contains("grant_type=authorization_code"))
            .and(body_string_contains("code_verifier="))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "at-123",
                "token_type": "Bearer",
                "expires_in": 3600,
                "refresh_token": "rt-456",
            })))
            .mount(&idp)
            .await;

        let config = flow_config(format!("{}/token", idp.uri()));
        let source = run_flow_inner(config, |authorize_url| {
            // Stand in for the browser: bounce the code straight back to the
            // redirect URI with the expected state.
            assert!(query_param(authorize_url, "code_challenge").is_some());
            let state = query_param(authorize_url, "state").unwrap();
            let redirect = query_param(authorize_url, "redirect_uri").unwrap();
            tokio::spawn(async move {
                let callback = format!("{redirect}?code=xyz&state={state}");
                let _ = reqwest::get(&callback).await;
            });
        })
        .await
        .unwrap();

        assert_eq!(source.bearer_token().await.unwrap(), "at-123");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flow_rejects_state_mismatch() {
        let idp = MockServer::start().await;
        let config = flow_config(format!("{}/token", idp.uri()));
        let err = run_flow_inner(config, |authorize_url| {
            let redirect = query_param(authorize_url, "redirect_uri").unwrap();
            tokio::spawn(async move {
                let callback = format!("{redirect}?code=xyz&state=forged");
                let _ = reqwest::get(&callback).await;
            });
        })
        .await
        .unwrap_err();
        assert!(matches!(err, ThvError::AuthRejected(_)));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_flow_times_out_without_callback() {
        let config = OAuthFlowConfig {
            timeout: Duration::from_millis(100),
            ..flow_config("https://idp.example/token".into())
        };
        let err = run_flow_inner(config, |_| {}).await.unwrap_err();
        assert!(matches!(err, ThvError::AuthTimeout(_)));
    }

    #[tokio::test]
    async fn test_endpoints_require_issuer_or_pair() {
        let config = OAuthFlowConfig {
            issuer: None,
            authorize_url: None,
            token_url: None,
            client_id: "abc".into(),
            client_secret: None,
            scopes: vec![],
            callback_port: None,
            skip_browser: true,
            timeout: DEFAULT_FLOW_TIMEOUT,
        };
        let http = reqwest::Client::new();
        assert!(matches!(
            resolve_endpoints(&config, &http).await,
            Err(ThvError::InvalidConfig { .. })
        ));
    }
}
