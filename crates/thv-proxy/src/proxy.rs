use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::Router;
use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{StatusCode, header};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{any, get};
use thv_auth::authinfo::{ProtectedResourceMetadata, WELL_KNOWN_PATH};
use thv_auth::{OidcConfig, TokenExchangeConfig, TokenExchanger, TokenSource, TokenValidator};
use thv_core::{Result, ThvError};
use tokio_util::sync::CancellationToken;

use crate::forward::forward_handler;

/// Backend is considered healthy while a response was seen this recently.
const HEALTH_WINDOW: Duration = Duration::from_secs(30);
const HEALTH_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// What a proxy instance fronts and how it authenticates.
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
    /// Scheme, host and port only; a non-trivial path would be silently
    /// prefix-stripped, so it is rejected.
    pub target_uri: String,
    pub oidc: Option<OidcConfig>,
    pub token_exchange: Option<TokenExchangeConfig>,
    /// Outbound flow result for direct token injection.
    pub token_source: Option<Arc<TokenSource>>,
}

pub(crate) struct HealthTracker {
    last_backend_response: Mutex<Option<Instant>>,
}

impl HealthTracker {
    fn new() -> Self {
        Self {
            last_backend_response: Mutex::new(None),
        }
    }

    pub(crate) fn record_backend_response(&self) {
        *self
            .last_backend_response
            .lock()
            .expect("health lock poisoned") = Some(Instant::now());
    }

    fn fresh(&self) -> bool {
        self.last_backend_response
            .lock()
            .expect("health lock poisoned")
            .is_some_and(|at| at.elapsed() < HEALTH_WINDOW)
    }
}

pub(crate) struct ProxyState {
    pub(crate) target: url::Url,
    pub(crate) http: reqwest::Client,
    pub(crate) validator: Option<Arc<TokenValidator>>,
    pub(crate) exchanger: Option<Arc<TokenExchanger>>,
    pub(crate) token_source: Option<Arc<TokenSource>>,
    pub(crate) health: HealthTracker,
}

/// Reverse proxy bound to `host:port`, forwarding everything to the target.
pub struct TransparentProxy {
    host: String,
    port: u16,
    state: Arc<ProxyState>,
    auth_metadata: Option<ProtectedResourceMetadata>,
    shutdown: CancellationToken,
    local_addr: Mutex<Option<SocketAddr>>,
    done: tokio::sync::watch::Sender<bool>,
}

impl TransparentProxy {
    pub fn new(config: ProxyConfig) -> Result<Self> {
        let target = validate_target_uri(&config.target_uri)?;

        let validator = config
            .oidc
            .as_ref()
            .map(|oidc| TokenValidator::new(oidc.clone()).map(Arc::new))
            .transpose()?;
        let exchanger = config
            .token_exchange
            .map(|exchange| TokenExchanger::new(exchange).map(Arc::new))
            .transpose()?;
        let auth_metadata = config.oidc.as_ref().map(|oidc| {
            let own_url = format!("http://{}:{}", config.host, config.port);
            ProtectedResourceMetadata::from_oidc(oidc, &own_url)
        });

        let http = reqwest::Client::builder()
            .build()
            .map_err(ThvError::internal)?;
        let (done, _) = tokio::sync::watch::channel(false);

        Ok(Self {
            host: config.host,
            port: config.port,
            state: Arc::new(ProxyState {
                target,
                http,
                validator,
                exchanger,
                token_source: config.token_source,
                health: HealthTracker::new(),
            }),
            auth_metadata,
            shutdown: CancellationToken::new(),
            local_addr: Mutex::new(None),
            done,
        })
    }

    /// Bind and serve until [`close_listener`](Self::close_listener) fires.
    /// Binding failures surface as `ProxyBindFailed`.
    pub async fn start(&self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        let listener = tokio::net::TcpListener::bind(&addr)
            .await
            .map_err(|e| ThvError::ProxyBindFailed {
                addr: addr.clone(),
                reason: e.to_string(),
            })?;
        let local = listener.local_addr().map_err(ThvError::internal)?;
        *self.local_addr.lock().expect("addr lock poisoned") = Some(local);
        tracing::info!(addr = %local, target = %self.state.target, "proxy listening");

        let shutdown = self.shutdown.clone();
        let result = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move { shutdown.cancelled().await })
            .await
            .map_err(ThvError::internal);
        let _ = self.done.send(true);
        result
    }

    /// Address actually bound; useful when port 0 was requested.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock().expect("addr lock poisoned")
    }

    /// Unblock [`start`](Self::start) immediately. Exposed separately so a
    /// signal handler can stop accepting before the graceful drain begins.
    pub fn close_listener(&self) {
        self.shutdown.cancel();
    }

    /// Close the listener and wait for in-flight requests up to `drain`.
    /// Returns `true` when the server drained fully inside the deadline; the
    /// caller force-closes (aborts the serve task) otherwise.
    pub async fn stop(&self, drain: Duration) -> bool {
        self.close_listener();
        let mut done = self.done.subscribe();
        tokio::time::timeout(drain, async {
            while !*done.borrow_and_update() {
                if done.changed().await.is_err() {
                    break;
                }
            }
        })
        .await
        .is_ok()
    }

    fn router(&self) -> Router {
        let state = Arc::clone(&self.state);
        let mut router = Router::new()
            .route("/health", get(health_handler))
            .fallback(any(forward_handler))
            .with_state(Arc::clone(&state));
        if let Some(metadata) = &self.auth_metadata {
            router = router.merge(metadata.clone().router());
        }
        // Outermost layer: inbound auth.
        router.layer(middleware::from_fn_with_state(state, auth_middleware))
    }
}

/// Only `""` or `"/"` paths are accepted on the target.
fn validate_target_uri(raw: &str) -> Result<url::Url> {
    let url: url::Url = raw
        .parse()
        .map_err(|e| ThvError::invalid_config("targetUri", format!("'{raw}': {e}")))?;
    if !matches!(url.path(), "" | "/") {
        return Err(ThvError::invalid_config(
            "targetUri",
            format!("'{raw}' must not carry a path"),
        ));
    }
    if url.query().is_some() || url.fragment().is_some() {
        return Err(ThvError::invalid_config(
            "targetUri",
            format!("'{raw}' must not carry a query or fragment"),
        ));
    }
    Ok(url)
}

async fn auth_middleware(
    State(state): State<Arc<ProxyState>>,
    request: Request,
    next: Next,
) -> Response {
    let Some(validator) = &state.validator else {
        return next.run(request).await;
    };
    // Discovery and liveness stay reachable without credentials.
    let path = request.uri().path();
    if path == WELL_KNOWN_PATH || path == "/health" {
        return next.run(request).await;
    }

    let token = request
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "));
    let Some(token) = token else {
        return unauthorized(validator, "missing bearer token");
    };
    match validator.validate(token).await {
        Ok(claims) => {
            let mut request = request;
            request.extensions_mut().insert(claims);
            next.run(request).await
        }
        Err(err) => {
            tracing::debug!(error = %err, "rejecting inbound token");
            unauthorized(validator, &err.to_string())
        }
    }
}

fn unauthorized(validator: &TokenValidator, message: &str) -> Response {
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(header::WWW_AUTHENTICATE, validator.challenge_header())
        .body(Body::from(
            serde_json::json!({ "error": "unauthorized", "message": message }).to_string(),
        ))
        .expect("static 401 response")
}

async fn health_handler(State(state): State<Arc<ProxyState>>) -> StatusCode {
    if state.health.fresh() {
        return StatusCode::OK;
    }
    // No recent traffic: probe the backend directly.
    let probe = state
        .http
        .get(state.target.clone())
        .timeout(HEALTH_PROBE_TIMEOUT)
        .send()
        .await;
    match probe {
        Ok(_) => {
            state.health.record_backend_response();
            StatusCode::OK
        }
        Err(_) => StatusCode::SERVICE_UNAVAILABLE,
    }
}

#[cfg(test)]
#[path = "proxy_tests.rs"]
mod proxy_tests;
