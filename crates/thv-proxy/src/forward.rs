//! Request forwarding with hop-by-hop and restricted header filtering.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;

use crate::proxy::ProxyState;

/// Headers that are never forwarded upstream and can never be injected by
/// configuration. `X-Forwarded-*` is matched by prefix on top of these.
pub const RESTRICTED_HEADERS: &[&str] = &[
    "host",
    "connection",
    "transfer-encoding",
    "content-length",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "upgrade",
];

pub(crate) fn is_restricted(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    RESTRICTED_HEADERS.contains(&lower.as_str()) || lower.starts_with("x-forwarded-")
}

fn filter_headers(source: &HeaderMap) -> HeaderMap {
    let mut filtered = HeaderMap::with_capacity(source.len());
    for (name, value) in source {
        if !is_restricted(name.as_str()) {
            filtered.append(name.clone(), value.clone());
        }
    }
    filtered
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

pub(crate) async fn forward_handler(
    State(state): State<Arc<ProxyState>>,
    request: Request,
) -> Response {
    match forward(state, request).await {
        Ok(response) => response,
        Err((status, message)) => {
            tracing::warn!(status = %status, error = %message, "forwarding failed");
            Response::builder()
                .status(status)
                .body(Body::from(message))
                .expect("static error response")
        }
    }
}

async fn forward(
    state: Arc<ProxyState>,
    request: Request,
) -> Result<Response, (StatusCode, String)> {
    let (parts, body) = request.into_parts();

    let mut url = state.target.clone();
    url.set_path(parts.uri.path());
    url.set_query(parts.uri.query());

    let mut headers = filter_headers(&parts.headers);

    // Token exchange consumes the inbound user token; the exchanged token is
    // placed per the configured header strategy and the subject token never
    // travels upstream under the replace strategy.
    if let Some(exchanger) = &state.exchanger {
        let subject = bearer_token(&parts.headers).ok_or((
            StatusCode::UNAUTHORIZED,
            "token exchange requires a bearer token".to_string(),
        ))?;
        let exchanged = exchanger
            .exchange(subject)
            .await
            .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
        exchanger
            .apply_headers(&mut headers, &exchanged)
            .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
    } else if let Some(source) = &state.token_source {
        // Direct injection from the outbound flow's token source.
        let token = source
            .bearer_token()
            .await
            .map_err(|e| (StatusCode::BAD_GATEWAY, e.to_string()))?;
        let value = HeaderValue::from_str(&format!("Bearer {token}"))
            .map_err(|_| (StatusCode::BAD_GATEWAY, "token is not header-safe".to_string()))?;
        headers.insert(header::AUTHORIZATION, value);
    }

    let upstream = state
        .http
        .request(parts.method.clone(), url)
        .headers(headers)
        .body(reqwest::Body::wrap_stream(body.into_data_stream()))
        .send()
        .await
        .map_err(|e| (StatusCode::BAD_GATEWAY, format!("upstream request failed: {e}")))?;

    state.health.record_backend_response();

    let status = upstream.status();
    let response_headers = filter_headers(upstream.headers());
    let mut response = Response::new(Body::from_stream(upstream.bytes_stream()));
    *response.status_mut() = status;
    *response.headers_mut() = response_headers;
    Ok(response)
}
