//! Assembling a proxy instance from a persisted RunConfig, including the
//! outbound auth flow when one is configured.

use std::sync::Arc;
use std::time::Duration;

use thv_auth::{OAuthFlowConfig, TokenSource, discovery, flow};
use thv_core::{Result, ThvError};
use thv_proxy::{ProxyConfig, TransparentProxy};
use thv_runconfig::RunConfig;

/// Env fallback for the outbound OAuth client secret.
pub(crate) const REMOTE_SECRET_ENV: &str = "TOOLHIVE_REMOTE_OAUTH_CLIENT_SECRET";

/// The URI the proxy forwards to: the remote endpoint, or the container's
/// bridged target address.
pub(crate) fn target_uri(config: &RunConfig) -> String {
    match &config.remote_url {
        Some(url) => url.clone(),
        None => format!("http://{}:{}", config.target_host, config.target_port),
    }
}

/// Build the proxy for a workload, running the outbound OAuth flow first
/// when remote auth is configured.
pub(crate) async fn build_proxy(config: &RunConfig) -> Result<TransparentProxy> {
    let target = target_uri(config);
    let token_source = outbound_token_source(config, &target).await?;
    TransparentProxy::new(ProxyConfig {
        host: config.host.clone(),
        port: config.proxy_port,
        target_uri: target,
        oidc: config.oidc.clone(),
        token_exchange: config.token_exchange.clone(),
        token_source,
    })
}

/// Run the authorization-code flow for the remote side. When neither an
/// issuer nor explicit endpoints were supplied, sniff the target's 401
/// challenge and use its realm as the issuer.
async fn outbound_token_source(
    config: &RunConfig,
    target: &str,
) -> Result<Option<Arc<TokenSource>>> {
    let Some(remote) = &config.remote_auth else {
        return Ok(None);
    };

    let mut flow_config = OAuthFlowConfig {
        issuer: remote.issuer.clone(),
        authorize_url: remote.authorize_url.clone(),
        token_url: remote.token_url.clone(),
        client_id: remote.client_id.clone(),
        client_secret: remote
            .client_secret
            .clone()
            .or_else(|| std::env::var(REMOTE_SECRET_ENV).ok()),
        scopes: remote.scopes.clone(),
        callback_port: remote.callback_port,
        skip_browser: remote.skip_browser,
        timeout: remote
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(flow::DEFAULT_FLOW_TIMEOUT),
    };

    if flow_config.issuer.is_none() && flow_config.authorize_url.is_none() {
        let http = reqwest::Client::new();
        let challenge = discovery::detect_challenge(&http, target)
            .await
            .map_err(|e| ThvError::AuthRejected(e.to_string()))?;
        let realm = challenge.and_then(|c| c.realm).ok_or_else(|| {
            ThvError::invalid_config(
                "remoteAuth",
                "no issuer configured and the target advertises no realm",
            )
        })?;
        tracing::info!(realm = %realm, "using sniffed WWW-Authenticate realm as issuer");
        flow_config.issuer = Some(realm);
    }

    let source = flow::run_flow(flow_config).await?;
    Ok(Some(Arc::new(source)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use thv_core::{ProxyMode, TransportType};
    use thv_runconfig::SCHEMA_VERSION;

    fn config(remote_url: Option<&str>) -> RunConfig {
        RunConfig {
            schema_version: SCHEMA_VERSION,
            name: "echo".into(),
            image: remote_url.is_none().then(|| "example/echo:1".to_string()),
            protocol_scheme: None,
            remote_url: remote_url.map(String::from),
            cmd_args: Vec::new(),
            env_vars: HashMap::new(),
            secrets: Vec::new(),
            permission_profile: None,
            volumes: Vec::new(),
            authz_config: None,
            audit_config: None,
            enable_audit: false,
            oidc: None,
            remote_auth: None,
            token_exchange: None,
            otel: None,
            transport: TransportType::Stdio,
            proxy_mode: Some(ProxyMode::Sse),
            host: "127.0.0.1".into(),
            proxy_port: 0,
            target_port: 9090,
            target_host: "127.0.0.1".into(),
            group: None,
            tools_filter: Vec::new(),
            k8s_pod_patch: None,
            network_isolation: false,
            labels: HashMap::new(),
            created_at: chrono::Utc::now(),
        }
    }

    #[test]
    fn test_target_uri_prefers_remote_url() {
        assert_eq!(
            target_uri(&config(Some("https://mcp.example:8443"))),
            "https://mcp.example:8443"
        );
        assert_eq!(target_uri(&config(None)), "http://127.0.0.1:9090");
    }

    #[tokio::test]
    async fn test_build_proxy_without_auth() {
        let proxy = build_proxy(&config(None)).await.unwrap();
        assert!(proxy.local_addr().is_none());
    }
}
