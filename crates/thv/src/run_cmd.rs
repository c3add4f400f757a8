//! `thv run`: build (or import) a RunConfig and launch the workload.

use thv_auth::{HeaderStrategy, OidcConfig, RemoteAuthConfig, TokenExchangeConfig};
use thv_core::{Result, ThvError};
use thv_runconfig::{OtelConfig, RunConfig, RunConfigBuilder};
use tokio_util::sync::CancellationToken;

use crate::cli::RunArgs;
use crate::context::AppContext;

pub async fn handle_run(ctx: &AppContext, args: RunArgs) -> Result<i32> {
    let config = match &args.from_config {
        Some(path) => RunConfig::read_from(std::path::Path::new(path))?,
        None => build_config(ctx, &args).await?,
    };

    let cancel = CancellationToken::new();
    if args.foreground {
        let signal_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                signal_cancel.cancel();
            }
        });
        let url = config.url();
        println!("{} running at {url} (foreground)", config.name);
        ctx.manager.run_workload(cancel, config).await
    } else {
        let name = config.name.clone();
        let url = config.url();
        let pid = ctx.manager.run_workload_detached(cancel, config).await?;
        println!("{name} started at {url} (supervisor pid {pid})");
        Ok(0)
    }
}

async fn build_config(ctx: &AppContext, args: &RunArgs) -> Result<RunConfig> {
    let mut builder = RunConfigBuilder::new(&args.identifier)
        .with_cmd_args(args.cmd_args.clone())
        .with_transport(args.transport)
        .with_proxy_mode(args.proxy_mode)
        .with_host(&args.host)
        .with_proxy_port(args.proxy_port)
        .with_target_port(args.target_port)
        .with_group(args.group.clone())
        .with_env(args.env.clone())
        .with_volumes(args.volumes.clone())
        .with_secrets(args.secrets.clone())
        .with_labels(args.labels.clone())
        .with_tools_filter(args.tools_filter.clone())
        .with_network_isolation(args.isolate_network)
        .with_k8s_pod_patch(args.k8s_pod_patch.clone())
        .with_enable_audit(args.enable_audit);

    if let Some(name) = &args.name {
        builder = builder.with_name(name);
    }
    if let Some(profile) = &args.permission_profile {
        builder = builder.with_permission_profile(profile);
    }
    if let Some(path) = &args.authz_config {
        builder = builder.with_authz_config(path);
    }
    if let Some(path) = &args.audit_config {
        builder = builder.with_audit_config(path, args.enable_audit);
    }
    if let Some(oidc) = oidc_config(args) {
        builder = builder.with_oidc(oidc);
    }
    if let Some(remote_auth) = remote_auth_config(args)? {
        builder = builder.with_remote_auth(remote_auth);
    }
    if let Some(exchange) = token_exchange_config(args)? {
        builder = builder.with_token_exchange(exchange);
    }
    if let Some(otel) = otel_config(ctx, args) {
        builder = builder.with_otel(otel);
    }

    if let Some(group) = &args.group
        && !ctx.groups.exists(group)
    {
        return Err(ThvError::not_found(thv_core::ResourceKind::Group, group));
    }

    let resolver = ctx.registry_resolver(args.image_verification);
    builder.build(Some(&resolver)).await
}

fn oidc_config(args: &RunArgs) -> Option<OidcConfig> {
    if args.oidc_issuer.is_none()
        && args.oidc_jwks_url.is_none()
        && args.oidc_introspection_url.is_none()
    {
        return None;
    }
    Some(OidcConfig {
        issuer: args.oidc_issuer.clone(),
        audience: args.oidc_audience.clone(),
        jwks_url: args.oidc_jwks_url.clone(),
        introspection_url: args.oidc_introspection_url.clone(),
        client_id: args.oidc_client_id.clone(),
        client_secret: args.oidc_client_secret.clone(),
        resource_url: args.oidc_resource_url.clone(),
        allow_opaque_tokens: args.oidc_allow_opaque_tokens,
    })
}

fn remote_auth_config(args: &RunArgs) -> Result<Option<RemoteAuthConfig>> {
    let Some(client_id) = &args.remote_auth_client_id else {
        if args.remote_auth_issuer.is_some() || args.remote_auth_authorize_url.is_some() {
            return Err(ThvError::invalid_config(
                "remoteAuth.clientId",
                "remote auth flags require --remote-auth-client-id",
            ));
        }
        return Ok(None);
    };
    Ok(Some(RemoteAuthConfig {
        issuer: args.remote_auth_issuer.clone(),
        authorize_url: args.remote_auth_authorize_url.clone(),
        token_url: args.remote_auth_token_url.clone(),
        client_id: client_id.clone(),
        client_secret: args.remote_auth_client_secret.clone(),
        scopes: args.remote_auth_scopes.clone(),
        callback_port: args.remote_auth_callback_port,
        skip_browser: args.remote_auth_skip_browser,
        timeout_secs: args.remote_auth_timeout,
    }))
}

fn token_exchange_config(args: &RunArgs) -> Result<Option<TokenExchangeConfig>> {
    let Some(token_url) = &args.token_exchange_url else {
        return Ok(None);
    };
    let audience = args.token_exchange_audience.clone().ok_or_else(|| {
        ThvError::invalid_config(
            "tokenExchange.audience",
            "--token-exchange-audience is required with --token-exchange-url",
        )
    })?;
    let (header_strategy, header_name) = match &args.token_exchange_header {
        Some(name) => (HeaderStrategy::Custom, Some(name.clone())),
        None => (HeaderStrategy::Replace, None),
    };
    Ok(Some(TokenExchangeConfig {
        token_url: token_url.clone(),
        client_id: args.token_exchange_client_id.clone().unwrap_or_default(),
        client_secret: args.token_exchange_client_secret.clone(),
        audience,
        scopes: args.token_exchange_scopes.clone(),
        subject_token_type: "urn:ietf:params:oauth:token-type:access_token".to_string(),
        header_strategy,
        external_token_header_name: header_name,
    }))
}

/// Explicit flags shadow the operator-level OTel defaults.
fn otel_config(ctx: &AppContext, args: &RunArgs) -> Option<OtelConfig> {
    let endpoint = args
        .otel_endpoint
        .clone()
        .or_else(|| ctx.config.otel.endpoint.clone());
    endpoint.as_ref()?;
    Some(OtelConfig {
        endpoint,
        service_name: args
            .otel_service_name
            .clone()
            .or_else(|| ctx.config.otel.service_name.clone()),
        sampling_ratio: args
            .otel_sampling_ratio
            .or(ctx.config.otel.sampling_ratio),
        insecure: false,
    })
}
