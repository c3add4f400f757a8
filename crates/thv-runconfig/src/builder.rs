//! Fluent builder turning raw flag values into a validated RunConfig.

use std::collections::HashMap;
use std::net::{IpAddr, TcpListener, ToSocketAddrs};

use chrono::Utc;
use thv_auth::{OidcConfig, RemoteAuthConfig, TokenExchangeConfig};
use thv_core::{ProxyMode, Result, ThvError, TransportType, validate_name};
use thv_secrets::{SecretRef, validate_env_var_name};

use crate::config::{OtelConfig, RunConfig, SCHEMA_VERSION};
use crate::permissions::PermissionProfile;

/// Registry metadata merged into the config under explicit-flag precedence.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ServerMetadata {
    pub transport: Option<TransportType>,
    pub target_port: Option<u16>,
    pub env: HashMap<String, String>,
    pub args: Vec<String>,
    /// Whether the registry vouches for a verified provenance attestation.
    pub provenance_verified: bool,
}

/// Outcome of identifier resolution.
#[derive(Debug, Clone)]
pub struct ResolvedImage {
    pub image: String,
    /// Original scheme identifier when the image was built locally.
    pub protocol_scheme: Option<String>,
    pub metadata: Option<ServerMetadata>,
}

/// Turns `server-name | image | scheme://pkg` into a concrete image.
/// Implemented by the registry resolver; faked in tests.
#[async_trait::async_trait]
pub trait ImageResolver: Send + Sync {
    async fn resolve(&self, identifier: &str) -> Result<ResolvedImage>;
}

/// Collects raw flag values, then runs the ordered validation pipeline in
/// [`RunConfigBuilder::build`].
#[derive(Debug, Clone, Default)]
pub struct RunConfigBuilder {
    identifier: String,
    name: Option<String>,
    cmd_args: Vec<String>,
    env: Vec<String>,
    secrets: Vec<String>,
    volumes: Vec<String>,
    permission_profile: Option<String>,
    authz_config: Option<String>,
    audit_config: Option<String>,
    enable_audit: bool,
    oidc: Option<OidcConfig>,
    remote_auth: Option<RemoteAuthConfig>,
    token_exchange: Option<TokenExchangeConfig>,
    otel: Option<OtelConfig>,
    transport: Option<TransportType>,
    proxy_mode: Option<ProxyMode>,
    host: Option<String>,
    proxy_port: u16,
    target_port: u16,
    group: Option<String>,
    tools_filter: Vec<String>,
    k8s_pod_patch: Option<String>,
    network_isolation: bool,
    labels: Vec<String>,
}

impl RunConfigBuilder {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            ..Default::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_cmd_args(mut self, args: Vec<String>) -> Self {
        self.cmd_args = args;
        self
    }

    /// Repeatable `KEY=VALUE` pairs.
    pub fn with_env(mut self, pairs: Vec<String>) -> Self {
        self.env = pairs;
        self
    }

    /// Repeatable `NAME,target=ENV` references.
    pub fn with_secrets(mut self, refs: Vec<String>) -> Self {
        self.secrets = refs;
        self
    }

    /// Repeatable `HOST:CONTAINER[:ro]` mounts.
    pub fn with_volumes(mut self, volumes: Vec<String>) -> Self {
        self.volumes = volumes;
        self
    }

    /// Builtin profile name or a JSON file path.
    pub fn with_permission_profile(mut self, spec: impl Into<String>) -> Self {
        self.permission_profile = Some(spec.into());
        self
    }

    pub fn with_authz_config(mut self, path: impl Into<String>) -> Self {
        self.authz_config = Some(path.into());
        self
    }

    pub fn with_audit_config(mut self, path: impl Into<String>, enable: bool) -> Self {
        self.audit_config = Some(path.into());
        self.enable_audit = enable;
        self
    }

    pub fn with_enable_audit(mut self, enable: bool) -> Self {
        self.enable_audit = enable;
        self
    }

    pub fn with_oidc(mut self, oidc: OidcConfig) -> Self {
        self.oidc = Some(oidc);
        self
    }

    pub fn with_remote_auth(mut self, remote_auth: RemoteAuthConfig) -> Self {
        self.remote_auth = Some(remote_auth);
        self
    }

    pub fn with_token_exchange(mut self, exchange: TokenExchangeConfig) -> Self {
        self.token_exchange = Some(exchange);
        self
    }

    pub fn with_otel(mut self, otel: OtelConfig) -> Self {
        self.otel = Some(otel);
        self
    }

    pub fn with_transport(mut self, transport: Option<TransportType>) -> Self {
        self.transport = transport;
        self
    }

    pub fn with_proxy_mode(mut self, mode: Option<ProxyMode>) -> Self {
        self.proxy_mode = mode;
        self
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = Some(host.into());
        self
    }

    /// Explicit port (> 0) is reserved as-is; 0 picks a free ephemeral port.
    pub fn with_proxy_port(mut self, port: u16) -> Self {
        self.proxy_port = port;
        self
    }

    pub fn with_target_port(mut self, port: u16) -> Self {
        self.target_port = port;
        self
    }

    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    pub fn with_tools_filter(mut self, tools: Vec<String>) -> Self {
        self.tools_filter = tools;
        self
    }

    pub fn with_k8s_pod_patch(mut self, patch: Option<String>) -> Self {
        self.k8s_pod_patch = patch;
        self
    }

    pub fn with_network_isolation(mut self, isolate: bool) -> Self {
        self.network_isolation = isolate;
        self
    }

    /// Repeatable `key=value` labels.
    pub fn with_labels(mut self, labels: Vec<String>) -> Self {
        self.labels = labels;
        self
    }

    /// Execute the validation pipeline and produce a persistable config.
    pub async fn build(self, resolver: Option<&dyn ImageResolver>) -> Result<RunConfig> {
        // (a) normalize host
        let host = normalize_host(self.host.as_deref().unwrap_or("127.0.0.1"))?;

        // (b) resolve the payload identifier
        let is_remote = self.identifier.starts_with("http://")
            || self.identifier.starts_with("https://");
        let (image, protocol_scheme, remote_url, metadata) = if is_remote {
            (None, None, Some(self.identifier.clone()), None)
        } else if let Some(resolver) = resolver {
            let resolved = resolver.resolve(&self.identifier).await?;
            (
                Some(resolved.image),
                resolved.protocol_scheme,
                None,
                resolved.metadata,
            )
        } else {
            (Some(self.identifier.clone()), None, None, None)
        };

        let name = match &self.name {
            Some(name) => name.clone(),
            None => derive_name(&self.identifier),
        };
        validate_name(&name)?;

        // (c) merge registry metadata under explicit-flag precedence
        let metadata = metadata.unwrap_or_default();
        let transport = self
            .transport
            .or(metadata.transport)
            .unwrap_or(TransportType::Stdio);
        let target_port = if self.target_port != 0 {
            self.target_port
        } else {
            metadata.target_port.unwrap_or(0)
        };
        let cmd_args = if self.cmd_args.is_empty() {
            metadata.args.clone()
        } else {
            self.cmd_args.clone()
        };

        // (d) transport / proxy-mode combinatorics
        let proxy_mode = match transport {
            TransportType::Stdio => Some(self.proxy_mode.unwrap_or(ProxyMode::Sse)),
            _ if self.proxy_mode.is_some() => {
                return Err(ThvError::invalid_config(
                    "proxyMode",
                    "only meaningful when transport is stdio",
                ));
            }
            _ => None,
        };
        if transport != TransportType::Stdio && remote_url.is_none() && target_port == 0 {
            return Err(ThvError::invalid_config(
                "targetPort",
                format!("required for {transport} transport"),
            ));
        }

        // (e) env var names; direct values vs secret references
        let mut env_vars = HashMap::new();
        for (key, value) in &metadata.env {
            validate_env_var_name(key)?;
            env_vars.insert(key.clone(), value.clone());
        }
        for pair in &self.env {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ThvError::invalid_config("envVars", format!("'{pair}' must be KEY=VALUE"))
            })?;
            validate_env_var_name(key)?;
            env_vars.insert(key.to_string(), value.to_string());
        }
        let mut secrets = Vec::with_capacity(self.secrets.len());
        for raw in &self.secrets {
            let secret = SecretRef::parse(raw)?;
            if env_vars.contains_key(&secret.target) {
                return Err(ThvError::invalid_config(
                    "secrets",
                    format!("target '{}' collides with a direct env var", secret.target),
                ));
            }
            secrets.push(secret);
        }

        for volume in &self.volumes {
            thv_runtime::Mount::parse(volume)?;
        }
        let mut labels = HashMap::new();
        for pair in &self.labels {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ThvError::invalid_config("labels", format!("'{pair}' must be key=value"))
            })?;
            labels.insert(key.to_string(), value.to_string());
        }
        let permission_profile = self
            .permission_profile
            .as_deref()
            .map(PermissionProfile::resolve)
            .transpose()?;

        // (f) auth config coherence
        if let Some(oidc) = &self.oidc {
            oidc.validate()?;
        }
        if let Some(remote_auth) = &self.remote_auth {
            remote_auth.validate()?;
        }
        if let Some(exchange) = &self.token_exchange {
            exchange.validate()?;
        }

        // (g) reserve the proxy port by actually binding it
        let proxy_port = reserve_port(&host, self.proxy_port)?;

        // (h) stamp and final-validate
        let config = RunConfig {
            schema_version: SCHEMA_VERSION,
            name,
            image,
            protocol_scheme,
            remote_url,
            cmd_args,
            env_vars,
            secrets,
            permission_profile,
            volumes: self.volumes,
            authz_config: self.authz_config.map(Into::into),
            audit_config: self.audit_config.map(Into::into),
            enable_audit: self.enable_audit,
            oidc: self.oidc,
            remote_auth: self.remote_auth,
            token_exchange: self.token_exchange,
            otel: self.otel,
            transport,
            proxy_mode,
            host,
            proxy_port,
            target_port,
            target_host: "127.0.0.1".to_string(),
            group: self.group,
            tools_filter: self.tools_filter,
            k8s_pod_patch: self.k8s_pod_patch,
            network_isolation: self.network_isolation,
            labels,
            created_at: Utc::now(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Resolve a hostname to a concrete IPv4 address; IPv6 is rejected.
fn normalize_host(host: &str) -> Result<String> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return match ip {
            IpAddr::V4(_) => Ok(host.to_string()),
            IpAddr::V6(_) => Err(ThvError::invalid_config(
                "host",
                "IPv6 addresses are not supported",
            )),
        };
    }
    let addrs = (host, 0u16).to_socket_addrs().map_err(|e| {
        ThvError::invalid_config("host", format!("cannot resolve '{host}': {e}"))
    })?;
    addrs
        .filter_map(|addr| match addr.ip() {
            IpAddr::V4(v4) => Some(v4.to_string()),
            IpAddr::V6(_) => None,
        })
        .next()
        .ok_or_else(|| ThvError::invalid_config("host", format!("'{host}' has no IPv4 address")))
}

/// Reserve a port by binding a real listener, then closing it. An explicit
/// request binds exactly that port; 0 lets the kernel pick.
fn reserve_port(host: &str, requested: u16) -> Result<u16> {
    let listener =
        TcpListener::bind((host, requested)).map_err(|e| ThvError::ProxyBindFailed {
            addr: format!("{host}:{requested}"),
            reason: e.to_string(),
        })?;
    let port = listener
        .local_addr()
        .map_err(ThvError::internal)?
        .port();
    Ok(port)
}

/// Default workload name from an identifier: last path segment, tag and
/// version stripped, squashed into DNS-label form.
fn derive_name(identifier: &str) -> String {
    let without_scheme = identifier
        .split_once("://")
        .map_or(identifier, |(_, rest)| rest);
    let last_segment = without_scheme
        .rsplit('/')
        .next()
        .unwrap_or(without_scheme);
    let base = last_segment
        .split([':', '@'])
        .next()
        .unwrap_or(last_segment);
    let mut name: String = base
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '-' })
        .collect();
    while name.starts_with('-') {
        name.remove(0);
    }
    while name.ends_with('-') {
        name.pop();
    }
    name
}

#[cfg(test)]
#[path = "builder_tests.rs"]
mod builder_tests;
