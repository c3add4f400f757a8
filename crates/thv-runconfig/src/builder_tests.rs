use super::*;

struct FixedResolver(ResolvedImage);

#[async_trait::async_trait]
impl ImageResolver for FixedResolver {
    async fn resolve(&self, _identifier: &str) -> Result<ResolvedImage> {
        Ok(self.0.clone())
    }
}

#[tokio::test]
async fn test_build_minimal_stdio_defaults() {
    let config = RunConfigBuilder::new("ghcr.io/example/mcp-echo:1")
        .build(None)
        .await
        .unwrap();
    assert_eq!(config.name, "mcp-echo");
    assert_eq!(config.image.as_deref(), Some("ghcr.io/example/mcp-echo:1"));
    assert_eq!(config.transport, TransportType::Stdio);
    assert_eq!(config.proxy_mode, Some(ProxyMode::Sse));
    assert_eq!(config.host, "127.0.0.1");
    assert!(config.proxy_port > 0);
}

#[tokio::test]
async fn test_explicit_port_is_reserved_verbatim() {
    // Pick a free port first, then ask the builder for exactly that one.
    let probe = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = probe.local_addr().unwrap().port();
    drop(probe);

    let config = RunConfigBuilder::new("example/echo:1")
        .with_proxy_port(port)
        .build(None)
        .await
        .unwrap();
    assert_eq!(config.proxy_port, port);
}

#[tokio::test]
async fn test_busy_port_fails_proxy_bind() {
    let holder = TcpListener::bind(("127.0.0.1", 0)).unwrap();
    let port = holder.local_addr().unwrap().port();

    let err = RunConfigBuilder::new("example/echo:1")
        .with_proxy_port(port)
        .build(None)
        .await
        .unwrap_err();
    assert!(matches!(err, ThvError::ProxyBindFailed { .. }));
}

#[tokio::test]
async fn test_ipv6_host_rejected() {
    let err = RunConfigBuilder::new("example/echo:1")
        .with_host("::1")
        .build(None)
        .await
        .unwrap_err();
    assert!(matches!(err, ThvError::InvalidConfig { ref field, .. } if field == "host"));
}

#[tokio::test]
async fn test_localhost_resolves_to_ipv4() {
    let config = RunConfigBuilder::new("example/echo:1")
        .with_host("localhost")
        .build(None)
        .await
        .unwrap();
    assert_eq!(config.host, "127.0.0.1");
}

#[tokio::test]
async fn test_metadata_merged_under_explicit_precedence() {
    let resolver = FixedResolver(ResolvedImage {
        image: "ghcr.io/example/fetch:2".into(),
        protocol_scheme: None,
        metadata: Some(ServerMetadata {
            transport: Some(TransportType::StreamableHttp),
            target_port: Some(9090),
            env: HashMap::from([("MODE".to_string(), "registry".to_string())]),
            args: vec!["--serve".into()],
            provenance_verified: true,
        }),
    });

    // No explicit flags: metadata wins.
    let config = RunConfigBuilder::new("fetch")
        .build(Some(&resolver))
        .await
        .unwrap();
    assert_eq!(config.transport, TransportType::StreamableHttp);
    assert_eq!(config.target_port, 9090);
    assert_eq!(config.env_vars["MODE"], "registry");
    assert_eq!(config.cmd_args, vec!["--serve"]);

    // Explicit flags shadow metadata.
    let config = RunConfigBuilder::new("fetch")
        .with_transport(Some(TransportType::Stdio))
        .with_target_port(7777)
        .with_env(vec!["MODE=flag".into()])
        .with_cmd_args(vec!["--quiet".into()])
        .build(Some(&resolver))
        .await
        .unwrap();
    assert_eq!(config.transport, TransportType::Stdio);
    assert_eq!(config.target_port, 7777);
    assert_eq!(config.env_vars["MODE"], "flag");
    assert_eq!(config.cmd_args, vec!["--quiet"]);
}

#[tokio::test]
async fn test_proxy_mode_outside_stdio_rejected() {
    let err = RunConfigBuilder::new("example/echo:1")
        .with_transport(Some(TransportType::Sse))
        .with_target_port(9090)
        .with_proxy_mode(Some(ProxyMode::Sse))
        .build(None)
        .await
        .unwrap_err();
    assert!(matches!(err, ThvError::InvalidConfig { ref field, .. } if field == "proxyMode"));
}

#[tokio::test]
async fn test_http_transport_requires_target_port() {
    let err = RunConfigBuilder::new("example/echo:1")
        .with_transport(Some(TransportType::StreamableHttp))
        .build(None)
        .await
        .unwrap_err();
    assert!(matches!(err, ThvError::InvalidConfig { ref field, .. } if field == "targetPort"));
}

#[tokio::test]
async fn test_remote_identifier_becomes_remote_url() {
    let config = RunConfigBuilder::new("https://mcp.example/api")
        .with_name("remote-api")
        .with_transport(Some(TransportType::StreamableHttp))
        .build(None)
        .await
        .unwrap();
    assert_eq!(config.remote_url.as_deref(), Some("https://mcp.example/api"));
    assert_eq!(config.image, None);
}

#[tokio::test]
async fn test_secret_target_collision_with_env() {
    let err = RunConfigBuilder::new("example/echo:1")
        .with_env(vec!["API_TOKEN=plain".into()])
        .with_secrets(vec!["tok,target=API_TOKEN".into()])
        .build(None)
        .await
        .unwrap_err();
    assert!(matches!(err, ThvError::InvalidConfig { ref field, .. } if field == "secrets"));
}

#[tokio::test]
async fn test_bad_env_pair_rejected() {
    let err = RunConfigBuilder::new("example/echo:1")
        .with_env(vec!["NO_EQUALS".into()])
        .build(None)
        .await
        .unwrap_err();
    assert!(matches!(err, ThvError::InvalidConfig { ref field, .. } if field == "envVars"));
}

#[tokio::test]
async fn test_bad_volume_rejected() {
    let err = RunConfigBuilder::new("example/echo:1")
        .with_volumes(vec!["/only-host".into()])
        .build(None)
        .await
        .unwrap_err();
    assert!(matches!(err, ThvError::InvalidConfig { ref field, .. } if field == "volumes"));
}

#[test]
fn test_derive_name_forms() {
    assert_eq!(derive_name("ghcr.io/example/mcp-echo:1"), "mcp-echo");
    assert_eq!(derive_name("uvx://mcp-server-fetch@2.0"), "mcp-server-fetch");
    assert_eq!(derive_name("npx://@scope/tool"), "tool");
    assert_eq!(derive_name("Fetch_Tool"), "fetch-tool");
}
