use super::*;
use wiremock::matchers::{body_string, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn start_proxy(config: ProxyConfig) -> (Arc<TransparentProxy>, String) {
    let proxy = Arc::new(TransparentProxy::new(config).unwrap());
    let server = Arc::clone(&proxy);
    tokio::spawn(async move { server.start().await });
    // Wait for the listener to come up.
    let addr = loop {
        if let Some(addr) = proxy.local_addr() {
            break addr;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    };
    (proxy, format!("http://{addr}"))
}

fn plain_config(target: &str) -> ProxyConfig {
    ProxyConfig {
        host: "127.0.0.1".into(),
        port: 0,
        target_uri: target.to_string(),
        oidc: None,
        token_exchange: None,
        token_source: None,
    }
}

#[test]
fn test_target_uri_rejects_paths() {
    assert!(TransparentProxy::new(plain_config("http://127.0.0.1:9090/api")).is_err());
    assert!(TransparentProxy::new(plain_config("http://127.0.0.1:9090?x=1")).is_err());
    assert!(TransparentProxy::new(plain_config("http://127.0.0.1:9090/")).is_ok());
    assert!(TransparentProxy::new(plain_config("http://127.0.0.1:9090")).is_ok());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_forwards_path_query_and_body() {
    let backend = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/messages/send"))
        .and(query_param("session", "s1"))
        .and(body_string("{\"jsonrpc\":\"2.0\"}"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&backend)
        .await;

    let (proxy, base) = start_proxy(plain_config(&backend.uri())).await;
    let response = reqwest::Client::new()
        .post(format!("{base}/messages/send?session=s1"))
        .body("{\"jsonrpc\":\"2.0\"}")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await.unwrap(), "ok");
    proxy.close_listener();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_restricted_headers_never_reach_backend() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;

    let (proxy, base) = start_proxy(plain_config(&backend.uri())).await;
    reqwest::Client::new()
        .get(format!("{base}/tools"))
        .header("X-Forwarded-For", "1.2.3.4")
        .header("X-Custom", "kept")
        .send()
        .await
        .unwrap();

    let requests = backend.received_requests().await.unwrap();
    let headers = &requests[0].headers;
    assert!(!headers.contains_key("x-forwarded-for"));
    assert_eq!(headers.get("x-custom").unwrap(), "kept");
    // The Host header the backend sees is its own, not the proxy's bind addr.
    let host = headers.get("host").unwrap().to_str().unwrap();
    assert!(backend.uri().contains(host));
    proxy.close_listener();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_missing_token_gets_401_with_resource_challenge() {
    let backend = MockServer::start().await;
    let config = ProxyConfig {
        oidc: Some(thv_auth::OidcConfig {
            issuer: Some("https://idp.example".into()),
            audience: Some("thv".into()),
            resource_url: Some("https://thv.local/mcp".into()),
            ..Default::default()
        }),
        ..plain_config(&backend.uri())
    };
    let (proxy, base) = start_proxy(config).await;

    let response = reqwest::get(format!("{base}/tools")).await.unwrap();
    assert_eq!(response.status(), 401);
    assert_eq!(
        response
            .headers()
            .get("www-authenticate")
            .unwrap()
            .to_str()
            .unwrap(),
        "Bearer resource=\"https://thv.local/mcp\""
    );
    proxy.close_listener();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_well_known_and_health_bypass_auth() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;

    let config = ProxyConfig {
        oidc: Some(thv_auth::OidcConfig {
            issuer: Some("https://idp.example".into()),
            ..Default::default()
        }),
        ..plain_config(&backend.uri())
    };
    let (proxy, base) = start_proxy(config).await;

    let response = reqwest::get(format!("{base}{WELL_KNOWN_PATH}")).await.unwrap();
    assert_eq!(response.status(), 200);
    let doc: serde_json::Value = response.json().await.unwrap();
    assert_eq!(doc["authorization_servers"][0], "https://idp.example");

    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 200);
    proxy.close_listener();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_token_exchange_replaces_authorization() {
    let backend = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&backend)
        .await;
    let idp = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "access_token": "svc-b-token",
            "expires_in": 3600,
        })))
        .mount(&idp)
        .await;

    let config = ProxyConfig {
        token_exchange: Some(thv_auth::TokenExchangeConfig {
            token_url: format!("{}/token", idp.uri()),
            client_id: "proxy".into(),
            client_secret: None,
            audience: "svc-b".into(),
            scopes: vec![],
            subject_token_type: "urn:ietf:params:oauth:token-type:access_token".into(),
            header_strategy: thv_auth::HeaderStrategy::Replace,
            external_token_header_name: None,
        }),
        ..plain_config(&backend.uri())
    };
    let (proxy, base) = start_proxy(config).await;

    reqwest::Client::new()
        .get(format!("{base}/tools"))
        .header("Authorization", "Bearer user-jwt")
        .send()
        .await
        .unwrap();

    let requests = backend.received_requests().await.unwrap();
    // The user token never travels upstream under the replace strategy.
    assert_eq!(
        requests[0].headers.get("authorization").unwrap(),
        "Bearer svc-b-token"
    );
    proxy.close_listener();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_health_degrades_when_backend_gone() {
    // Reserve an address, then drop it so nothing answers there.
    let dead = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let dead_addr = dead.local_addr().unwrap();
    drop(dead);

    let (proxy, base) = start_proxy(plain_config(&format!("http://{dead_addr}"))).await;
    let response = reqwest::get(format!("{base}/health")).await.unwrap();
    assert_eq!(response.status(), 503);
    proxy.close_listener();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_close_listener_unblocks_start_and_frees_port() {
    let backend = MockServer::start().await;
    let (proxy, base) = start_proxy(plain_config(&backend.uri())).await;
    let addr = proxy.local_addr().unwrap();

    assert!(proxy.stop(Duration::from_secs(1)).await);
    // Port is bindable again once the listener closed.
    tokio::time::sleep(Duration::from_millis(50)).await;
    std::net::TcpListener::bind(addr).unwrap();
    drop(base);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_bind_conflict_is_proxy_bind_failed() {
    let holder = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let port = holder.local_addr().unwrap().port();

    let proxy = TransparentProxy::new(ProxyConfig {
        port,
        ..plain_config("http://127.0.0.1:9")
    })
    .unwrap();
    assert!(matches!(
        proxy.start().await,
        Err(ThvError::ProxyBindFailed { .. })
    ));
}
