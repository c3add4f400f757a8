//! `thv proxy`: a standalone authenticating proxy without a container.

use std::sync::Arc;
use std::time::Duration;

use thv_core::Result;
use thv_proxy::{ProxyConfig, TransparentProxy};
use tokio::signal::unix::{SignalKind, signal};

use crate::cli::ProxyArgs;

pub async fn handle_proxy(args: ProxyArgs) -> Result<()> {
    let proxy = Arc::new(TransparentProxy::new(ProxyConfig {
        host: args.host.clone(),
        port: args.proxy_port,
        target_uri: args.target_uri.clone(),
        oidc: args.oidc(),
        token_exchange: None,
        token_source: None,
    })?);

    let serve = {
        let proxy = Arc::clone(&proxy);
        tokio::spawn(async move { proxy.start().await })
    };

    // Wait for bind so the printed address is the real one (port 0 case).
    for _ in 0..100 {
        if proxy.local_addr().is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    match proxy.local_addr() {
        Some(addr) => println!("{} proxying {} on http://{addr}", args.name, args.target_uri),
        None => {
            // Bind failed; surface the serve error.
            return serve.await.map_err(thv_core::ThvError::internal)?;
        }
    }

    let mut sigterm = signal(SignalKind::terminate()).map_err(thv_core::ThvError::internal)?;
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    // Close the listener first, then drain in-flight requests.
    proxy.close_listener();
    if !proxy.stop(Duration::from_secs(5)).await {
        serve.abort();
    }
    let _ = serve.await;
    Ok(())
}
