use super::*;
use crate::registry::RegistrySource;
use std::collections::HashMap;
use std::path::Path;
use std::result::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use thv_runtime::{ContainerInfo, ContainerSpec, RuntimeError, WorkloadFilter};

#[derive(Default)]
struct FakeRuntime {
    pulls: AtomicU32,
    builds: AtomicU32,
    pull_failures: AtomicU32,
    existing_images: Vec<String>,
}

impl FakeRuntime {
    fn failing_pulls(n: u32) -> Self {
        Self {
            pull_failures: AtomicU32::new(n),
            ..Default::default()
        }
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn create_container(&self, _spec: &ContainerSpec) -> Result<String, RuntimeError> {
        unimplemented!("not exercised by the resolver")
    }
    async fn start_container(&self, _id: &str) -> Result<(), RuntimeError> {
        unimplemented!()
    }
    async fn stop_container(
        &self,
        _id: &str,
        _grace: std::time::Duration,
    ) -> Result<(), RuntimeError> {
        unimplemented!()
    }
    async fn remove_container(&self, _id: &str) -> Result<(), RuntimeError> {
        unimplemented!()
    }
    async fn list_workloads(
        &self,
        _filter: &WorkloadFilter,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        Ok(Vec::new())
    }
    async fn get_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        Err(RuntimeError::NotFound(id.to_string()))
    }
    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        Ok(self.existing_images.iter().any(|i| i == image))
    }
    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        let remaining = self.pull_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.pull_failures.store(remaining - 1, Ordering::SeqCst);
            return Err(RuntimeError::ImagePullFailed {
                image: image.to_string(),
                reason: "registry flake".to_string(),
            });
        }
        Ok(())
    }
    async fn build_image(&self, context_dir: &Path, _tag: &str) -> Result<(), RuntimeError> {
        assert!(
            context_dir.join("Dockerfile").exists(),
            "build context must contain a Dockerfile"
        );
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
    async fn container_logs(&self, _id: &str, _tail: Option<u64>) -> Result<String, RuntimeError> {
        Ok(String::new())
    }
    fn is_kubernetes(&self) -> bool {
        false
    }
}

fn resolver_with(
    runtime: Arc<FakeRuntime>,
    source: RegistrySource,
    mode: VerifyMode,
) -> RegistryResolver {
    RegistryResolver::new(RegistryClient::new(source), runtime, mode)
}

fn registry_file(dir: &tempfile::TempDir, verified: bool) -> RegistrySource {
    let path = dir.path().join("registry.json");
    let doc = serde_json::json!({
        "servers": {
            "fetch": {
                "image": "ghcr.io/example/fetch:2",
                "transport": "streamable-http",
                "targetPort": 9090,
                "env": {"MODE": "prod"},
                "provenance": {"verified": verified},
            }
        }
    });
    std::fs::write(&path, doc.to_string()).unwrap();
    RegistrySource::File(path)
}

#[tokio::test]
async fn test_scheme_identifier_builds_image() {
    let runtime = Arc::new(FakeRuntime::default());
    let resolver = resolver_with(Arc::clone(&runtime), RegistrySource::None, VerifyMode::Disabled);

    let resolved = resolver
        .get_mcp_server("uvx://mcp-server-fetch@2.0")
        .await
        .unwrap();
    assert_eq!(resolved.image, "toolhive/uvx-mcp-server-fetch-2-0:latest");
    assert_eq!(
        resolved.protocol_scheme.as_deref(),
        Some("uvx://mcp-server-fetch@2.0")
    );
    assert_eq!(runtime.builds.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_unknown_scheme_is_unresolvable() {
    let runtime = Arc::new(FakeRuntime::default());
    let resolver = resolver_with(runtime, RegistrySource::None, VerifyMode::Disabled);
    assert!(matches!(
        resolver.get_mcp_server("docker://image").await,
        Err(ThvError::Unresolvable(_))
    ));
}

#[tokio::test]
async fn test_registry_name_returns_metadata_and_pulls() {
    let dir = tempfile::tempdir().unwrap();
    let runtime = Arc::new(FakeRuntime::default());
    let resolver = resolver_with(
        Arc::clone(&runtime),
        registry_file(&dir, true),
        VerifyMode::Enabled,
    );

    let resolved = resolver.get_mcp_server("fetch").await.unwrap();
    assert_eq!(resolved.image, "ghcr.io/example/fetch:2");
    let metadata = resolved.metadata.unwrap();
    assert_eq!(metadata.target_port, Some(9090));
    assert_eq!(metadata.env, HashMap::from([("MODE".into(), "prod".into())]));
    assert!(metadata.provenance_verified);
    assert_eq!(runtime.pulls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_existing_image_is_not_pulled() {
    let runtime = Arc::new(FakeRuntime {
        existing_images: vec!["ghcr.io/example/echo:1".to_string()],
        ..Default::default()
    });
    let resolver = resolver_with(Arc::clone(&runtime), RegistrySource::None, VerifyMode::Disabled);
    resolver.get_mcp_server("ghcr.io/example/echo:1").await.unwrap();
    assert_eq!(runtime.pulls.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_pull_retries_with_backoff_then_succeeds() {
    let runtime = Arc::new(FakeRuntime::failing_pulls(2));
    let resolver = resolver_with(Arc::clone(&runtime), RegistrySource::None, VerifyMode::Disabled);
    resolver.get_mcp_server("ghcr.io/example/echo:1").await.unwrap();
    assert_eq!(runtime.pulls.load(Ordering::SeqCst), 3);
}

#[tokio::test(start_paused = true)]
async fn test_pull_gives_up_after_three_attempts() {
    let runtime = Arc::new(FakeRuntime::failing_pulls(10));
    let resolver = resolver_with(Arc::clone(&runtime), RegistrySource::None, VerifyMode::Disabled);
    let err = resolver
        .get_mcp_server("ghcr.io/example/echo:1")
        .await
        .unwrap_err();
    assert!(matches!(err, ThvError::ImagePullFailed { .. }));
    assert_eq!(runtime.pulls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_enabled_verification_rejects_unattested() {
    let runtime = Arc::new(FakeRuntime::default());
    let resolver = resolver_with(Arc::clone(&runtime), RegistrySource::None, VerifyMode::Enabled);
    assert!(matches!(
        resolver.get_mcp_server("ghcr.io/example/echo:1").await,
        Err(ThvError::VerificationFailed { .. })
    ));

    let dir = tempfile::tempdir().unwrap();
    let resolver = resolver_with(runtime, registry_file(&dir, false), VerifyMode::Enabled);
    assert!(matches!(
        resolver.get_mcp_server("fetch").await,
        Err(ThvError::VerificationFailed { .. })
    ));
}

#[tokio::test]
async fn test_warn_mode_continues() {
    let runtime = Arc::new(FakeRuntime::default());
    let resolver = resolver_with(runtime, RegistrySource::None, VerifyMode::Warn);
    assert!(resolver.get_mcp_server("ghcr.io/example/echo:1").await.is_ok());
}
