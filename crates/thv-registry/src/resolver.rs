use std::sync::Arc;
use std::time::Duration;

use clap::ValueEnum;
use thv_core::{Result, ThvError};
use thv_runconfig::{ImageResolver, ResolvedImage, ServerMetadata};
use thv_runtime::ContainerRuntime;

use crate::registry::{RegistryClient, RegistryEntry};
use crate::templates;

const PULL_ATTEMPTS: u32 = 3;
const PULL_BACKOFF_BASE: Duration = Duration::from_secs(2);

/// Provenance verification policy for resolved images.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum VerifyMode {
    Disabled,
    #[default]
    Warn,
    Enabled,
}

/// Resolves identifiers against the registry, builds scheme images, pulls
/// direct references, and enforces the verification policy.
pub struct RegistryResolver {
    registry: RegistryClient,
    runtime: Arc<dyn ContainerRuntime>,
    verify_mode: VerifyMode,
}

impl RegistryResolver {
    pub fn new(
        registry: RegistryClient,
        runtime: Arc<dyn ContainerRuntime>,
        verify_mode: VerifyMode,
    ) -> Self {
        Self {
            registry,
            runtime,
            verify_mode,
        }
    }

    /// Disambiguation order: protocol scheme, registry name, direct image.
    pub async fn get_mcp_server(&self, identifier: &str) -> Result<ResolvedImage> {
        if let Some((scheme, package)) = templates::parse_scheme(identifier) {
            // Locally built images have no attestation; check the policy
            // before spending a build on them.
            self.check_provenance(identifier, None)?;
            let image = self.build_scheme_image(identifier, scheme, package).await?;
            return Ok(ResolvedImage {
                image,
                protocol_scheme: Some(identifier.to_string()),
                metadata: None,
            });
        }
        if identifier.contains("://") {
            return Err(ThvError::Unresolvable(identifier.to_string()));
        }

        if let Some(entry) = self.registry.find(identifier).await? {
            self.check_provenance(identifier, Some(&entry))?;
            self.ensure_image(&entry.image).await?;
            return Ok(ResolvedImage {
                image: entry.image.clone(),
                protocol_scheme: None,
                metadata: Some(entry_metadata(&entry)),
            });
        }

        // Direct image reference.
        self.check_provenance(identifier, None)?;
        self.ensure_image(identifier).await?;
        Ok(ResolvedImage {
            image: identifier.to_string(),
            protocol_scheme: None,
            metadata: None,
        })
    }

    async fn build_scheme_image(
        &self,
        identifier: &str,
        scheme: &str,
        package: &str,
    ) -> Result<String> {
        let dockerfile = templates::dockerfile_for(scheme, package)
            .ok_or_else(|| ThvError::Unresolvable(identifier.to_string()))?;
        let tag = templates::build_tag(scheme, package);

        let context = tempfile::tempdir().map_err(ThvError::internal)?;
        std::fs::write(context.path().join("Dockerfile"), dockerfile)
            .map_err(ThvError::internal)?;

        tracing::info!(identifier, tag = %tag, "building scheme image");
        self.runtime
            .build_image(context.path(), &tag)
            .await
            .map_err(|e| ThvError::ImageBuildFailed {
                tag: tag.clone(),
                reason: e.to_string(),
            })?;
        Ok(tag)
    }

    /// Pull with bounded exponential backoff unless already present.
    async fn ensure_image(&self, image: &str) -> Result<()> {
        if self.runtime.image_exists(image).await.map_err(ThvError::from)? {
            return Ok(());
        }
        let mut last_error = None;
        for attempt in 0..PULL_ATTEMPTS {
            if attempt > 0 {
                let backoff = PULL_BACKOFF_BASE * 2u32.pow(attempt - 1);
                tracing::warn!(image, attempt, "retrying image pull in {backoff:?}");
                tokio::time::sleep(backoff).await;
            }
            match self.runtime.pull_image(image).await {
                Ok(()) => return Ok(()),
                Err(e) => last_error = Some(e),
            }
        }
        Err(ThvError::ImagePullFailed {
            image: image.to_string(),
            reason: last_error
                .map(|e| e.to_string())
                .unwrap_or_else(|| "unknown".to_string()),
        })
    }

    fn check_provenance(&self, identifier: &str, entry: Option<&RegistryEntry>) -> Result<()> {
        let verified = entry
            .and_then(|e| e.provenance.as_ref())
            .is_some_and(|p| p.verified);
        match self.verify_mode {
            VerifyMode::Disabled => Ok(()),
            VerifyMode::Warn => {
                if !verified {
                    tracing::warn!(identifier, "no verified provenance attestation");
                }
                Ok(())
            }
            VerifyMode::Enabled if verified => Ok(()),
            VerifyMode::Enabled => Err(ThvError::VerificationFailed {
                image: identifier.to_string(),
                reason: "no verified provenance attestation".to_string(),
            }),
        }
    }
}

fn entry_metadata(entry: &RegistryEntry) -> ServerMetadata {
    ServerMetadata {
        transport: entry.transport,
        target_port: entry.target_port,
        env: entry.env.clone(),
        args: entry.args.clone(),
        provenance_verified: entry
            .provenance
            .as_ref()
            .is_some_and(|p| p.verified),
    }
}

#[async_trait::async_trait]
impl ImageResolver for RegistryResolver {
    async fn resolve(&self, identifier: &str) -> Result<ResolvedImage> {
        self.get_mcp_server(identifier).await
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod resolver_tests;
