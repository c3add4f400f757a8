use thv_core::{ResourceKind, Result, ThvError};

use crate::provider::{ProviderCapabilities, SecretsProvider};

/// Read-only backend resolving secrets from the parent environment.
///
/// A secret named `github-token` reads `TOOLHIVE_SECRET_GITHUB_TOKEN`.
/// Useful in CI where an encrypted store is unavailable.
pub struct EnvironmentProvider;

const ENV_PREFIX: &str = "TOOLHIVE_SECRET_";

fn env_var_for(name: &str) -> String {
    let mut var = String::with_capacity(ENV_PREFIX.len() + name.len());
    var.push_str(ENV_PREFIX);
    for c in name.chars() {
        var.push(match c {
            'a'..='z' => c.to_ascii_uppercase(),
            '-' | '.' => '_',
            other => other,
        });
    }
    var
}

#[async_trait::async_trait]
impl SecretsProvider for EnvironmentProvider {
    async fn get(&self, name: &str) -> Result<String> {
        std::env::var(env_var_for(name))
            .map_err(|_| ThvError::not_found(ResourceKind::Secret, name))
    }

    async fn set(&self, name: &str, _value: &str) -> Result<()> {
        Err(ThvError::invalid_config(
            "secrets.provider",
            format!("environment provider is read-only; cannot set '{name}'"),
        ))
    }

    async fn delete(&self, name: &str) -> Result<()> {
        Err(ThvError::invalid_config(
            "secrets.provider",
            format!("environment provider is read-only; cannot delete '{name}'"),
        ))
    }

    async fn list(&self) -> Result<Vec<String>> {
        Err(ThvError::invalid_config(
            "secrets.provider",
            "environment provider cannot enumerate secrets",
        ))
    }

    fn capabilities(&self) -> ProviderCapabilities {
        ProviderCapabilities::READ_ONLY
    }
}
