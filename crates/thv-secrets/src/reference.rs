use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use thv_core::{Result, ThvError};

use crate::provider::SecretsProvider;

/// A secret reference inside a RunConfig: backend name plus the target env
/// var it resolves into. The value itself never appears in persisted state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SecretRef {
    pub name: String,
    pub target: String,
}

impl SecretRef {
    /// Parse the CLI form `NAME,target=ENV`.
    pub fn parse(raw: &str) -> Result<Self> {
        let (name, rest) = raw.split_once(',').ok_or_else(|| {
            ThvError::invalid_config("secrets", format!("'{raw}' must be NAME,target=ENV"))
        })?;
        let target = rest.strip_prefix("target=").ok_or_else(|| {
            ThvError::invalid_config("secrets", format!("'{raw}' must be NAME,target=ENV"))
        })?;
        if name.is_empty() {
            return Err(ThvError::invalid_config("secrets", "secret name is empty"));
        }
        validate_env_var_name(target)?;
        Ok(Self {
            name: name.to_string(),
            target: target.to_string(),
        })
    }
}

/// POSIX env var name: `[A-Za-z_][A-Za-z0-9_]*`.
pub fn validate_env_var_name(name: &str) -> Result<()> {
    let mut chars = name.chars();
    let valid = match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {
            chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
        }
        _ => false,
    };
    if valid {
        Ok(())
    } else {
        Err(ThvError::invalid_config(
            "envVars",
            format!("'{name}' is not a valid environment variable name"),
        ))
    }
}

/// Resolve references into an env map for the child process. Values live
/// only in the returned map; callers pass it straight to the runtime.
pub async fn resolve_refs(
    provider: &dyn SecretsProvider,
    refs: &[SecretRef],
) -> Result<HashMap<String, String>> {
    let mut env = HashMap::with_capacity(refs.len());
    for secret in refs {
        let value = provider.get(&secret.name).await?;
        env.insert(secret.target.clone(), value);
    }
    Ok(env)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cli_form() {
        let r = SecretRef::parse("github-token,target=GITHUB_TOKEN").unwrap();
        assert_eq!(r.name, "github-token");
        assert_eq!(r.target, "GITHUB_TOKEN");
    }

    #[test]
    fn test_parse_rejects_malformed() {
        assert!(SecretRef::parse("no-target").is_err());
        assert!(SecretRef::parse(",target=X").is_err());
        assert!(SecretRef::parse("n,dest=X").is_err());
        assert!(SecretRef::parse("n,target=1BAD").is_err());
    }

    #[test]
    fn test_env_var_name_validation() {
        assert!(validate_env_var_name("PATH").is_ok());
        assert!(validate_env_var_name("_private").is_ok());
        assert!(validate_env_var_name("A1_B2").is_ok());
        assert!(validate_env_var_name("1ST").is_err());
        assert!(validate_env_var_name("WITH-DASH").is_err());
        assert!(validate_env_var_name("").is_err());
    }

    #[tokio::test]
    async fn test_resolve_refs_maps_to_targets() {
        let dir = tempfile::tempdir().unwrap();
        let provider = crate::FileProvider::new(dir.path().join("secrets.json"));
        provider.set("tok", "s3cr3t").await.unwrap();

        let refs = vec![SecretRef {
            name: "tok".into(),
            target: "API_TOKEN".into(),
        }];
        let env = resolve_refs(&provider, &refs).await.unwrap();
        assert_eq!(env["API_TOKEN"], "s3cr3t");
    }

    #[tokio::test]
    async fn test_resolve_refs_missing_secret_fails() {
        let dir = tempfile::tempdir().unwrap();
        let provider = crate::FileProvider::new(dir.path().join("secrets.json"));
        let refs = vec![SecretRef {
            name: "absent".into(),
            target: "X".into(),
        }];
        assert!(matches!(
            resolve_refs(&provider, &refs).await,
            Err(ThvError::NotFound { .. })
        ));
    }
}
