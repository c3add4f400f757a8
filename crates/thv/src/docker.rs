//! Default runtime driver: shells out to the `docker` (or `podman`) CLI.
//!
//! Kept deliberately thin; everything the core needs from a runtime goes
//! through the `ContainerRuntime` trait, so swapping in a socket-based or
//! Kubernetes driver is a drop-in change.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use thv_runtime::{
    ContainerInfo, ContainerRuntime, ContainerSpec, ContainerState, RuntimeError, WorkloadFilter,
};
use tokio::process::Command;

const CONTAINER_NAME_PREFIX: &str = "thv-";

pub struct DockerCliRuntime {
    bin: PathBuf,
}

impl DockerCliRuntime {
    /// Find a usable container CLI, preferring docker over podman.
    pub fn detect() -> Result<Self, RuntimeError> {
        let bin = ["docker", "podman"]
            .iter()
            .find_map(|candidate| which::which(candidate).ok())
            .ok_or_else(|| {
                RuntimeError::Unavailable("neither docker nor podman found on PATH".into())
            })?;
        Ok(Self { bin })
    }

    async fn exec(&self, args: &[String]) -> Result<String, RuntimeError> {
        tracing::debug!(bin = %self.bin.display(), ?args, "runtime cli call");
        let output = Command::new(&self.bin)
            .args(args)
            .output()
            .await
            .map_err(|e| RuntimeError::Unavailable(format!("spawning runtime cli: {e}")))?;
        if output.status.success() {
            return Ok(String::from_utf8_lossy(&output.stdout).into_owned());
        }
        Err(classify(&String::from_utf8_lossy(&output.stderr)))
    }
}

fn classify(stderr: &str) -> RuntimeError {
    let lower = stderr.to_ascii_lowercase();
    let first_line = stderr.lines().next().unwrap_or("runtime cli failed");
    if lower.contains("no such container") || lower.contains("no such object") {
        RuntimeError::NotFound(first_line.to_string())
    } else if lower.contains("already in use") {
        RuntimeError::AlreadyExists(first_line.to_string())
    } else if lower.contains("permission denied") {
        RuntimeError::PermissionDenied(first_line.to_string())
    } else if lower.contains("manifest unknown")
        || lower.contains("pull access denied")
        || lower.contains("not found: manifest")
    {
        RuntimeError::ImagePullFailed {
            image: String::new(),
            reason: first_line.to_string(),
        }
    } else {
        RuntimeError::Unavailable(first_line.to_string())
    }
}

fn parse_state(raw: &str) -> ContainerState {
    match raw.to_ascii_lowercase().as_str() {
        "created" => ContainerState::Created,
        "running" | "up" => ContainerState::Running,
        "paused" => ContainerState::Paused,
        "restarting" => ContainerState::Restarting,
        "exited" | "dead" | "stopped" => ContainerState::Exited,
        "removing" => ContainerState::Removing,
        _ => ContainerState::Unknown,
    }
}

/// `docker ps --format '{{json .}}'` line.
#[derive(Deserialize)]
struct PsLine {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Names", default)]
    names: String,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "State", default)]
    state: String,
    #[serde(rename = "Labels", default)]
    labels: String,
}

fn parse_label_csv(raw: &str) -> HashMap<String, String> {
    raw.split(',')
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// `docker inspect --format '{{json .}}'` document, reduced to what we use.
#[derive(Deserialize)]
struct InspectDoc {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name", default)]
    name: String,
    #[serde(rename = "Created", default)]
    created: String,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "State")]
    state: InspectState,
}

#[derive(Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Labels", default)]
    labels: HashMap<String, String>,
}

#[derive(Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "ExitCode", default)]
    exit_code: i32,
}

#[async_trait::async_trait]
impl ContainerRuntime for DockerCliRuntime {
    async fn create_container(&self, spec: &ContainerSpec) -> Result<String, RuntimeError> {
        let mut args = vec![
            "create".to_string(),
            "--name".to_string(),
            format!("{CONTAINER_NAME_PREFIX}{}", spec.name),
        ];
        for (key, value) in &spec.labels {
            args.push("--label".to_string());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &spec.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        for mount in &spec.mounts {
            let mut volume = format!("{}:{}", mount.host.display(), mount.container);
            if mount.read_only {
                volume.push_str(":ro");
            }
            args.push("--volume".to_string());
            args.push(volume);
        }
        if spec.network_isolation {
            args.push("--network".to_string());
            args.push("none".to_string());
        } else if let Some(port) = spec.exposed_port {
            args.push("--publish".to_string());
            args.push(format!("127.0.0.1:{port}:{port}"));
        }
        if spec.attach_stdio {
            args.push("--interactive".to_string());
        }
        args.push(spec.image.clone());
        args.extend(spec.cmd_args.iter().cloned());

        let stdout = self.exec(&args).await?;
        Ok(stdout.trim().to_string())
    }

    async fn start_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.exec(&["start".to_string(), id.to_string()]).await?;
        Ok(())
    }

    async fn stop_container(&self, id: &str, grace: Duration) -> Result<(), RuntimeError> {
        self.exec(&[
            "stop".to_string(),
            "--time".to_string(),
            grace.as_secs().to_string(),
            id.to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn remove_container(&self, id: &str) -> Result<(), RuntimeError> {
        self.exec(&["rm".to_string(), "--force".to_string(), id.to_string()])
            .await?;
        Ok(())
    }

    async fn list_workloads(
        &self,
        filter: &WorkloadFilter,
    ) -> Result<Vec<ContainerInfo>, RuntimeError> {
        let stdout = self
            .exec(&[
                "ps".to_string(),
                "--all".to_string(),
                "--no-trunc".to_string(),
                "--filter".to_string(),
                "label=toolhive=true".to_string(),
                "--format".to_string(),
                "{{json .}}".to_string(),
            ])
            .await?;

        let mut containers = Vec::new();
        for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
            let Ok(ps) = serde_json::from_str::<PsLine>(line) else {
                tracing::warn!(line, "unparseable ps line");
                continue;
            };
            let labels = parse_label_csv(&ps.labels);
            if !filter.matches(&labels) {
                continue;
            }
            containers.push(ContainerInfo {
                id: ps.id,
                name: ps.names,
                image: ps.image,
                state: parse_state(&ps.state),
                labels,
                created_at: Utc::now(),
                exit_code: None,
            });
        }
        Ok(containers)
    }

    async fn get_container(&self, id: &str) -> Result<ContainerInfo, RuntimeError> {
        let stdout = self
            .exec(&[
                "inspect".to_string(),
                "--format".to_string(),
                "{{json .}}".to_string(),
                id.to_string(),
            ])
            .await?;
        let doc: InspectDoc = serde_json::from_str(stdout.trim())
            .map_err(|e| RuntimeError::Unavailable(format!("unparseable inspect output: {e}")))?;
        let state = parse_state(&doc.state.status);
        Ok(ContainerInfo {
            id: doc.id,
            name: doc.name.trim_start_matches('/').to_string(),
            image: doc.config.image,
            state,
            labels: doc.config.labels,
            created_at: DateTime::parse_from_rfc3339(&doc.created)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now()),
            exit_code: (state == ContainerState::Exited).then_some(doc.state.exit_code),
        })
    }

    async fn image_exists(&self, image: &str) -> Result<bool, RuntimeError> {
        match self
            .exec(&["image".to_string(), "inspect".to_string(), image.to_string()])
            .await
        {
            Ok(_) => Ok(true),
            Err(RuntimeError::NotFound(_)) => Ok(false),
            Err(RuntimeError::Unavailable(msg)) if msg.to_ascii_lowercase().contains("no such image") => {
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    async fn pull_image(&self, image: &str) -> Result<(), RuntimeError> {
        match self.exec(&["pull".to_string(), image.to_string()]).await {
            Ok(_) => Ok(()),
            Err(RuntimeError::ImagePullFailed { reason, .. }) => Err(RuntimeError::ImagePullFailed {
                image: image.to_string(),
                reason,
            }),
            Err(RuntimeError::Unavailable(reason)) => Err(RuntimeError::ImagePullFailed {
                image: image.to_string(),
                reason,
            }),
            Err(e) => Err(e),
        }
    }

    async fn build_image(&self, context_dir: &Path, tag: &str) -> Result<(), RuntimeError> {
        self.exec(&[
            "build".to_string(),
            "--tag".to_string(),
            tag.to_string(),
            context_dir.display().to_string(),
        ])
        .await?;
        Ok(())
    }

    async fn container_logs(&self, id: &str, tail: Option<u64>) -> Result<String, RuntimeError> {
        let mut args = vec!["logs".to_string()];
        if let Some(tail) = tail {
            args.push("--tail".to_string());
            args.push(tail.to_string());
        }
        args.push(id.to_string());
        self.exec(&args).await
    }

    fn is_kubernetes(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_stderr() {
        assert!(matches!(
            classify("Error: No such container: thv-echo"),
            RuntimeError::NotFound(_)
        ));
        assert!(matches!(
            classify("docker: Error ... name is already in use by container"),
            RuntimeError::AlreadyExists(_)
        ));
        assert!(matches!(
            classify("permission denied while trying to connect to the Docker daemon socket"),
            RuntimeError::PermissionDenied(_)
        ));
        assert!(matches!(
            classify("manifest unknown: manifest tagged by \"1\" is not found"),
            RuntimeError::ImagePullFailed { .. }
        ));
        assert!(matches!(
            classify("Cannot connect to the Docker daemon"),
            RuntimeError::Unavailable(_)
        ));
    }

    #[test]
    fn test_parse_state_values() {
        assert_eq!(parse_state("running"), ContainerState::Running);
        assert_eq!(parse_state("Exited"), ContainerState::Exited);
        assert_eq!(parse_state("weird"), ContainerState::Unknown);
    }

    #[test]
    fn test_parse_label_csv() {
        let labels = parse_label_csv("toolhive=true,toolhive-name=echo");
        assert_eq!(labels["toolhive"], "true");
        assert_eq!(labels["toolhive-name"], "echo");
        assert!(parse_label_csv("").is_empty());
    }

    #[test]
    fn test_ps_line_parse() {
        let line = r#"{"ID":"abc","Names":"thv-echo","Image":"example/echo:1","State":"running","Labels":"toolhive=true"}"#;
        let ps: PsLine = serde_json::from_str(line).unwrap();
        assert_eq!(ps.id, "abc");
        assert_eq!(parse_state(&ps.state), ContainerState::Running);
    }
}
