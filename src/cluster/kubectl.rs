//! Cluster client that shells out to kubectl.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, info};

use super::{ClusterClient, ResourceRef, WaitCondition};
use crate::error::ClusterError;

/// Talks to the cluster of the current kubeconfig context.
#[derive(Debug, Clone)]
pub struct KubectlClient {
    program: String,
}

impl KubectlClient {
    /// Uses the kubectl binary at `program`.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }

    pub fn program(&self) -> &str {
        &self.program
    }

    fn wait_args(target: &ResourceRef, condition: &WaitCondition, timeout: Duration) -> Vec<String> {
        vec![
            "wait".to_string(),
            format!("--for={}", condition.as_kubectl_arg()),
            format!("{}/{}", target.kind.to_lowercase(), target.name),
            "-n".to_string(),
            target.namespace.clone(),
            format!("--timeout={}s", timeout.as_secs()),
        ]
    }

    fn phase_args(target: &ResourceRef) -> Vec<String> {
        vec![
            "get".to_string(),
            format!("{}/{}", target.kind.to_lowercase(), target.name),
            "-n".to_string(),
            target.namespace.clone(),
            "-o".to_string(),
            "jsonpath={.status.phase}".to_string(),
        ]
    }

    async fn run(&self, args: &[String], stdin: Option<&[u8]>) -> Result<String, ClusterError> {
        let command = format!("{} {}", self.program, args.join(" "));
        debug!("Running {}", command);

        let mut child = Command::new(&self.program)
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|source| ClusterError::Spawn {
                program: self.program.clone(),
                source,
            })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input).await?;
            pipe.shutdown().await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(ClusterError::CommandFailed {
                command,
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }
}

impl Default for KubectlClient {
    fn default() -> Self {
        Self::new("kubectl")
    }
}

#[async_trait]
impl ClusterClient for KubectlClient {
    async fn apply(&self, manifest: &Value) -> Result<ResourceRef, ClusterError> {
        let target = ResourceRef::from_manifest(manifest)?;
        let yaml = serde_yaml::to_string(manifest)?;

        let stdout = self
            .run(&["apply".to_string(), "-f".to_string(), "-".to_string()], Some(yaml.as_bytes()))
            .await?;
        info!(resource = %target, "{}", stdout);
        Ok(target)
    }

    async fn wait_for(
        &self,
        target: &ResourceRef,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<(), ClusterError> {
        info!(
            resource = %target,
            "Waiting up to {}s for {}",
            timeout.as_secs(),
            condition.as_kubectl_arg()
        );
        self.run(&Self::wait_args(target, condition, timeout), None)
            .await?;
        Ok(())
    }

    async fn phase(&self, target: &ResourceRef) -> Result<Option<String>, ClusterError> {
        let stdout = self.run(&Self::phase_args(target), None).await?;
        Ok(Some(stdout).filter(|phase| !phase.is_empty()))
    }
}
