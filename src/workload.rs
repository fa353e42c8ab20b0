//! Workload specification handed from a builder to a deployer.
//!
//! Only the fields fairing itself fills in are modeled. Serialized in the
//! camelCase shape of a Kubernetes `PodSpec` so deployers can embed it in
//! a manifest as-is.

use serde::{Deserialize, Serialize};

/// Name of the single container in a generated pod spec.
pub const DEFAULT_CONTAINER_NAME: &str = "fairing-job";

/// An environment variable set in a container.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    pub name: String,
    pub value: String,
}

/// A container in a pod spec.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
}

impl ContainerSpec {
    /// Creates a container running `image` with the image's own entrypoint.
    pub fn new(name: impl Into<String>, image: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image: image.into(),
            command: Vec::new(),
            working_dir: None,
            env: Vec::new(),
        }
    }

    pub fn with_command(mut self, command: Vec<String>) -> Self {
        self.command = command;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<String>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_env(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push(EnvVar {
            name: name.into(),
            value: value.into(),
        });
        self
    }
}

/// Description of a runnable unit of work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PodSpec {
    pub containers: Vec<ContainerSpec>,
    pub restart_policy: String,
}

impl PodSpec {
    /// A pod spec with one container that is never restarted.
    pub fn single(container: ContainerSpec) -> Self {
        Self {
            containers: vec![container],
            restart_policy: "Never".to_string(),
        }
    }

    /// Image of the first container, if any.
    pub fn image(&self) -> Option<&str> {
        self.containers.first().map(|c| c.image.as_str())
    }
}
