//! Access to the Kubernetes cluster workloads are submitted to.
//!
//! Manifests are plain `serde_json::Value`s. [`KubectlClient`] shells out
//! to kubectl; [`DryRunClient`] records what would have been applied.

pub mod kubectl;

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

use crate::error::ClusterError;

pub use kubectl::KubectlClient;

/// Identifies a namespaced resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl ResourceRef {
    /// Reads kind, name and namespace out of a manifest.
    pub fn from_manifest(manifest: &Value) -> Result<Self, ClusterError> {
        let field = |value: Option<&Value>, what: &str| {
            value
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| ClusterError::InvalidManifest(format!("missing {what}")))
        };

        Ok(Self {
            kind: field(manifest.get("kind"), "kind")?,
            name: field(manifest.pointer("/metadata/name"), "metadata.name")?,
            namespace: manifest
                .pointer("/metadata/namespace")
                .and_then(Value::as_str)
                .unwrap_or("default")
                .to_string(),
        })
    }
}

impl std::fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}/{} (namespace {})",
            self.kind.to_lowercase(),
            self.name,
            self.namespace
        )
    }
}

/// Condition to wait for on a resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WaitCondition {
    /// A `status.conditions` entry becomes true, e.g. `Complete`.
    Condition(String),
}

impl WaitCondition {
    /// Value of kubectl's `--for` flag.
    pub fn as_kubectl_arg(&self) -> String {
        match self {
            WaitCondition::Condition(condition) => format!("condition={condition}"),
        }
    }
}

/// Submits manifests to a cluster and observes resources.
#[async_trait]
pub trait ClusterClient: Send + Sync {
    /// Creates or updates the resource described by `manifest`.
    async fn apply(&self, manifest: &Value) -> Result<ResourceRef, ClusterError>;

    /// Blocks until `target` satisfies `condition` or `timeout` elapses.
    async fn wait_for(
        &self,
        target: &ResourceRef,
        condition: &WaitCondition,
        timeout: Duration,
    ) -> Result<(), ClusterError>;

    /// Current `status.phase` of `target`; `None` before one is reported.
    async fn phase(&self, target: &ResourceRef) -> Result<Option<String>, ClusterError>;
}

/// Polls `target` until its phase is `success`, failing early on any of
/// `failure` and with `ClusterError::Timeout` once `timeout` elapses.
pub async fn wait_for_phase(
    client: &dyn ClusterClient,
    target: &ResourceRef,
    success: &str,
    failure: &[&str],
    timeout: Duration,
    interval: Duration,
) -> Result<(), ClusterError> {
    let deadline = Instant::now() + timeout;
    loop {
        let phase = client.phase(target).await?;
        debug!(resource = %target, phase = ?phase, "Polled phase");
        match phase.as_deref() {
            Some(phase) if phase == success => return Ok(()),
            Some(phase) if failure.contains(&phase) => {
                return Err(ClusterError::ResourceFailed {
                    resource: target.to_string(),
                    phase: phase.to_string(),
                })
            }
            _ => {}
        }
        if Instant::now() >= deadline {
            return Err(ClusterError::Timeout {
                resource: target.to_string(),
                waited_secs: timeout.as_secs(),
            });
        }
        tokio::time::sleep(interval).await;
    }
}

/// A call recorded by [`DryRunClient`].
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterCall {
    Apply(Value),
    Wait {
        target: ResourceRef,
        condition: WaitCondition,
    },
    Phase(ResourceRef),
}

/// Cluster client that records manifests instead of applying them.
///
/// Every resource reports the phase set with [`DryRunClient::with_phase`],
/// `Succeeded` by default.
#[derive(Debug)]
pub struct DryRunClient {
    calls: Mutex<Vec<ClusterCall>>,
    phase: Option<String>,
}

impl Default for DryRunClient {
    fn default() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            phase: Some("Succeeded".to_string()),
        }
    }
}

impl DryRunClient {
    pub fn new() -> Self {
        Self::default()
    }

    /// Phase reported for every resource; `None` reports no phase.
    pub fn with_phase(mut self, phase: Option<&str>) -> Self {
        self.phase = phase.map(str::to_string);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<ClusterCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Manifests applied so far, in order.
    pub fn manifests(&self) -> Vec<Value> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ClusterCall::Apply(manifest) => Some(manifest),
                ClusterCall::Wait { .. } | ClusterCall::Phase(_) => None,
            })
            .collect()
    }

    fn record(&self, call: ClusterCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl ClusterClient for DryRunClient {
    async fn apply(&self, manifest: &Value) -> Result<ResourceRef, ClusterError> {
        let target = ResourceRef::from_manifest(manifest)?;
        info!(resource = %target, "[dry-run] kubectl apply");
        self.record(ClusterCall::Apply(manifest.clone()));
        Ok(target)
    }

    async fn wait_for(
        &self,
        target: &ResourceRef,
        condition: &WaitCondition,
        _timeout: Duration,
    ) -> Result<(), ClusterError> {
        info!(resource = %target, condition = %condition.as_kubectl_arg(), "[dry-run] kubectl wait");
        self.record(ClusterCall::Wait {
            target: target.clone(),
            condition: condition.clone(),
        });
        Ok(())
    }

    async fn phase(&self, target: &ResourceRef) -> Result<Option<String>, ClusterError> {
        self.record(ClusterCall::Phase(target.clone()));
        Ok(self.phase.clone())
    }
}
