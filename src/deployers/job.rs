//! Kubernetes batch Job deployer.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{parse_options, Deployer, DeployerKind, ObjectMeta};
use crate::cluster::{ClusterClient, ResourceRef, WaitCondition};
use crate::context::StageContext;
use crate::error::DeployError;
use crate::naming;
use crate::options::StrategyOptions;
use crate::workload::PodSpec;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct JobOptions {
    namespace: Option<String>,
    name_prefix: String,
    backoff_limit: u32,
    labels: BTreeMap<String, String>,
    wait: bool,
    timeout_secs: u64,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            name_prefix: "fairing-job".to_string(),
            backoff_limit: 0,
            labels: BTreeMap::new(),
            wait: false,
            timeout_secs: 3600,
        }
    }
}

/// Submits the workload as a `batch/v1` Job.
pub struct JobDeployer {
    cluster: Arc<dyn ClusterClient>,
    meta: ObjectMeta,
    backoff_limit: u32,
    wait: Option<Duration>,
    deployed: Option<ResourceRef>,
}

impl JobDeployer {
    /// Constructs from keyword options: `namespace`, `name_prefix`
    /// (default `fairing-job`), `backoff_limit` (default 0), `labels`,
    /// `wait` (block until the Job completes), `timeout_secs`.
    pub fn from_options(options: &StrategyOptions, ctx: &StageContext) -> Result<Self, DeployError> {
        let opts: JobOptions = parse_options(options, "job")?;
        let meta = ObjectMeta::new(
            DeployerKind::Job,
            opts.namespace
                .unwrap_or_else(|| ctx.config.namespace.clone()),
            opts.name_prefix,
            opts.labels,
        )?;

        Ok(Self {
            cluster: ctx.cluster.clone(),
            meta,
            backoff_limit: opts.backoff_limit,
            wait: opts.wait.then(|| Duration::from_secs(opts.timeout_secs)),
            deployed: None,
        })
    }

    pub fn namespace(&self) -> &str {
        &self.meta.namespace
    }

    /// Job manifest named `name` running `spec`.
    pub fn manifest(
        &self,
        name: &str,
        spec: &PodSpec,
        created_at: DateTime<Utc>,
    ) -> Result<Value, DeployError> {
        if spec.containers.is_empty() {
            return Err(DeployError::EmptyPodSpec);
        }

        Ok(json!({
            "apiVersion": "batch/v1",
            "kind": "Job",
            "metadata": self.meta.to_value(name, created_at),
            "spec": {
                "backoffLimit": self.backoff_limit,
                "template": {
                    "metadata": {"labels": self.meta.labels},
                    "spec": spec
                }
            }
        }))
    }
}

#[async_trait]
impl Deployer for JobDeployer {
    fn kind(&self) -> DeployerKind {
        DeployerKind::Job
    }

    async fn deploy(&mut self, spec: PodSpec) -> Result<(), DeployError> {
        let name = naming::unique_name(&self.meta.name_prefix);
        let manifest = self.manifest(&name, &spec, Utc::now())?;
        let target = self.cluster.apply(&manifest).await?;
        info!(resource = %target, image = ?spec.image(), "Created training job");

        if let Some(timeout) = self.wait {
            self.cluster
                .wait_for(
                    &target,
                    &WaitCondition::Condition("Complete".to_string()),
                    timeout,
                )
                .await?;
            info!(resource = %target, "Training job completed");
        }

        self.deployed = Some(target);
        Ok(())
    }

    fn deployed(&self) -> Option<&ResourceRef> {
        self.deployed.as_ref()
    }
}
