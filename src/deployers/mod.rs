//! Deploying strategies: submit a built workload to the cluster.

pub mod job;
pub mod tfjob;

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::cluster::ResourceRef;
use crate::context::StageContext;
use crate::error::DeployError;
use crate::naming;
use crate::options::StrategyOptions;
use crate::registry::{deployer_factory, DeployerFactory, Stage, StrategyKind, StrategyRegistry};
use crate::workload::PodSpec;

pub use job::JobDeployer;
pub use tfjob::TfJobDeployer;

/// Label carrying the deployer that created a resource.
pub const DEPLOYER_LABEL: &str = "fairing.io/deployer";
/// Annotation carrying the creation time (RFC 3339).
pub const CREATED_AT_ANNOTATION: &str = "fairing.io/created-at";

/// Supported deploying strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeployerKind {
    /// Kubernetes batch Job.
    #[serde(rename = "job")]
    Job,
    /// Kubeflow TFJob.
    #[serde(rename = "tfjob")]
    TfJob,
}

impl StrategyKind for DeployerKind {
    const STAGE: Stage = Stage::Deploy;
    const ALL: &'static [Self] = &[Self::Job, Self::TfJob];

    fn as_str(&self) -> &'static str {
        match self {
            DeployerKind::Job => "job",
            DeployerKind::TfJob => "tfjob",
        }
    }
}

impl fmt::Display for DeployerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for DeployerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "job" => Ok(DeployerKind::Job),
            "tfjob" => Ok(DeployerKind::TfJob),
            other => Err(format!("Unknown deployer: {}", other)),
        }
    }
}

/// Contract every deploying strategy satisfies.
#[async_trait]
pub trait Deployer: Send + Sync {
    /// Strategy tag of this deployer.
    fn kind(&self) -> DeployerKind;

    /// Submits a workload running `spec`.
    async fn deploy(&mut self, spec: PodSpec) -> Result<(), DeployError>;

    /// Resource created by the last successful deploy.
    fn deployed(&self) -> Option<&ResourceRef>;
}

/// Metadata shared by the job-like deployers.
#[derive(Debug, Clone)]
pub(crate) struct ObjectMeta {
    pub namespace: String,
    pub name_prefix: String,
    pub labels: BTreeMap<String, String>,
}

impl ObjectMeta {
    /// Validates names and stamps the deployer label.
    pub fn new(
        kind: DeployerKind,
        namespace: String,
        name_prefix: String,
        mut labels: BTreeMap<String, String>,
    ) -> Result<Self, DeployError> {
        if !naming::is_dns_label(&namespace) {
            return Err(DeployError::InvalidName(namespace));
        }
        if !naming::is_dns_label(&name_prefix) {
            return Err(DeployError::InvalidName(name_prefix));
        }
        labels.insert(DEPLOYER_LABEL.to_string(), kind.to_string());
        Ok(Self {
            namespace,
            name_prefix,
            labels,
        })
    }

    /// `metadata` block for a resource called `name`.
    pub fn to_value(&self, name: &str, created_at: DateTime<Utc>) -> Value {
        json!({
            "name": name,
            "namespace": self.namespace,
            "labels": self.labels,
            "annotations": {
                CREATED_AT_ANNOTATION: created_at.to_rfc3339_opts(SecondsFormat::Secs, true)
            }
        })
    }
}

pub(crate) fn parse_options<T: serde::de::DeserializeOwned>(
    options: &StrategyOptions,
    strategy: &'static str,
) -> Result<T, DeployError> {
    options
        .parse()
        .map_err(|source| DeployError::InvalidOptions { strategy, source })
}

fn job_factory(
    options: &StrategyOptions,
    ctx: &StageContext,
) -> Result<Box<dyn Deployer>, DeployError> {
    Ok(Box::new(JobDeployer::from_options(options, ctx)?))
}

fn tfjob_factory(
    options: &StrategyOptions,
    ctx: &StageContext,
) -> Result<Box<dyn Deployer>, DeployError> {
    Ok(Box::new(TfJobDeployer::from_options(options, ctx)?))
}

/// Registry of the built-in deploying strategies.
pub fn builtin_registry() -> StrategyRegistry<DeployerKind, DeployerFactory> {
    StrategyRegistry::new()
        .with(DeployerKind::Job, deployer_factory(job_factory))
        .with(DeployerKind::TfJob, deployer_factory(tfjob_factory))
}
