//! Kubeflow TFJob deployer for distributed TensorFlow training.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::{parse_options, Deployer, DeployerKind, ObjectMeta};
use crate::cluster::{ClusterClient, ResourceRef};
use crate::context::StageContext;
use crate::error::DeployError;
use crate::naming;
use crate::options::StrategyOptions;
use crate::workload::PodSpec;

/// Container name the TFJob operator expects.
pub const TENSORFLOW_CONTAINER: &str = "tensorflow";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct TfJobOptions {
    namespace: Option<String>,
    name_prefix: String,
    labels: BTreeMap<String, String>,
    chief_count: u32,
    worker_count: u32,
    ps_count: u32,
}

impl Default for TfJobOptions {
    fn default() -> Self {
        Self {
            namespace: None,
            name_prefix: "fairing-tfjob".to_string(),
            labels: BTreeMap::new(),
            chief_count: 1,
            worker_count: 1,
            ps_count: 0,
        }
    }
}

/// Submits the workload as a `kubeflow.org/v1` TFJob.
pub struct TfJobDeployer {
    cluster: Arc<dyn ClusterClient>,
    meta: ObjectMeta,
    replicas: [(&'static str, u32); 3],
    deployed: Option<ResourceRef>,
}

impl TfJobDeployer {
    /// Constructs from keyword options: `namespace`, `name_prefix`
    /// (default `fairing-tfjob`), `labels`, `chief_count` (1),
    /// `worker_count` (1), `ps_count` (0).
    pub fn from_options(options: &StrategyOptions, ctx: &StageContext) -> Result<Self, DeployError> {
        let opts: TfJobOptions = parse_options(options, "tfjob")?;
        if opts.chief_count == 0 && opts.worker_count == 0 && opts.ps_count == 0 {
            return Err(DeployError::NoReplicas);
        }
        let meta = ObjectMeta::new(
            DeployerKind::TfJob,
            opts.namespace
                .unwrap_or_else(|| ctx.config.namespace.clone()),
            opts.name_prefix,
            opts.labels,
        )?;

        Ok(Self {
            cluster: ctx.cluster.clone(),
            meta,
            replicas: [
                ("Chief", opts.chief_count),
                ("Worker", opts.worker_count),
                ("PS", opts.ps_count),
            ],
            deployed: None,
        })
    }

    /// TFJob manifest named `name`; every replica type runs `spec`.
    pub fn manifest(
        &self,
        name: &str,
        spec: &PodSpec,
        created_at: DateTime<Utc>,
    ) -> Result<Value, DeployError> {
        if spec.containers.is_empty() {
            return Err(DeployError::EmptyPodSpec);
        }

        let mut pod = spec.clone();
        pod.containers[0].name = TENSORFLOW_CONTAINER.to_string();

        let mut replica_specs = Map::new();
        for (replica_type, count) in self.replicas.iter().filter(|(_, count)| *count > 0) {
            replica_specs.insert(
                replica_type.to_string(),
                json!({
                    "replicas": count,
                    "restartPolicy": pod.restart_policy,
                    "template": {
                        "metadata": {"labels": self.meta.labels},
                        "spec": pod
                    }
                }),
            );
        }

        Ok(json!({
            "apiVersion": "kubeflow.org/v1",
            "kind": "TFJob",
            "metadata": self.meta.to_value(name, created_at),
            "spec": {"tfReplicaSpecs": replica_specs}
        }))
    }
}

#[async_trait]
impl Deployer for TfJobDeployer {
    fn kind(&self) -> DeployerKind {
        DeployerKind::TfJob
    }

    async fn deploy(&mut self, spec: PodSpec) -> Result<(), DeployError> {
        let name = naming::unique_name(&self.meta.name_prefix);
        let manifest = self.manifest(&name, &spec, Utc::now())?;
        let target = self.cluster.apply(&manifest).await?;
        info!(resource = %target, image = ?spec.image(), "Created TFJob");

        self.deployed = Some(target);
        Ok(())
    }

    fn deployed(&self) -> Option<&ResourceRef> {
        self.deployed.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::DryRunClient;
    use crate::config::FairingConfig;
    use crate::engine::DryRunEngine;
    use crate::workload::ContainerSpec;

    fn context(cluster: Arc<DryRunClient>) -> StageContext {
        StageContext::new(FairingConfig::default(), Arc::new(DryRunEngine::new()), cluster)
    }

    fn spec() -> PodSpec {
        PodSpec::single(
            ContainerSpec::new("fairing-job", "repo/job:abc")
                .with_command(vec!["python".into(), "/app/train.py".into()]),
        )
    }

    #[test]
    fn test_default_replicas() {
        let deployer =
            TfJobDeployer::from_options(&StrategyOptions::new(), &context(Arc::new(DryRunClient::new())))
                .unwrap();
        let manifest = deployer.manifest("fairing-tfjob-00000000", &spec(), Utc::now()).unwrap();

        assert_eq!(manifest["apiVersion"], "kubeflow.org/v1");
        assert_eq!(manifest["kind"], "TFJob");
        assert_eq!(manifest["metadata"]["labels"]["fairing.io/deployer"], "tfjob");

        let replicas = manifest["spec"]["tfReplicaSpecs"].as_object().unwrap();
        assert_eq!(
            replicas.keys().cloned().collect::<Vec<_>>(),
            vec!["Chief".to_string(), "Worker".to_string()]
        );
        let chief = &replicas["Chief"];
        assert_eq!(chief["replicas"], 1);
        assert_eq!(chief["template"]["spec"]["containers"][0]["name"], "tensorflow");
        assert_eq!(
            chief["template"]["spec"]["containers"][0]["command"],
            json!(["python", "/app/train.py"])
        );
    }

    #[test]
    fn test_replica_counts_from_options() {
        let options = StrategyOptions::new()
            .with("chief_count", 0)
            .with("worker_count", 4)
            .with("ps_count", 2);
        let deployer =
            TfJobDeployer::from_options(&options, &context(Arc::new(DryRunClient::new()))).unwrap();
        let manifest = deployer.manifest("t", &spec(), Utc::now()).unwrap();
        let replicas = &manifest["spec"]["tfReplicaSpecs"];

        assert!(replicas.get("Chief").is_none());
        assert_eq!(replicas["Worker"]["replicas"], 4);
        assert_eq!(replicas["PS"]["replicas"], 2);
    }

    #[test]
    fn test_zero_replicas_rejected() {
        let options = StrategyOptions::new()
            .with("chief_count", 0)
            .with("worker_count", 0)
            .with("ps_count", 0);
        assert!(matches!(
            TfJobDeployer::from_options(&options, &context(Arc::new(DryRunClient::new()))),
            Err(DeployError::NoReplicas)
        ));
    }

    #[tokio::test]
    async fn test_deploy_applies_manifest() {
        let cluster = Arc::new(DryRunClient::new());
        let mut deployer =
            TfJobDeployer::from_options(&StrategyOptions::new(), &context(cluster.clone())).unwrap();
        deployer.deploy(spec()).await.unwrap();

        let manifests = cluster.manifests();
        assert_eq!(manifests.len(), 1);
        assert_eq!(manifests[0]["kind"], "TFJob");
        assert_eq!(
            deployer.deployed().unwrap().name,
            manifests[0]["metadata"]["name"].as_str().unwrap()
        );
    }
}
