//! In-cluster builder: kaniko builds the image inside Kubernetes.
//!
//! The context archive is written to `context_dir`, which must be readable
//! from the cluster (a mounted volume or bucket). The kaniko pod reads it
//! back through `context_uri` and pushes the result.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;

use super::{
    dockerfile_config, image_repository, parse_options, Builder, BuilderKind, DockerfileBuilder,
    DOCKERFILE_NAME,
};
use crate::cluster::{self, ClusterClient};
use crate::context::StageContext;
use crate::engine::ImageRef;
use crate::error::BuildError;
use crate::naming;
use crate::options::StrategyOptions;
use crate::preprocessors::Preprocessor;

pub const DEFAULT_KANIKO_IMAGE: &str = "gcr.io/kaniko-project/executor:latest";

/// Delay between phase checks on the kaniko pod.
const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Mount point of the context volume in the kaniko pod.
const CONTEXT_MOUNT: &str = "/workspace";

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ClusterOptions {
    base_image: Option<String>,
    registry: Option<String>,
    image_name: Option<String>,
    context_dir: Option<PathBuf>,
    context_uri: Option<String>,
    pvc_name: Option<String>,
    namespace: Option<String>,
    kaniko_image: String,
    timeout_secs: u64,
    push: bool,
    install_requirements: bool,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self {
            base_image: None,
            registry: None,
            image_name: None,
            context_dir: None,
            context_uri: None,
            pvc_name: None,
            namespace: None,
            kaniko_image: DEFAULT_KANIKO_IMAGE.to_string(),
            timeout_secs: 600,
            push: true,
            install_requirements: true,
        }
    }
}

/// Builder that submits a kaniko pod and waits for it to finish.
pub struct ClusterBuilder {
    preprocessor: Arc<dyn Preprocessor>,
    cluster: Arc<dyn ClusterClient>,
    base_image: String,
    repository: String,
    context_dir: PathBuf,
    context_uri: String,
    pvc_name: Option<String>,
    namespace: String,
    kaniko_image: String,
    timeout: Duration,
    push: bool,
    install_requirements: bool,
    image: Option<ImageRef>,
}

impl ClusterBuilder {
    /// Constructs from keyword options. `context_dir` is required; the
    /// others are `base_image`, `registry`, `image_name`, `context_uri`
    /// (default `tar:///workspace`), `pvc_name` (volume claim mounted at
    /// `/workspace`), `namespace`, `kaniko_image`, `timeout_secs`
    /// (default 600), `push`, `install_requirements`.
    pub fn from_options(
        preprocessor: Arc<dyn Preprocessor>,
        options: &StrategyOptions,
        ctx: &StageContext,
    ) -> Result<Self, BuildError> {
        let opts: ClusterOptions = parse_options(options, "cluster")?;
        let context_dir = opts.context_dir.ok_or(BuildError::MissingOption {
            strategy: "cluster",
            option: "context_dir",
        })?;
        let repository =
            image_repository(&ctx.config, opts.registry.as_deref(), opts.image_name.as_deref())?;
        let namespace = opts
            .namespace
            .unwrap_or_else(|| ctx.config.namespace.clone());
        if !naming::is_dns_label(&namespace) {
            return Err(BuildError::InvalidName(namespace));
        }

        Ok(Self {
            preprocessor,
            cluster: ctx.cluster.clone(),
            base_image: opts
                .base_image
                .unwrap_or_else(|| ctx.config.base_image.clone()),
            repository,
            context_dir,
            context_uri: opts
                .context_uri
                .unwrap_or_else(|| format!("tar://{}", CONTEXT_MOUNT)),
            pvc_name: opts.pvc_name,
            namespace,
            kaniko_image: opts.kaniko_image,
            timeout: Duration::from_secs(opts.timeout_secs),
            push: opts.push,
            install_requirements: opts.install_requirements,
            image: None,
        })
    }

    /// Kaniko pod manifest building `image` from `archive_name`.
    pub fn kaniko_pod(&self, pod_name: &str, image: &ImageRef, archive_name: &str) -> Value {
        let mut args = vec![
            format!("--dockerfile={}", DOCKERFILE_NAME),
            format!(
                "--context={}/{}",
                self.context_uri.trim_end_matches('/'),
                archive_name
            ),
            format!("--destination={}", image),
        ];
        if !self.push {
            args.push("--no-push".to_string());
        }

        let mut pod = json!({
            "apiVersion": "v1",
            "kind": "Pod",
            "metadata": {
                "name": pod_name,
                "namespace": self.namespace,
                "labels": {"fairing.io/builder": BuilderKind::Cluster.to_string()}
            },
            "spec": {
                "restartPolicy": "Never",
                "containers": [{
                    "name": "kaniko",
                    "image": self.kaniko_image,
                    "args": args
                }]
            }
        });

        if let Some(claim) = &self.pvc_name {
            pod["spec"]["volumes"] = json!([{
                "name": "build-context",
                "persistentVolumeClaim": {"claimName": claim}
            }]);
            pod["spec"]["containers"][0]["volumeMounts"] = json!([{
                "name": "build-context",
                "mountPath": CONTEXT_MOUNT
            }]);
        }
        pod
    }
}

#[async_trait]
impl Builder for ClusterBuilder {
    fn kind(&self) -> BuilderKind {
        BuilderKind::Cluster
    }

    fn preprocessor(&self) -> &Arc<dyn Preprocessor> {
        &self.preprocessor
    }

    async fn build(&mut self) -> Result<(), BuildError> {
        self.preprocessor.preprocess()?;
        let context_map = self.preprocessor.context_map()?;
        let dockerfile = DockerfileBuilder::new(dockerfile_config(
            &self.base_image,
            self.preprocessor.as_ref(),
            &context_map,
            self.install_requirements,
        ))
        .build();

        let archive = self
            .preprocessor
            .context_archive(&[(DOCKERFILE_NAME.to_string(), dockerfile.into_bytes())])?;
        let archive_name = format!("fairing-context-{}.tar.gz", archive.short_digest());
        std::fs::create_dir_all(&self.context_dir)?;
        archive.write_to(&self.context_dir.join(&archive_name))?;
        info!(
            "Wrote build context to {}",
            self.context_dir.join(&archive_name).display()
        );

        let image = ImageRef::new(self.repository.clone(), archive.short_digest());
        let pod = self.kaniko_pod(&naming::unique_name("fairing-builder"), &image, &archive_name);
        let target = self.cluster.apply(&pod).await?;
        info!(resource = %target, image = %image, "Submitted in-cluster build");

        cluster::wait_for_phase(
            self.cluster.as_ref(),
            &target,
            "Succeeded",
            &["Failed"],
            self.timeout,
            POLL_INTERVAL,
        )
        .await?;
        info!(resource = %target, image = %image, "In-cluster build finished");

        self.image = Some(image);
        Ok(())
    }

    fn image(&self) -> Option<&ImageRef> {
        self.image.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cluster::{ClusterCall, DryRunClient};
    use crate::config::FairingConfig;
    use crate::engine::DryRunEngine;
    use crate::error::ClusterError;
    use crate::preprocessors::PythonPreprocessor;

    fn context(cluster: Arc<DryRunClient>) -> StageContext {
        StageContext::new(
            FairingConfig::default().with_registry("gcr.io/proj"),
            Arc::new(DryRunEngine::new()),
            cluster,
        )
    }

    #[test]
    fn test_context_dir_is_required() {
        let pre: Arc<dyn Preprocessor> = Arc::new(PythonPreprocessor::new(vec![]));
        let result = ClusterBuilder::from_options(
            pre,
            &StrategyOptions::new(),
            &context(Arc::new(DryRunClient::new())),
        );
        assert!(matches!(
            result,
            Err(BuildError::MissingOption {
                strategy: "cluster",
                option: "context_dir"
            })
        ));
    }

    #[test]
    fn test_kaniko_pod_with_volume() {
        let pre: Arc<dyn Preprocessor> = Arc::new(PythonPreprocessor::new(vec![]));
        let options = StrategyOptions::new()
            .with("context_dir", "/mnt/ctx")
            .with("pvc_name", "fairing-context")
            .with("namespace", "ml");
        let builder =
            ClusterBuilder::from_options(pre, &options, &context(Arc::new(DryRunClient::new())))
                .unwrap();

        let pod = builder.kaniko_pod(
            "fairing-builder-0000aaaa",
            &ImageRef::new("gcr.io/proj/fairing-job", "abc"),
            "ctx.tar.gz",
        );
        assert_eq!(pod["metadata"]["namespace"], "ml");
        assert_eq!(
            pod["spec"]["containers"][0]["args"],
            json!([
                "--dockerfile=Dockerfile",
                "--context=tar:///workspace/ctx.tar.gz",
                "--destination=gcr.io/proj/fairing-job:abc"
            ])
        );
        assert_eq!(
            pod["spec"]["volumes"][0]["persistentVolumeClaim"]["claimName"],
            "fairing-context"
        );
        assert_eq!(
            pod["spec"]["containers"][0]["volumeMounts"][0]["mountPath"],
            "/workspace"
        );
    }

    #[tokio::test]
    async fn test_build_writes_context_and_waits() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("train.py"), "print(1)").unwrap();
        let context_dir = dir.path().join("ctx");

        let pre: Arc<dyn Preprocessor> =
            Arc::new(PythonPreprocessor::new(vec![]).with_executable(dir.path().join("train.py")));
        let options = StrategyOptions::new()
            .with("context_dir", context_dir.to_string_lossy().into_owned())
            .with("context_uri", "gs://bucket/ctx/")
            .with("push", false);
        let cluster = Arc::new(DryRunClient::new());
        let mut builder =
            ClusterBuilder::from_options(pre, &options, &context(cluster.clone())).unwrap();
        builder.build().await.unwrap();

        let image = builder.image().unwrap().clone();
        let archive = context_dir.join(format!("fairing-context-{}.tar.gz", image.tag));
        assert!(archive.exists());

        let calls = cluster.calls();
        assert_eq!(calls.len(), 2);
        let ClusterCall::Apply(pod) = &calls[0] else {
            panic!("expected apply, got {:?}", calls[0]);
        };
        let args = pod["spec"]["containers"][0]["args"].as_array().unwrap();
        assert!(args.contains(&json!(format!(
            "--context=gs://bucket/ctx/fairing-context-{}.tar.gz",
            image.tag
        ))));
        assert!(args.contains(&json!("--no-push")));
        assert!(matches!(&calls[1], ClusterCall::Phase(pod) if pod.kind == "Pod"));
        assert_eq!(builder.generate_pod_spec().unwrap().image(), Some(image.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_failed_kaniko_pod_fails_build() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("train.py"), "print(1)").unwrap();

        let pre: Arc<dyn Preprocessor> =
            Arc::new(PythonPreprocessor::new(vec![]).with_executable(dir.path().join("train.py")));
        let options = StrategyOptions::new()
            .with("context_dir", dir.path().join("ctx").to_string_lossy().into_owned());
        let cluster = Arc::new(DryRunClient::new().with_phase(Some("Failed")));
        let mut builder =
            ClusterBuilder::from_options(pre, &options, &context(cluster.clone())).unwrap();

        let err = builder.build().await.unwrap_err();
        assert!(matches!(
            err,
            BuildError::Cluster(ClusterError::ResourceFailed { ref phase, .. }) if phase == "Failed"
        ));
        assert!(builder.image().is_none());
        assert_eq!(cluster.calls().len(), 2);
    }
}
