//! Building strategies: turn preprocessed source into a runnable image.
//!
//! Every builder owns the preprocessor it was constructed with. After a
//! successful [`Builder::build`], [`Builder::generate_pod_spec`] describes a
//! pod running the produced image with the preprocessor's command.

pub mod append;
pub mod cluster;
pub mod docker;
pub mod dockerfile;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::FairingConfig;
use crate::context::StageContext;
use crate::engine::ImageRef;
use crate::error::{BuildError, DockerError};
use crate::naming;
use crate::options::StrategyOptions;
use crate::preprocessors::Preprocessor;
use crate::registry::{builder_factory, BuilderFactory, Stage, StrategyKind, StrategyRegistry};
use crate::workload::{ContainerSpec, PodSpec, DEFAULT_CONTAINER_NAME};

pub use append::AppendBuilder;
pub use cluster::ClusterBuilder;
pub use docker::DockerBuilder;
pub use dockerfile::{DockerfileBuilder, DockerfileConfig};

/// Dockerfile path inside generated build contexts.
pub const DOCKERFILE_NAME: &str = "Dockerfile";

/// Supported building strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuilderKind {
    /// Layer the context onto a base image.
    Append,
    /// Full Dockerfile build on the local daemon.
    Docker,
    /// In-cluster kaniko build.
    Cluster,
}

impl StrategyKind for BuilderKind {
    const STAGE: Stage = Stage::Build;
    const ALL: &'static [Self] = &[Self::Append, Self::Docker, Self::Cluster];

    fn as_str(&self) -> &'static str {
        match self {
            BuilderKind::Append => "append",
            BuilderKind::Docker => "docker",
            BuilderKind::Cluster => "cluster",
        }
    }
}

impl fmt::Display for BuilderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for BuilderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "append" => Ok(BuilderKind::Append),
            "docker" => Ok(BuilderKind::Docker),
            "cluster" => Ok(BuilderKind::Cluster),
            other => Err(format!("Unknown builder: {}", other)),
        }
    }
}

/// Contract every building strategy satisfies.
#[async_trait]
pub trait Builder: Send + Sync {
    /// Strategy tag of this builder.
    fn kind(&self) -> BuilderKind;

    /// Preprocessor injected at construction.
    fn preprocessor(&self) -> &Arc<dyn Preprocessor>;

    /// Produces the deployable image.
    async fn build(&mut self) -> Result<(), BuildError>;

    /// Image produced by the last successful build.
    fn image(&self) -> Option<&ImageRef>;

    /// Describes a pod running the built image.
    ///
    /// # Errors
    ///
    /// Returns `BuildError::NotBuilt` before a successful `build()`.
    fn generate_pod_spec(&self) -> Result<PodSpec, BuildError> {
        let image = self
            .image()
            .ok_or(BuildError::NotBuilt(self.kind().as_str()))?;
        Ok(pod_spec_for(image, self.preprocessor().as_ref()))
    }
}

/// Single-container pod spec running `image` with the preprocessor's command.
pub fn pod_spec_for(image: &ImageRef, preprocessor: &dyn Preprocessor) -> PodSpec {
    PodSpec::single(
        ContainerSpec::new(DEFAULT_CONTAINER_NAME, image.to_string())
            .with_command(preprocessor.command())
            .with_working_dir(preprocessor.path_prefix())
            .with_env("FAIRING_RUNTIME", "1"),
    )
}

/// Image repository from per-builder overrides, falling back to the config.
pub(crate) fn image_repository(
    config: &FairingConfig,
    registry: Option<&str>,
    image_name: Option<&str>,
) -> Result<String, BuildError> {
    let image_name = image_name.unwrap_or(&config.image_name);
    if !naming::is_image_repository(image_name) {
        return Err(DockerError::InvalidReference(image_name.to_string()).into());
    }
    Ok(match registry.or(config.registry.as_deref()) {
        Some(registry) => format!("{}/{}", registry.trim_end_matches('/'), image_name),
        None => image_name.to_string(),
    })
}

/// Dockerfile settings for a context map; `install_requirements` pulls a
/// shipped `requirements.txt` at the prefix root into a pip layer.
pub(crate) fn dockerfile_config(
    base_image: &str,
    preprocessor: &dyn Preprocessor,
    context_map: &BTreeMap<String, PathBuf>,
    install_requirements: bool,
) -> DockerfileConfig {
    let requirements_path = format!(
        "{}{}",
        preprocessor.path_prefix(),
        dockerfile::REQUIREMENTS_FILE
    );
    let requirements = (install_requirements && context_map.contains_key(&requirements_path))
        .then(|| {
            (
                requirements_path.trim_start_matches('/').to_string(),
                requirements_path.clone(),
            )
        });

    let copy_paths = dockerfile::copy_pairs(
        context_map
            .keys()
            .filter(|path| requirements.is_none() || **path != requirements_path),
    );

    DockerfileConfig {
        base_image: base_image.to_string(),
        workdir: Some(preprocessor.path_prefix().to_string()),
        requirements,
        copy_paths,
        command: preprocessor.command(),
        ..Default::default()
    }
}

pub(crate) fn parse_options<T: serde::de::DeserializeOwned>(
    options: &StrategyOptions,
    strategy: &'static str,
) -> Result<T, BuildError> {
    options
        .parse()
        .map_err(|source| BuildError::InvalidOptions { strategy, source })
}

fn append_factory(
    preprocessor: Arc<dyn Preprocessor>,
    options: &StrategyOptions,
    ctx: &StageContext,
) -> Result<Box<dyn Builder>, BuildError> {
    Ok(Box::new(AppendBuilder::from_options(preprocessor, options, ctx)?))
}

fn docker_factory(
    preprocessor: Arc<dyn Preprocessor>,
    options: &StrategyOptions,
    ctx: &StageContext,
) -> Result<Box<dyn Builder>, BuildError> {
    Ok(Box::new(DockerBuilder::from_options(preprocessor, options, ctx)?))
}

fn cluster_factory(
    preprocessor: Arc<dyn Preprocessor>,
    options: &StrategyOptions,
    ctx: &StageContext,
) -> Result<Box<dyn Builder>, BuildError> {
    Ok(Box::new(ClusterBuilder::from_options(preprocessor, options, ctx)?))
}

/// Registry of the built-in building strategies.
pub fn builtin_registry() -> StrategyRegistry<BuilderKind, BuilderFactory> {
    StrategyRegistry::new()
        .with(BuilderKind::Append, builder_factory(append_factory))
        .with(BuilderKind::Docker, builder_factory(docker_factory))
        .with(BuilderKind::Cluster, builder_factory(cluster_factory))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::preprocessors::PythonPreprocessor;

    #[test]
    fn test_kind_names() {
        for kind in BuilderKind::ALL {
            assert_eq!(kind.as_str().parse::<BuilderKind>().unwrap(), *kind);
        }
        assert!("kaniko".parse::<BuilderKind>().is_err());
        assert_eq!(serde_json::to_string(&BuilderKind::Append).unwrap(), "\"append\"");
    }

    #[test]
    fn test_image_repository() {
        let config = FairingConfig::default();
        assert_eq!(image_repository(&config, None, None).unwrap(), "fairing-job");
        assert_eq!(
            image_repository(&config, Some("gcr.io/proj/"), Some("train")).unwrap(),
            "gcr.io/proj/train"
        );

        let config = config.with_registry("registry.local:5000");
        assert_eq!(
            image_repository(&config, None, None).unwrap(),
            "registry.local:5000/fairing-job"
        );
        assert!(matches!(
            image_repository(&config, None, Some("Bad Name")),
            Err(BuildError::Docker(DockerError::InvalidReference(_)))
        ));
    }

    #[test]
    fn test_pod_spec_for() {
        let pre = PythonPreprocessor::new(vec![]).with_executable("train.py");
        let spec = pod_spec_for(&ImageRef::new("repo/job", "abc"), &pre);
        let container = &spec.containers[0];
        assert_eq!(container.name, DEFAULT_CONTAINER_NAME);
        assert_eq!(container.image, "repo/job:abc");
        assert_eq!(container.command, vec!["python", "/app/train.py"]);
        assert_eq!(container.working_dir.as_deref(), Some("/app/"));
        assert_eq!(spec.restart_policy, "Never");
    }

    #[test]
    fn test_dockerfile_config_requirements() {
        let pre = PythonPreprocessor::new(vec![]);
        let mut map = BTreeMap::new();
        map.insert("/app/requirements.txt".to_string(), PathBuf::from("requirements.txt"));
        map.insert("/app/train.py".to_string(), PathBuf::from("train.py"));

        let with = dockerfile_config("base", &pre, &map, true);
        assert_eq!(
            with.requirements,
            Some(("app/requirements.txt".to_string(), "/app/requirements.txt".to_string()))
        );
        assert_eq!(
            with.copy_paths,
            vec![("app/train.py".to_string(), "/app/train.py".to_string())]
        );

        let without = dockerfile_config("base", &pre, &map, false);
        assert!(without.requirements.is_none());
        assert_eq!(without.copy_paths.len(), 2);
    }
}
