//! Docker builder: full Dockerfile build on the local daemon.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::info;

use super::{
    dockerfile_config, image_repository, parse_options, Builder, BuilderKind, DockerfileBuilder,
    DOCKERFILE_NAME,
};
use crate::context::StageContext;
use crate::engine::{ImageBuildRequest, ImageEngine, ImageRef};
use crate::error::BuildError;
use crate::options::StrategyOptions;
use crate::preprocessors::Preprocessor;

#[derive(Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DockerOptions {
    base_image: Option<String>,
    registry: Option<String>,
    image_name: Option<String>,
    push: bool,
    dockerfile: Option<PathBuf>,
    install_requirements: bool,
    env: BTreeMap<String, String>,
}

impl Default for DockerOptions {
    fn default() -> Self {
        Self {
            base_image: None,
            registry: None,
            image_name: None,
            push: true,
            dockerfile: None,
            install_requirements: true,
            env: BTreeMap::new(),
        }
    }
}

/// Builder producing a self-contained image from a generated or supplied Dockerfile.
pub struct DockerBuilder {
    preprocessor: Arc<dyn Preprocessor>,
    engine: Arc<dyn ImageEngine>,
    base_image: String,
    repository: String,
    push: bool,
    dockerfile: Option<PathBuf>,
    install_requirements: bool,
    env: BTreeMap<String, String>,
    image: Option<ImageRef>,
}

impl DockerBuilder {
    /// Constructs from keyword options: `base_image`, `registry`,
    /// `image_name`, `push` (default true), `dockerfile` (use this file
    /// instead of generating one), `install_requirements` (default true),
    /// `env`.
    pub fn from_options(
        preprocessor: Arc<dyn Preprocessor>,
        options: &StrategyOptions,
        ctx: &StageContext,
    ) -> Result<Self, BuildError> {
        let opts: DockerOptions = parse_options(options, "docker")?;
        let repository =
            image_repository(&ctx.config, opts.registry.as_deref(), opts.image_name.as_deref())?;

        Ok(Self {
            preprocessor,
            engine: ctx.engine.clone(),
            base_image: opts
                .base_image
                .unwrap_or_else(|| ctx.config.base_image.clone()),
            repository,
            push: opts.push,
            dockerfile: opts.dockerfile,
            install_requirements: opts.install_requirements,
            env: opts.env,
            image: None,
        })
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }

    /// Dockerfile content for the current context.
    pub fn dockerfile(&self) -> Result<String, BuildError> {
        if let Some(path) = &self.dockerfile {
            return Ok(std::fs::read_to_string(path)?);
        }

        let context_map = self.preprocessor.context_map()?;
        let mut config = dockerfile_config(
            &self.base_image,
            self.preprocessor.as_ref(),
            &context_map,
            self.install_requirements,
        );
        config.env_vars = self.env.clone();
        config
            .labels
            .insert("fairing.io/builder".to_string(), BuilderKind::Docker.to_string());
        Ok(DockerfileBuilder::new(config).build())
    }
}

#[async_trait]
impl Builder for DockerBuilder {
    fn kind(&self) -> BuilderKind {
        BuilderKind::Docker
    }

    fn preprocessor(&self) -> &Arc<dyn Preprocessor> {
        &self.preprocessor
    }

    async fn build(&mut self) -> Result<(), BuildError> {
        self.preprocessor.preprocess()?;
        let dockerfile = self.dockerfile()?;
        let archive = self
            .preprocessor
            .context_archive(&[(DOCKERFILE_NAME.to_string(), dockerfile.into_bytes())])?;
        let image = ImageRef::new(self.repository.clone(), archive.short_digest());

        info!(
            image = %image,
            entries = archive.entries.len(),
            "Building image from context"
        );
        self.engine
            .build_image(&ImageBuildRequest {
                image: image.clone(),
                context: archive.bytes,
                dockerfile: DOCKERFILE_NAME.to_string(),
            })
            .await?;
        if self.push {
            self.engine.push_image(&image).await?;
        }

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
    use crate::cluster::DryRunClient;
    use crate::config::FairingConfig;
    use crate::engine::{DryRunEngine, EngineCall};
    use crate::preprocessors::PythonPreprocessor;
    use serde_json::json;

    fn context(engine: Arc<DryRunEngine>) -> StageContext {
        StageContext::new(FairingConfig::default(), engine, Arc::new(DryRunClient::new()))
    }

    #[test]
    fn test_generated_dockerfile_installs_requirements() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "numpy\n").unwrap();
        std::fs::write(dir.path().join("train.py"), "import numpy").unwrap();

        let pre: Arc<dyn Preprocessor> = Arc::new(
            PythonPreprocessor::new(vec![dir.path().join("requirements.txt")])
                .with_executable(dir.path().join("train.py")),
        );
        let options = StrategyOptions::new().with("env", json!({"EPOCHS": "3"}));
        let builder =
            DockerBuilder::from_options(pre, &options, &context(Arc::new(DryRunEngine::new())))
                .unwrap();

        let dockerfile = builder.dockerfile().unwrap();
        assert!(dockerfile.starts_with("FROM python:3.11-slim\n"));
        assert!(dockerfile.contains("ENV EPOCHS=\"3\""));
        assert!(dockerfile.contains("WORKDIR /app/"));
        assert!(dockerfile.contains("RUN pip install --no-cache-dir -r /app/requirements.txt"));
        assert!(dockerfile.contains("COPY app/train.py /app/train.py"));
        assert_eq!(dockerfile.matches("COPY app/requirements.txt").count(), 1);
        assert!(dockerfile.ends_with("CMD [\"python\",\"/app/train.py\"]\n"));
    }

    #[test]
    fn test_supplied_dockerfile_is_used_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Dockerfile.custom");
        std::fs::write(&path, "FROM scratch\n").unwrap();

        let pre: Arc<dyn Preprocessor> = Arc::new(PythonPreprocessor::new(vec![]));
        let options = StrategyOptions::new().with("dockerfile", path.to_string_lossy().into_owned());
        let builder =
            DockerBuilder::from_options(pre, &options, &context(Arc::new(DryRunEngine::new())))
                .unwrap();
        assert_eq!(builder.dockerfile().unwrap(), "FROM scratch\n");
    }

    #[tokio::test]
    async fn test_build_tags_with_context_digest() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("train.py"), "print(1)").unwrap();
        let pre: Arc<dyn Preprocessor> =
            Arc::new(PythonPreprocessor::new(vec![]).with_executable(dir.path().join("train.py")));

        let engine = Arc::new(DryRunEngine::new());
        let options = StrategyOptions::new().with("push", false);
        let mut builder = DockerBuilder::from_options(pre, &options, &context(engine.clone())).unwrap();
        builder.build().await.unwrap();

        let image = builder.image().unwrap();
        assert_eq!(image.repository, "fairing-job");
        assert_eq!(image.tag.len(), 12);
        assert_eq!(engine.calls().len(), 1);
        assert!(matches!(&engine.calls()[0], EngineCall::Build { .. }));
        assert_eq!(builder.generate_pod_spec().unwrap().image(), Some(image.to_string().as_str()));
    }

    #[tokio::test]
    async fn test_build_fails_on_missing_input() {
        let pre: Arc<dyn Preprocessor> =
            Arc::new(PythonPreprocessor::new(vec![PathBuf::from("/no/such/input.py")]));
        let engine = Arc::new(DryRunEngine::new());
        let mut builder =
            DockerBuilder::from_options(pre, &StrategyOptions::new(), &context(engine.clone())).unwrap();

        assert!(matches!(builder.build().await, Err(BuildError::Preprocess(_))));
        assert!(builder.image().is_none());
        assert!(engine.calls().is_empty());
    }
}
