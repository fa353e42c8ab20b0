//! Append builder: layers the build context onto a base image.
//!
//! The tag is derived from the base image and the context digest, so an
//! unchanged context maps to an image the engine already has and the build
//! is skipped.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
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

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AppendOptions {
    base_image: Option<String>,
    registry: Option<String>,
    image_name: Option<String>,
    push: Option<bool>,
}

/// Tag for `base_image` extended with a context of digest `context_digest`.
pub fn append_tag(base_image: &str, context_digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(base_image.as_bytes());
    hasher.update(b"\n");
    hasher.update(context_digest.as_bytes());
    hex::encode(hasher.finalize())[..12].to_string()
}

/// Builder that copies the context on top of a base image.
pub struct AppendBuilder {
    preprocessor: Arc<dyn Preprocessor>,
    engine: Arc<dyn ImageEngine>,
    base_image: String,
    repository: String,
    push: bool,
    image: Option<ImageRef>,
}

impl AppendBuilder {
    /// Constructs from keyword options: `base_image`, `registry`,
    /// `image_name`, `push` (default true).
    pub fn from_options(
        preprocessor: Arc<dyn Preprocessor>,
        options: &StrategyOptions,
        ctx: &StageContext,
    ) -> Result<Self, BuildError> {
        let opts: AppendOptions = parse_options(options, "append")?;
        let repository =
            image_repository(&ctx.config, opts.registry.as_deref(), opts.image_name.as_deref())?;

        Ok(Self {
            preprocessor,
            engine: ctx.engine.clone(),
            base_image: opts
                .base_image
                .unwrap_or_else(|| ctx.config.base_image.clone()),
            repository,
            push: opts.push.unwrap_or(true),
            image: None,
        })
    }

    pub fn base_image(&self) -> &str {
        &self.base_image
    }

    pub fn repository(&self) -> &str {
        &self.repository
    }
}

#[async_trait]
impl Builder for AppendBuilder {
    fn kind(&self) -> BuilderKind {
        BuilderKind::Append
    }

    fn preprocessor(&self) -> &Arc<dyn Preprocessor> {
        &self.preprocessor
    }

    async fn build(&mut self) -> Result<(), BuildError> {
        self.preprocessor.preprocess()?;
        let context_map = self.preprocessor.context_map()?;

        let mut config =
            dockerfile_config(&self.base_image, self.preprocessor.as_ref(), &context_map, false);
        config.workdir = None;
        config.command.clear();
        let dockerfile = DockerfileBuilder::new(config).build();

        let archive = self
            .preprocessor
            .context_archive(&[(DOCKERFILE_NAME.to_string(), dockerfile.into_bytes())])?;
        let image = ImageRef::new(
            self.repository.clone(),
            append_tag(&self.base_image, &archive.digest),
        );

        if self.engine.image_exists(&image).await {
            info!(image = %image, "Context unchanged, reusing image");
        } else {
            info!(image = %image, base = %self.base_image, "Appending context to base image");
            self.engine
                .build_image(&ImageBuildRequest {
                    image: image.clone(),
                    context: archive.bytes,
                    dockerfile: DOCKERFILE_NAME.to_string(),
                })
                .await?;
        }
        // A local hit says nothing about the registry.
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
