//! Container image engine used by the local builders.
//!
//! [`ImageEngine`] is the seam between builders and whatever produces
//! images: [`DockerEngine`] drives a Docker daemon through bollard, and
//! [`DryRunEngine`] only records what would have been built.

pub mod docker_client;

use std::collections::HashSet;
use std::fmt;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::info;

use crate::error::DockerError;

pub use docker_client::DockerEngine;

/// A fully qualified image reference, `repository:tag`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ImageRef {
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    pub fn new(repository: impl Into<String>, tag: impl Into<String>) -> Self {
        Self {
            repository: repository.into(),
            tag: tag.into(),
        }
    }

    /// Parses `repository[:tag]`, defaulting the tag to `latest`.
    ///
    /// A colon before the last '/' belongs to a registry port, not a tag.
    pub fn parse(reference: &str) -> Result<Self, DockerError> {
        if reference.is_empty() || reference.contains(char::is_whitespace) {
            return Err(DockerError::InvalidReference(reference.to_string()));
        }
        let last_slash = reference.rfind('/').map_or(0, |i| i + 1);
        match reference[last_slash..].rfind(':') {
            Some(i) => {
                let split = last_slash + i;
                let (repository, tag) = (&reference[..split], &reference[split + 1..]);
                if repository.is_empty() || tag.is_empty() {
                    return Err(DockerError::InvalidReference(reference.to_string()));
                }
                Ok(Self::new(repository, tag))
            }
            None => Ok(Self::new(reference, "latest")),
        }
    }
}

impl fmt::Display for ImageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.repository, self.tag)
    }
}

/// A request to build an image from a packed context.
#[derive(Debug, Clone)]
pub struct ImageBuildRequest {
    /// Tag given to the built image.
    pub image: ImageRef,
    /// Gzip'd tar build context.
    pub context: Vec<u8>,
    /// Dockerfile path inside the context.
    pub dockerfile: String,
}

/// Produces and publishes container images.
#[async_trait]
pub trait ImageEngine: Send + Sync {
    /// Builds `request.image` from the packed context.
    async fn build_image(&self, request: &ImageBuildRequest) -> Result<(), DockerError>;

    /// Pushes an image to its registry.
    async fn push_image(&self, image: &ImageRef) -> Result<(), DockerError>;

    /// Checks whether the image is already available to the engine.
    async fn image_exists(&self, image: &ImageRef) -> bool;
}

/// A call recorded by [`DryRunEngine`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCall {
    Build { image: ImageRef, context_len: usize },
    Push { image: ImageRef },
}

/// Engine that records requests without contacting a daemon.
///
/// Built images are remembered, so a later `image_exists` sees them.
#[derive(Debug, Default)]
pub struct DryRunEngine {
    calls: Mutex<Vec<EngineCall>>,
    images: Mutex<HashSet<ImageRef>>,
}

impl DryRunEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Marks an image as already present.
    #[cfg(test)]
    pub(crate) fn with_existing(self, image: ImageRef) -> Self {
        self.images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(image);
        self
    }

    /// Calls received so far, in order.
    pub fn calls(&self) -> Vec<EngineCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, call: EngineCall) {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }
}

#[async_trait]
impl ImageEngine for DryRunEngine {
    async fn build_image(&self, request: &ImageBuildRequest) -> Result<(), DockerError> {
        info!(
            image = %request.image,
            context_bytes = request.context.len(),
            "[dry-run] docker build"
        );
        self.record(EngineCall::Build {
            image: request.image.clone(),
            context_len: request.context.len(),
        });
        self.images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(request.image.clone());
        Ok(())
    }

    async fn push_image(&self, image: &ImageRef) -> Result<(), DockerError> {
        info!(image = %image, "[dry-run] docker push");
        self.record(EngineCall::Push {
            image: image.clone(),
        });
        Ok(())
    }

    async fn image_exists(&self, image: &ImageRef) -> bool {
        self.images
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(image)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_ref_parse() {
        assert_eq!(
            ImageRef::parse("python:3.11-slim").unwrap(),
            ImageRef::new("python", "3.11-slim")
        );
        assert_eq!(
            ImageRef::parse("registry.local:5000/team/job").unwrap(),
            ImageRef::new("registry.local:5000/team/job", "latest")
        );
        assert_eq!(
            ImageRef::parse("registry.local:5000/team/job:abc123").unwrap(),
            ImageRef::new("registry.local:5000/team/job", "abc123")
        );
        assert!(ImageRef::parse("").is_err());
        assert!(ImageRef::parse("job:").is_err());
        assert!(ImageRef::parse("bad image").is_err());
    }

    #[test]
    fn test_image_ref_display() {
        let image = ImageRef::new("gcr.io/p/fairing-job", "0123456789ab");
        assert_eq!(image.to_string(), "gcr.io/p/fairing-job:0123456789ab");
    }

    #[tokio::test]
    async fn test_dry_run_engine_records_calls() {
        let engine = DryRunEngine::new();
        let image = ImageRef::new("fairing-job", "abc");
        assert!(!engine.image_exists(&image).await);

        engine
            .build_image(&ImageBuildRequest {
                image: image.clone(),
                context: vec![1, 2, 3],
                dockerfile: "Dockerfile".to_string(),
            })
            .await
            .unwrap();
        engine.push_image(&image).await.unwrap();

        assert!(engine.image_exists(&image).await);
        assert_eq!(
            engine.calls(),
            vec![
                EngineCall::Build {
                    image: image.clone(),
                    context_len: 3
                },
                EngineCall::Push { image }
            ]
        );
    }

    #[tokio::test]
    async fn test_dry_run_engine_existing_images() {
        let image = ImageRef::new("base", "1");
        let engine = DryRunEngine::new().with_existing(image.clone());
        assert!(engine.image_exists(&image).await);
        assert!(engine.calls().is_empty());
    }
}
