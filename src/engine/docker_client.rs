//! Docker daemon engine using the bollard crate.
//!
//! Builds images from an in-memory context archive and pushes them to the
//! registry named in their repository.

use async_trait::async_trait;
use bollard::image::{BuildImageOptions, PushImageOptions};
use bollard::Docker;
use futures::StreamExt;
use tracing::{debug, info};

use super::{ImageBuildRequest, ImageEngine, ImageRef};
use crate::error::DockerError;

/// Image engine backed by a Docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Connects to the local Docker daemon.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if the Docker daemon is not accessible.
    pub fn new() -> Result<Self, DockerError> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| DockerError::DaemonUnavailable(format!("Failed to connect: {e}")))?;

        Ok(Self { docker })
    }

    /// Wraps an existing bollard Docker instance.
    pub fn from_docker(docker: Docker) -> Self {
        Self { docker }
    }
}

impl std::fmt::Debug for DockerEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DockerEngine").finish_non_exhaustive()
    }
}

#[async_trait]
impl ImageEngine for DockerEngine {
    async fn build_image(&self, request: &ImageBuildRequest) -> Result<(), DockerError> {
        let options = BuildImageOptions {
            dockerfile: request.dockerfile.clone(),
            t: request.image.to_string(),
            rm: true,
            forcerm: true,
            ..Default::default()
        };

        info!(image = %request.image, "Building image");
        let mut stream =
            self.docker
                .build_image(options, None, Some(request.context.clone().into()));

        while let Some(result) = stream.next().await {
            let info =
                result.map_err(|e| DockerError::BuildFailed(format!("Failed to build image: {e}")))?;

            if let Some(error) = info.error {
                return Err(DockerError::BuildFailed(error));
            }
            if let Some(line) = info.stream {
                let line = line.trim_end();
                if !line.is_empty() {
                    debug!("[docker build] {}", line);
                }
            }
        }

        Ok(())
    }

    async fn push_image(&self, image: &ImageRef) -> Result<(), DockerError> {
        let options = PushImageOptions {
            tag: image.tag.clone(),
        };

        info!(image = %image, "Pushing image");
        let mut stream = self
            .docker
            .push_image(&image.repository, Some(options), None);

        while let Some(result) = stream.next().await {
            let info =
                result.map_err(|e| DockerError::PushFailed(format!("Failed to push image: {e}")))?;

            if let Some(error) = info.error {
                return Err(DockerError::PushFailed(error));
            }
        }

        Ok(())
    }

    async fn image_exists(&self, image: &ImageRef) -> bool {
        self.docker.inspect_image(&image.to_string()).await.is_ok()
    }
}
