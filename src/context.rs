//! Shared dependencies handed to every strategy factory.

use std::sync::Arc;

use crate::cluster::{ClusterClient, DryRunClient, KubectlClient};
use crate::config::FairingConfig;
use crate::engine::{DockerEngine, DryRunEngine, ImageEngine};
use crate::error::DockerError;

/// Configuration plus the image engine and cluster client strategies use.
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<FairingConfig>,
    pub engine: Arc<dyn ImageEngine>,
    pub cluster: Arc<dyn ClusterClient>,
}

impl StageContext {
    pub fn new(
        config: FairingConfig,
        engine: Arc<dyn ImageEngine>,
        cluster: Arc<dyn ClusterClient>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            engine,
            cluster,
        }
    }

    /// Builds the live context for `config`, or a recording one when
    /// `config.dry_run` is set.
    ///
    /// # Errors
    ///
    /// Returns `DockerError::DaemonUnavailable` if Docker cannot be reached.
    pub fn from_config(config: FairingConfig) -> Result<Self, DockerError> {
        if config.dry_run {
            return Ok(Self::dry_run(config));
        }
        let cluster = Arc::new(KubectlClient::new(config.kubectl.clone()));
        Ok(Self::new(config, Arc::new(DockerEngine::new()?), cluster))
    }

    /// Context whose engine and cluster only record requests.
    pub fn dry_run(config: FairingConfig) -> Self {
        Self::new(
            config,
            Arc::new(DryRunEngine::new()),
            Arc::new(DryRunClient::new()),
        )
    }
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
