//! Pipeline orchestrator: selects, chains and runs the three stages.
//!
//! The orchestrator holds at most one preprocessor, builder and deployer,
//! plus an opaque model. Empty slots are filled with the configured
//! defaults on first access. [`Orchestrator::run`] builds, derives a pod
//! spec from the builder, deploys it, then clears every slot so the same
//! value can drive an unrelated run.
//!
//! A failing `set_*` leaves its own slot as it was, and an unknown strategy
//! name touches no slot at all. A failing stage inside `run` aborts the run
//! and leaves the slots for inspection.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::builders::Builder;
use crate::config::FairingConfig;
use crate::context::StageContext;
use crate::deployers::Deployer;
use crate::error::{DockerError, OrchestratorError};
use crate::options::StrategyOptions;
use crate::preprocessors::{Preprocessor, PreprocessorKind};
use crate::probe::{EnvironmentProbe, JupyterProbe};
use crate::registry::{Registries, StrategyKind};

/// Opaque user object carried alongside a run.
pub type Model = Arc<dyn Any + Send + Sync>;

/// An orchestrator shared between call sites; the mutex serializes runs.
pub type SharedOrchestrator = Arc<Mutex<Orchestrator>>;

/// Coarse view of which slots are populated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrchestratorState {
    /// No slot is set.
    Empty,
    /// Some slots are set.
    PartiallyConfigured,
    /// Preprocessor, builder and deployer are all set.
    FullyConfigured,
}

/// Stateful core chaining preprocess → build → deploy.
pub struct Orchestrator {
    registries: Registries,
    context: StageContext,
    probe: Arc<dyn EnvironmentProbe>,
    preprocessor: Option<Arc<dyn Preprocessor>>,
    builder: Option<Box<dyn Builder>>,
    deployer: Option<Box<dyn Deployer>>,
    model: Option<Model>,
}

impl Orchestrator {
    /// Creates an empty orchestrator with the built-in strategies and the
    /// Jupyter environment probe.
    pub fn new(context: StageContext) -> Self {
        Self {
            registries: Registries::builtin(),
            context,
            probe: Arc::new(JupyterProbe::new()),
            preprocessor: None,
            builder: None,
            deployer: None,
            model: None,
        }
    }

    /// Creates an orchestrator whose strategies talk to Docker and kubectl,
    /// or to recording stand-ins when `config.dry_run` is set.
    pub fn from_config(config: FairingConfig) -> Result<Self, DockerError> {
        Ok(Self::new(StageContext::from_config(config)?))
    }

    /// Replaces the strategy registries.
    pub fn with_registries(mut self, registries: Registries) -> Self {
        self.registries = registries;
        self
    }

    /// Replaces the environment probe.
    pub fn with_probe(mut self, probe: impl EnvironmentProbe + 'static) -> Self {
        self.probe = Arc::new(probe);
        self
    }

    /// Wraps the orchestrator for shared use.
    pub fn into_shared(self) -> SharedOrchestrator {
        Arc::new(Mutex::new(self))
    }

    pub fn context(&self) -> &StageContext {
        &self.context
    }

    pub fn registries(&self) -> &Registries {
        &self.registries
    }

    /// Preprocessor used when none is named.
    pub fn default_preprocessor_kind(&self) -> PreprocessorKind {
        if self.probe.is_in_notebook() {
            self.context.config.notebook_preprocessor
        } else {
            self.context.config.default_preprocessor
        }
    }

    // Preprocessing

    /// Selects the preprocessor. Without a name, the notebook default is
    /// used inside a notebook session and the ordinary default elsewhere.
    pub fn set_preprocessor(
        &mut self,
        name: Option<&str>,
        options: StrategyOptions,
    ) -> Result<(), OrchestratorError> {
        let preprocessor = self.construct_preprocessor(name, &options)?;
        self.preprocessor = Some(preprocessor);
        Ok(())
    }

    /// Current preprocessor, selecting the default first if none is set.
    pub fn preprocessor(&mut self) -> Result<Arc<dyn Preprocessor>, OrchestratorError> {
        match &self.preprocessor {
            Some(preprocessor) => Ok(preprocessor.clone()),
            None => {
                let preprocessor = self.construct_preprocessor(None, &StrategyOptions::new())?;
                self.preprocessor = Some(preprocessor.clone());
                Ok(preprocessor)
            }
        }
    }

    pub fn has_preprocessor(&self) -> bool {
        self.preprocessor.is_some()
    }

    fn construct_preprocessor(
        &self,
        name: Option<&str>,
        options: &StrategyOptions,
    ) -> Result<Arc<dyn Preprocessor>, OrchestratorError> {
        let (kind, factory) = match name {
            Some(name) => self.registries.preprocessors.resolve(name)?,
            None => self
                .registries
                .preprocessors
                .resolve(self.default_preprocessor_kind().as_str())?,
        };
        let preprocessor = factory(options, &self.context)?;
        info!(strategy = %kind, "Selected preprocessor");
        Ok(preprocessor)
    }

    // Building

    /// Selects the builder, handing it the current preprocessor (selecting
    /// the default preprocessor first if none is set).
    ///
    /// The name is checked before any preprocessor is selected.
    pub fn set_builder(
        &mut self,
        name: Option<&str>,
        options: StrategyOptions,
    ) -> Result<(), OrchestratorError> {
        let builder = self.construct_builder(name, &options)?;
        self.builder = Some(builder);
        Ok(())
    }

    /// Current builder, selecting the default first if none is set.
    pub fn builder(&mut self) -> Result<&mut dyn Builder, OrchestratorError> {
        let builder = match self.builder.take() {
            Some(builder) => builder,
            None => self.construct_builder(None, &StrategyOptions::new())?,
        };
        let builder: &mut dyn Builder = self.builder.insert(builder).as_mut();
        Ok(builder)
    }

    pub fn has_builder(&self) -> bool {
        self.builder.is_some()
    }

    fn construct_builder(
        &mut self,
        name: Option<&str>,
        options: &StrategyOptions,
    ) -> Result<Box<dyn Builder>, OrchestratorError> {
        let (kind, factory) = match name {
            Some(name) => self.registries.builders.resolve(name)?,
            None => self
                .registries
                .builders
                .resolve(self.context.config.default_builder.as_str())?,
        };
        let preprocessor = self.preprocessor()?;
        let builder = factory(preprocessor, options, &self.context)?;
        info!(
            strategy = %kind,
            preprocessor = %builder.preprocessor().kind(),
            "Selected builder"
        );
        Ok(builder)
    }

    // Deploying

    /// Selects the deployer.
    pub fn set_deployer(
        &mut self,
        name: Option<&str>,
        options: StrategyOptions,
    ) -> Result<(), OrchestratorError> {
        let deployer = self.construct_deployer(name, &options)?;
        self.deployer = Some(deployer);
        Ok(())
    }

    /// Current deployer, selecting the default first if none is set.
    pub fn deployer(&mut self) -> Result<&mut dyn Deployer, OrchestratorError> {
        let deployer = match self.deployer.take() {
            Some(deployer) => deployer,
            None => self.construct_deployer(None, &StrategyOptions::new())?,
        };
        let deployer: &mut dyn Deployer = self.deployer.insert(deployer).as_mut();
        Ok(deployer)
    }

    pub fn has_deployer(&self) -> bool {
        self.deployer.is_some()
    }

    fn construct_deployer(
        &self,
        name: Option<&str>,
        options: &StrategyOptions,
    ) -> Result<Box<dyn Deployer>, OrchestratorError> {
        let (kind, factory) = match name {
            Some(name) => self.registries.deployers.resolve(name)?,
            None => self
                .registries
                .deployers
                .resolve(self.context.config.default_deployer.as_str())?,
        };
        let deployer = factory(options, &self.context)?;
        info!(strategy = %kind, "Selected deployer");
        Ok(deployer)
    }

    // Model

    /// Stores an opaque model object.
    pub fn set_model<M: Any + Send + Sync>(&mut self, model: M) {
        self.model = Some(Arc::new(model));
    }

    /// The stored model, if any. Never defaults.
    pub fn model(&self) -> Option<&Model> {
        self.model.as_ref()
    }

    /// The stored model downcast to `M`.
    pub fn model_as<M: Any>(&self) -> Option<&M> {
        self.model.as_ref()?.downcast_ref::<M>()
    }

    // Lifecycle

    /// Builds, generates the pod spec, deploys, then resets.
    ///
    /// Each stage completes before the next begins. A failure propagates
    /// unchanged and skips the reset.
    pub async fn run(&mut self) -> Result<(), OrchestratorError> {
        info!("Starting run");

        self.builder()?.build().await?;
        let spec = self.builder()?.generate_pod_spec()?;
        debug!(image = ?spec.image(), "Generated pod spec");
        self.deployer()?.deploy(spec).await?;

        info!("Run finished");
        self.reset();
        Ok(())
    }

    /// Clears all four slots.
    pub fn reset(&mut self) {
        self.preprocessor = None;
        self.builder = None;
        self.deployer = None;
        self.model = None;
        debug!("Orchestrator reset");
    }

    pub fn state(&self) -> OrchestratorState {
        if self.has_preprocessor() && self.has_builder() && self.has_deployer() {
            OrchestratorState::FullyConfigured
        } else if self.has_preprocessor()
            || self.has_builder()
            || self.has_deployer()
            || self.model.is_some()
        {
            OrchestratorState::PartiallyConfigured
        } else {
            OrchestratorState::Empty
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("preprocessor", &self.preprocessor.as_ref().map(|p| p.kind()))
            .field("builder", &self.builder.as_ref().map(|b| b.kind()))
            .field("deployer", &self.deployer.as_ref().map(|d| d.kind()))
            .field("model", &self.model.is_some())
            .finish()
    }
}
