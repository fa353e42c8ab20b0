//! fairing: build training code into container images and run it on Kubernetes.
//!
//! A run chains three pluggable stages. A preprocessor selects and rewrites
//! the source, a builder produces an image from it, and a deployer submits
//! a workload running that image. The [`Orchestrator`] picks one strategy
//! per stage by name, fills in defaults lazily, and resets itself after
//! each successful run.

// Pipeline core
pub mod options;
pub mod orchestrator;
pub mod probe;
pub mod registry;

// Stage strategies
pub mod builders;
pub mod deployers;
pub mod preprocessors;

// Backends and shared types
pub mod cli;
pub mod cluster;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod naming;
pub mod workload;

pub use builders::{Builder, BuilderKind};
pub use config::{ConfigError, FairingConfig};
pub use context::StageContext;
pub use deployers::{Deployer, DeployerKind};
pub use error::{
    BuildError, ClusterError, DeployError, DockerError, OrchestratorError, PreprocessError,
};
pub use options::StrategyOptions;
pub use orchestrator::{Orchestrator, OrchestratorState, SharedOrchestrator};
pub use preprocessors::{Preprocessor, PreprocessorKind};
pub use registry::{Registries, Stage, StrategyRegistry};
pub use workload::PodSpec;
