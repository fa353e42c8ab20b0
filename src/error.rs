//! Error types for fairing operations.
//!
//! Defines error types for every subsystem a run touches:
//! - Strategy selection and orchestration
//! - Source preprocessing and build-context packaging
//! - Image building (local daemon or in-cluster)
//! - Workload deployment
//! - Docker daemon and cluster client access

use std::path::PathBuf;

use thiserror::Error;

use crate::registry::Stage;

/// Errors surfaced by the pipeline orchestrator.
///
/// Collaborator failures are wrapped transparently so that the original
/// error reaches the caller unmodified.
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("Unknown {stage} strategy '{name}'")]
    UnknownStrategy { stage: Stage, name: String },

    #[error(transparent)]
    Preprocess(#[from] PreprocessError),

    #[error(transparent)]
    Build(#[from] BuildError),

    #[error(transparent)]
    Deploy(#[from] DeployError),
}

/// Errors that can occur while preparing source for a build.
#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error("Invalid options for preprocessor '{strategy}': {source}")]
    InvalidOptions {
        strategy: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Input file not found: {0}")]
    InputNotFound(PathBuf),

    #[error("No notebook found in {0}")]
    NotebookNotFound(PathBuf),

    #[error("Multiple notebooks found in {dir}, set notebook_file explicitly: {candidates:?}")]
    AmbiguousNotebook {
        dir: PathBuf,
        candidates: Vec<PathBuf>,
    },

    #[error("Failed to parse notebook '{path}': {reason}")]
    InvalidNotebook { path: PathBuf, reason: String },

    #[error("Failed to walk '{path}': {reason}")]
    Walk { path: PathBuf, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while producing a deployable artifact.
#[derive(Debug, Error)]
pub enum BuildError {
    #[error("Invalid options for builder '{strategy}': {source}")]
    InvalidOptions {
        strategy: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Builder '{0}' has not produced an image yet; call build() first")]
    NotBuilt(&'static str),

    #[error("Invalid resource name '{0}': must be a lowercase RFC 1123 label")]
    InvalidName(String),

    #[error("Missing required option for builder '{strategy}': {option}")]
    MissingOption {
        strategy: &'static str,
        option: &'static str,
    },

    #[error("Preprocessing failed: {0}")]
    Preprocess(#[from] PreprocessError),

    #[error("Docker error: {0}")]
    Docker(#[from] DockerError),

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors that can occur while submitting a workload.
#[derive(Debug, Error)]
pub enum DeployError {
    #[error("Invalid options for deployer '{strategy}': {source}")]
    InvalidOptions {
        strategy: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid resource name '{0}': must be a lowercase RFC 1123 label")]
    InvalidName(String),

    #[error("Workload specification has no containers")]
    EmptyPodSpec,

    #[error("TFJob needs at least one chief, worker or parameter server replica")]
    NoReplicas,

    #[error("Cluster error: {0}")]
    Cluster(#[from] ClusterError),
}

/// Errors that can occur during Docker operations.
#[derive(Debug, Error)]
pub enum DockerError {
    #[error("Docker build failed: {0}")]
    BuildFailed(String),

    #[error("Docker push failed: {0}")]
    PushFailed(String),

    #[error("Docker daemon not available: {0}")]
    DaemonUnavailable(String),

    #[error("Invalid image reference: {0}")]
    InvalidReference(String),
}

/// Errors that can occur while talking to the cluster.
#[derive(Debug, Error)]
pub enum ClusterError {
    #[error("Failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with code {code}: {stderr}")]
    CommandFailed {
        command: String,
        code: i32,
        stderr: String,
    },

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),

    #[error("{resource} ended in phase {phase}")]
    ResourceFailed { resource: String, phase: String },

    #[error("Timed out after {waited_secs}s waiting for {resource}")]
    Timeout { resource: String, waited_secs: u64 },

    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_strategy_display() {
        let err = OrchestratorError::UnknownStrategy {
            stage: Stage::Build,
            name: "nonexistent".to_string(),
        };
        assert_eq!(err.to_string(), "Unknown build strategy 'nonexistent'");
    }

    #[test]
    fn test_collaborator_errors_pass_through() {
        let err: OrchestratorError = BuildError::NotBuilt("docker").into();
        assert_eq!(
            err.to_string(),
            "Builder 'docker' has not produced an image yet; call build() first"
        );
        assert!(matches!(
            err,
            OrchestratorError::Build(BuildError::NotBuilt("docker"))
        ));
    }

    #[test]
    fn test_cluster_error_display() {
        let err = ClusterError::CommandFailed {
            command: "kubectl apply".to_string(),
            code: 1,
            stderr: "forbidden".to_string(),
        };
        assert!(err.to_string().contains("exited with code 1"));
        assert!(err.to_string().contains("forbidden"));
    }
}
