//! Configuration for the orchestrator and the built-in strategies.
//!
//! Holds the default strategy names used when a stage is resolved lazily,
//! plus the image and cluster settings shared by builders and deployers.
//! Values come from defaults, an optional YAML file, and `FAIRING_*`
//! environment variables, in that order of precedence (lowest first).

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::builders::BuilderKind;
use crate::deployers::DeployerKind;
use crate::engine::ImageRef;
use crate::naming;
use crate::preprocessors::PreprocessorKind;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    /// IO error while reading configuration.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed configuration file.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Configuration shared by the orchestrator and strategy factories.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FairingConfig {
    // Strategy defaults
    /// Preprocessor used when none is named outside a notebook.
    pub default_preprocessor: PreprocessorKind,
    /// Preprocessor used when none is named inside a notebook.
    pub notebook_preprocessor: PreprocessorKind,
    /// Builder used when none is named.
    pub default_builder: BuilderKind,
    /// Deployer used when none is named.
    pub default_deployer: DeployerKind,

    // Image settings
    /// Registry host (and optional path) images are pushed to.
    pub registry: Option<String>,
    /// Repository name of built images.
    pub image_name: String,
    /// Base image builders start from.
    pub base_image: String,

    // Cluster settings
    /// Namespace workloads are submitted to.
    pub namespace: String,
    /// Path to the kubectl binary.
    pub kubectl: String,
    /// Record images and manifests instead of touching Docker or the cluster.
    pub dry_run: bool,
}

impl Default for FairingConfig {
    fn default() -> Self {
        Self {
            default_preprocessor: PreprocessorKind::Python,
            notebook_preprocessor: PreprocessorKind::Notebook,
            default_builder: BuilderKind::Append,
            default_deployer: DeployerKind::Job,

            registry: None,
            image_name: "fairing-job".to_string(),
            base_image: "python:3.11-slim".to_string(),

            namespace: "default".to_string(),
            kubectl: "kubectl".to_string(),
            dry_run: false,
        }
    }
}

impl FairingConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables over the defaults.
    ///
    /// # Environment Variables
    ///
    /// - `FAIRING_DEFAULT_PREPROCESSOR`: default preprocessor (default: python)
    /// - `FAIRING_NOTEBOOK_PREPROCESSOR`: notebook default (default: notebook)
    /// - `FAIRING_DEFAULT_BUILDER`: default builder (default: append)
    /// - `FAIRING_DEFAULT_DEPLOYER`: default deployer (default: job)
    /// - `FAIRING_REGISTRY`: image registry (default: none)
    /// - `FAIRING_IMAGE_NAME`: image repository name (default: fairing-job)
    /// - `FAIRING_BASE_IMAGE`: base image (default: python:3.11-slim)
    /// - `FAIRING_NAMESPACE`: target namespace (default: default)
    /// - `FAIRING_KUBECTL`: kubectl binary (default: kubectl)
    /// - `FAIRING_DRY_RUN`: dry-run mode (default: false)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().apply_env()
    }

    /// Loads configuration from a YAML file; missing keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let config: Self = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overrides fields from `FAIRING_*` environment variables.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars(mut self, var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        if let Some(val) = var("FAIRING_DEFAULT_PREPROCESSOR") {
            self.default_preprocessor = parse_env_value(&val, "FAIRING_DEFAULT_PREPROCESSOR")?;
        }

        if let Some(val) = var("FAIRING_NOTEBOOK_PREPROCESSOR") {
            self.notebook_preprocessor = parse_env_value(&val, "FAIRING_NOTEBOOK_PREPROCESSOR")?;
        }

        if let Some(val) = var("FAIRING_DEFAULT_BUILDER") {
            self.default_builder = parse_env_value(&val, "FAIRING_DEFAULT_BUILDER")?;
        }

        if let Some(val) = var("FAIRING_DEFAULT_DEPLOYER") {
            self.default_deployer = parse_env_value(&val, "FAIRING_DEFAULT_DEPLOYER")?;
        }

        if let Some(val) = var("FAIRING_REGISTRY") {
            self.registry = Some(val).filter(|v| !v.is_empty());
        }

        if let Some(val) = var("FAIRING_IMAGE_NAME") {
            self.image_name = val;
        }

        if let Some(val) = var("FAIRING_BASE_IMAGE") {
            self.base_image = val;
        }

        if let Some(val) = var("FAIRING_NAMESPACE") {
            self.namespace = val;
        }

        if let Some(val) = var("FAIRING_KUBECTL") {
            self.kubectl = val;
        }

        if let Some(val) = var("FAIRING_DRY_RUN") {
            self.dry_run = parse_env_bool(&val, "FAIRING_DRY_RUN")?;
        }

        self.validate()?;
        Ok(self)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !naming::is_image_repository(&self.image_name) {
            return Err(ConfigError::ValidationFailed(format!(
                "image_name '{}' is not a valid repository name",
                self.image_name
            )));
        }

        if ImageRef::parse(&self.base_image).is_err() {
            return Err(ConfigError::ValidationFailed(format!(
                "base_image '{}' is not a valid image reference",
                self.base_image
            )));
        }

        if let Some(registry) = &self.registry {
            if registry.ends_with('/') || registry.contains(char::is_whitespace) {
                return Err(ConfigError::ValidationFailed(format!(
                    "registry '{}' must not end with '/' or contain whitespace",
                    registry
                )));
            }
        }

        if !naming::is_dns_label(&self.namespace) {
            return Err(ConfigError::ValidationFailed(format!(
                "namespace '{}' is not a valid RFC 1123 label",
                self.namespace
            )));
        }

        if self.kubectl.trim().is_empty() {
            return Err(ConfigError::ValidationFailed(
                "kubectl cannot be empty".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the default builder.
    pub fn with_default_builder(mut self, kind: BuilderKind) -> Self {
        self.default_builder = kind;
        self
    }

    /// Builder method to set the default deployer.
    pub fn with_default_deployer(mut self, kind: DeployerKind) -> Self {
        self.default_deployer = kind;
        self
    }

    /// Builder method to set the default preprocessor.
    pub fn with_default_preprocessor(mut self, kind: PreprocessorKind) -> Self {
        self.default_preprocessor = kind;
        self
    }

    /// Builder method to set the image registry.
    pub fn with_registry(mut self, registry: impl Into<String>) -> Self {
        self.registry = Some(registry.into());
        self
    }

    /// Builder method to set the image name.
    pub fn with_image_name(mut self, name: impl Into<String>) -> Self {
        self.image_name = name.into();
        self
    }

    /// Builder method to set the base image.
    pub fn with_base_image(mut self, image: impl Into<String>) -> Self {
        self.base_image = image.into();
        self
    }

    /// Builder method to set the namespace.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Builder method to enable or disable dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
pub(crate) fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = FairingConfig::default();
        assert_eq!(config.default_preprocessor, PreprocessorKind::Python);
        assert_eq!(config.notebook_preprocessor, PreprocessorKind::Notebook);
        assert_eq!(config.default_builder, BuilderKind::Append);
        assert_eq!(config.default_deployer, DeployerKind::Job);
        assert!(config.registry.is_none());
        assert_eq!(config.image_name, "fairing-job");
        assert!(!config.dry_run);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = FairingConfig::new()
            .with_default_builder(BuilderKind::Docker)
            .with_default_deployer(DeployerKind::TfJob)
            .with_registry("gcr.io/project")
            .with_image_name("trainer")
            .with_namespace("kubeflow")
            .with_dry_run(true);

        assert_eq!(config.default_builder, BuilderKind::Docker);
        assert_eq!(config.default_deployer, DeployerKind::TfJob);
        assert_eq!(config.registry.as_deref(), Some("gcr.io/project"));
        assert_eq!(config.image_name, "trainer");
        assert_eq!(config.namespace, "kubeflow");
        assert!(config.dry_run);
    }

    #[test]
    fn test_apply_vars() {
        let config = FairingConfig::default()
            .apply_vars(vars(&[
                ("FAIRING_DEFAULT_BUILDER", "cluster"),
                ("FAIRING_DEFAULT_DEPLOYER", "tfjob"),
                ("FAIRING_NOTEBOOK_PREPROCESSOR", "full_notebook"),
                ("FAIRING_REGISTRY", "registry.local:5000"),
                ("FAIRING_DRY_RUN", "yes"),
            ]))
            .unwrap();

        assert_eq!(config.default_builder, BuilderKind::Cluster);
        assert_eq!(config.default_deployer, DeployerKind::TfJob);
        assert_eq!(config.notebook_preprocessor, PreprocessorKind::FullNotebook);
        assert_eq!(config.registry.as_deref(), Some("registry.local:5000"));
        assert!(config.dry_run);
    }

    #[test]
    fn test_apply_vars_invalid() {
        let err = FairingConfig::default()
            .apply_vars(vars(&[("FAIRING_DEFAULT_BUILDER", "kaniko")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "FAIRING_DEFAULT_BUILDER"));

        let err = FairingConfig::default()
            .apply_vars(vars(&[("FAIRING_DRY_RUN", "maybe")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
    }

    #[test]
    fn test_validation() {
        assert!(FairingConfig::new().with_namespace("Bad_NS").validate().is_err());
        assert!(FairingConfig::new().with_image_name("Trainer").validate().is_err());
        assert!(FairingConfig::new().with_base_image(" ").validate().is_err());
        assert!(FairingConfig::new().with_base_image("python:").validate().is_err());
        assert!(FairingConfig::new()
            .with_base_image("tensorflow/tensorflow:2.15.0")
            .validate()
            .is_ok());
        assert!(FairingConfig::new().with_registry("gcr.io/").validate().is_err());
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fairing.yaml");
        std::fs::write(
            &path,
            "default_builder: docker\nregistry: gcr.io/demo\nnamespace: training\n",
        )
        .unwrap();

        let config = FairingConfig::from_file(&path).unwrap();
        assert_eq!(config.default_builder, BuilderKind::Docker);
        assert_eq!(config.registry.as_deref(), Some("gcr.io/demo"));
        assert_eq!(config.namespace, "training");
        assert_eq!(config.default_deployer, DeployerKind::Job);

        std::fs::write(&path, "unknown_key: 1\n").unwrap();
        assert!(matches!(
            FairingConfig::from_file(&path),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "K").unwrap());
        assert!(parse_env_bool("ON", "K").unwrap());
        assert!(!parse_env_bool("0", "K").unwrap());
        assert!(parse_env_bool("nah", "K").is_err());
    }
}
