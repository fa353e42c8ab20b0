//! Dockerfile generation for the image builders.

use std::collections::BTreeMap;

/// Conventional Python requirements file name.
pub const REQUIREMENTS_FILE: &str = "requirements.txt";

/// Configuration for generating a Dockerfile.
#[derive(Debug, Clone, Default)]
pub struct DockerfileConfig {
    /// Base Docker image to use.
    pub base_image: String,
    /// Labels stamped on the image.
    pub labels: BTreeMap<String, String>,
    /// Environment variables to set in the container.
    pub env_vars: BTreeMap<String, String>,
    /// Working directory in the container.
    pub workdir: Option<String>,
    /// Context path of a requirements file installed before the sources.
    pub requirements: Option<(String, String)>,
    /// Files to copy into the image as (context path, container path) pairs.
    pub copy_paths: Vec<(String, String)>,
    /// Default command.
    pub command: Vec<String>,
}

/// Builder for generating Dockerfile content.
#[derive(Debug, Clone)]
pub struct DockerfileBuilder {
    config: DockerfileConfig,
}

impl DockerfileBuilder {
    pub fn new(config: DockerfileConfig) -> Self {
        Self { config }
    }

    /// Build and return the Dockerfile content as a string.
    pub fn build(&self) -> String {
        let mut lines = vec![format!("FROM {}", self.config.base_image)];

        for (key, value) in &self.config.labels {
            lines.push(format!("LABEL {}=\"{}\"", key, escape_env_value(value)));
        }
        for (key, value) in &self.config.env_vars {
            lines.push(format!("ENV {}=\"{}\"", key, escape_env_value(value)));
        }
        if let Some(workdir) = &self.config.workdir {
            lines.push(format!("WORKDIR {}", workdir));
        }

        // Requirements go in ahead of the sources.
        if let Some((src, dst)) = &self.config.requirements {
            lines.push(format!("COPY {} {}", src, dst));
            lines.push(format!("RUN pip install --no-cache-dir -r {}", dst));
        }

        for (src, dst) in &self.config.copy_paths {
            lines.push(format!("COPY {} {}", src, dst));
        }

        if !self.config.command.is_empty() {
            // Exec form.
            let command =
                serde_json::to_string(&self.config.command).unwrap_or_else(|_| "[]".to_string());
            lines.push(format!("CMD {}", command));
        }

        let mut content = lines.join("\n");
        content.push('\n');
        content
    }
}

/// Escape special characters in environment variable values for Dockerfile.
fn escape_env_value(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('$', "\\$")
}

/// COPY pairs for a context map: archive path (container path without the
/// leading '/') to container path.
pub fn copy_pairs<'a>(container_paths: impl IntoIterator<Item = &'a String>) -> Vec<(String, String)> {
    container_paths
        .into_iter()
        .map(|dst| (dst.trim_start_matches('/').to_string(), dst.clone()))
        .collect()
}
