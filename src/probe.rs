//! Detection of interactive notebook sessions.
//!
//! Only used to pick the default preprocessor when none is named.

use tracing::debug;

/// Reports whether the process runs inside a notebook-like session.
pub trait EnvironmentProbe: Send + Sync {
    fn is_in_notebook(&self) -> bool;
}

/// Environment variables set by Jupyter kernels and hosted notebook services.
const NOTEBOOK_MARKERS: &[&str] = &["JPY_PARENT_PID", "JPY_SESSION_NAME", "COLAB_RELEASE_TAG"];

/// Explicit override, wins over the kernel markers when set.
pub const NOTEBOOK_OVERRIDE_VAR: &str = "FAIRING_IN_NOTEBOOK";

/// Probe that inspects the process environment for Jupyter kernel markers.
#[derive(Debug, Clone, Copy, Default)]
pub struct JupyterProbe;

impl JupyterProbe {
    pub fn new() -> Self {
        Self
    }

    fn detect(var: impl Fn(&str) -> Option<String>) -> bool {
        if let Some(value) = var(NOTEBOOK_OVERRIDE_VAR) {
            if let Ok(forced) = crate::config::parse_env_bool(&value, NOTEBOOK_OVERRIDE_VAR) {
                return forced;
            }
        }
        NOTEBOOK_MARKERS
            .iter()
            .any(|marker| var(marker).is_some_and(|v| !v.is_empty()))
    }
}

impl EnvironmentProbe for JupyterProbe {
    fn is_in_notebook(&self) -> bool {
        let in_notebook = Self::detect(|key| std::env::var(key).ok());
        debug!(in_notebook, "Probed execution environment");
        in_notebook
    }
}

/// Probe with a fixed answer.
#[derive(Debug, Clone, Copy)]
pub struct StaticProbe(pub bool);

impl EnvironmentProbe for StaticProbe {
    fn is_in_notebook(&self) -> bool {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn test_plain_process_is_not_notebook() {
        assert!(!JupyterProbe::detect(env(&[])));
    }

    #[test]
    fn test_kernel_markers() {
        assert!(JupyterProbe::detect(env(&[("JPY_PARENT_PID", "4242")])));
        assert!(JupyterProbe::detect(env(&[("COLAB_RELEASE_TAG", "release-1")])));
        assert!(!JupyterProbe::detect(env(&[("JPY_PARENT_PID", "")])));
    }

    #[test]
    fn test_override_wins() {
        assert!(JupyterProbe::detect(env(&[("FAIRING_IN_NOTEBOOK", "true")])));
        assert!(!JupyterProbe::detect(env(&[
            ("FAIRING_IN_NOTEBOOK", "0"),
            ("JPY_PARENT_PID", "4242"),
        ])));
        // Unparseable override falls back to marker detection.
        assert!(JupyterProbe::detect(env(&[
            ("FAIRING_IN_NOTEBOOK", "perhaps"),
            ("JPY_PARENT_PID", "4242"),
        ])));
    }

    #[test]
    fn test_static_probe() {
        assert!(StaticProbe(true).is_in_notebook());
        assert!(!StaticProbe(false).is_in_notebook());
    }
}
