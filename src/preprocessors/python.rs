//! Source passthrough preprocessor.
//!
//! Ships the listed files unchanged and runs an optional entry script with
//! `python`.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;
use tracing::debug;

use super::{ContextFiles, Preprocessor, PreprocessorKind, DEFAULT_DEST_PREFIX};
use crate::error::PreprocessError;
use crate::options::StrategyOptions;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct PythonOptions {
    input_files: Vec<PathBuf>,
    output_map: BTreeMap<PathBuf, String>,
    path_prefix: Option<String>,
    executable: Option<PathBuf>,
}

/// Preprocessor that packages source files as they are.
#[derive(Debug, Clone)]
pub struct PythonPreprocessor {
    files: ContextFiles,
    executable: Option<PathBuf>,
}

impl PythonPreprocessor {
    /// Creates a preprocessor shipping `input_files` under the default prefix.
    pub fn new(input_files: Vec<PathBuf>) -> Self {
        Self {
            files: ContextFiles::new(DEFAULT_DEST_PREFIX).with_inputs(input_files),
            executable: None,
        }
    }

    /// Constructs from keyword options:
    /// `input_files`, `output_map`, `path_prefix`, `executable`.
    pub fn from_options(options: &StrategyOptions) -> Result<Self, PreprocessError> {
        let opts: PythonOptions =
            options
                .parse()
                .map_err(|source| PreprocessError::InvalidOptions {
                    strategy: "python",
                    source,
                })?;

        let prefix = opts.path_prefix.as_deref().unwrap_or(DEFAULT_DEST_PREFIX);
        let files = ContextFiles::new(prefix)
            .with_inputs(opts.input_files)
            .with_output_map(opts.output_map);

        let mut preprocessor = Self {
            files,
            executable: None,
        };
        if let Some(executable) = opts.executable {
            preprocessor = preprocessor.with_executable(executable);
        }
        Ok(preprocessor)
    }

    /// Sets the entry script; it is shipped along with the inputs.
    pub fn with_executable(mut self, executable: impl Into<PathBuf>) -> Self {
        let executable = executable.into();
        self.files.push_input(executable.clone());
        self.executable = Some(executable);
        self
    }

    pub fn executable(&self) -> Option<&PathBuf> {
        self.executable.as_ref()
    }

    pub fn input_files(&self) -> &[PathBuf] {
        &self.files.input_files
    }
}

impl Preprocessor for PythonPreprocessor {
    fn kind(&self) -> PreprocessorKind {
        PreprocessorKind::Python
    }

    fn path_prefix(&self) -> &str {
        self.files.path_prefix()
    }

    fn preprocess(&self) -> Result<Vec<PathBuf>, PreprocessError> {
        self.files.check_inputs()?;
        debug!(files = self.files.input_files.len(), "Prepared python sources");
        Ok(self.files.input_files.clone())
    }

    fn context_map(&self) -> Result<BTreeMap<String, PathBuf>, PreprocessError> {
        self.files.context_map()
    }

    fn command(&self) -> Vec<String> {
        match &self.executable {
            Some(executable) => vec!["python".to_string(), self.files.container_path(executable)],
            None => Vec::new(),
        }
    }
}
