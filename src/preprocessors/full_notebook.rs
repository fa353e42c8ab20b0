//! Whole-notebook preprocessor: ships the notebook and executes it with papermill.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use super::notebook::resolve_notebook;
use super::{ContextFiles, Preprocessor, PreprocessorKind, DEFAULT_DEST_PREFIX};
use crate::error::PreprocessError;
use crate::options::StrategyOptions;

/// Executed copy of the notebook, relative to the container working directory.
pub const DEFAULT_OUTPUT_NOTEBOOK: &str = "fairing_output_notebook.ipynb";

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FullNotebookOptions {
    notebook_file: Option<PathBuf>,
    output_file: Option<String>,
    input_files: Vec<PathBuf>,
    output_map: BTreeMap<PathBuf, String>,
    path_prefix: Option<String>,
}

/// Preprocessor that runs a notebook end to end inside the container.
#[derive(Debug, Clone)]
pub struct FullNotebookPreprocessor {
    notebook: PathBuf,
    output_file: String,
    files: ContextFiles,
}

impl FullNotebookPreprocessor {
    /// Creates a preprocessor for `notebook` under the default prefix.
    pub fn new(notebook: impl Into<PathBuf>) -> Self {
        let notebook = notebook.into();
        let mut files = ContextFiles::new(DEFAULT_DEST_PREFIX);
        files.push_input(notebook.clone());
        Self {
            notebook,
            output_file: DEFAULT_OUTPUT_NOTEBOOK.to_string(),
            files,
        }
    }

    /// Constructs from keyword options:
    /// `notebook_file`, `output_file`, `input_files`, `output_map`, `path_prefix`.
    pub fn from_options(options: &StrategyOptions) -> Result<Self, PreprocessError> {
        let opts: FullNotebookOptions =
            options
                .parse()
                .map_err(|source| PreprocessError::InvalidOptions {
                    strategy: "full_notebook",
                    source,
                })?;

        let notebook = resolve_notebook(opts.notebook_file)?;
        let prefix = opts.path_prefix.as_deref().unwrap_or(DEFAULT_DEST_PREFIX);
        let mut files = ContextFiles::new(prefix)
            .with_inputs(opts.input_files)
            .with_output_map(opts.output_map);
        files.push_input(notebook.clone());

        Ok(Self {
            notebook,
            output_file: opts
                .output_file
                .unwrap_or_else(|| DEFAULT_OUTPUT_NOTEBOOK.to_string()),
            files,
        })
    }

    pub fn notebook(&self) -> &Path {
        &self.notebook
    }

    pub fn output_file(&self) -> &str {
        &self.output_file
    }
}

impl Preprocessor for FullNotebookPreprocessor {
    fn kind(&self) -> PreprocessorKind {
        PreprocessorKind::FullNotebook
    }

    fn path_prefix(&self) -> &str {
        self.files.path_prefix()
    }

    fn preprocess(&self) -> Result<Vec<PathBuf>, PreprocessError> {
        self.files.check_inputs()?;
        Ok(self.files.input_files.clone())
    }

    fn context_map(&self) -> Result<BTreeMap<String, PathBuf>, PreprocessError> {
        self.files.context_map()
    }

    fn command(&self) -> Vec<String> {
        vec![
            "papermill".to_string(),
            self.files.container_path(&self.notebook),
            self.output_file.clone(),
            "--log-output".to_string(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_runs_papermill() {
        let pre = FullNotebookPreprocessor::new("exp/train.ipynb");
        assert_eq!(
            pre.command(),
            vec![
                "papermill",
                "/app/exp/train.ipynb",
                "fairing_output_notebook.ipynb",
                "--log-output"
            ]
        );
        assert_eq!(pre.kind(), PreprocessorKind::FullNotebook);
    }

    #[test]
    fn test_from_options() {
        let options = StrategyOptions::new()
            .with("notebook_file", "/work/train.ipynb")
            .with("output_file", "/tmp/out.ipynb");
        let pre = FullNotebookPreprocessor::from_options(&options).unwrap();
        assert_eq!(pre.output_file(), "/tmp/out.ipynb");
        assert_eq!(pre.command()[1], "/app/train.ipynb");
    }

    #[test]
    fn test_preprocess_ships_notebook() {
        let dir = tempfile::tempdir().unwrap();
        let nb = dir.path().join("train.ipynb");
        std::fs::write(&nb, "{\"cells\": []}").unwrap();

        let pre = FullNotebookPreprocessor::new(&nb);
        assert_eq!(pre.preprocess().unwrap(), vec![nb.clone()]);
        assert_eq!(pre.context_map().unwrap().get("/app/train.ipynb"), Some(&nb));

        let missing = FullNotebookPreprocessor::new(dir.path().join("other.ipynb"));
        assert!(missing.preprocess().is_err());
    }
}
