//! Notebook-to-script preprocessor.
//!
//! Extracts the code cells of a Jupyter notebook into a Python script that
//! runs in the container. IPython magics and shell escapes have no meaning
//! outside a kernel and are dropped.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use super::{ContextFiles, Preprocessor, PreprocessorKind, DEFAULT_DEST_PREFIX};
use crate::error::PreprocessError;
use crate::options::StrategyOptions;

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct NotebookOptions {
    notebook_file: Option<PathBuf>,
    input_files: Vec<PathBuf>,
    output_map: BTreeMap<PathBuf, String>,
    path_prefix: Option<String>,
}

#[derive(Debug, Deserialize)]
struct NotebookDocument {
    cells: Vec<NotebookCell>,
}

#[derive(Debug, Deserialize)]
struct NotebookCell {
    cell_type: String,
    #[serde(default)]
    source: CellSource,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum CellSource {
    Lines(Vec<String>),
    Text(String),
}

impl Default for CellSource {
    fn default() -> Self {
        CellSource::Text(String::new())
    }
}

impl CellSource {
    fn text(&self) -> String {
        match self {
            CellSource::Lines(lines) => lines.concat(),
            CellSource::Text(text) => text.clone(),
        }
    }
}

/// Returns true for lines that only make sense inside a kernel.
fn is_kernel_only(line: &str) -> bool {
    let trimmed = line.trim_start();
    trimmed.starts_with('%') || trimmed.starts_with('!')
}

/// Converts notebook JSON into the source of an equivalent script.
pub fn notebook_to_script(notebook_json: &str) -> Result<String, String> {
    let document: NotebookDocument =
        serde_json::from_str(notebook_json).map_err(|e| e.to_string())?;

    let cells: Vec<String> = document
        .cells
        .iter()
        .filter(|cell| cell.cell_type == "code")
        .map(|cell| {
            cell.source
                .text()
                .lines()
                .filter(|line| !is_kernel_only(line))
                .collect::<Vec<_>>()
                .join("\n")
        })
        .filter(|code| !code.trim().is_empty())
        .collect();

    let mut script = cells.join("\n\n");
    script.push('\n');
    Ok(script)
}

/// Finds the single notebook in `dir`, ignoring checkpoint copies.
pub fn discover_notebook(dir: &Path) -> Result<PathBuf, PreprocessError> {
    let mut candidates: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.is_file()
                && path.extension().is_some_and(|ext| ext == "ipynb")
                && !path
                    .file_name()
                    .is_some_and(|name| name.to_string_lossy().contains("-checkpoint"))
        })
        .collect();
    candidates.sort();

    match candidates.len() {
        0 => Err(PreprocessError::NotebookNotFound(dir.to_path_buf())),
        1 => Ok(candidates.remove(0)),
        _ => Err(PreprocessError::AmbiguousNotebook {
            dir: dir.to_path_buf(),
            candidates,
        }),
    }
}

/// Resolves an explicit notebook path or discovers one in the working directory.
pub(crate) fn resolve_notebook(explicit: Option<PathBuf>) -> Result<PathBuf, PreprocessError> {
    match explicit {
        Some(path) => Ok(path),
        None => discover_notebook(&std::env::current_dir()?),
    }
}

/// Preprocessor that converts a notebook into a runnable script.
#[derive(Debug, Clone)]
pub struct NotebookPreprocessor {
    notebook: PathBuf,
    script: PathBuf,
    files: ContextFiles,
}

impl NotebookPreprocessor {
    /// Creates a preprocessor for `notebook` under the default prefix.
    pub fn new(notebook: impl Into<PathBuf>) -> Self {
        Self::with_files(notebook.into(), ContextFiles::new(DEFAULT_DEST_PREFIX))
    }

    fn with_files(notebook: PathBuf, files: ContextFiles) -> Self {
        let script = notebook.with_extension("py");
        Self {
            notebook,
            script,
            files,
        }
    }

    /// Constructs from keyword options:
    /// `notebook_file`, `input_files`, `output_map`, `path_prefix`.
    ///
    /// Without `notebook_file` the single notebook in the working directory is used.
    pub fn from_options(options: &StrategyOptions) -> Result<Self, PreprocessError> {
        let opts: NotebookOptions =
            options
                .parse()
                .map_err(|source| PreprocessError::InvalidOptions {
                    strategy: "notebook",
                    source,
                })?;

        let notebook = resolve_notebook(opts.notebook_file)?;
        let prefix = opts.path_prefix.as_deref().unwrap_or(DEFAULT_DEST_PREFIX);
        let files = ContextFiles::new(prefix)
            .with_inputs(opts.input_files)
            .with_output_map(opts.output_map);
        Ok(Self::with_files(notebook, files))
    }

    pub fn notebook(&self) -> &Path {
        &self.notebook
    }

    /// Where the converted script is written.
    pub fn script(&self) -> &Path {
        &self.script
    }

    fn shipped_files(&self) -> ContextFiles {
        let mut files = self.files.clone();
        files.push_input(self.script.clone());
        files
    }
}

impl Preprocessor for NotebookPreprocessor {
    fn kind(&self) -> PreprocessorKind {
        PreprocessorKind::Notebook
    }

    fn path_prefix(&self) -> &str {
        self.files.path_prefix()
    }

    fn preprocess(&self) -> Result<Vec<PathBuf>, PreprocessError> {
        if !self.notebook.exists() {
            return Err(PreprocessError::InputNotFound(self.notebook.clone()));
        }
        let content = std::fs::read_to_string(&self.notebook)?;
        let script =
            notebook_to_script(&content).map_err(|reason| PreprocessError::InvalidNotebook {
                path: self.notebook.clone(),
                reason,
            })?;
        std::fs::write(&self.script, script)?;
        info!(
            "Converted {} to {}",
            self.notebook.display(),
            self.script.display()
        );

        let files = self.shipped_files();
        files.check_inputs()?;
        debug!(files = files.input_files.len(), "Prepared notebook sources");
        Ok(files.input_files)
    }

    fn context_map(&self) -> Result<BTreeMap<String, PathBuf>, PreprocessError> {
        self.shipped_files().context_map()
    }

    fn command(&self) -> Vec<String> {
        vec!["python".to_string(), self.files.container_path(&self.script)]
    }
}
