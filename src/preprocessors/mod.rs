//! Preprocessing strategies: prepare user source for a build.
//!
//! A preprocessor decides which local files are shipped into the image,
//! where they land inside the container, and which command starts the
//! workload. Builders consume that through [`Preprocessor::context_archive`].

pub mod context;
pub mod full_notebook;
pub mod notebook;
pub mod python;

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::StageContext;
use crate::error::PreprocessError;
use crate::options::StrategyOptions;
use crate::registry::{
    preprocessor_factory, PreprocessorFactory, Stage, StrategyKind, StrategyRegistry,
};

pub use context::{build_context_archive, ContextArchive, ContextFiles};
pub use full_notebook::FullNotebookPreprocessor;
pub use notebook::NotebookPreprocessor;
pub use python::PythonPreprocessor;

/// Directory files are copied to inside the container.
pub const DEFAULT_DEST_PREFIX: &str = "/app/";

/// Supported preprocessing strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PreprocessorKind {
    /// Ship source files as they are.
    Python,
    /// Convert a notebook's code cells into a script.
    Notebook,
    /// Execute a whole notebook with papermill.
    FullNotebook,
}

impl StrategyKind for PreprocessorKind {
    const STAGE: Stage = Stage::Preprocess;
    const ALL: &'static [Self] = &[Self::Python, Self::Notebook, Self::FullNotebook];

    fn as_str(&self) -> &'static str {
        match self {
            PreprocessorKind::Python => "python",
            PreprocessorKind::Notebook => "notebook",
            PreprocessorKind::FullNotebook => "full_notebook",
        }
    }
}

impl fmt::Display for PreprocessorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for PreprocessorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "python" => Ok(PreprocessorKind::Python),
            "notebook" => Ok(PreprocessorKind::Notebook),
            "full_notebook" => Ok(PreprocessorKind::FullNotebook),
            other => Err(format!("Unknown preprocessor: {}", other)),
        }
    }
}

/// Contract every preprocessing strategy satisfies.
pub trait Preprocessor: Send + Sync + fmt::Debug {
    /// Strategy tag of this preprocessor.
    fn kind(&self) -> PreprocessorKind;

    /// Container directory the context is rooted at.
    fn path_prefix(&self) -> &str;

    /// Materializes the files to ship and returns them.
    fn preprocess(&self) -> Result<Vec<PathBuf>, PreprocessError>;

    /// Container path → local path for every file in the build context.
    fn context_map(&self) -> Result<BTreeMap<String, PathBuf>, PreprocessError>;

    /// Command that starts the workload; empty keeps the image entrypoint.
    fn command(&self) -> Vec<String>;

    /// Packs the context map plus `extra` in-memory files into a gzip'd tar.
    fn context_archive(
        &self,
        extra: &[(String, Vec<u8>)],
    ) -> Result<ContextArchive, PreprocessError> {
        build_context_archive(&self.context_map()?, extra)
    }
}

fn python_factory(
    options: &StrategyOptions,
    _ctx: &StageContext,
) -> Result<Arc<dyn Preprocessor>, PreprocessError> {
    Ok(Arc::new(PythonPreprocessor::from_options(options)?))
}

fn notebook_factory(
    options: &StrategyOptions,
    _ctx: &StageContext,
) -> Result<Arc<dyn Preprocessor>, PreprocessError> {
    Ok(Arc::new(NotebookPreprocessor::from_options(options)?))
}

fn full_notebook_factory(
    options: &StrategyOptions,
    _ctx: &StageContext,
) -> Result<Arc<dyn Preprocessor>, PreprocessError> {
    Ok(Arc::new(FullNotebookPreprocessor::from_options(options)?))
}

/// Registry of the built-in preprocessing strategies.
pub fn builtin_registry() -> StrategyRegistry<PreprocessorKind, PreprocessorFactory> {
    StrategyRegistry::new()
        .with(PreprocessorKind::Python, preprocessor_factory(python_factory))
        .with(PreprocessorKind::Notebook, preprocessor_factory(notebook_factory))
        .with(PreprocessorKind::FullNotebook, preprocessor_factory(full_notebook_factory))
}
