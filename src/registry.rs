//! Strategy registries: tag → factory tables, one per stage.
//!
//! Names given by callers are parsed into a stage's tag enum at the lookup
//! boundary. A name that does not parse, or a tag with no registered
//! factory, is rejected here, before anything is constructed.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::builders::{self, Builder, BuilderKind};
use crate::context::StageContext;
use crate::deployers::{self, Deployer, DeployerKind};
use crate::error::{BuildError, DeployError, OrchestratorError, PreprocessError};
use crate::options::StrategyOptions;
use crate::preprocessors::{self, Preprocessor, PreprocessorKind};

/// A pipeline stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Preprocess,
    Build,
    Deploy,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Stage::Preprocess => write!(f, "preprocess"),
            Stage::Build => write!(f, "build"),
            Stage::Deploy => write!(f, "deploy"),
        }
    }
}

/// Tag enum identifying the strategies available for one stage.
pub trait StrategyKind:
    Copy + Ord + fmt::Display + FromStr + Send + Sync + 'static
{
    /// Stage the tag belongs to.
    const STAGE: Stage;

    /// Every tag, in display order.
    const ALL: &'static [Self];

    /// Canonical registry key.
    fn as_str(&self) -> &'static str;
}

/// Constructs a preprocessor from options.
pub type PreprocessorFactory = Arc<
    dyn Fn(&StrategyOptions, &StageContext) -> Result<Arc<dyn Preprocessor>, PreprocessError>
        + Send
        + Sync,
>;

/// Constructs a builder around an already-resolved preprocessor.
pub type BuilderFactory = Arc<
    dyn Fn(
            Arc<dyn Preprocessor>,
            &StrategyOptions,
            &StageContext,
        ) -> Result<Box<dyn Builder>, BuildError>
        + Send
        + Sync,
>;

/// Constructs a deployer from options.
pub type DeployerFactory = Arc<
    dyn Fn(&StrategyOptions, &StageContext) -> Result<Box<dyn Deployer>, DeployError>
        + Send
        + Sync,
>;

/// Wraps a preprocessor constructor as a registry factory.
pub fn preprocessor_factory<F>(f: F) -> PreprocessorFactory
where
    F: Fn(&StrategyOptions, &StageContext) -> Result<Arc<dyn Preprocessor>, PreprocessError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Wraps a builder constructor as a registry factory.
pub fn builder_factory<F>(f: F) -> BuilderFactory
where
    F: Fn(Arc<dyn Preprocessor>, &StrategyOptions, &StageContext) -> Result<Box<dyn Builder>, BuildError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Wraps a deployer constructor as a registry factory.
pub fn deployer_factory<F>(f: F) -> DeployerFactory
where
    F: Fn(&StrategyOptions, &StageContext) -> Result<Box<dyn Deployer>, DeployError>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Immutable mapping from a stage's tags to factories.
pub struct StrategyRegistry<K: StrategyKind, F> {
    entries: BTreeMap<K, F>,
}

impl<K: StrategyKind, F: Clone> StrategyRegistry<K, F> {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Registers a factory, replacing any earlier one for the same tag.
    pub fn with(mut self, kind: K, factory: F) -> Self {
        self.entries.insert(kind, factory);
        self
    }

    /// Looks up a factory by tag.
    pub fn get(&self, kind: K) -> Option<&F> {
        self.entries.get(&kind)
    }

    pub fn contains(&self, kind: K) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Registered tags in key order.
    pub fn kinds(&self) -> impl Iterator<Item = K> + '_ {
        self.entries.keys().copied()
    }

    /// Resolves a caller-supplied name to its tag and factory.
    pub fn resolve(&self, name: &str) -> Result<(K, F), OrchestratorError> {
        let unknown = || OrchestratorError::UnknownStrategy {
            stage: K::STAGE,
            name: name.to_string(),
        };
        let kind: K = name.parse().map_err(|_| unknown())?;
        let factory = self.entries.get(&kind).cloned().ok_or_else(unknown)?;
        Ok((kind, factory))
    }
}

impl<K: StrategyKind, F: Clone> Default for StrategyRegistry<K, F> {
    fn default() -> Self {
        Self::new()
    }
}

/// The three stage registries the orchestrator selects from.
#[derive(Clone)]
pub struct Registries {
    pub preprocessors: Arc<StrategyRegistry<PreprocessorKind, PreprocessorFactory>>,
    pub builders: Arc<StrategyRegistry<BuilderKind, BuilderFactory>>,
    pub deployers: Arc<StrategyRegistry<DeployerKind, DeployerFactory>>,
}

impl Registries {
    /// Registries pre-populated with every built-in strategy.
    pub fn builtin() -> Self {
        Self {
            preprocessors: Arc::new(preprocessors::builtin_registry()),
            builders: Arc::new(builders::builtin_registry()),
            deployers: Arc::new(deployers::builtin_registry()),
        }
    }

    /// Replaces the preprocessing registry.
    pub fn with_preprocessors(
        mut self,
        registry: StrategyRegistry<PreprocessorKind, PreprocessorFactory>,
    ) -> Self {
        self.preprocessors = Arc::new(registry);
        self
    }

    /// Replaces the building registry.
    pub fn with_builders(mut self, registry: StrategyRegistry<BuilderKind, BuilderFactory>) -> Self {
        self.builders = Arc::new(registry);
        self
    }

    /// Replaces the deploying registry.
    pub fn with_deployers(
        mut self,
        registry: StrategyRegistry<DeployerKind, DeployerFactory>,
    ) -> Self {
        self.deployers = Arc::new(registry);
        self
    }
}

impl Default for Registries {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_registries_cover_every_kind() {
        let registries = Registries::builtin();
        for kind in PreprocessorKind::ALL {
            assert!(registries.preprocessors.contains(*kind), "{}", kind);
        }
        for kind in BuilderKind::ALL {
            assert!(registries.builders.contains(*kind), "{}", kind);
        }
        for kind in DeployerKind::ALL {
            assert!(registries.deployers.contains(*kind), "{}", kind);
        }
    }

    #[test]
    fn test_resolve_known_and_unknown() {
        let registries = Registries::builtin();
        let (kind, _) = registries.builders.resolve("docker").unwrap();
        assert_eq!(kind, BuilderKind::Docker);

        let err = registries.deployers.resolve("nonexistent").err().unwrap();
        assert!(matches!(
            err,
            OrchestratorError::UnknownStrategy { stage: Stage::Deploy, ref name } if name == "nonexistent"
        ));
    }

    #[test]
    fn test_resolve_registered_subset() {
        let full = builders::builtin_registry();
        let docker = full.get(BuilderKind::Docker).cloned().unwrap();
        let partial: StrategyRegistry<BuilderKind, BuilderFactory> =
            StrategyRegistry::new().with(BuilderKind::Docker, docker);

        assert!(partial.resolve("docker").is_ok());
        // "append" is a valid tag but has no factory in this registry.
        assert!(matches!(
            partial.resolve("append"),
            Err(OrchestratorError::UnknownStrategy { stage: Stage::Build, .. })
        ));
        assert_eq!(partial.kinds().collect::<Vec<_>>(), vec![BuilderKind::Docker]);
    }

    #[test]
    fn test_stage_display() {
        assert_eq!(Stage::Preprocess.to_string(), "preprocess");
        assert_eq!(Stage::Deploy.to_string(), "deploy");
    }
}
