//! CLI command definitions for fairing.
//!
//! `fairing run` selects one strategy per stage, then builds and deploys the
//! workload. `fairing strategies` lists what can be selected.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use crate::cluster::DryRunClient;
use crate::config::FairingConfig;
use crate::context::StageContext;
use crate::engine::{DryRunEngine, EngineCall};
use crate::options::StrategyOptions;
use crate::orchestrator::Orchestrator;
use crate::registry::{Registries, StrategyKind, StrategyRegistry};

/// Build training code into an image and run it on Kubernetes.
#[derive(Parser)]
#[command(name = "fairing")]
#[command(about = "Build training code into an image and run it on Kubernetes")]
#[command(version)]
#[command(
    long_about = "fairing packages training code, builds it into a container image and submits it to a cluster as a Job or TFJob.\n\nExample usage:\n  fairing run --preprocessor-opt executable=train.py --preprocessor-opt 'input_files=[\"train.py\"]' --builder docker --deployer job"
)]
pub struct Cli {
    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short, long, default_value = "info", global = true)]
    pub log_level: String,
}

/// Available CLI subcommands.
#[derive(clap::Subcommand)]
pub enum Commands {
    /// Preprocess, build and deploy a training workload.
    Run(RunArgs),

    /// List the available strategies for each stage.
    #[command(alias = "ls")]
    Strategies(StrategiesArgs),
}

/// Arguments for `fairing run`.
#[derive(Parser, Debug)]
pub struct RunArgs {
    /// Preprocessor to use (python, notebook, full_notebook).
    #[arg(long)]
    pub preprocessor: Option<String>,

    /// Builder to use (append, docker, cluster).
    #[arg(long)]
    pub builder: Option<String>,

    /// Deployer to use (job, tfjob).
    #[arg(long)]
    pub deployer: Option<String>,

    /// Preprocessor option as key=value; the value is parsed as JSON when possible.
    #[arg(long = "preprocessor-opt", value_name = "KEY=VALUE")]
    pub preprocessor_opts: Vec<String>,

    /// Builder option as key=value.
    #[arg(long = "builder-opt", value_name = "KEY=VALUE")]
    pub builder_opts: Vec<String>,

    /// Deployer option as key=value.
    #[arg(long = "deployer-opt", value_name = "KEY=VALUE")]
    pub deployer_opts: Vec<String>,

    /// YAML configuration file; FAIRING_* variables override it.
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Print what would be built and applied instead of doing it.
    #[arg(long)]
    pub dry_run: bool,
}

/// Arguments for `fairing strategies`.
#[derive(Parser, Debug)]
pub struct StrategiesArgs {
    /// YAML configuration file used to resolve defaults.
    #[arg(short, long)]
    pub config: Option<PathBuf>,
}

/// Parse CLI arguments and return the Cli struct.
pub fn parse_cli() -> Cli {
    Cli::parse()
}

/// Run the CLI by parsing arguments and executing the command.
///
/// For more control over logging initialization, use `parse_cli()` and
/// `run_with_cli()`.
pub async fn run() -> anyhow::Result<()> {
    run_with_cli(parse_cli()).await
}

/// Run the CLI with the parsed arguments.
pub async fn run_with_cli(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Commands::Run(args) => run_pipeline_command(args).await,
        Commands::Strategies(args) => run_strategies_command(args),
    }
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<FairingConfig> {
    let config = match path {
        Some(path) => FairingConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?
            .apply_env()?,
        None => FairingConfig::from_env()?,
    };
    config.validate()?;
    Ok(config)
}

fn parse_opts(pairs: &[String], flag: &str) -> anyhow::Result<StrategyOptions> {
    StrategyOptions::from_pairs(pairs).map_err(|e| anyhow::anyhow!("--{}: {}", flag, e))
}

// ============================================================================
// Run Command Implementation
// ============================================================================

async fn run_pipeline_command(args: RunArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let config = if args.dry_run {
        config.with_dry_run(true)
    } else {
        config
    };

    let preprocessor_opts = parse_opts(&args.preprocessor_opts, "preprocessor-opt")?;
    let builder_opts = parse_opts(&args.builder_opts, "builder-opt")?;
    let deployer_opts = parse_opts(&args.deployer_opts, "deployer-opt")?;

    // Keep handles on the recorders so the plan can be printed afterwards.
    let recorders = config
        .dry_run
        .then(|| (Arc::new(DryRunEngine::new()), Arc::new(DryRunClient::new())));
    let context = match &recorders {
        Some((engine, cluster)) => StageContext::new(config, engine.clone(), cluster.clone()),
        None => StageContext::from_config(config).context("Failed to connect to Docker")?,
    };

    let mut orchestrator = Orchestrator::new(context);
    if args.preprocessor.is_some() || !preprocessor_opts.is_empty() {
        orchestrator.set_preprocessor(args.preprocessor.as_deref(), preprocessor_opts)?;
    }
    if args.builder.is_some() || !builder_opts.is_empty() {
        orchestrator.set_builder(args.builder.as_deref(), builder_opts)?;
    }
    if args.deployer.is_some() || !deployer_opts.is_empty() {
        orchestrator.set_deployer(args.deployer.as_deref(), deployer_opts)?;
    }

    orchestrator.run().await?;

    if let Some((engine, cluster)) = recorders {
        print_dry_run(&engine, &cluster)?;
    } else {
        info!("Workload submitted");
    }
    Ok(())
}

fn print_dry_run(engine: &DryRunEngine, cluster: &DryRunClient) -> anyhow::Result<()> {
    println!("# Image operations");
    for call in engine.calls() {
        match call {
            EngineCall::Build { image, context_len } => {
                println!("# build {} ({} bytes of context)", image, context_len)
            }
            EngineCall::Push { image } => println!("# push {}", image),
        }
    }

    for manifest in cluster.manifests() {
        println!("---");
        print!("{}", serde_yaml::to_string(&manifest)?);
    }
    Ok(())
}

// ============================================================================
// Strategies Command Implementation
// ============================================================================

fn run_strategies_command(args: StrategiesArgs) -> anyhow::Result<()> {
    let config = load_config(args.config.as_ref())?;
    let registries = Registries::builtin();

    print_registry(
        "Preprocessors",
        &*registries.preprocessors,
        &[
            (config.default_preprocessor, "default"),
            (config.notebook_preprocessor, "notebook default"),
        ],
    );
    print_registry(
        "Builders",
        &*registries.builders,
        &[(config.default_builder, "default")],
    );
    print_registry(
        "Deployers",
        &*registries.deployers,
        &[(config.default_deployer, "default")],
    );
    Ok(())
}

fn print_registry<K: StrategyKind, F: Clone>(
    title: &str,
    registry: &StrategyRegistry<K, F>,
    marks: &[(K, &str)],
) {
    println!("{}:", title);
    for kind in registry.kinds() {
        let notes: Vec<&str> = marks
            .iter()
            .filter(|(marked, _)| *marked == kind)
            .map(|(_, note)| *note)
            .collect();
        if notes.is_empty() {
            println!("  {}", kind);
        } else {
            println!("  {} ({})", kind, notes.join(", "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_args() {
        let cli = Cli::try_parse_from([
            "fairing",
            "run",
            "--builder",
            "docker",
            "--builder-opt",
            "push=false",
            "--deployer-opt",
            "namespace=ml",
            "--deployer-opt",
            "wait=true",
            "--dry-run",
        ])
        .unwrap();

        let Commands::Run(args) = cli.command else {
            panic!("expected run subcommand");
        };
        assert_eq!(args.builder.as_deref(), Some("docker"));
        assert!(args.preprocessor.is_none());
        assert!(args.dry_run);
        assert_eq!(cli.log_level, "info");

        let opts = parse_opts(&args.deployer_opts, "deployer-opt").unwrap();
        assert_eq!(opts.get("namespace"), Some(&serde_json::json!("ml")));
        assert_eq!(opts.get("wait"), Some(&serde_json::json!(true)));
    }

    #[test]
    fn test_parse_opts_rejects_missing_value() {
        let err = parse_opts(&["push".to_string()], "builder-opt").unwrap_err();
        assert!(err.to_string().starts_with("--builder-opt"));
    }

    #[test]
    fn test_strategies_alias_and_global_log_level() {
        let cli = Cli::try_parse_from(["fairing", "ls", "--log-level", "debug"]).unwrap();
        assert!(matches!(cli.command, Commands::Strategies(_)));
        assert_eq!(cli.log_level, "debug");
    }
}
