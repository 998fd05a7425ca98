//! `releaseflow` command line.
//!
//! ```text
//! releaseflow run --branch main --run-number 42 --config releaseflow.toml
//! releaseflow check --config releaseflow.toml
//! ```
//!
//! `run` prints the run report as JSON on stdout and exits non-zero when the
//! run failed. Logs go to stderr; `RELEASEFLOW_LOG` sets the filter.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use releaseflow::config::ReleaseConfig;
use releaseflow::context::TriggerEvent;
use releaseflow::events::LoggingEventSink;
use releaseflow::exec::ProcessCommandRunner;
use releaseflow::observability::{init_tracing, LogFormat, DEFAULT_DIRECTIVE};
use releaseflow::pipeline::{release_pipeline, Orchestrator, RunRegistry};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(name = "releaseflow")]
#[command(version)]
#[command(about = "Build, push and deploy a container image for a pushed commit")]
struct Cli {
    /// Log output format (text or json).
    #[arg(long, global = true, default_value = "text", env = "RELEASEFLOW_LOG_FORMAT")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the release pipeline for a push
    Run(RunArgs),
    /// Validate the configuration and print the pipeline
    Check(CheckArgs),
}

#[derive(clap::Args)]
struct RunArgs {
    /// Pushed branch (`main` or `refs/heads/main`).
    #[arg(long, env = "RELEASEFLOW_TRIGGER_BRANCH")]
    branch: String,

    /// Pushed commit; the branch tip when omitted.
    #[arg(long, env = "RELEASEFLOW_TRIGGER_COMMIT")]
    commit: Option<String>,

    /// Run number issued by the CI system; also the image tag.
    #[arg(long, env = "RELEASEFLOW_RUN_NUMBER")]
    run_number: Option<u64>,

    /// Configuration file.
    #[arg(long, short, default_value = "releaseflow.toml")]
    config: PathBuf,

    /// Keep the run workspace after cleanup.
    #[arg(long)]
    keep_workspace: bool,
}

#[derive(clap::Args)]
struct CheckArgs {
    /// Configuration file.
    #[arg(long, short, default_value = "releaseflow.toml")]
    config: PathBuf,
}

fn load_config(path: &Path) -> Result<ReleaseConfig> {
    let config = ReleaseConfig::from_file(path)
        .with_context(|| format!("loading {}", path.display()))?
        .with_env_overrides();
    Ok(config)
}

async fn run(args: RunArgs) -> Result<ExitCode> {
    let mut config = load_config(&args.config)?;
    if args.keep_workspace {
        config.workspace.keep = true;
    }

    let registry = args.run_number.map_or_else(RunRegistry::new, RunRegistry::starting_at);
    let orchestrator = Orchestrator::release(config, Arc::new(ProcessCommandRunner::new()))
        .context("invalid release configuration")?
        .with_registry(registry)
        .with_event_sink(Arc::new(LoggingEventSink::default()));

    let mut trigger = TriggerEvent::push(args.branch);
    if let Some(commit) = args.commit {
        trigger = trigger.with_commit(commit);
    }

    let report = orchestrator.run(trigger).await?;
    println!("{}", report.to_json_pretty()?);

    if report.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

fn check(args: &CheckArgs) -> Result<ExitCode> {
    let config = load_config(&args.config)?;
    config.validate().context("invalid release configuration")?;

    let graph = release_pipeline(Arc::new(ProcessCommandRunner::new()))?;
    info!(image = %config.image_reference("<run>"), "Configuration is valid");
    for stage in graph.execution_order() {
        let deps = graph
            .spec(stage)
            .map(|spec| spec.dependencies.iter().cloned().collect::<Vec<_>>().join(", "))
            .unwrap_or_default();
        println!("{stage:<16} <- [{deps}]");
    }
    Ok(ExitCode::SUCCESS)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.log_format, DEFAULT_DIRECTIVE)?;

    match cli.command {
        Commands::Run(args) => run(args).await,
        Commands::Check(args) => check(&args),
    }
}
