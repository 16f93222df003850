//! ldtest - LiveDesign E2E test runner
//!
//! Builds test-runner invocations from the suite configuration, command-line
//! flags and the CI environment, runs them and exits with the aggregated code.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::debug;

use livedesign_e2e::SuiteConfig;

mod commands;
mod output;

use commands::{run, settings};

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG: &str = "ldtest.yaml";

/// LiveDesign E2E test runner
#[derive(Parser)]
#[command(name = "ldtest")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Suite configuration file
    #[arg(short, long, global = true, env = "LDTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: output::OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the test suite
    Run(run::RunArgs),

    /// Show the commands a run would execute
    Plan(run::PlanArgs),

    /// Show the effective settings for a test module
    Settings(settings::SettingsArgs),
}

fn load_suite(path: Option<&Path>) -> anyhow::Result<SuiteConfig> {
    match path {
        Some(path) => SuiteConfig::load(path)
            .with_context(|| format!("Failed to load suite config {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => {
            SuiteConfig::load(Path::new(DEFAULT_CONFIG)).context("Failed to load ldtest.yaml")
        }
        None => {
            debug!("No suite config found, using defaults");
            Ok(SuiteConfig::default())
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let suite = load_suite(cli.config.as_deref())?;

    match cli.command {
        Commands::Run(args) => {
            let code = run::execute_run(args, &suite).await?;
            if code != 0 {
                std::process::exit(code);
            }
        }
        Commands::Plan(args) => run::execute_plan(args, &suite, cli.format)?,
        Commands::Settings(args) => settings::execute(args, &suite, cli.format)?,
    }

    Ok(())
}
