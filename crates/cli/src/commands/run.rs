//! Run and Plan Commands

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use tracing::debug;

use livedesign_e2e::config::SessionDefaults;
use livedesign_e2e::dispatch::{dispatch, DispatchOptions};
use livedesign_e2e::{build_plan, CommandPlan, RunConfig, RunContext, SuiteConfig};

use crate::output::{print_list, print_summary, OutputFormat};

/// Test selection and job context, shared by `run` and `plan`
#[derive(Args, Debug, Clone, Default)]
pub struct SelectionArgs {
    /// Test files or directories (default: from config)
    pub paths: Vec<PathBuf>,

    /// Parallel workers; more than one splits off a serial phase
    #[arg(short = 'n', long)]
    pub workers: Option<usize>,

    /// Marker expression
    #[arg(short, long)]
    pub markers: Option<String>,

    /// Keyword expression
    #[arg(short, long)]
    pub keyword: Option<String>,

    /// Directory for JUnit XML reports and the run summary
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Test-runner executable
    #[arg(long)]
    pub runner: Option<String>,

    /// Kill an invocation after this many seconds
    #[arg(long)]
    pub timeout_secs: Option<u64>,

    /// Treat "no tests collected" as success
    #[arg(long)]
    pub allow_no_tests: bool,

    /// LiveDesign server under test
    #[arg(long, env = "LIVEDESIGN_URL")]
    pub base_url: Option<String>,

    /// Browser to drive
    #[arg(long, env = "LIVEDESIGN_BROWSER")]
    pub browser: Option<String>,

    /// CI build identifier
    #[arg(long, env = "LIVEDESIGN_BUILD")]
    pub build_id: Option<String>,

    /// Extra arguments passed to the test runner
    #[arg(last = true)]
    pub extra: Vec<String>,
}

impl SelectionArgs {
    /// Apply command-line overrides on top of the configured run settings
    pub fn apply(&self, config: &mut RunConfig) {
        if !self.paths.is_empty() {
            config.paths = self.paths.clone();
        }
        if let Some(workers) = self.workers {
            config.workers = workers;
        }
        if self.markers.is_some() {
            config.markers = self.markers.clone();
        }
        if self.keyword.is_some() {
            config.keyword = self.keyword.clone();
        }
        if let Some(dir) = &self.report_dir {
            config.report_dir = dir.clone();
        }
        if let Some(runner) = &self.runner {
            config.runner = runner.clone();
        }
        if self.timeout_secs.is_some() {
            config.timeout_secs = self.timeout_secs;
        }
        if self.allow_no_tests {
            config.allow_no_tests = true;
        }
        config.extra_args.extend(self.extra.iter().cloned());
    }

    /// Job context, falling back to the configured session
    pub fn context(&self, session: &SessionDefaults) -> RunContext {
        RunContext {
            base_url: Some(self.base_url.clone().unwrap_or_else(|| session.base_url.clone())),
            browser: Some(self.browser.clone().unwrap_or_else(|| session.browser.clone())),
            build_id: self.build_id.clone(),
        }
    }

    pub fn plan(&self, suite: &SuiteConfig) -> Result<CommandPlan> {
        let mut config = suite.run.clone();
        self.apply(&mut config);
        let ctx = self.context(&suite.session);
        debug!(?config, ?ctx, "Building command plan");
        build_plan(&config, &ctx).context("Failed to build test command plan")
    }
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,

    /// Stop after the first failing phase
    #[arg(long)]
    pub fail_fast: bool,

    /// Show what would run without running it
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    #[command(flatten)]
    pub selection: SelectionArgs,
}

/// Run the suite; returns the aggregated exit code
pub async fn execute_run(args: RunArgs, suite: &SuiteConfig) -> Result<i32> {
    let plan = args.selection.plan(suite)?;
    let options = DispatchOptions {
        dry_run: args.dry_run,
        fail_fast: args.fail_fast,
    };

    let summary = dispatch(&plan, &options).await?;

    if !args.dry_run {
        summary
            .write_json(&plan.report_dir)
            .context("Failed to write run summary")?;
    }

    print_summary(&summary);
    Ok(summary.exit_code)
}

pub fn execute_plan(args: PlanArgs, suite: &SuiteConfig, format: OutputFormat) -> Result<()> {
    let plan = args.selection.plan(suite)?;
    print_list(&plan.commands, format);
    Ok(())
}
