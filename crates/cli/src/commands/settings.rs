//! Settings Command

use anyhow::Result;
use clap::Args;

use livedesign_e2e::SuiteConfig;

use crate::output::{print_item, OutputFormat};

#[derive(Args, Debug)]
pub struct SettingsArgs {
    /// Test module name, e.g. `test_mpo`
    pub module: String,
}

/// Print the effective settings one test module runs with
pub fn execute(args: SettingsArgs, suite: &SuiteConfig, format: OutputFormat) -> Result<()> {
    let settings = suite.resolve(&args.module)?;
    print_item(&settings, format);
    Ok(())
}
