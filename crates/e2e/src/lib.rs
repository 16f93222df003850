//! LiveDesign E2E support library
//!
//! Shared infrastructure for the LiveDesign browser and API test suites:
//! - Polls live session state until a condition holds (`eventually` family)
//! - Assembles test-runner invocations from configuration and job context
//! - Dispatches those invocations as subprocesses and aggregates exit codes
//! - Drives timed, dependent load scenarios against a live server
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  eventually                                                 │
//! │    ├── eventually(ctx, probe, comparator, timeout, negate)  │
//! │    ├── eventually_equal(ctx, probe, expected, timeout)      │
//! │    └── Evaluator { until, until_not, until_equal }          │
//! │          └── wait::wait_until  (Pending | Ready | Timeout)  │
//! ├─────────────────────────────────────────────────────────────┤
//! │  config::SuiteConfig (YAML)                                 │
//! │    ├── run: RunConfig ──► command::build_plan ──► dispatch  │
//! │    ├── wait: WaitSettings                                   │
//! │    ├── session / modules ──► resolve(module)                │
//! │    └── load: LoadConfig ──► load::run_load(Scenario)        │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod command;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod eventually;
pub mod load;
pub mod wait;

pub use command::{build_plan, CommandPlan, RunConfig, RunContext, TestCommand};
pub use config::{ModuleSettings, SuiteConfig};
pub use dispatch::{dispatch, DispatchOptions, RunSummary};
pub use error::{E2eError, E2eResult};
pub use eventually::{eventually, eventually_equal, Evaluator, PollResult};
pub use wait::{wait_until, Attempt, ProbeError, ProbeErrorKind, TransientErrors, WaitSettings};
