//! Run a [`CommandPlan`] as subprocesses and aggregate their exit codes

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Child;
use tracing::{debug, error, info, warn};

use crate::command::{CommandPlan, TestCommand};
use crate::error::{E2eError, E2eResult};

/// Runner exit code for "no tests were collected"
pub const EXIT_NO_TESTS: i32 = 5;

/// Exit code reported for an invocation killed by its timeout
pub const EXIT_TIMED_OUT: i32 = 124;

/// Exit code reported for an invocation stopped by Ctrl-C
pub const EXIT_INTERRUPTED: i32 = 130;

/// Time between SIGTERM and SIGKILL when stopping a runner
const TERM_GRACE: Duration = Duration::from_millis(500);

/// How long output readers may keep draining once the runner has exited
const OUTPUT_GRACE: Duration = Duration::from_secs(2);

/// Test counts parsed from the runner's final summary line
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counts {
    pub passed: u32,
    pub failed: u32,
    pub skipped: u32,
    pub errors: u32,
    pub deselected: u32,
}

impl Counts {
    pub fn add(&mut self, other: &Counts) {
        self.passed = self.passed.saturating_add(other.passed);
        self.failed = self.failed.saturating_add(other.failed);
        self.skipped = self.skipped.saturating_add(other.skipped);
        self.errors = self.errors.saturating_add(other.errors);
        self.deselected = self.deselected.saturating_add(other.deselected);
    }
}

static SUMMARY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^=+ (.+?) in [\d.]+s(?: \([^)]*\))? =+$").expect("summary regex is valid")
});

static COUNT: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+) ([a-z]+)").expect("count regex is valid"));

/// Parse a summary line such as `==== 2 failed, 10 passed, 1 skipped in 5.12s ====`.
///
/// Returns `None` for any other line.
pub fn parse_summary(line: &str) -> Option<Counts> {
    let caps = SUMMARY.captures(line.trim())?;
    let body = caps.get(1)?.as_str();

    let mut counts = Counts::default();
    for part in COUNT.captures_iter(body) {
        let n: u32 = part[1].parse().ok()?;
        match &part[2] {
            "passed" => counts.passed = n,
            "failed" => counts.failed = n,
            "skipped" => counts.skipped = n,
            "error" | "errors" => counts.errors = n,
            "deselected" => counts.deselected = n,
            _ => {}
        }
    }
    Some(counts)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DispatchOptions {
    /// Log the plan without running anything
    pub dry_run: bool,
    /// Stop after the first failing invocation
    pub fail_fast: bool,
}

/// Result of one invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandOutcome {
    pub label: String,
    pub command_line: String,
    pub exit_code: i32,
    pub duration_ms: u64,
    pub counts: Option<Counts>,
    pub timed_out: bool,
    #[serde(default)]
    pub interrupted: bool,
}

impl CommandOutcome {
    pub fn succeeded(&self, allow_no_tests: bool) -> bool {
        self.exit_code == 0 || (allow_no_tests && self.exit_code == EXIT_NO_TESTS)
    }
}

/// Result of a whole run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub outcomes: Vec<CommandOutcome>,
    pub totals: Counts,
    /// 0 when every invocation succeeded, otherwise the first failing code
    pub exit_code: i32,
}

impl RunSummary {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    /// Write the summary as `run-summary.json` under `dir`
    pub fn write_json(&self, dir: &Path) -> E2eResult<PathBuf> {
        std::fs::create_dir_all(dir)?;

        let path = dir.join("run-summary.json");
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;

        info!("Run summary written to: {}", path.display());
        Ok(path)
    }
}

/// Execute every command of `plan` in order
pub async fn dispatch(plan: &CommandPlan, options: &DispatchOptions) -> E2eResult<RunSummary> {
    let started_at = Utc::now();
    let start = Instant::now();
    let mut outcomes = Vec::with_capacity(plan.commands.len());
    let mut totals = Counts::default();
    let mut exit_code = 0;

    if options.dry_run {
        for command in &plan.commands {
            info!("[dry-run] {}: {}", command.label, command);
        }
    } else {
        tokio::fs::create_dir_all(&plan.report_dir).await?;

        info!("Running {} test command(s)...", plan.commands.len());

        for command in &plan.commands {
            let outcome = run_command(command, plan.timeout()).await?;
            let ok = outcome.succeeded(plan.allow_no_tests);

            if let Some(counts) = &outcome.counts {
                totals.add(counts);
            }

            if ok {
                info!("✓ {} (exit {}, {} ms)", outcome.label, outcome.exit_code, outcome.duration_ms);
            } else {
                error!("✗ {} (exit {}, {} ms)", outcome.label, outcome.exit_code, outcome.duration_ms);
                if exit_code == 0 {
                    exit_code = outcome.exit_code;
                }
            }

            let interrupted = outcome.interrupted;
            outcomes.push(outcome);

            if interrupted {
                warn!("Interrupted, skipping remaining commands");
                break;
            }
            if !ok && options.fail_fast {
                warn!("Stopping after first failure (fail-fast)");
                break;
            }
        }
    }

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Totals: {} passed, {} failed, {} skipped, {} errors ({} ms)",
        totals.passed, totals.failed, totals.skipped, totals.errors, duration_ms
    );

    Ok(RunSummary {
        started_at,
        duration_ms,
        outcomes,
        totals,
        exit_code,
    })
}

/// How a running invocation came to an end
enum Stop {
    Exited(std::io::Result<ExitStatus>),
    TimedOut(Duration),
    Interrupted,
}

/// Spawn one invocation, stream its output into the log and wait for it
///
/// The runner gets its own process group on unix so that stopping it also
/// stops any workers it forked.
pub async fn run_command(command: &TestCommand, limit: Option<Duration>) -> E2eResult<CommandOutcome> {
    let command_line = command.command_line();
    info!("Running {}: {}", command.label, command_line);

    let start = Instant::now();
    let mut cmd = command.to_command();
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(unix)]
    cmd.process_group(0);

    let mut child = cmd.spawn().map_err(|e| E2eError::CommandStartup {
        command: command_line.clone(),
        reason: e.to_string(),
    })?;

    let stdout = child.stdout.take().map(|s| tokio::spawn(forward_lines(s, command.label.clone(), false)));
    let stderr = child.stderr.take().map(|s| tokio::spawn(forward_lines(s, command.label.clone(), true)));

    let expired = async {
        match limit {
            Some(limit) => {
                tokio::time::sleep(limit).await;
                limit
            }
            None => std::future::pending().await,
        }
    };

    let stop = tokio::select! {
        status = child.wait() => Stop::Exited(status),
        limit = expired => Stop::TimedOut(limit),
        Ok(()) = tokio::signal::ctrl_c() => Stop::Interrupted,
    };

    let (exit_code, timed_out, interrupted) = match stop {
        Stop::Exited(status) => (status_code(&status?), false, false),
        Stop::TimedOut(limit) => {
            warn!("{} exceeded {:?}, terminating", command.label, limit);
            terminate(&mut child).await;
            (EXIT_TIMED_OUT, true, false)
        }
        Stop::Interrupted => {
            warn!("{} interrupted, terminating", command.label);
            terminate(&mut child).await;
            (EXIT_INTERRUPTED, false, true)
        }
    };

    let drain_deadline = tokio::time::Instant::now() + OUTPUT_GRACE;
    let mut counts = None;
    for mut handle in [stdout, stderr].into_iter().flatten() {
        match tokio::time::timeout_at(drain_deadline, &mut handle).await {
            Ok(Ok(Some(parsed))) => counts = Some(parsed),
            Ok(Ok(None)) => {}
            Ok(Err(e)) => warn!("Output reader for {} failed: {}", command.label, e),
            Err(_) => {
                warn!("Output of {} still open after exit, detaching", command.label);
                handle.abort();
            }
        }
    }

    Ok(CommandOutcome {
        label: command.label.clone(),
        command_line,
        exit_code,
        duration_ms: start.elapsed().as_millis() as u64,
        counts,
        timed_out,
        interrupted,
    })
}

async fn forward_lines<R>(stream: R, label: String, is_stderr: bool) -> Option<Counts>
where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(stream).lines();
    let mut counts = None;

    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if is_stderr {
                    warn!("[{}] {}", label, line);
                } else {
                    info!("[{}] {}", label, line);
                }
                if let Some(parsed) = parse_summary(&line) {
                    counts = Some(parsed);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("[{}] output stream closed: {}", label, e);
                break;
            }
        }
    }

    counts
}

async fn terminate(child: &mut Child) {
    // Try graceful shutdown of the whole group first
    #[cfg(unix)]
    {
        use nix::sys::signal::{killpg, Signal};
        use nix::unistd::Pid;

        if let Some(id) = child.id() {
            let group = Pid::from_raw(id as i32);
            let graceful = killpg(group, Signal::SIGTERM).is_ok()
                && tokio::time::timeout(TERM_GRACE, child.wait()).await.is_ok();

            // Workers can outlive the runner and keep its pipes open
            if let Err(e) = killpg(group, Signal::SIGKILL) {
                debug!("No processes left in group {}: {}", group, e);
            }
            if graceful {
                return;
            }
        }
    }

    // Force kill if still running
    if let Err(e) = child.kill().await {
        warn!("Failed to kill test runner: {}", e);
    }
}

fn status_code(status: &ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }

    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return 128 + signal;
        }
    }

    1
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("=========== 10 passed in 3.21s ===========", Counts { passed: 10, ..Default::default() } ; "all passed")]
    #[test_case(
        "===== 2 failed, 10 passed, 1 skipped, 3 warnings in 5.12s =====",
        Counts { passed: 10, failed: 2, skipped: 1, ..Default::default() } ;
        "mixed with warnings"
    )]
    #[test_case(
        "== 1 error, 4 deselected in 0.40s (0:00:00) ==",
        Counts { errors: 1, deselected: 4, ..Default::default() } ;
        "errors and deselected with wall clock"
    )]
    #[test_case("=== no tests ran in 0.01s ===", Counts::default() ; "no tests")]
    fn test_parse_summary(line: &str, expected: Counts) {
        assert_eq!(parse_summary(line), Some(expected));
    }

    #[test_case("tests/grid/test_filters.py ..F." ; "progress line")]
    #[test_case("========== FAILURES ==========" ; "section header")]
    #[test_case("" ; "empty")]
    fn test_parse_summary_ignores_other_lines(line: &str) {
        assert_eq!(parse_summary(line), None);
    }

    #[test]
    fn test_outcome_success_rules() {
        let outcome = |exit_code| CommandOutcome {
            label: "all".to_string(),
            command_line: "pytest tests".to_string(),
            exit_code,
            duration_ms: 0,
            counts: None,
            timed_out: false,
            interrupted: false,
        };

        assert!(outcome(0).succeeded(false));
        assert!(!outcome(1).succeeded(true));
        assert!(!outcome(EXIT_NO_TESTS).succeeded(false));
        assert!(outcome(EXIT_NO_TESTS).succeeded(true));
    }

    #[test]
    fn test_counts_add() {
        let mut totals = Counts { passed: 3, failed: 1, ..Default::default() };
        totals.add(&Counts { passed: 2, skipped: 4, ..Default::default() });
        assert_eq!(totals, Counts { passed: 5, failed: 1, skipped: 4, ..Default::default() });
    }

    #[test]
    fn test_counts_add_saturates() {
        let mut totals = Counts { passed: u32::MAX - 1, ..Default::default() };
        totals.add(&Counts { passed: 5, failed: 2, ..Default::default() });
        assert_eq!(totals.passed, u32::MAX);
        assert_eq!(totals.failed, 2);
    }
}
