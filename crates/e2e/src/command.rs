//! Test-runner command assembly
//!
//! Turns a [`RunConfig`] plus the environment context of the current job
//! into the ordered list of test-runner invocations to execute. With more
//! than one worker the suite is split into a parallel phase (everything not
//! carrying the serial marker) followed by a serial phase.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{E2eError, E2eResult};

pub const ENV_BASE_URL: &str = "LIVEDESIGN_URL";
pub const ENV_BROWSER: &str = "LIVEDESIGN_BROWSER";
pub const ENV_BUILD_ID: &str = "LIVEDESIGN_BUILD";

/// How to invoke the test runner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// Test-runner executable
    pub runner: String,

    /// Directory receiving JUnit XML reports
    pub report_dir: PathBuf,

    /// Test files or directories
    pub paths: Vec<PathBuf>,

    /// Parallel worker count; 1 or less runs everything in one serial invocation
    pub workers: usize,

    /// Marker carried by tests that must not run in parallel
    pub serial_marker: String,

    /// Additional marker expression (`-m`)
    pub markers: Option<String>,

    /// Keyword expression (`-k`)
    pub keyword: Option<String>,

    /// Passed through verbatim before the test paths
    pub extra_args: Vec<String>,

    /// Extra environment for every invocation
    pub env: BTreeMap<String, String>,

    /// Treat "no tests collected" as success
    pub allow_no_tests: bool,

    /// Wall-clock limit per invocation
    pub timeout_secs: Option<u64>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            runner: "pytest".to_string(),
            report_dir: PathBuf::from("reports"),
            paths: vec![PathBuf::from("tests")],
            workers: 1,
            serial_marker: "serial".to_string(),
            markers: None,
            keyword: None,
            extra_args: Vec::new(),
            env: BTreeMap::new(),
            allow_no_tests: false,
            timeout_secs: None,
        }
    }
}

/// Environment of the job the suite runs in
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunContext {
    /// Server under test
    pub base_url: Option<String>,
    pub browser: Option<String>,
    /// CI build identifier, used to tag reports
    pub build_id: Option<String>,
}

impl RunContext {
    fn env_vars(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            (ENV_BASE_URL, self.base_url.as_deref()),
            (ENV_BROWSER, self.browser.as_deref()),
            (ENV_BUILD_ID, self.build_id.as_deref()),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.map(|v| (key, v)))
    }
}

/// A single test-runner invocation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestCommand {
    /// `parallel`, `serial` or `all`; also names the report file
    pub label: String,
    pub program: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
}

impl TestCommand {
    /// Render as a copy-pasteable shell command line
    pub fn command_line(&self) -> String {
        let mut parts = Vec::with_capacity(self.args.len() + 1);
        parts.push(shell_quote(&self.program));
        parts.extend(self.args.iter().map(|a| shell_quote(a)));
        parts.join(" ")
    }

    pub fn to_command(&self) -> tokio::process::Command {
        let mut cmd = tokio::process::Command::new(&self.program);
        cmd.args(&self.args).envs(&self.env);
        cmd
    }
}

impl fmt::Display for TestCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.command_line())
    }
}

/// Quote `arg` for a POSIX shell when it contains anything beyond plain word characters
pub fn shell_quote(arg: &str) -> String {
    let safe = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,@+%".contains(c));
    if safe {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}

/// Ordered invocations for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandPlan {
    pub commands: Vec<TestCommand>,
    pub report_dir: PathBuf,
    pub allow_no_tests: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl CommandPlan {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }
}

/// Build the invocation plan for `config` in the job described by `ctx`
pub fn build_plan(config: &RunConfig, ctx: &RunContext) -> E2eResult<CommandPlan> {
    if config.runner.trim().is_empty() {
        return Err(E2eError::InvalidConfig("test runner executable is empty".to_string()));
    }
    if config.paths.is_empty() {
        return Err(E2eError::InvalidConfig("no test paths given".to_string()));
    }

    let markers = config.markers.as_deref().filter(|m| !m.trim().is_empty());

    let commands = if config.workers > 1 {
        let serial = config.serial_marker.as_str();
        vec![
            build_command(
                config,
                ctx,
                "parallel",
                Some(config.workers),
                Some(combine_markers(markers, &format!("not {serial}"))),
            ),
            build_command(config, ctx, "serial", None, Some(combine_markers(markers, serial))),
        ]
    } else {
        vec![build_command(config, ctx, "all", None, markers.map(String::from))]
    };

    Ok(CommandPlan {
        commands,
        report_dir: config.report_dir.clone(),
        allow_no_tests: config.allow_no_tests,
        timeout_secs: config.timeout_secs,
    })
}

fn build_command(
    config: &RunConfig,
    ctx: &RunContext,
    label: &str,
    workers: Option<usize>,
    marker_expr: Option<String>,
) -> TestCommand {
    let mut args = Vec::new();

    if let Some(n) = workers {
        args.push("-n".to_string());
        args.push(n.to_string());
    }
    if let Some(expr) = marker_expr {
        args.push("-m".to_string());
        args.push(expr);
    }

    let report = config.report_dir.join(format!("{label}.xml"));
    args.push(format!("--junitxml={}", report.display()));

    if let Some(keyword) = config.keyword.as_deref().filter(|k| !k.trim().is_empty()) {
        args.push("-k".to_string());
        args.push(keyword.to_string());
    }

    args.extend(config.extra_args.iter().cloned());
    args.extend(config.paths.iter().map(|p| p.display().to_string()));

    let mut env = config.env.clone();
    for (key, value) in ctx.env_vars() {
        env.insert(key.to_string(), value.to_string());
    }

    TestCommand {
        label: label.to_string(),
        program: config.runner.clone(),
        args,
        env,
    }
}

fn combine_markers(base: Option<&str>, extra: &str) -> String {
    match base {
        Some(base) => format!("({base}) and {extra}"),
        None => extra.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    fn config(workers: usize) -> RunConfig {
        RunConfig {
            workers,
            paths: vec![PathBuf::from("tests/grid"), PathBuf::from("tests/plots")],
            ..Default::default()
        }
    }

    #[test]
    fn test_single_worker_builds_one_command() {
        let plan = build_plan(&config(1), &RunContext::default()).unwrap();

        assert_eq!(plan.commands.len(), 1);
        let cmd = &plan.commands[0];
        assert_eq!(cmd.label, "all");
        assert_eq!(cmd.program, "pytest");
        assert_eq!(
            cmd.args,
            vec!["--junitxml=reports/all.xml", "tests/grid", "tests/plots"]
        );
    }

    #[test]
    fn test_parallel_split() {
        let plan = build_plan(&config(4), &RunContext::default()).unwrap();

        let labels: Vec<_> = plan.commands.iter().map(|c| c.label.as_str()).collect();
        assert_eq!(labels, vec!["parallel", "serial"]);

        assert_eq!(
            plan.commands[0].args[..4],
            ["-n", "4", "-m", "not serial"]
        );
        assert!(plan.commands[0].args.contains(&"--junitxml=reports/parallel.xml".to_string()));

        assert_eq!(plan.commands[1].args[..2], ["-m", "serial"]);
        assert!(!plan.commands[1].args.contains(&"-n".to_string()));
    }

    #[test_case(None, "not serial", "serial" ; "no extra markers")]
    #[test_case(Some("smoke"), "(smoke) and not serial", "(smoke) and serial" ; "combined with markers")]
    #[test_case(Some("  "), "not serial", "serial" ; "blank markers ignored")]
    fn test_marker_expressions(markers: Option<&str>, parallel: &str, serial: &str) {
        let cfg = RunConfig {
            markers: markers.map(String::from),
            ..config(2)
        };
        let plan = build_plan(&cfg, &RunContext::default()).unwrap();

        assert_eq!(plan.commands[0].args[3], parallel);
        assert_eq!(plan.commands[1].args[1], serial);
    }

    #[test]
    fn test_keyword_and_extra_args_precede_paths() {
        let cfg = RunConfig {
            keyword: Some("freeform and not slow".to_string()),
            extra_args: vec!["-x".to_string(), "--reruns=2".to_string()],
            ..config(1)
        };
        let plan = build_plan(&cfg, &RunContext::default()).unwrap();

        assert_eq!(
            plan.commands[0].args,
            vec![
                "--junitxml=reports/all.xml",
                "-k",
                "freeform and not slow",
                "-x",
                "--reruns=2",
                "tests/grid",
                "tests/plots",
            ]
        );
    }

    #[test]
    fn test_context_exported_to_env() {
        let mut cfg = config(2);
        cfg.env.insert("LD_PROJECT".to_string(), "Global".to_string());
        let ctx = RunContext {
            base_url: Some("https://ld.example.com".to_string()),
            browser: None,
            build_id: Some("1234".to_string()),
        };

        let plan = build_plan(&cfg, &ctx).unwrap();
        for cmd in &plan.commands {
            assert_eq!(cmd.env.get(ENV_BASE_URL).map(String::as_str), Some("https://ld.example.com"));
            assert_eq!(cmd.env.get(ENV_BUILD_ID).map(String::as_str), Some("1234"));
            assert_eq!(cmd.env.get("LD_PROJECT").map(String::as_str), Some("Global"));
            assert!(!cmd.env.contains_key(ENV_BROWSER));
        }
    }

    #[test]
    fn test_invalid_configs() {
        let no_paths = RunConfig {
            paths: vec![],
            ..Default::default()
        };
        assert!(matches!(
            build_plan(&no_paths, &RunContext::default()),
            Err(E2eError::InvalidConfig(_))
        ));

        let no_runner = RunConfig {
            runner: " ".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            build_plan(&no_runner, &RunContext::default()),
            Err(E2eError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_command_line_quoting() {
        let cmd = TestCommand {
            label: "all".to_string(),
            program: "pytest".to_string(),
            args: vec![
                "-m".to_string(),
                "not serial".to_string(),
                "it's".to_string(),
                "tests/grid".to_string(),
            ],
            env: BTreeMap::new(),
        };
        assert_eq!(cmd.to_string(), r"pytest -m 'not serial' 'it'\''s' tests/grid");
    }

    #[test]
    fn test_run_config_from_yaml() {
        let yaml = r#"
workers: 6
paths: [tests/mpo]
allow_no_tests: true
env:
  LD_USER: demo
"#;
        let cfg: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.workers, 6);
        assert_eq!(cfg.runner, "pytest");
        assert_eq!(cfg.serial_marker, "serial");
        assert!(cfg.allow_no_tests);
        assert_eq!(cfg.env["LD_USER"], "demo");
    }
}
