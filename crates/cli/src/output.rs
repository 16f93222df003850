//! Output formatting for CLI

use clap::ValueEnum;
use comfy_table::{presets::UTF8_FULL, ContentArrangement, Table};
use serde::Serialize;

use livedesign_e2e::command::shell_quote;
use livedesign_e2e::dispatch::CommandOutcome;
use livedesign_e2e::{ModuleSettings, RunSummary, TestCommand};

/// Output format
#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable table format
    #[default]
    Table,
    /// JSON format
    Json,
    /// YAML format
    Yaml,
    /// Plain text format
    Plain,
}

/// Trait for items that can be displayed in a table
pub trait TableDisplay {
    fn headers() -> Vec<&'static str>;
    fn row(&self) -> Vec<String>;

    /// One-line form used by `--format plain`
    fn plain(&self) -> String {
        self.row().join(" | ")
    }
}

impl TableDisplay for TestCommand {
    fn headers() -> Vec<&'static str> {
        vec!["Phase", "Command", "Environment"]
    }

    fn row(&self) -> Vec<String> {
        let env = self
            .env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect::<Vec<_>>()
            .join("\n");
        vec![self.label.clone(), self.command_line(), env]
    }

    /// A shell line that reproduces the invocation
    fn plain(&self) -> String {
        let mut line = String::new();
        for (key, value) in &self.env {
            line.push_str(&format!("{key}={} ", shell_quote(value)));
        }
        line.push_str(&self.command_line());
        line
    }
}

impl TableDisplay for CommandOutcome {
    fn headers() -> Vec<&'static str> {
        vec!["Phase", "Exit", "Passed", "Failed", "Skipped", "Errors", "Duration"]
    }

    fn row(&self) -> Vec<String> {
        let count = |f: fn(&livedesign_e2e::dispatch::Counts) -> u32| {
            self.counts.as_ref().map(|c| f(c).to_string()).unwrap_or_else(|| "-".to_string())
        };
        let exit = if self.timed_out {
            format!("{} (timeout)", self.exit_code)
        } else if self.interrupted {
            format!("{} (interrupted)", self.exit_code)
        } else {
            self.exit_code.to_string()
        };
        vec![
            self.label.clone(),
            exit,
            count(|c| c.passed),
            count(|c| c.failed),
            count(|c| c.skipped),
            count(|c| c.errors),
            format!("{} ms", self.duration_ms),
        ]
    }
}

impl TableDisplay for ModuleSettings {
    fn headers() -> Vec<&'static str> {
        vec!["Module", "Timeout", "Poll interval", "Transient errors", "Project", "User", "Browser", "URL"]
    }

    fn row(&self) -> Vec<String> {
        let transient = self
            .wait
            .transient
            .iter()
            .map(|k| k.to_string())
            .collect::<Vec<_>>()
            .join(", ");
        vec![
            self.module.clone(),
            format!("{:?}", self.wait.timeout),
            format!("{:?}", self.wait.poll_interval),
            transient,
            self.project.clone(),
            self.user.clone(),
            self.browser.clone(),
            self.base_url.clone(),
        ]
    }
}

fn new_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Render a single item; plain output lists one `header: value` pair per line
pub fn render_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => render_list(std::slice::from_ref(item), format),
        OutputFormat::Json => serde_json::to_string_pretty(item).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(item).unwrap_or_default(),
        OutputFormat::Plain => T::headers()
            .iter()
            .zip(item.row())
            .map(|(header, value)| format!("{header}: {value}"))
            .collect::<Vec<_>>()
            .join("\n"),
    }
}

/// Render a list of items; plain output is one [`TableDisplay::plain`] line per item
pub fn render_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) -> String {
    match format {
        OutputFormat::Table => {
            let mut table = new_table();
            table.set_header(T::headers());
            for item in items {
                table.add_row(item.row());
            }
            table.to_string()
        }
        OutputFormat::Json => serde_json::to_string_pretty(items).unwrap_or_default(),
        OutputFormat::Yaml => serde_yaml::to_string(items).unwrap_or_default(),
        OutputFormat::Plain => items.iter().map(|item| item.plain()).collect::<Vec<_>>().join("\n"),
    }
}

pub fn print_item<T: Serialize + TableDisplay>(item: &T, format: OutputFormat) {
    println!("{}", render_item(item, format));
}

pub fn print_list<T: Serialize + TableDisplay>(items: &[T], format: OutputFormat) {
    if items.is_empty() {
        println!("Nothing to run.");
        return;
    }
    println!("{}", render_list(items, format));
}

/// Print the per-phase results and the overall verdict of a run
pub fn print_summary(summary: &RunSummary) {
    if !summary.outcomes.is_empty() {
        print_list(&summary.outcomes, OutputFormat::Table);
    }

    let totals = &summary.totals;
    let line = format!(
        "{} passed, {} failed, {} skipped, {} errors in {} ms",
        totals.passed, totals.failed, totals.skipped, totals.errors, summary.duration_ms
    );
    if summary.success() {
        print_success(&line);
    } else {
        print_error(&format!("{line} (exit code {})", summary.exit_code));
    }
}

/// Print success message
pub fn print_success(message: &str) {
    println!("✅ {}", message);
}

/// Print error message
pub fn print_error(message: &str) {
    eprintln!("❌ {}", message);
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn command() -> TestCommand {
        TestCommand {
            label: "serial".to_string(),
            program: "pytest".to_string(),
            args: vec!["-m".to_string(), "serial".to_string(), "tests".to_string()],
            env: BTreeMap::from([
                ("LIVEDESIGN_BROWSER".to_string(), "chrome".to_string()),
                ("LIVEDESIGN_URL".to_string(), "http://ld.local:9080".to_string()),
            ]),
        }
    }

    #[test]
    fn test_plain_plan_is_a_shell_line() {
        let out = render_list(&[command()], OutputFormat::Plain);
        assert_eq!(
            out,
            "LIVEDESIGN_BROWSER=chrome LIVEDESIGN_URL=http://ld.local:9080 pytest -m serial tests"
        );
    }

    #[test]
    fn test_plain_value_with_spaces_is_quoted() {
        let mut cmd = command();
        cmd.env = BTreeMap::from([("LIVEDESIGN_BUILD".to_string(), "nightly #12".to_string())]);
        assert!(cmd.plain().starts_with("LIVEDESIGN_BUILD='nightly #12' pytest"));
    }

    #[test]
    fn test_plain_item_lists_headers() {
        let out = render_item(&command(), OutputFormat::Plain);
        assert!(out.starts_with("Phase: serial\nCommand: pytest -m serial tests"));
    }

    #[test]
    fn test_json_list_is_an_array() {
        let out = render_list(&[command(), command()], OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value.as_array().map(Vec::len), Some(2));
    }
}
