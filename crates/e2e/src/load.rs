//! Load scenarios: dependent steps run in order against a live server, timed per step
//!
//! A [`Scenario`] is a list of steps such as "create report", "add data",
//! "verify", plus cleanup steps that run even when a main step fails.
//! [`run_load`] drives the scenario from several simulated users and
//! aggregates latency per step name.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::E2eResult;

/// One timed action of a scenario
#[async_trait]
pub trait Step<C: Send>: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut C) -> E2eResult<()>;
}

/// Timing of one executed step
#[derive(Debug, Clone)]
pub struct StepTiming {
    pub name: String,
    pub cleanup: bool,
    pub duration: Duration,
    pub error: Option<String>,
}

impl StepTiming {
    pub fn success(&self) -> bool {
        self.error.is_none()
    }
}

/// Result of one pass through a scenario
#[derive(Debug, Clone)]
pub struct IterationReport {
    /// Executed steps in order; main steps after a failure are not run
    pub steps: Vec<StepTiming>,
    pub success: bool,
}

pub struct Scenario<C: Send> {
    name: String,
    steps: Vec<Box<dyn Step<C>>>,
    cleanup: Vec<Box<dyn Step<C>>>,
}

impl<C: Send> Scenario<C> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            steps: Vec::new(),
            cleanup: Vec::new(),
        }
    }

    pub fn step(mut self, step: impl Step<C> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Add a step that runs after the main steps whether or not they succeeded
    pub fn cleanup(mut self, step: impl Step<C> + 'static) -> Self {
        self.cleanup.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub async fn run_once(&self, ctx: &mut C) -> IterationReport {
        let mut timings = Vec::with_capacity(self.steps.len() + self.cleanup.len());
        let mut success = true;

        for step in &self.steps {
            let timing = time_step(step.as_ref(), ctx, false).await;
            let failed = !timing.success();
            timings.push(timing);
            if failed {
                success = false;
                break; // Stop on first failure
            }
        }

        for step in &self.cleanup {
            let timing = time_step(step.as_ref(), ctx, true).await;
            if !timing.success() {
                success = false;
            }
            timings.push(timing);
        }

        IterationReport {
            steps: timings,
            success,
        }
    }
}

async fn time_step<C: Send>(step: &dyn Step<C>, ctx: &mut C, cleanup: bool) -> StepTiming {
    let start = Instant::now();
    let result = step.run(ctx).await;
    let duration = start.elapsed();

    let error = match result {
        Ok(()) => {
            debug!("{} took {:?}", step.name(), duration);
            None
        }
        Err(e) => {
            warn!("{} failed after {:?}: {}", step.name(), duration, e);
            Some(e.to_string())
        }
    };

    StepTiming {
        name: step.name().to_string(),
        cleanup,
        duration,
        error,
    }
}

/// Load profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Concurrent simulated users
    pub users: usize,

    /// Scenario passes per user
    pub iterations: usize,

    /// Pause between passes, drawn uniformly from this range
    pub think_time_min_ms: u64,
    pub think_time_max_ms: u64,
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            users: 1,
            iterations: 1,
            think_time_min_ms: 0,
            think_time_max_ms: 0,
        }
    }
}

impl LoadConfig {
    pub fn think_time(&self) -> Duration {
        let min = self.think_time_min_ms.min(self.think_time_max_ms);
        let max = self.think_time_min_ms.max(self.think_time_max_ms);
        if max == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(min..=max))
    }
}

/// Latency distribution for one step name
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LatencyStats {
    pub name: String,
    pub cleanup: bool,
    pub count: usize,
    pub failures: usize,
    pub min_ms: f64,
    pub max_ms: f64,
    pub mean_ms: f64,
    pub p50_ms: f64,
    pub p95_ms: f64,
}

impl LatencyStats {
    fn from_samples(name: String, cleanup: bool, samples: &mut [Duration], failures: usize) -> Self {
        samples.sort_unstable();
        let ms = |d: Duration| d.as_secs_f64() * 1000.0;

        let count = samples.len();
        let (min_ms, max_ms, mean_ms) = match (samples.first(), samples.last()) {
            (Some(first), Some(last)) => {
                let total: Duration = samples.iter().sum();
                (ms(*first), ms(*last), ms(total) / count as f64)
            }
            _ => (0.0, 0.0, 0.0),
        };

        Self {
            name,
            cleanup,
            count,
            failures,
            min_ms,
            max_ms,
            mean_ms,
            p50_ms: percentile(samples, 50.0).map(ms).unwrap_or_default(),
            p95_ms: percentile(samples, 95.0).map(ms).unwrap_or_default(),
        }
    }
}

/// Nearest-rank percentile of sorted samples
fn percentile(sorted: &[Duration], pct: f64) -> Option<Duration> {
    if sorted.is_empty() {
        return None;
    }
    let rank = ((pct / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted.get(rank.clamp(1, sorted.len()) - 1).copied()
}

/// Aggregated result of a load run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadReport {
    pub scenario: String,
    pub users: usize,
    pub iterations: usize,
    pub failed_iterations: usize,
    pub duration_ms: u64,
    /// Per step name, in first-executed order
    pub steps: Vec<LatencyStats>,
}

impl LoadReport {
    pub fn step(&self, name: &str) -> Option<&LatencyStats> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// Run `scenario` from `config.users` concurrent users.
///
/// Each user builds its own context with `factory(user_index)` and runs
/// `config.iterations` passes, pausing for the think time between passes.
pub async fn run_load<C, F>(scenario: Arc<Scenario<C>>, factory: F, config: &LoadConfig) -> LoadReport
where
    C: Send + 'static,
    F: Fn(usize) -> C + Send + Sync + 'static,
{
    let start = Instant::now();
    let users = config.users.max(1);
    let factory = Arc::new(factory);

    info!(
        "Starting load scenario '{}' with {} user(s) x {} iteration(s)",
        scenario.name(),
        users,
        config.iterations
    );

    let handles: Vec<_> = (0..users)
        .map(|user| {
            let scenario = Arc::clone(&scenario);
            let factory = Arc::clone(&factory);
            let config = config.clone();
            tokio::spawn(async move {
                let mut ctx = (*factory)(user);
                let mut reports = Vec::with_capacity(config.iterations);
                for i in 0..config.iterations {
                    if i > 0 {
                        let pause = config.think_time();
                        if !pause.is_zero() {
                            tokio::time::sleep(pause).await;
                        }
                    }
                    reports.push(scenario.run_once(&mut ctx).await);
                }
                reports
            })
        })
        .collect();

    let mut iterations = 0;
    let mut failed_iterations = 0;
    // name -> (cleanup, samples, failures), kept in first-seen order
    let mut per_step: Vec<(String, bool, Vec<Duration>, usize)> = Vec::new();

    for (user, joined) in futures::future::join_all(handles).await.into_iter().enumerate() {
        let reports = match joined {
            Ok(reports) => reports,
            Err(e) => {
                error!("User {} aborted: {}", user, e);
                failed_iterations += config.iterations;
                iterations += config.iterations;
                continue;
            }
        };

        for report in reports {
            iterations += 1;
            if !report.success {
                failed_iterations += 1;
            }
            for timing in report.steps {
                let idx = match per_step.iter().position(|(name, ..)| *name == timing.name) {
                    Some(idx) => idx,
                    None => {
                        per_step.push((timing.name.clone(), timing.cleanup, Vec::new(), 0));
                        per_step.len() - 1
                    }
                };
                let entry = &mut per_step[idx];
                entry.2.push(timing.duration);
                if timing.error.is_some() {
                    entry.3 += 1;
                }
            }
        }
    }

    let steps = per_step
        .into_iter()
        .map(|(name, cleanup, mut samples, failures)| {
            LatencyStats::from_samples(name, cleanup, &mut samples, failures)
        })
        .collect();

    let duration_ms = start.elapsed().as_millis() as u64;
    info!(
        "Load scenario '{}' finished: {} iteration(s), {} failed ({} ms)",
        scenario.name(),
        iterations,
        failed_iterations,
        duration_ms
    );

    LoadReport {
        scenario: scenario.name().to_string(),
        users,
        iterations,
        failed_iterations,
        duration_ms,
        steps,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(v: u64) -> Duration {
        Duration::from_millis(v)
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples: Vec<_> = (1..=20).map(ms).collect();
        assert_eq!(percentile(&samples, 50.0), Some(ms(10)));
        assert_eq!(percentile(&samples, 95.0), Some(ms(19)));
        assert_eq!(percentile(&samples, 100.0), Some(ms(20)));
        assert_eq!(percentile(&samples, 0.0), Some(ms(1)));
        assert_eq!(percentile(&[], 50.0), None);
    }

    #[test]
    fn test_stats_from_samples() {
        let mut samples = vec![ms(30), ms(10), ms(20)];
        let stats = LatencyStats::from_samples("verify".to_string(), false, &mut samples, 1);

        assert_eq!(stats.count, 3);
        assert_eq!(stats.failures, 1);
        assert!((stats.min_ms - 10.0).abs() < 1e-9);
        assert!((stats.max_ms - 30.0).abs() < 1e-9);
        assert!((stats.mean_ms - 20.0).abs() < 1e-9);
        assert!((stats.p50_ms - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_think_time_bounds() {
        let config = LoadConfig {
            think_time_min_ms: 5,
            think_time_max_ms: 15,
            ..Default::default()
        };
        for _ in 0..50 {
            let pause = config.think_time();
            assert!(pause >= ms(5) && pause <= ms(15));
        }
        assert_eq!(LoadConfig::default().think_time(), Duration::ZERO);
    }
}
