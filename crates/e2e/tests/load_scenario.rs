//! Load scenario sequencing and latency aggregation

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use livedesign_e2e::load::{run_load, LoadConfig, Scenario, Step};
use livedesign_e2e::{E2eError, E2eResult};

/// Per-user state, standing in for a logged-in API session
#[derive(Default)]
struct Session {
    report_id: Option<u32>,
    rows: usize,
    log: Vec<&'static str>,
}

struct CreateReport;

#[async_trait]
impl Step<Session> for CreateReport {
    fn name(&self) -> &str {
        "create_report"
    }

    async fn run(&self, ctx: &mut Session) -> E2eResult<()> {
        tokio::time::sleep(Duration::from_millis(5)).await;
        ctx.report_id = Some(17);
        ctx.log.push("create_report");
        Ok(())
    }
}

struct AddCompounds {
    count: usize,
}

#[async_trait]
impl Step<Session> for AddCompounds {
    fn name(&self) -> &str {
        "add_compounds"
    }

    async fn run(&self, ctx: &mut Session) -> E2eResult<()> {
        if ctx.report_id.is_none() {
            return Err(E2eError::StepFailed {
                step: self.name().to_string(),
                reason: "no report".to_string(),
            });
        }
        ctx.rows += self.count;
        ctx.log.push("add_compounds");
        Ok(())
    }
}

struct Verify {
    expected_rows: usize,
}

#[async_trait]
impl Step<Session> for Verify {
    fn name(&self) -> &str {
        "verify"
    }

    async fn run(&self, ctx: &mut Session) -> E2eResult<()> {
        ctx.log.push("verify");
        if ctx.rows == self.expected_rows {
            Ok(())
        } else {
            Err(E2eError::StepFailed {
                step: self.name().to_string(),
                reason: format!("expected {} rows, found {}", self.expected_rows, ctx.rows),
            })
        }
    }
}

struct NeverReached;

#[async_trait]
impl Step<Session> for NeverReached {
    fn name(&self) -> &str {
        "share_report"
    }

    async fn run(&self, ctx: &mut Session) -> E2eResult<()> {
        ctx.log.push("share_report");
        Ok(())
    }
}

struct DeleteReport {
    deleted: Arc<AtomicUsize>,
}

#[async_trait]
impl Step<Session> for DeleteReport {
    fn name(&self) -> &str {
        "delete_report"
    }

    async fn run(&self, ctx: &mut Session) -> E2eResult<()> {
        ctx.report_id = None;
        ctx.rows = 0;
        ctx.log.push("delete_report");
        self.deleted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn scenario(expected_rows: usize, deleted: Arc<AtomicUsize>) -> Scenario<Session> {
    Scenario::new("report_lifecycle")
        .step(CreateReport)
        .step(AddCompounds { count: 3 })
        .step(Verify { expected_rows })
        .step(NeverReached)
        .cleanup(DeleteReport { deleted })
}

#[tokio::test]
async fn steps_run_in_order_with_cleanup_last() {
    let deleted = Arc::new(AtomicUsize::new(0));
    let mut session = Session::default();

    let report = scenario(3, deleted.clone()).run_once(&mut session).await;

    assert!(report.success);
    assert_eq!(
        session.log,
        vec!["create_report", "add_compounds", "verify", "share_report", "delete_report"]
    );
    assert!(report.steps.last().unwrap().cleanup);
    assert!(report.steps[0].duration >= Duration::from_millis(5));
}

#[tokio::test]
async fn failure_skips_remaining_steps_but_runs_cleanup() {
    let deleted = Arc::new(AtomicUsize::new(0));
    let mut session = Session::default();

    let report = scenario(99, deleted.clone()).run_once(&mut session).await;

    assert!(!report.success);
    assert_eq!(session.log, vec!["create_report", "add_compounds", "verify", "delete_report"]);
    assert_eq!(deleted.load(Ordering::SeqCst), 1);

    let verify = report.steps.iter().find(|s| s.name == "verify").unwrap();
    assert!(verify.error.as_deref().unwrap().contains("expected 99 rows, found 3"));
}

#[tokio::test]
async fn load_aggregates_latency_per_step() {
    let deleted = Arc::new(AtomicUsize::new(0));
    let config = LoadConfig {
        users: 3,
        iterations: 4,
        think_time_min_ms: 1,
        think_time_max_ms: 3,
    };

    let report = run_load(Arc::new(scenario(3, deleted.clone())), |_| Session::default(), &config).await;

    assert_eq!(report.users, 3);
    assert_eq!(report.iterations, 12);
    assert_eq!(report.failed_iterations, 0);
    assert_eq!(deleted.load(Ordering::SeqCst), 12);

    let names: Vec<_> = report.steps.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["create_report", "add_compounds", "verify", "share_report", "delete_report"]
    );

    let create = report.step("create_report").unwrap();
    assert_eq!(create.count, 12);
    assert_eq!(create.failures, 0);
    assert!(create.min_ms >= 5.0);
    assert!(create.p50_ms <= create.p95_ms && create.p95_ms <= create.max_ms);
    assert!(report.step("delete_report").unwrap().cleanup);
}

#[tokio::test]
async fn load_counts_failed_iterations() {
    let deleted = Arc::new(AtomicUsize::new(0));
    let config = LoadConfig {
        users: 2,
        iterations: 2,
        ..Default::default()
    };

    let report = run_load(Arc::new(scenario(0, deleted)), |_| Session::default(), &config).await;

    assert_eq!(report.failed_iterations, 4);
    assert_eq!(report.step("verify").unwrap().failures, 4);
    assert!(report.step("share_report").is_none());
}
