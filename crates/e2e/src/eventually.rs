//! Wait-for-outcome assertions over live session state
//!
//! These replace "sleep, then assert" in test bodies: a probe reads the
//! current value from the session, a comparator decides whether it is the
//! wanted one, and the poll loop in [`crate::wait`] retries until it is or
//! the timeout runs out. The last observed value is kept for the failure
//! message either way.
//!
//! ```no_run
//! use std::time::Duration;
//! use livedesign_e2e::eventually::eventually_equal;
//! use livedesign_e2e::wait::ProbeError;
//!
//! struct Grid { rows: usize }
//! fn row_count(grid: &Grid) -> Result<usize, ProbeError> { Ok(grid.rows) }
//!
//! let grid = Grid { rows: 0 };
//! let ok = eventually_equal(&grid, row_count, 0usize, Duration::from_secs(2)).unwrap();
//! assert!(ok, "grid should be empty after filtering");
//! ```

use std::fmt;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{E2eError, E2eResult};
use crate::wait::{wait_until, Attempt, ProbeError, TransientErrors, WaitError, WaitSettings};

/// Record of one evaluation: what was seen last and whether it satisfied the condition
#[derive(Debug, Clone, PartialEq)]
pub struct PollResult<T> {
    /// Most recent value returned by the probe, if any call succeeded
    pub last: Option<T>,
    pub satisfied: bool,
    /// Number of probe invocations, including ones that failed transiently
    pub attempts: usize,
    pub elapsed: Duration,
}

impl<T: fmt::Debug> PollResult<T> {
    pub fn last_observed(&self) -> String {
        match &self.last {
            Some(value) => format!("{value:?}"),
            None => "<nothing observed>".to_string(),
        }
    }

    pub fn describe(&self) -> String {
        let verdict = if self.satisfied { "satisfied" } else { "not satisfied" };
        format!(
            "{} after {} attempt(s) in {:?}, last observed: {}",
            verdict,
            self.attempts,
            self.elapsed,
            self.last_observed()
        )
    }

    /// Turn an unsatisfied result into [`E2eError::ConditionNotMet`] carrying `message`.
    pub fn into_result(self, message: impl Into<String>) -> E2eResult<T> {
        let last_observed = self.last_observed();
        match (self.satisfied, self.last) {
            (true, Some(value)) => Ok(value),
            _ => Err(E2eError::ConditionNotMet {
                message: message.into(),
                last: last_observed,
            }),
        }
    }
}

/// Poll `probe` until `comparator` accepts its value (or rejects it, with `negate`).
///
/// Probe errors whose kind is in `settings.transient` count as an unsatisfied
/// poll. Any other probe error ends the evaluation and is returned as `Err`.
/// A timeout is not an error: it yields `satisfied == false`.
pub fn evaluate<C, T, P, F>(
    ctx: &C,
    mut probe: P,
    comparator: F,
    negate: bool,
    settings: &WaitSettings,
) -> Result<PollResult<T>, ProbeError>
where
    C: ?Sized,
    P: FnMut(&C) -> Result<T, ProbeError>,
    F: Fn(&T) -> bool,
{
    let start = Instant::now();
    let mut last = None;
    let mut attempts = 0usize;

    let outcome = wait_until(
        ctx,
        |c| {
            attempts += 1;
            let value = probe(c)?;
            let matched = comparator(&value) != negate;
            last = Some(value);
            Ok(if matched { Attempt::Ready(()) } else { Attempt::Pending })
        },
        settings,
    );

    let satisfied = match outcome {
        Ok(()) => true,
        Err(WaitError::Timeout { last_error, .. }) => {
            if let Some(err) = last_error {
                debug!(error = %err, "last transient probe error before timeout");
            }
            false
        }
        Err(WaitError::Probe(err)) => return Err(err),
    };

    Ok(PollResult {
        last,
        satisfied,
        attempts,
        elapsed: start.elapsed(),
    })
}

/// Poll until `comparator(probe(ctx))` holds, or with `negate` until it no longer holds.
///
/// Returns `Ok(false)` once `timeout` has elapsed without a matching poll and
/// logs the last observed value at `warn`.
pub fn eventually<C, T, P, F>(
    ctx: &C,
    probe: P,
    comparator: F,
    timeout: Duration,
    negate: bool,
) -> Result<bool, ProbeError>
where
    C: ?Sized,
    T: fmt::Debug,
    P: FnMut(&C) -> Result<T, ProbeError>,
    F: Fn(&T) -> bool,
{
    let result = evaluate(ctx, probe, comparator, negate, &WaitSettings::with_timeout(timeout))?;
    report(&result);
    Ok(result.satisfied)
}

/// Poll until the probe returns a value equal to `expected`.
///
/// Zero counts, empty collections and strings like `"0 Compounds"` are
/// ordinary values here and match as soon as the probe returns them.
pub fn eventually_equal<C, T, E, P>(
    ctx: &C,
    probe: P,
    expected: E,
    timeout: Duration,
) -> Result<bool, ProbeError>
where
    C: ?Sized,
    T: PartialEq<E> + fmt::Debug,
    E: fmt::Debug,
    P: FnMut(&C) -> Result<T, ProbeError>,
{
    let result = evaluate(
        ctx,
        probe,
        |value| *value == expected,
        false,
        &WaitSettings::with_timeout(timeout),
    )?;
    if !result.satisfied {
        warn!(expected = ?expected, "value never matched");
    }
    report(&result);
    Ok(result.satisfied)
}

fn report<T: fmt::Debug>(result: &PollResult<T>) {
    if result.satisfied {
        debug!("{}", result.describe());
    } else {
        warn!("{}", result.describe());
    }
}

/// Evaluation bound to one session with custom wait settings
pub struct Evaluator<'c, C: ?Sized> {
    ctx: &'c C,
    settings: WaitSettings,
}

impl<'c, C: ?Sized> Evaluator<'c, C> {
    pub fn new(ctx: &'c C) -> Self {
        Self::with_settings(ctx, WaitSettings::default())
    }

    pub fn with_settings(ctx: &'c C, settings: WaitSettings) -> Self {
        Self { ctx, settings }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.settings.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.settings.poll_interval = interval;
        self
    }

    pub fn transient(mut self, transient: TransientErrors) -> Self {
        self.settings.transient = transient;
        self
    }

    pub fn settings(&self) -> &WaitSettings {
        &self.settings
    }

    pub fn until<T, P, F>(&self, probe: P, comparator: F) -> Result<PollResult<T>, ProbeError>
    where
        P: FnMut(&C) -> Result<T, ProbeError>,
        F: Fn(&T) -> bool,
    {
        evaluate(self.ctx, probe, comparator, false, &self.settings)
    }

    pub fn until_not<T, P, F>(&self, probe: P, comparator: F) -> Result<PollResult<T>, ProbeError>
    where
        P: FnMut(&C) -> Result<T, ProbeError>,
        F: Fn(&T) -> bool,
    {
        evaluate(self.ctx, probe, comparator, true, &self.settings)
    }

    pub fn until_equal<T, E, P>(&self, probe: P, expected: E) -> Result<PollResult<T>, ProbeError>
    where
        T: PartialEq<E>,
        P: FnMut(&C) -> Result<T, ProbeError>,
    {
        evaluate(self.ctx, probe, |value| *value == expected, false, &self.settings)
    }
}
