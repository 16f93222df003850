//! Blocking poll loop against a live, asynchronously updating session
//!
//! A predicate reports one of three states per attempt: [`Attempt::Pending`],
//! [`Attempt::Ready`] with the observed value, or a [`ProbeError`]. Timing out
//! is reported separately as [`WaitError::Timeout`], so a legitimately empty
//! or zero value is never confused with "nothing found yet".

use std::collections::BTreeSet;
use std::fmt;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, trace};

/// Outcome of a single predicate invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<T> {
    /// Condition not satisfied yet, keep polling
    Pending,
    /// Condition satisfied with the observed value
    Ready(T),
}

impl<T> Attempt<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Attempt::Ready(_))
    }
}

impl<T> From<Option<T>> for Attempt<T> {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(v) => Attempt::Ready(v),
            None => Attempt::Pending,
        }
    }
}

/// Classification of a failed probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeErrorKind {
    /// The observed element was destroyed or re-rendered between lookups
    StaleReference,
    /// The queried element does not exist (yet)
    NotFound,
    /// The driver's own wait or command timed out
    DriverTimeout,
    /// The session or endpoint was briefly unreachable
    Unavailable,
    /// Anything else, usually a bug in the probe
    Other,
}

impl ProbeErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeErrorKind::StaleReference => "stale_reference",
            ProbeErrorKind::NotFound => "not_found",
            ProbeErrorKind::DriverTimeout => "driver_timeout",
            ProbeErrorKind::Unavailable => "unavailable",
            ProbeErrorKind::Other => "other",
        }
    }
}

impl fmt::Display for ProbeErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error raised by a probe while reading from the session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct ProbeError {
    pub kind: ProbeErrorKind,
    pub message: String,
}

impl ProbeError {
    pub fn new(kind: ProbeErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::StaleReference, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::NotFound, message)
    }

    pub fn driver_timeout(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::DriverTimeout, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Unavailable, message)
    }

    pub fn other(message: impl Into<String>) -> Self {
        Self::new(ProbeErrorKind::Other, message)
    }
}

/// Probe error kinds that count as "not satisfied yet" instead of failing the wait.
///
/// The default set holds [`ProbeErrorKind::DriverTimeout`] and
/// [`ProbeErrorKind::StaleReference`]. Every other kind propagates out of
/// [`wait_until`] on first occurrence. Suites that poll for elements which
/// may not be rendered yet usually add [`ProbeErrorKind::NotFound`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransientErrors(BTreeSet<ProbeErrorKind>);

impl TransientErrors {
    /// Empty allowlist: every probe error is fatal
    pub fn none() -> Self {
        Self(BTreeSet::new())
    }

    pub fn with(mut self, kind: ProbeErrorKind) -> Self {
        self.0.insert(kind);
        self
    }

    pub fn without(mut self, kind: ProbeErrorKind) -> Self {
        self.0.remove(&kind);
        self
    }

    pub fn contains(&self, kind: ProbeErrorKind) -> bool {
        self.0.contains(&kind)
    }

    pub fn iter(&self) -> impl Iterator<Item = ProbeErrorKind> + '_ {
        self.0.iter().copied()
    }
}

impl Default for TransientErrors {
    fn default() -> Self {
        Self::none()
            .with(ProbeErrorKind::DriverTimeout)
            .with(ProbeErrorKind::StaleReference)
    }
}

/// Polling configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaitSettings {
    /// Absolute wall-clock budget; zero means a single attempt
    #[serde(rename = "timeout_secs", with = "duration_secs")]
    pub timeout: Duration,

    /// Pause between attempts
    #[serde(rename = "poll_interval_ms", with = "duration_ms")]
    pub poll_interval: Duration,

    /// Probe errors treated as "not yet"
    pub transient: TransientErrors,
}

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

impl Default for WaitSettings {
    fn default() -> Self {
        Self {
            timeout: DEFAULT_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
            transient: TransientErrors::default(),
        }
    }
}

impl WaitSettings {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Default::default()
        }
    }
}

#[derive(Error, Debug)]
pub enum WaitError {
    #[error("timed out after {elapsed:?} ({attempts} attempts)")]
    Timeout {
        elapsed: Duration,
        attempts: usize,
        /// Most recent transient error swallowed while polling
        last_error: Option<ProbeError>,
    },

    #[error(transparent)]
    Probe(#[from] ProbeError),
}

/// Invoke `predicate` with `ctx` until it returns [`Attempt::Ready`] or the timeout elapses.
///
/// The predicate always runs at least once. Attempts are strictly sequential
/// and the calling thread sleeps between them. A timeout is only reported once
/// the full budget has been spent; a predicate that itself blocks can still push
/// the total past the budget.
pub fn wait_until<C, T, F>(ctx: &C, mut predicate: F, settings: &WaitSettings) -> Result<T, WaitError>
where
    C: ?Sized,
    F: FnMut(&C) -> Result<Attempt<T>, ProbeError>,
{
    let start = Instant::now();
    let deadline = start.checked_add(settings.timeout);
    let mut attempts = 0usize;
    let mut last_error = None;

    loop {
        attempts += 1;

        match predicate(ctx) {
            Ok(Attempt::Ready(value)) => {
                trace!(attempts, elapsed = ?start.elapsed(), "wait condition satisfied");
                return Ok(value);
            }
            Ok(Attempt::Pending) => {}
            Err(err) if settings.transient.contains(err.kind) => {
                debug!(attempt = attempts, error = %err, "transient probe error, retrying");
                last_error = Some(err);
            }
            Err(err) => return Err(WaitError::Probe(err)),
        }

        // An unrepresentable deadline never expires
        let Some(deadline) = deadline else {
            std::thread::sleep(settings.poll_interval);
            continue;
        };

        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            let elapsed = start.elapsed();
            debug!(attempts, ?elapsed, "wait timed out");
            return Err(WaitError::Timeout {
                elapsed,
                attempts,
                last_error,
            });
        }

        std::thread::sleep(settings.poll_interval.min(remaining));
    }
}

mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid timeout {secs}: {e}")))
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
