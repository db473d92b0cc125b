//! Request outcomes, latency percentiles and the shared aggregator

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::check::{CheckResults, TRANSPORT_ERROR_CHECK};
use crate::config::ErrorRateMode;

/// Result of one virtual-user iteration
///
/// Produced by the request executor and recorded exactly once.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestOutcome {
    /// No check failed and a response was received
    pub success: bool,
    /// HTTP status, `0` when no response was received
    pub status_code: u16,
    /// Time until the full response was read (or until the failure)
    pub latency: Duration,
    /// Checks that failed
    pub failed_checks: BTreeSet<String>,
    /// Checks that passed
    pub passed_checks: BTreeSet<String>,
}

impl RequestOutcome {
    /// Outcome for a received response, given its check results
    pub fn from_response(status_code: u16, latency: Duration, checks: CheckResults) -> Self {
        let failed_checks: BTreeSet<String> = checks.failed.into_iter().collect();
        Self {
            success: failed_checks.is_empty(),
            status_code,
            latency,
            failed_checks,
            passed_checks: checks.passed.into_iter().collect(),
        }
    }

    /// Outcome when the request failed before a response arrived
    pub fn transport_failure(latency: Duration) -> Self {
        Self {
            success: false,
            status_code: 0,
            latency,
            failed_checks: BTreeSet::from([TRANSPORT_ERROR_CHECK.to_string()]),
            passed_checks: BTreeSet::new(),
        }
    }
}

/// Latency percentiles (all values in milliseconds)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct LatencyPercentiles {
    /// Minimum value
    pub min: f64,
    /// 50th percentile (median)
    pub p50: f64,
    /// 75th percentile
    pub p75: f64,
    /// 90th percentile
    pub p90: f64,
    /// 95th percentile
    pub p95: f64,
    /// 99th percentile
    pub p99: f64,
    /// Maximum value
    pub max: f64,
    /// Mean value
    pub mean: f64,
    /// Standard deviation
    pub stddev: f64,
}

/// Highest trackable latency: one hour, in microseconds
const HISTOGRAM_MAX_MICROS: u64 = 3_600_000_000;

/// Microsecond-precision latency histogram backed by HdrHistogram
#[derive(Clone)]
pub struct LatencyHistogram {
    histogram: hdrhistogram::Histogram<u64>,
}

impl LatencyHistogram {
    /// Create an empty histogram, three significant digits, one hour ceiling
    pub fn new() -> Self {
        let histogram = hdrhistogram::Histogram::new_with_bounds(1, HISTOGRAM_MAX_MICROS, 3)
            .expect("histogram bounds are constant and valid");
        Self { histogram }
    }

    /// Record one latency; values above the ceiling are clamped to it
    pub fn record(&mut self, latency: Duration) {
        let micros = u64::try_from(latency.as_micros()).unwrap_or(u64::MAX);
        self.histogram.saturating_record(micros.min(HISTOGRAM_MAX_MICROS));
    }

    /// Number of recorded values
    pub fn len(&self) -> u64 {
        self.histogram.len()
    }

    /// Whether nothing has been recorded
    pub fn is_empty(&self) -> bool {
        self.histogram.is_empty()
    }

    /// Summary percentiles in milliseconds
    pub fn percentiles(&self) -> LatencyPercentiles {
        if self.histogram.is_empty() {
            return LatencyPercentiles::default();
        }

        let ms = |micros: u64| micros as f64 / 1000.0;
        LatencyPercentiles {
            min: ms(self.histogram.min()),
            p50: ms(self.histogram.value_at_quantile(0.50)),
            p75: ms(self.histogram.value_at_quantile(0.75)),
            p90: ms(self.histogram.value_at_quantile(0.90)),
            p95: ms(self.histogram.value_at_quantile(0.95)),
            p99: ms(self.histogram.value_at_quantile(0.99)),
            max: ms(self.histogram.max()),
            mean: self.histogram.mean() / 1000.0,
            stddev: self.histogram.stdev() / 1000.0,
        }
    }
}

impl Default for LatencyHistogram {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for LatencyHistogram {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatencyHistogram")
            .field("len", &self.len())
            .finish()
    }
}

/// Pass/fail tally for one named check
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckTally {
    /// Times the check passed
    pub passes: u64,
    /// Times the check failed
    pub fails: u64,
}

impl CheckTally {
    /// Fraction of evaluations that passed
    pub fn pass_rate(&self) -> f64 {
        let total = self.passes + self.fails;
        if total == 0 {
            0.0
        } else {
            self.passes as f64 / total as f64
        }
    }
}

/// Point-in-time copy of the aggregated metrics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct MetricsSnapshot {
    /// Outcomes recorded
    pub total_requests: u64,
    /// Successful outcomes
    pub success_count: u64,
    /// Failed outcomes
    pub error_count: u64,
    /// Error rate (0.0 - 1.0), per the configured mode
    pub error_rate: f64,
    /// Latency summary over every outcome
    pub latency: LatencyPercentiles,
    /// Outcomes per status code, `0` for transport failures
    pub status_counts: BTreeMap<u16, u64>,
    /// Per-check pass/fail counts
    pub checks: BTreeMap<String, CheckTally>,
    /// Wall-clock time of the first record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_recorded_at: Option<DateTime<Utc>>,
    /// Wall-clock time of the latest record
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_recorded_at: Option<DateTime<Utc>>,
}

impl MetricsSnapshot {
    /// Success rate (0.0 - 1.0)
    pub fn success_rate(&self) -> f64 {
        if self.total_requests == 0 {
            0.0
        } else {
            self.success_count as f64 / self.total_requests as f64
        }
    }
}

/// Error counts bucketed per second for the windowed error rate
#[derive(Debug)]
struct ErrorWindow {
    window_secs: u64,
    origin: Instant,
    // (second since origin, total, errors)
    buckets: VecDeque<(u64, u64, u64)>,
}

impl ErrorWindow {
    fn new(window: Duration) -> Self {
        Self {
            window_secs: window.as_secs().max(1),
            origin: Instant::now(),
            buckets: VecDeque::new(),
        }
    }

    fn second(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.origin).as_secs()
    }

    fn prune(&mut self, now_sec: u64) {
        while let Some(&(sec, _, _)) = self.buckets.front() {
            if sec + self.window_secs <= now_sec {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, failed: bool) {
        let sec = self.second(now);
        self.prune(sec);
        match self.buckets.back_mut() {
            Some((last, total, errors)) if *last == sec => {
                *total += 1;
                *errors += u64::from(failed);
            }
            _ => self.buckets.push_back((sec, 1, u64::from(failed))),
        }
    }

    fn rate(&self, now: Instant) -> f64 {
        let now_sec = self.second(now);
        let (total, errors) = self
            .buckets
            .iter()
            .filter(|(sec, _, _)| sec + self.window_secs > now_sec)
            .fold((0, 0), |(t, e), (_, total, errors)| (t + total, e + errors));
        if total == 0 {
            0.0
        } else {
            errors as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
struct AggregatorState {
    total: u64,
    errors: u64,
    latency: LatencyHistogram,
    status_counts: BTreeMap<u16, u64>,
    checks: BTreeMap<String, CheckTally>,
    window: Option<ErrorWindow>,
    first_recorded_at: Option<DateTime<Utc>>,
    last_recorded_at: Option<DateTime<Utc>>,
}

/// Thread-safe sink for request outcomes
///
/// The only shared mutable state of a run. Every update happens inside one
/// short critical section, so concurrent `record` calls commute and a
/// `snapshot` always sees whole outcomes.
#[derive(Debug)]
pub struct Aggregator {
    mode: ErrorRateMode,
    state: Mutex<AggregatorState>,
}

impl Aggregator {
    /// Create an aggregator with the given error rate mode
    pub fn new(mode: ErrorRateMode) -> Self {
        let window = match mode {
            ErrorRateMode::Cumulative => None,
            ErrorRateMode::Windowed { window } => Some(ErrorWindow::new(window)),
        };
        Self {
            mode,
            state: Mutex::new(AggregatorState {
                window,
                ..Default::default()
            }),
        }
    }

    /// Aggregator with a cumulative error rate
    pub fn cumulative() -> Self {
        Self::new(ErrorRateMode::Cumulative)
    }

    /// Error rate mode in use
    pub fn mode(&self) -> ErrorRateMode {
        self.mode
    }

    /// Fold one outcome into the totals
    pub fn record(&self, outcome: &RequestOutcome) {
        let now = Instant::now();
        let wall = Utc::now();

        let mut state = self.state.lock();
        state.total += 1;
        if !outcome.success {
            state.errors += 1;
        }
        state.latency.record(outcome.latency);
        *state.status_counts.entry(outcome.status_code).or_insert(0) += 1;
        for name in &outcome.passed_checks {
            state.checks.entry(name.clone()).or_default().passes += 1;
        }
        for name in &outcome.failed_checks {
            state.checks.entry(name.clone()).or_default().fails += 1;
        }
        if let Some(window) = state.window.as_mut() {
            window.record(now, !outcome.success);
        }
        state.first_recorded_at.get_or_insert(wall);
        state.last_recorded_at = Some(wall);
    }

    /// Outcomes recorded so far
    pub fn total_requests(&self) -> u64 {
        self.state.lock().total
    }

    /// Consistent copy of the current totals
    pub fn snapshot(&self) -> MetricsSnapshot {
        let state = self.state.lock();
        let error_rate = match &state.window {
            Some(window) => window.rate(Instant::now()),
            None if state.total == 0 => 0.0,
            None => state.errors as f64 / state.total as f64,
        };

        MetricsSnapshot {
            total_requests: state.total,
            success_count: state.total - state.errors,
            error_count: state.errors,
            error_rate,
            latency: state.latency.percentiles(),
            status_counts: state.status_counts.clone(),
            checks: state.checks.clone(),
            first_recorded_at: state.first_recorded_at,
            last_recorded_at: state.last_recorded_at,
        }
    }
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::cumulative()
    }
}
