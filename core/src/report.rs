//! End-of-run summary

use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::metrics::MetricsSnapshot;

/// How the run ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompletionStatus {
    /// Every worker retired within the drain timeout
    Completed,
    /// Some workers had to be aborted; in-flight requests were not recorded
    PartialDueToForceStop,
}

impl CompletionStatus {
    /// Status for a drain that aborted `forced` workers
    pub fn from_forced(forced: usize) -> Self {
        if forced == 0 {
            Self::Completed
        } else {
            Self::PartialDueToForceStop
        }
    }
}

impl fmt::Display for CompletionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("Completed"),
            Self::PartialDueToForceStop => f.write_str("PartialDueToForceStop"),
        }
    }
}

/// Final summary of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    /// Wall-clock start
    pub started_at: DateTime<Utc>,
    /// Wall-clock end, after the drain
    pub ended_at: DateTime<Utc>,
    /// Time from start to end of drain
    #[serde(with = "humantime_serde")]
    pub run_duration: Duration,
    /// Completed or partial
    pub completion: CompletionStatus,
    /// Run was stopped by cancellation before the profile ended
    pub cancelled: bool,
    /// Workers aborted at the drain deadline
    pub forced_workers: usize,
    /// Highest concurrency reached
    pub peak_vus: usize,
    /// Virtual users spawned over the run
    pub total_spawned: usize,
    /// Final metrics
    pub metrics: MetricsSnapshot,
}

impl RunReport {
    /// Recorded requests per second of run time
    pub fn requests_per_second(&self) -> f64 {
        let secs = self.run_duration.as_secs_f64();
        if secs > 0.0 {
            self.metrics.total_requests as f64 / secs
        } else {
            0.0
        }
    }

    /// Whether the run ended without aborting workers
    pub fn is_complete(&self) -> bool {
        self.completion == CompletionStatus::Completed
    }

    /// Pretty-printed JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let m = &self.metrics;
        let millis = u64::try_from(self.run_duration.as_millis()).unwrap_or(u64::MAX);
        let duration = Duration::from_millis(millis);

        writeln!(f, "{:<24}{}", "completion_status", self.completion)?;
        writeln!(
            f,
            "{:<24}{}",
            "run_duration",
            humantime::format_duration(duration)
        )?;
        if self.cancelled {
            writeln!(f, "{:<24}{}", "cancelled", true)?;
        }
        if self.forced_workers > 0 {
            writeln!(f, "{:<24}{}", "forced_workers", self.forced_workers)?;
        }
        writeln!(f, "{:<24}{}", "total_requests", m.total_requests)?;
        writeln!(f, "{:<24}{}", "error_count", m.error_count)?;
        writeln!(f, "{:<24}{:.2}%", "error_rate", m.error_rate * 100.0)?;
        writeln!(f, "{:<24}{:.2}", "requests_per_second", self.requests_per_second())?;
        writeln!(f, "{:<24}{}", "peak_vus", self.peak_vus)?;
        writeln!(f, "{:<24}{}", "total_vus_spawned", self.total_spawned)?;
        writeln!(f, "{:<24}{:.2}ms", "latency_p50", m.latency.p50)?;
        writeln!(f, "{:<24}{:.2}ms", "latency_p90", m.latency.p90)?;
        writeln!(f, "{:<24}{:.2}ms", "latency_p99", m.latency.p99)?;
        writeln!(
            f,
            "{:<24}min={:.2}ms mean={:.2}ms max={:.2}ms",
            "latency", m.latency.min, m.latency.mean, m.latency.max
        )?;

        for (status, count) in &m.status_counts {
            let label = if *status == 0 {
                "status no_response".to_string()
            } else {
                format!("status {status}")
            };
            writeln!(f, "{label:<24}{count}")?;
        }

        for (name, tally) in &m.checks {
            writeln!(
                f,
                "check {:<18}{:.2}% passes={} fails={}",
                format!("{name:?}"),
                tally.pass_rate() * 100.0,
                tally.passes,
                tally.fails
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::CheckTally;
    use std::collections::BTreeMap;

    fn sample_report() -> RunReport {
        let now = Utc::now();
        RunReport {
            started_at: now,
            ended_at: now,
            run_duration: Duration::from_secs(10),
            completion: CompletionStatus::Completed,
            cancelled: false,
            forced_workers: 0,
            peak_vus: 4,
            total_spawned: 4,
            metrics: MetricsSnapshot {
                total_requests: 40,
                success_count: 30,
                error_count: 10,
                error_rate: 0.25,
                status_counts: BTreeMap::from([(0, 2), (200, 30), (500, 8)]),
                checks: BTreeMap::from([(
                    "is status 200".to_string(),
                    CheckTally {
                        passes: 30,
                        fails: 8,
                    },
                )]),
                ..Default::default()
            },
        }
    }

    #[test]
    fn test_completion_from_forced() {
        assert_eq!(CompletionStatus::from_forced(0), CompletionStatus::Completed);
        assert_eq!(
            CompletionStatus::from_forced(3),
            CompletionStatus::PartialDueToForceStop
        );
    }

    #[test]
    fn test_requests_per_second() {
        let report = sample_report();
        assert_eq!(report.requests_per_second(), 4.0);

        let empty = RunReport {
            run_duration: Duration::ZERO,
            ..sample_report()
        };
        assert_eq!(empty.requests_per_second(), 0.0);
    }

    #[test]
    fn test_display_key_values() {
        let text = sample_report().to_string();
        assert!(text.contains("completion_status       Completed"));
        assert!(text.contains("run_duration            10s"));
        assert!(text.contains("total_requests          40"));
        assert!(text.contains("error_rate              25.00%"));
        assert!(text.contains("status 500              8"));
        assert!(text.contains("status no_response      2"));
        assert!(text.contains("\"is status 200\""));
        assert!(!text.contains("cancelled"));
    }

    #[test]
    fn test_display_partial_run() {
        let report = RunReport {
            completion: CompletionStatus::PartialDueToForceStop,
            cancelled: true,
            forced_workers: 2,
            ..sample_report()
        };
        let text = report.to_string();
        assert!(text.contains("PartialDueToForceStop"));
        assert!(text.contains("forced_workers          2"));
        assert!(!report.is_complete());
    }

    #[test]
    fn test_display_saturates_huge_duration() {
        let report = RunReport {
            run_duration: Duration::MAX,
            ..sample_report()
        };
        let expected = humantime::format_duration(Duration::from_millis(u64::MAX)).to_string();
        assert!(report.to_string().contains(&expected));
    }

    #[test]
    fn test_json_export() {
        let json = sample_report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["completion"], "Completed");
        assert_eq!(value["run_duration"], "10s");
        assert_eq!(value["metrics"]["total_requests"], 40);
        assert_eq!(value["metrics"]["status_counts"]["500"], 8);
    }
}
