//! loadramp-core: staged HTTP load generation
//!
//! This crate provides the building blocks of a load run:
//!
//! - Run configuration and staged ramp profiles
//! - Virtual users issuing HTTP GETs through a pluggable transport
//! - Named checks evaluated on every response
//! - Thread-safe metrics aggregation with HdrHistogram latencies
//! - A ramp scheduler and a run controller tying it all together
//! - Error handling

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod check;
pub mod config;
pub mod controller;
pub mod error;
pub mod metrics;
pub mod report;
pub mod scheduler;
pub mod transport;
pub mod worker;

pub use check::{Check, CheckRule, CheckSpec, ResponseView, TRANSPORT_ERROR_CHECK};
pub use config::{ErrorRateMode, RunConfig};
pub use controller::{RunController, RunControllerBuilder, RunState};
pub use error::*;
pub use metrics::{Aggregator, LatencyPercentiles, MetricsSnapshot, RequestOutcome};
pub use report::{CompletionStatus, RunReport};
pub use scheduler::{RampScheduler, RunProfile, SchedulerGauges, Stage};
pub use transport::{ReqwestTransport, Transport, TransportResponse};
pub use worker::{GlobalRateLimiter, RequestExecutor, VirtualUser, VirtualUserStats};

#[cfg(test)]
mod integration_tests {
    use super::*;
    use std::time::Duration;

    // =========================================================================
    // JSON format tests
    // =========================================================================

    #[test]
    fn test_reference_workload_config() {
        let json = include_str!("../../configs/loadtest.json");

        let config: RunConfig = serde_json::from_str(json).unwrap();
        config.validate().unwrap();

        let profile = config.profile().unwrap();
        assert_eq!(profile.total_duration(), Duration::from_secs(420));
        assert_eq!(config.header_map().unwrap().len(), 2);
        assert_eq!(config.checks, CheckSpec::default_set());
        assert_eq!(config.request_timeout, Duration::from_secs(30));
    }

    #[test]
    fn test_run_state_snake_case_serialization() {
        assert_eq!(
            serde_json::to_string(&RunState::Draining).unwrap(),
            "\"draining\""
        );
        assert_eq!(RunState::Completed.to_string(), "completed");
    }

    #[test]
    fn test_run_state_is_ordered() {
        assert!(RunState::Idle < RunState::Running);
        assert!(RunState::Running < RunState::Draining);
        assert!(RunState::Draining < RunState::Completed);
    }

    #[test]
    fn test_completion_status_json_format() {
        assert_eq!(
            serde_json::to_string(&CompletionStatus::PartialDueToForceStop).unwrap(),
            "\"PartialDueToForceStop\""
        );
    }

    #[test]
    fn test_windowed_error_rate_json_format() {
        let mode: ErrorRateMode =
            serde_json::from_str(r#"{ "windowed": { "window": "30s" } }"#).unwrap();
        assert_eq!(
            mode,
            ErrorRateMode::Windowed {
                window: Duration::from_secs(30)
            }
        );

        let mode: ErrorRateMode = serde_json::from_str(r#""cumulative""#).unwrap();
        assert_eq!(mode, ErrorRateMode::Cumulative);
    }

    #[test]
    fn test_transport_failure_outcome_json_format() {
        let outcome = RequestOutcome::transport_failure(Duration::from_millis(5));
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["status_code"], 0);
        assert_eq!(value["failed_checks"][0], TRANSPORT_ERROR_CHECK);
    }
}
