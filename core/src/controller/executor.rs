//! Run controller execution logic

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{LoadError, LoadResult};
use crate::metrics::Aggregator;
use crate::report::{CompletionStatus, RunReport};
use crate::scheduler::{RampExit, RampScheduler, RunProfile, SchedulerGauges, SchedulerSettings};
use crate::worker::{GlobalRateLimiter, RequestExecutor};

/// Lifecycle of a run
///
/// Only ever moves forward: `Idle -> Running -> Draining -> Completed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    /// Built, not started
    Idle,
    /// Following the ramp profile
    Running,
    /// Waiting for workers to retire
    Draining,
    /// Final snapshot taken
    Completed,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Draining => "draining",
            Self::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// RunController owns the run lifecycle
///
/// Starts the scheduler, waits for the profile to end or for
/// cancellation, drains the workers and produces the [`RunReport`].
/// A controller runs at most once.
pub struct RunController {
    pub(crate) profile: RunProfile,
    pub(crate) settings: SchedulerSettings,
    pub(crate) executor: Arc<RequestExecutor>,
    pub(crate) rate_limiter: Arc<GlobalRateLimiter>,
    pub(crate) aggregator: Arc<Aggregator>,
    pub(crate) gauges: Arc<SchedulerGauges>,
    pub(crate) cancel: CancellationToken,
    pub(crate) state_tx: watch::Sender<RunState>,
    pub(crate) started: AtomicBool,
}

impl RunController {
    /// Create a new controller
    ///
    /// Use `RunControllerBuilder` for a more ergonomic construction.
    pub fn new(
        profile: RunProfile,
        settings: SchedulerSettings,
        executor: Arc<RequestExecutor>,
        rate_limiter: Arc<GlobalRateLimiter>,
    ) -> Self {
        let (state_tx, _) = watch::channel(RunState::Idle);
        let aggregator = executor.aggregator().clone();

        Self {
            profile,
            settings,
            executor,
            rate_limiter,
            aggregator,
            gauges: Arc::new(SchedulerGauges::default()),
            cancel: CancellationToken::new(),
            state_tx,
            started: AtomicBool::new(false),
        }
    }

    /// Current state
    pub fn state(&self) -> RunState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions
    pub fn subscribe(&self) -> watch::Receiver<RunState> {
        self.state_tx.subscribe()
    }

    /// Request a graceful stop
    ///
    /// Takes effect immediately while running; before `run` it makes the
    /// run drain straight away.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token cancelling the run, e.g. to wire into another shutdown path
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Live metrics, readable mid-run
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }

    /// Live scheduler counters
    pub fn gauges(&self) -> &Arc<SchedulerGauges> {
        &self.gauges
    }

    /// The profile being run
    pub fn profile(&self) -> &RunProfile {
        &self.profile
    }

    fn set_state(&self, state: RunState) {
        self.state_tx.send_replace(state);
        tracing::debug!(%state, "Run state changed");
    }

    /// Run the profile to completion
    ///
    /// # Errors
    /// `AlreadyStarted` on a second call; `Config` if the scheduler rejects
    /// its settings. Request failures never surface here.
    pub async fn run(&self) -> LoadResult<RunReport> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(LoadError::AlreadyStarted);
        }

        let started_at = Utc::now();
        let clock = Instant::now();

        let mut scheduler = RampScheduler::start(
            self.profile.clone(),
            self.settings,
            Arc::clone(&self.executor),
            Arc::clone(&self.rate_limiter),
            self.cancel.clone(),
        )?
        .with_gauges(Arc::clone(&self.gauges));

        tracing::info!(
            target_url = %self.executor.target(),
            stages = self.profile.stages().len(),
            total_duration = ?self.profile.total_duration(),
            peak_vus = self.profile.peak_target(),
            think_time = ?self.executor.think_time(),
            rate_limit = ?self.rate_limiter.rps(),
            "Starting run"
        );
        self.set_state(RunState::Running);

        let exit = scheduler.run().await;
        if exit == RampExit::Cancelled {
            tracing::info!(
                active = self.gauges.active(),
                "Run cancelled, draining virtual users"
            );
        }

        self.set_state(RunState::Draining);
        let drain = scheduler.stop().await;
        let forced_workers = drain.forced.as_ref().map_or(0, |e| e.remaining);

        let report = RunReport {
            started_at,
            ended_at: Utc::now(),
            run_duration: clock.elapsed(),
            completion: CompletionStatus::from_forced(forced_workers),
            cancelled: exit == RampExit::Cancelled,
            forced_workers,
            peak_vus: self.gauges.peak(),
            total_spawned: self.gauges.spawned(),
            metrics: self.aggregator.snapshot(),
        };
        self.set_state(RunState::Completed);

        tracing::info!(
            elapsed_secs = report.run_duration.as_secs_f64(),
            total_requests = report.metrics.total_requests,
            error_count = report.metrics.error_count,
            error_rate = report.metrics.error_rate,
            rps = report.requests_per_second(),
            completion = %report.completion,
            "Run completed"
        );

        Ok(report)
    }

    /// Run with Ctrl+C signal handling
    ///
    /// The first Ctrl+C cancels the run and starts the graceful drain.
    pub async fn run_with_signal_handling(&self) -> LoadResult<RunReport> {
        let cancel = self.cancel.clone();

        let signal_handle = tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received Ctrl+C, draining virtual users...");
                    cancel.cancel();
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to listen for Ctrl+C");
                }
            }
        });

        let result = self.run().await;

        signal_handle.abort();

        result
    }
}

impl fmt::Debug for RunController {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunController")
            .field("profile", &self.profile)
            .field("settings", &self.settings)
            .field("executor", &self.executor)
            .field("state", &self.state())
            .finish()
    }
}
