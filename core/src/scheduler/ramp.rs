//! Ramp scheduler: keeps live virtual users matched to the profile's target

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::config::{DEFAULT_DRAIN_TIMEOUT, DEFAULT_SCHEDULER_TICK};
use crate::error::{ConfigError, DrainTimeoutError};
use crate::worker::{GlobalRateLimiter, RequestExecutor, VirtualUser, VirtualUserStats};

use super::profile::RunProfile;

/// Scheduler timing options
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Interval between reconciliations
    pub tick: Duration,
    /// Upper bound on the graceful drain in [`RampScheduler::stop`]
    pub drain_timeout: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            tick: DEFAULT_SCHEDULER_TICK,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Live counters published by the scheduler
///
/// Readable from any thread while the run is in progress.
#[derive(Debug, Default)]
pub struct SchedulerGauges {
    active: AtomicUsize,
    peak: AtomicUsize,
    spawned: AtomicUsize,
    target: AtomicUsize,
}

impl SchedulerGauges {
    /// Virtual users currently running and not told to retire
    pub fn active(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Highest `active` value seen so far
    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Virtual users spawned since the run started
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::Relaxed)
    }

    /// Target concurrency at the last reconciliation
    pub fn target(&self) -> usize {
        self.target.load(Ordering::Relaxed)
    }

    fn set_active(&self, active: usize) {
        self.active.store(active, Ordering::Relaxed);
        self.peak.fetch_max(active, Ordering::Relaxed);
    }
}

/// Why [`RampScheduler::run`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RampExit {
    /// Elapsed time reached the end of the profile
    ProfileComplete,
    /// The run's cancellation token fired
    Cancelled,
}

/// Result of [`RampScheduler::stop`]
#[derive(Debug, Default)]
pub struct DrainReport {
    /// Stats of every virtual user that exited on its own
    pub workers: Vec<VirtualUserStats>,
    /// Set when the drain timeout expired and workers were aborted
    pub forced: Option<DrainTimeoutError>,
}

impl DrainReport {
    /// Iterations completed across all drained workers
    pub fn iterations(&self) -> usize {
        self.workers.iter().map(VirtualUserStats::iterations).sum()
    }
}

struct WorkerSlot {
    id: usize,
    retire: CancellationToken,
    handle: JoinHandle<VirtualUserStats>,
}

/// Timer-driven control loop spawning and retiring virtual users
///
/// On every tick, and exactly at every stage boundary, the scheduler
/// computes the target concurrency and spawns or retires workers to match.
/// Retirement is graceful: a retired worker finishes its current request
/// before exiting. The newest workers retire first. Once the profile's total
/// duration is reached workers are only retired, never spawned.
pub struct RampScheduler {
    profile: RunProfile,
    settings: SchedulerSettings,
    executor: Arc<RequestExecutor>,
    rate_limiter: Arc<GlobalRateLimiter>,
    cancel: CancellationToken,
    gauges: Arc<SchedulerGauges>,
    started_at: Instant,
    total_duration: Duration,
    workers: Vec<WorkerSlot>,
    retiring: Vec<JoinHandle<VirtualUserStats>>,
    finished: Vec<VirtualUserStats>,
    next_id: usize,
    current_stage: Option<usize>,
}

impl RampScheduler {
    /// Validate the profile and start the run clock
    ///
    /// No workers are spawned until [`run`](Self::run) is polled.
    ///
    /// # Errors
    /// `EmptyProfile` / `NonPositiveStageDuration` for a bad profile,
    /// `InvalidDuration` for a zero tick.
    pub fn start(
        profile: RunProfile,
        settings: SchedulerSettings,
        executor: Arc<RequestExecutor>,
        rate_limiter: Arc<GlobalRateLimiter>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError> {
        profile.validate()?;
        if settings.tick.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "scheduler_tick",
                value: settings.tick,
            });
        }

        let total_duration = profile.total_duration();
        tracing::info!(
            stages = profile.stages().len(),
            total_duration = ?total_duration,
            peak_target = profile.peak_target(),
            tick = ?settings.tick,
            "Ramp scheduler started"
        );

        Ok(Self {
            profile,
            settings,
            executor,
            rate_limiter,
            cancel,
            gauges: Arc::new(SchedulerGauges::default()),
            started_at: Instant::now(),
            total_duration,
            workers: Vec::new(),
            retiring: Vec::new(),
            finished: Vec::new(),
            next_id: 0,
            current_stage: None,
        })
    }

    /// Publish counters into `gauges` instead of a private instance
    pub fn with_gauges(mut self, gauges: Arc<SchedulerGauges>) -> Self {
        self.gauges = gauges;
        self
    }

    /// Live counters
    pub fn gauges(&self) -> Arc<SchedulerGauges> {
        self.gauges.clone()
    }

    /// The profile being followed
    pub fn profile(&self) -> &RunProfile {
        &self.profile
    }

    /// Time since [`start`](Self::start)
    pub fn elapsed(&self) -> Duration {
        Instant::now().saturating_duration_since(self.started_at)
    }

    /// Virtual users running and not told to retire
    pub fn active(&self) -> usize {
        self.workers.len()
    }

    /// Follow the profile until it ends or the run is cancelled
    ///
    /// Workers are left running; call [`stop`](Self::stop) to drain them.
    pub async fn run(&mut self) -> RampExit {
        let cancel = self.cancel.clone();
        let mut ticker =
            tokio::time::interval_at(self.started_at + self.settings.tick, self.settings.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        self.reconcile(self.elapsed());

        loop {
            if cancel.is_cancelled() {
                tracing::info!(elapsed = ?self.elapsed(), "Ramp cancelled");
                return RampExit::Cancelled;
            }

            let next_boundary = self
                .profile
                .stage_index_at(self.elapsed())
                .and_then(|index| self.profile.stage_end(index));

            let Some(boundary) = next_boundary else {
                self.reconcile(self.total_duration);
                tracing::info!(active = self.active(), "Ramp profile complete");
                return RampExit::ProfileComplete;
            };

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                _ = tokio::time::sleep_until(self.started_at + boundary) => {
                    self.reconcile(boundary);
                }
                _ = ticker.tick() => {
                    let elapsed = self.elapsed().min(boundary);
                    self.reconcile(elapsed);
                }
            }
        }
    }

    /// Spawn or retire workers to match the target at `elapsed`
    ///
    /// At or past the end of the profile the run is about to drain, so a
    /// target above the active count is published but not acted on.
    fn reconcile(&mut self, elapsed: Duration) {
        self.reap_finished();

        let stage = self.profile.stage_index_at(elapsed);
        if stage != self.current_stage {
            if let Some(index) = stage {
                let target = self.profile.stages()[index].target;
                tracing::info!(stage = index, target, elapsed = ?elapsed, "Entering stage");
            }
            self.current_stage = stage;
        }

        let desired = self.profile.target_at(elapsed);
        let active = self.workers.len();
        self.gauges.target.store(desired, Ordering::Relaxed);

        let desired = if desired > active && elapsed >= self.total_duration {
            tracing::debug!(desired, active, "Profile complete, not spawning");
            active
        } else {
            desired
        };

        if desired > active {
            for _ in active..desired {
                self.spawn_worker();
            }
        } else if desired < active {
            for slot in self.workers.drain(desired..).rev() {
                slot.retire.cancel();
                tracing::trace!(worker_id = slot.id, "Retiring virtual user");
                self.retiring.push(slot.handle);
            }
        }

        if desired != active {
            tracing::debug!(
                elapsed = ?elapsed,
                from = active,
                active = desired,
                "Concurrency changed"
            );
        }
        self.gauges.set_active(self.workers.len());
    }

    fn spawn_worker(&mut self) {
        let id = self.next_id;
        self.next_id += 1;

        let retire = self.cancel.child_token();
        let vu = VirtualUser::new(
            id,
            self.executor.clone(),
            self.rate_limiter.clone(),
            retire.clone(),
        );
        let handle = tokio::spawn(vu.run());

        self.gauges.spawned.fetch_add(1, Ordering::Relaxed);
        self.workers.push(WorkerSlot { id, retire, handle });
    }

    /// Collect workers that have already exited
    fn reap_finished(&mut self) {
        let (done, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.retiring)
            .into_iter()
            .partition(JoinHandle::is_finished);
        self.retiring = pending;
        for handle in done {
            if let Some(result) = handle.now_or_never() {
                collect(&mut self.finished, result);
            }
        }

        // a live worker only exits early by panicking; the next reconcile replaces it
        let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.workers)
            .into_iter()
            .partition(|slot| slot.handle.is_finished());
        self.workers = live;
        for slot in dead {
            tracing::warn!(worker_id = slot.id, "Virtual user exited unexpectedly");
            if let Some(result) = slot.handle.now_or_never() {
                collect(&mut self.finished, result);
            }
        }
    }

    /// Retire every worker and wait for them, bounded by the drain timeout
    ///
    /// Workers still running at the deadline are aborted and counted in
    /// [`DrainReport::forced`].
    pub async fn stop(mut self) -> DrainReport {
        let mut handles = Vec::with_capacity(self.workers.len() + self.retiring.len());
        for slot in self.workers.drain(..) {
            slot.retire.cancel();
            handles.push(slot.handle);
        }
        handles.append(&mut self.retiring);
        self.gauges.set_active(0);

        let timeout = self.settings.drain_timeout;
        tracing::info!(workers = handles.len(), timeout = ?timeout, "Draining virtual users");

        let abort_handles: Vec<_> = handles.iter().map(JoinHandle::abort_handle).collect();
        let mut pending: FuturesUnordered<_> = handles.into_iter().collect();
        let mut finished = std::mem::take(&mut self.finished);

        let drained = tokio::time::timeout(timeout, async {
            while let Some(result) = pending.next().await {
                collect(&mut finished, result);
            }
        })
        .await;

        let forced = match drained {
            Ok(()) => None,
            Err(_) => {
                for handle in &abort_handles {
                    handle.abort();
                }
                let err = DrainTimeoutError {
                    remaining: pending.len(),
                    timeout,
                };
                tracing::warn!(remaining = err.remaining, "{err}");
                Some(err)
            }
        };

        tracing::info!(
            drained = finished.len(),
            forced = forced.as_ref().map_or(0, |e| e.remaining),
            "Drain finished"
        );

        DrainReport {
            workers: finished,
            forced,
        }
    }
}

fn collect(finished: &mut Vec<VirtualUserStats>, result: Result<VirtualUserStats, JoinError>) {
    match result {
        Ok(stats) => finished.push(stats),
        Err(e) if e.is_cancelled() => {}
        Err(e) => tracing::error!(error = %e, "Virtual user task panicked"),
    }
}
