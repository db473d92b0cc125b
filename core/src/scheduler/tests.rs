//! Integration tests for the ramp scheduler

use super::*;
use crate::error::ConfigError;
use crate::metrics::Aggregator;
use crate::worker::tests::{default_checks, test_url, MockTransport};
use crate::worker::{GlobalRateLimiter, RequestExecutor, RequestExecutorBuilder};

use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

fn secs(s: u64) -> Duration {
    Duration::from_secs(s)
}

fn millis(ms: u64) -> Duration {
    Duration::from_millis(ms)
}

fn create_executor(transport: MockTransport) -> Arc<RequestExecutor> {
    Arc::new(
        RequestExecutorBuilder::new()
            .transport(Arc::new(transport))
            .target(test_url())
            .checks(default_checks())
            .request_timeout(secs(3600))
            .think_time(secs(1))
            .aggregator(Arc::new(Aggregator::default()))
            .build()
            .expect("Failed to build executor"),
    )
}

fn create_scheduler(
    stages: Vec<Stage>,
    tick: Duration,
    transport: MockTransport,
    cancel: CancellationToken,
) -> RampScheduler {
    let settings = SchedulerSettings {
        tick,
        drain_timeout: secs(2),
    };
    RampScheduler::start(
        RunProfile::new(stages).expect("valid profile"),
        settings,
        create_executor(transport),
        Arc::new(GlobalRateLimiter::unlimited()),
        cancel,
    )
    .expect("Failed to start scheduler")
}

#[tokio::test]
async fn test_start_rejects_zero_tick() {
    let profile = RunProfile::new(vec![Stage::new(secs(1), 1)]).unwrap();
    let settings = SchedulerSettings {
        tick: Duration::ZERO,
        ..Default::default()
    };

    let result = RampScheduler::start(
        profile,
        settings,
        create_executor(MockTransport::new()),
        Arc::new(GlobalRateLimiter::unlimited()),
        CancellationToken::new(),
    );

    assert!(matches!(
        result,
        Err(ConfigError::InvalidDuration {
            field: "scheduler_tick",
            ..
        })
    ));
}

#[tokio::test(start_paused = true)]
async fn test_concurrency_matches_target_at_each_stage_end() {
    // the 3s tick never lands on a boundary; boundaries are reconciled on their own
    let t0 = Instant::now();
    let mut scheduler = create_scheduler(
        vec![
            Stage::new(secs(10), 6),
            Stage::new(secs(10), 2),
            Stage::new(secs(5), 0),
        ],
        secs(3),
        MockTransport::new().with_delay(millis(50)),
        CancellationToken::new(),
    );
    let gauges = scheduler.gauges();

    let handle = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (exit, scheduler)
    });

    tokio::time::sleep_until(t0 + millis(10_100)).await;
    assert_eq!(gauges.active(), 6);
    assert_eq!(gauges.target(), 6);

    tokio::time::sleep_until(t0 + millis(20_100)).await;
    assert_eq!(gauges.active(), 2);

    let (exit, scheduler) = handle.await.expect("Scheduler task panicked");
    assert_eq!(exit, RampExit::ProfileComplete);
    assert_eq!(gauges.active(), 0);
    assert_eq!(gauges.peak(), 6);
    assert_eq!(t0.elapsed(), secs(25));

    let report = scheduler.stop().await;
    assert!(report.forced.is_none());
    assert_eq!(report.workers.len(), gauges.spawned());
    assert!(report.iterations() > 0);
}

#[tokio::test(start_paused = true)]
async fn test_ramp_up_spawns_gradually() {
    let t0 = Instant::now();
    let mut scheduler = create_scheduler(
        vec![Stage::new(secs(10), 10), Stage::new(secs(2), 10)],
        secs(1),
        MockTransport::new(),
        CancellationToken::new(),
    );
    let gauges = scheduler.gauges();
    let handle = tokio::spawn(async move {
        scheduler.run().await;
        scheduler
    });

    for second in 1..10u64 {
        tokio::time::sleep_until(t0 + secs(second) + millis(500)).await;
        assert_eq!(gauges.active(), second as usize, "at {second}s");
    }

    let scheduler = handle.await.expect("Scheduler task panicked");
    assert_eq!(gauges.active(), 10);
    assert_eq!(gauges.spawned(), 10);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_zero_target_stage_drives_workers_to_zero() {
    let t0 = Instant::now();
    let mut scheduler = create_scheduler(
        vec![
            Stage::new(secs(5), 4),
            Stage::new(secs(5), 0),
            Stage::new(secs(5), 0),
            Stage::new(secs(5), 3),
            Stage::new(secs(2), 3),
        ],
        secs(1),
        MockTransport::new(),
        CancellationToken::new(),
    );
    let gauges = scheduler.gauges();
    let handle = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (exit, scheduler)
    });

    tokio::time::sleep_until(t0 + millis(10_500)).await;
    assert_eq!(gauges.active(), 0);
    tokio::time::sleep_until(t0 + millis(14_500)).await;
    assert_eq!(gauges.active(), 0);

    let (exit, scheduler) = handle.await.expect("Scheduler task panicked");
    assert_eq!(exit, RampExit::ProfileComplete);
    assert_eq!(gauges.active(), 3);
    assert_eq!(gauges.spawned(), 7);

    let report = scheduler.stop().await;
    assert!(report.forced.is_none());
    assert_eq!(report.workers.len(), 7);
}

#[tokio::test(start_paused = true)]
async fn test_newest_workers_retire_first() {
    let mut scheduler = create_scheduler(
        vec![
            Stage::new(secs(4), 4),
            Stage::new(secs(4), 2),
            Stage::new(secs(4), 2),
        ],
        secs(1),
        MockTransport::new(),
        CancellationToken::new(),
    );
    scheduler.run().await;
    let report = scheduler.stop().await;

    let ended = |id: usize| {
        report
            .workers
            .iter()
            .find(|w| w.id == id)
            .and_then(|w| w.ended_at)
            .expect("worker drained")
    };
    assert_eq!(report.workers.len(), 4);
    assert!(ended(3) < ended(0));
    assert!(ended(2) < ended(1));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_spawning() {
    let t0 = Instant::now();
    let cancel = CancellationToken::new();
    let mut scheduler = create_scheduler(
        vec![Stage::new(secs(60), 60)],
        secs(1),
        MockTransport::new().with_delay(millis(50)),
        cancel.clone(),
    );
    let gauges = scheduler.gauges();
    let handle = tokio::spawn(async move {
        let exit = scheduler.run().await;
        (exit, scheduler)
    });

    tokio::time::sleep_until(t0 + millis(5_500)).await;
    cancel.cancel();
    let (exit, scheduler) = handle.await.expect("Scheduler task panicked");
    let spawned_at_cancel = gauges.spawned();

    assert_eq!(exit, RampExit::Cancelled);
    assert_eq!(spawned_at_cancel, 5);

    let report = scheduler.stop().await;
    assert!(report.forced.is_none());
    assert_eq!(gauges.spawned(), spawned_at_cancel);
    assert_eq!(report.workers.len(), spawned_at_cancel);
    assert!(t0.elapsed() < secs(6));
}

#[tokio::test(start_paused = true)]
async fn test_drain_timeout_aborts_stuck_workers() {
    let t0 = Instant::now();
    let mut scheduler = create_scheduler(
        vec![Stage::new(secs(3), 3), Stage::new(secs(2), 3)],
        secs(1),
        MockTransport::new().hanging(),
        CancellationToken::new(),
    );
    assert_eq!(scheduler.run().await, RampExit::ProfileComplete);

    let report = scheduler.stop().await;

    let forced = report.forced.expect("drain should time out");
    assert_eq!(forced.remaining, 3);
    assert_eq!(forced.timeout, secs(2));
    assert!(report.workers.is_empty());
    assert_eq!(t0.elapsed(), secs(7));
}

#[tokio::test(start_paused = true)]
async fn test_profile_end_retires_without_spawning() {
    // 3s ramp to 3 with a 1s tick: 1 and 2 workers at the ticks, then the run ends
    let mut scheduler = create_scheduler(
        vec![Stage::new(secs(3), 3)],
        secs(1),
        MockTransport::new().hanging(),
        CancellationToken::new(),
    );
    let gauges = scheduler.gauges();

    assert_eq!(scheduler.run().await, RampExit::ProfileComplete);
    assert_eq!(gauges.target(), 3);
    assert_eq!(gauges.active(), 2);
    assert_eq!(gauges.spawned(), 2);

    let report = scheduler.stop().await;
    let forced = report.forced.expect("drain should time out");
    assert_eq!(forced.remaining, 2);
    assert!(report.workers.is_empty());
}
