//! Virtual user loop

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::executor::RequestExecutor;
use super::rate_limiter::GlobalRateLimiter;
use super::stats::VirtualUserStats;

/// One simulated client
///
/// Repeats iterations until its `retire` token fires. Retirement is only
/// observed between iterations and during the think time, so the count of
/// recorded requests always matches the count of sent requests.
pub struct VirtualUser {
    id: usize,
    executor: Arc<RequestExecutor>,
    rate_limiter: Arc<GlobalRateLimiter>,
    retire: CancellationToken,
}

impl VirtualUser {
    /// Create a virtual user
    pub fn new(
        id: usize,
        executor: Arc<RequestExecutor>,
        rate_limiter: Arc<GlobalRateLimiter>,
        retire: CancellationToken,
    ) -> Self {
        Self {
            id,
            executor,
            rate_limiter,
            retire,
        }
    }

    /// Identifier, unique within a run
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run iterations until retired
    pub async fn run(self) -> VirtualUserStats {
        let mut stats = VirtualUserStats::new(self.id);
        stats.start();
        tracing::trace!(vu = self.id, "Virtual user started");

        while !self.retire.is_cancelled() {
            tokio::select! {
                biased;
                _ = self.retire.cancelled() => break,
                _ = self.rate_limiter.acquire() => {}
            }

            let outcome = self.executor.execute(&self.retire).await;
            stats.record(outcome.success);
        }

        stats.stop();
        tracing::trace!(
            vu = self.id,
            iterations = stats.iterations(),
            failed = stats.failed,
            "Virtual user retired"
        );
        stats
    }
}
