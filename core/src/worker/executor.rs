//! One load-generation iteration: request -> checks -> record -> think

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Url;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::check::{evaluate_checks, Check, ResponseView};
use crate::error::TransportError;
use crate::metrics::{Aggregator, RequestOutcome};
use crate::transport::Transport;

/// Runs iterations on behalf of virtual users
///
/// Shared by every virtual user of a run via `Arc`. Holds no per-user
/// state; the only thing it mutates is the aggregator.
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    target: Url,
    headers: HeaderMap,
    checks: Vec<Check>,
    request_timeout: Duration,
    think_time: Duration,
    aggregator: Arc<Aggregator>,
}

impl RequestExecutor {
    /// Create an executor
    ///
    /// Use `RequestExecutorBuilder` for a more ergonomic construction.
    pub fn new(
        transport: Arc<dyn Transport>,
        target: Url,
        headers: HeaderMap,
        checks: Vec<Check>,
        request_timeout: Duration,
        think_time: Duration,
        aggregator: Arc<Aggregator>,
    ) -> Self {
        Self {
            transport,
            target,
            headers,
            checks,
            request_timeout,
            think_time,
            aggregator,
        }
    }

    /// Run one full iteration
    ///
    /// Issues the request, records the outcome, then sleeps the think time.
    /// Never fails: transport errors and timeouts become failed outcomes.
    /// `stop` only shortens the think time; a request in flight always
    /// runs to completion or timeout.
    pub async fn execute(&self, stop: &CancellationToken) -> RequestOutcome {
        let outcome = self.send_and_check().await;
        self.aggregator.record(&outcome);
        self.think(stop).await;
        outcome
    }

    /// Issue the request and evaluate checks, without recording
    pub async fn send_and_check(&self) -> RequestOutcome {
        let start = Instant::now();
        let result = tokio::time::timeout(
            self.request_timeout,
            self.transport.get(&self.target, &self.headers),
        )
        .await
        .unwrap_or(Err(TransportError::Timeout(self.request_timeout)));
        let latency = start.elapsed();

        match result {
            Ok(response) => {
                let view = ResponseView {
                    status: response.status,
                    duration: latency,
                };
                RequestOutcome::from_response(
                    response.status,
                    latency,
                    evaluate_checks(&self.checks, &view),
                )
            }
            Err(e) => {
                tracing::debug!(
                    target_url = %self.target,
                    transport = self.transport.name(),
                    error = %e,
                    "Request failed"
                );
                RequestOutcome::transport_failure(latency)
            }
        }
    }

    async fn think(&self, stop: &CancellationToken) {
        if self.think_time.is_zero() {
            return;
        }
        tokio::select! {
            biased;
            _ = stop.cancelled() => {}
            _ = tokio::time::sleep(self.think_time) => {}
        }
    }

    /// Requested URL
    pub fn target(&self) -> &Url {
        &self.target
    }

    /// Checks run against each response
    pub fn checks(&self) -> &[Check] {
        &self.checks
    }

    /// Pause after each iteration
    pub fn think_time(&self) -> Duration {
        self.think_time
    }

    /// Aggregator receiving the outcomes
    pub fn aggregator(&self) -> &Arc<Aggregator> {
        &self.aggregator
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("transport", &self.transport.name())
            .field("target", &self.target.as_str())
            .field("checks", &self.checks)
            .field("request_timeout", &self.request_timeout)
            .field("think_time", &self.think_time)
            .finish()
    }
}
