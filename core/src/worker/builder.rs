//! Builder pattern for RequestExecutor construction

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::HeaderMap;
use reqwest::Url;

use crate::check::Check;
use crate::config::{DEFAULT_REQUEST_TIMEOUT, DEFAULT_THINK_TIME};
use crate::error::ConfigError;
use crate::metrics::Aggregator;
use crate::transport::Transport;

use super::executor::RequestExecutor;

/// Builder for creating a RequestExecutor
///
/// # Example
/// ```ignore
/// let executor = RequestExecutorBuilder::new()
///     .transport(transport)
///     .target(url)
///     .checks(checks)
///     .aggregator(aggregator)
///     .think_time(Duration::from_secs(1))
///     .build()?;
/// ```
#[derive(Default)]
pub struct RequestExecutorBuilder {
    transport: Option<Arc<dyn Transport>>,
    target: Option<Url>,
    headers: HeaderMap,
    checks: Vec<Check>,
    request_timeout: Option<Duration>,
    think_time: Option<Duration>,
    aggregator: Option<Arc<Aggregator>>,
}

impl RequestExecutorBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the transport
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set the target URL
    pub fn target(mut self, target: Url) -> Self {
        self.target = Some(target);
        self
    }

    /// Set the request headers
    pub fn headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    /// Set the checks
    pub fn checks(mut self, checks: Vec<Check>) -> Self {
        self.checks = checks;
        self
    }

    /// Set the request timeout (default 30s)
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Set the think time (default 1s)
    pub fn think_time(mut self, think_time: Duration) -> Self {
        self.think_time = Some(think_time);
        self
    }

    /// Set the aggregator
    pub fn aggregator(mut self, aggregator: Arc<Aggregator>) -> Self {
        self.aggregator = Some(aggregator);
        self
    }

    /// Build the executor
    ///
    /// # Errors
    /// `MissingField` if the transport, target or aggregator is unset.
    pub fn build(self) -> Result<RequestExecutor, ConfigError> {
        let transport = self
            .transport
            .ok_or(ConfigError::MissingField("transport"))?;
        let target = self.target.ok_or(ConfigError::MissingField("target"))?;
        let aggregator = self
            .aggregator
            .ok_or(ConfigError::MissingField("aggregator"))?;

        Ok(RequestExecutor::new(
            transport,
            target,
            self.headers,
            self.checks,
            self.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            self.think_time.unwrap_or(DEFAULT_THINK_TIME),
            aggregator,
        ))
    }
}
