//! Builder pattern for RunController construction

use std::sync::Arc;

use crate::check::{Check, CheckSpec};
use crate::config::RunConfig;
use crate::error::{ConfigError, LoadResult};
use crate::metrics::Aggregator;
use crate::scheduler::SchedulerSettings;
use crate::transport::{ReqwestTransport, Transport};
use crate::worker::{GlobalRateLimiter, RequestExecutorBuilder};

use super::executor::RunController;

/// Builder for creating a RunController from a validated configuration
///
/// # Example
///
/// ```ignore
/// let controller = RunControllerBuilder::new()
///     .config(RunConfig::from_file("loadtest.json")?)
///     .build()?;
///
/// let report = controller.run_with_signal_handling().await?;
/// println!("{report}");
/// ```
#[derive(Default)]
pub struct RunControllerBuilder {
    config: Option<RunConfig>,
    transport: Option<Arc<dyn Transport>>,
    checks: Option<Vec<Check>>,
}

impl RunControllerBuilder {
    /// Create a new builder
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the run configuration
    pub fn config(mut self, config: RunConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Use a custom transport instead of the default reqwest client
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Use these checks instead of the ones in the configuration
    pub fn checks(mut self, checks: Vec<Check>) -> Self {
        self.checks = Some(checks);
        self
    }

    /// Validate the configuration and build the controller
    ///
    /// # Errors
    /// `Config` for a missing or invalid configuration, `Transport` if the
    /// default HTTP client cannot be built.
    pub fn build(self) -> LoadResult<RunController> {
        let config = self.config.ok_or(ConfigError::MissingField("config"))?;
        config.validate()?;

        let profile = config.profile()?;
        let target = config.target_url()?;
        let headers = config.header_map()?;

        let transport: Arc<dyn Transport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(ReqwestTransport::new()?),
        };
        let checks = self
            .checks
            .unwrap_or_else(|| config.checks.iter().map(CheckSpec::build).collect());

        let aggregator = Arc::new(Aggregator::new(config.error_rate));
        let executor = RequestExecutorBuilder::new()
            .transport(transport)
            .target(target)
            .headers(headers)
            .checks(checks)
            .request_timeout(config.request_timeout)
            .think_time(config.think_time)
            .aggregator(aggregator)
            .build()?;

        let settings = SchedulerSettings {
            tick: config.scheduler_tick,
            drain_timeout: config.drain_timeout,
        };

        Ok(RunController::new(
            profile,
            settings,
            Arc::new(executor),
            Arc::new(GlobalRateLimiter::new(config.rate_limit)),
        ))
    }
}
