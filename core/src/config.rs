//! Run configuration types

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Url;
use serde::{Deserialize, Serialize};

use crate::check::{validate_check_specs, CheckSpec};
use crate::error::{ConfigError, LoadError, LoadResult};
use crate::scheduler::{RunProfile, Stage};

/// Default request timeout
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Default pause between iterations of one virtual user
pub const DEFAULT_THINK_TIME: Duration = Duration::from_secs(1);
/// Default scheduler reconciliation period
pub const DEFAULT_SCHEDULER_TICK: Duration = Duration::from_secs(1);
/// Default bound on graceful worker retirement at stop
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Shortest window accepted for a windowed error rate
const MIN_ERROR_WINDOW: Duration = Duration::from_secs(1);

/// How the reported error rate is computed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorRateMode {
    /// errors / total over the whole run
    #[default]
    Cumulative,
    /// errors / total over outcomes recorded within the trailing window
    Windowed {
        /// Window length, whole seconds
        #[serde(with = "humantime_serde")]
        window: Duration,
    },
}

/// Run configuration
///
/// Describes what to hit, how hard, and for how long. Every field has a
/// default except `stages`, which must be provided for `validate` to pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    /// URL requested by every iteration (plain HTTP GET)
    pub target: String,

    /// Headers sent with every request
    pub headers: BTreeMap<String, String>,

    /// Ramp stages
    pub stages: Vec<Stage>,

    /// Per-request timeout
    #[serde(with = "humantime_serde", alias = "requestTimeout")]
    pub request_timeout: Duration,

    /// Pause after each iteration
    #[serde(with = "humantime_serde", alias = "thinkTime")]
    pub think_time: Duration,

    /// How often the scheduler reconciles concurrency
    #[serde(with = "humantime_serde", alias = "schedulerTick")]
    pub scheduler_tick: Duration,

    /// Upper bound on graceful retirement at stop
    #[serde(with = "humantime_serde", alias = "drainTimeout")]
    pub drain_timeout: Duration,

    /// Checks evaluated against every response
    pub checks: Vec<CheckSpec>,

    /// Optional global cap in requests per second, shared by all virtual users
    #[serde(skip_serializing_if = "Option::is_none", alias = "rateLimit")]
    pub rate_limit: Option<f64>,

    /// Error rate computation
    #[serde(alias = "errorRate")]
    pub error_rate: ErrorRateMode,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            target: "http://localhost:8080".to_string(),
            headers: BTreeMap::new(),
            stages: Vec::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            think_time: DEFAULT_THINK_TIME,
            scheduler_tick: DEFAULT_SCHEDULER_TICK,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
            checks: CheckSpec::default_set(),
            rate_limit: None,
            error_rate: ErrorRateMode::Cumulative,
        }
    }
}

impl RunConfig {
    /// Create a config targeting `target` with default settings
    pub fn new(target: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            ..Default::default()
        }
    }

    /// Read a JSON config file
    pub fn from_file(path: impl AsRef<Path>) -> LoadResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| LoadError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| LoadError::ConfigFile {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Append a stage
    pub fn with_stage(mut self, duration: Duration, target: usize) -> Self {
        self.stages.push(Stage::new(duration, target));
        self
    }

    /// Replace all stages
    pub fn with_stages(mut self, stages: Vec<Stage>) -> Self {
        self.stages = stages;
        self
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Set the request timeout
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the think time
    pub fn with_think_time(mut self, think_time: Duration) -> Self {
        self.think_time = think_time;
        self
    }

    /// Set the scheduler tick
    pub fn with_scheduler_tick(mut self, tick: Duration) -> Self {
        self.scheduler_tick = tick;
        self
    }

    /// Set the drain timeout
    pub fn with_drain_timeout(mut self, timeout: Duration) -> Self {
        self.drain_timeout = timeout;
        self
    }

    /// Replace the configured checks
    pub fn with_checks(mut self, checks: Vec<CheckSpec>) -> Self {
        self.checks = checks;
        self
    }

    /// Set a global rate limit
    pub fn with_rate_limit(mut self, rps: f64) -> Self {
        self.rate_limit = Some(rps);
        self
    }

    /// Set the error rate mode
    pub fn with_error_rate(mut self, mode: ErrorRateMode) -> Self {
        self.error_rate = mode;
        self
    }

    /// Validated ramp profile
    pub fn profile(&self) -> Result<RunProfile, ConfigError> {
        RunProfile::new(self.stages.clone())
    }

    /// Parsed target URL
    pub fn target_url(&self) -> Result<Url, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidTarget {
            url: self.target.clone(),
            reason,
        };
        let url = Url::parse(&self.target).map_err(|e| invalid(e.to_string()))?;
        match url.scheme() {
            "http" | "https" => Ok(url),
            other => Err(invalid(format!("unsupported scheme {other:?}"))),
        }
    }

    /// Headers as an HTTP header map
    pub fn header_map(&self) -> Result<HeaderMap, ConfigError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            let invalid = |reason: String| ConfigError::InvalidHeader {
                name: name.clone(),
                reason,
            };
            let header_name =
                HeaderName::from_bytes(name.as_bytes()).map_err(|e| invalid(e.to_string()))?;
            let header_value = HeaderValue::from_str(value).map_err(|e| invalid(e.to_string()))?;
            map.insert(header_name, header_value);
        }
        Ok(map)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.profile()?;
        self.target_url()?;
        self.header_map()?;

        if self.request_timeout.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "request_timeout",
                value: self.request_timeout,
            });
        }
        if self.scheduler_tick.is_zero() {
            return Err(ConfigError::InvalidDuration {
                field: "scheduler_tick",
                value: self.scheduler_tick,
            });
        }
        if let ErrorRateMode::Windowed { window } = self.error_rate {
            if window < MIN_ERROR_WINDOW {
                return Err(ConfigError::InvalidDuration {
                    field: "error_rate.window",
                    value: window,
                });
            }
        }
        if let Some(rps) = self.rate_limit {
            if !rps.is_finite() || rps <= 0.0 {
                return Err(ConfigError::InvalidRateLimit(format!(
                    "{rps} is not a positive number of requests per second"
                )));
            }
        }

        validate_check_specs(&self.checks)
    }
}
