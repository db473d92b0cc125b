//! Error types for loadramp-core

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Configuration validation errors
///
/// Raised before a run starts. A run with an invalid configuration never
/// reaches the `Running` state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The run profile has no stages
    #[error("run profile has no stages")]
    EmptyProfile,

    /// A stage has a zero duration
    #[error("stage {index} has a non-positive duration")]
    NonPositiveStageDuration {
        /// Position of the offending stage in the profile
        index: usize,
    },

    /// A stage given on the command line could not be parsed
    #[error("invalid stage {0:?}: expected <duration>:<target>, e.g. 1m:100")]
    InvalidStageSpec(String),

    /// Target URL is malformed or not http(s)
    #[error("invalid target URL {url:?}: {reason}")]
    InvalidTarget {
        /// URL as configured
        url: String,
        /// Why it was rejected
        reason: String,
    },

    /// Header name or value is not valid HTTP
    #[error("invalid header {name:?}: {reason}")]
    InvalidHeader {
        /// Header name as configured
        name: String,
        /// Why it was rejected
        reason: String,
    },

    /// A duration option is out of range
    #[error("invalid {field}: {value:?}")]
    InvalidDuration {
        /// Option name
        field: &'static str,
        /// Configured value
        value: Duration,
    },

    /// A builder was finished without a required component
    #[error("missing required field: {0}")]
    MissingField(&'static str),

    /// Rate limit is not a positive finite number
    #[error("invalid rate limit: {0}")]
    InvalidRateLimit(String),

    /// A check definition is unusable
    #[error("invalid check {name:?}: {reason}")]
    InvalidCheck {
        /// Check name
        name: String,
        /// Why it was rejected
        reason: String,
    },
}

/// Per-request transport failure
///
/// Never escapes the request executor: it is folded into a failed
/// `RequestOutcome` carrying the `transport_error` check.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the request timeout
    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    /// Could not connect to the target
    #[error("connection failed: {0}")]
    Connect(String),

    /// Request failed after the connection was established
    #[error("request failed: {0}")]
    Request(String),

    /// Response body could not be read to the end
    #[error("failed to read response body: {0}")]
    Body(String),

    /// HTTP client could not be constructed
    #[error("failed to build HTTP client: {0}")]
    Client(String),
}

/// Workers were still running when the drain timeout expired
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{remaining} virtual users still running after drain timeout of {timeout:?}, force-terminated")]
pub struct DrainTimeoutError {
    /// Number of workers that had to be aborted
    pub remaining: usize,
    /// The drain timeout that expired
    pub timeout: Duration,
}

/// Core error type
#[derive(Debug, Error)]
pub enum LoadError {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Configuration file could not be read
    #[error("failed to read config file {path}: {source}")]
    ConfigRead {
        /// File that could not be read
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Configuration file could not be parsed
    #[error("failed to parse config file {path}: {source}")]
    ConfigFile {
        /// File that failed to parse
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// HTTP transport could not be set up
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// `run` was called on a controller that already ran
    #[error("run already started")]
    AlreadyStarted,
}

impl LoadError {
    /// Whether this error stems from invalid configuration
    pub fn is_config(&self) -> bool {
        matches!(
            self,
            LoadError::Config(_) | LoadError::ConfigRead { .. } | LoadError::ConfigFile { .. }
        )
    }
}

/// Result type alias
pub type LoadResult<T> = std::result::Result<T, LoadError>;
