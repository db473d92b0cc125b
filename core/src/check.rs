//! Named response checks
//!
//! A check is a named predicate over a [`ResponseView`]. Checks come either
//! from configuration ([`CheckSpec`]) or from code via [`Check::new`].

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Name of the synthetic check recorded when no response was received
pub const TRANSPORT_ERROR_CHECK: &str = "transport_error";

/// What a check gets to look at
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResponseView {
    /// HTTP status code
    pub status: u16,
    /// Time from sending the request to reading the full body
    pub duration: Duration,
}

type Predicate = dyn Fn(&ResponseView) -> bool + Send + Sync;

/// A named predicate evaluated against every response
#[derive(Clone)]
pub struct Check {
    name: String,
    predicate: Arc<Predicate>,
}

impl Check {
    /// Create a check from an arbitrary predicate
    pub fn new<F>(name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&ResponseView) -> bool + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
        }
    }

    /// Passes when the status code equals `status`
    pub fn status_equals(name: impl Into<String>, status: u16) -> Self {
        Self::new(name, move |r| r.status == status)
    }

    /// Passes when the status code lies within `min..=max`
    pub fn status_in_range(name: impl Into<String>, min: u16, max: u16) -> Self {
        Self::new(name, move |r| (min..=max).contains(&r.status))
    }

    /// Passes when the response took strictly less than `max`
    pub fn duration_below(name: impl Into<String>, max: Duration) -> Self {
        Self::new(name, move |r| r.duration < max)
    }

    /// Check name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Evaluate the predicate
    pub fn passes(&self, response: &ResponseView) -> bool {
        (self.predicate)(response)
    }
}

impl fmt::Debug for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Check").field("name", &self.name).finish()
    }
}

/// Result of running every check against one response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckResults {
    /// Names of checks that passed, in evaluation order
    pub passed: Vec<String>,
    /// Names of checks that failed, in evaluation order
    pub failed: Vec<String>,
}

/// Run all checks in order; a failing check never skips the ones after it
pub fn evaluate_checks(checks: &[Check], response: &ResponseView) -> CheckResults {
    let mut results = CheckResults::default();
    for check in checks {
        if check.passes(response) {
            results.passed.push(check.name().to_string());
        } else {
            results.failed.push(check.name().to_string());
        }
    }
    results
}

/// Rule half of a configured check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "rule", rename_all = "snake_case")]
pub enum CheckRule {
    /// `status == status`
    StatusEquals {
        /// Expected status code
        status: u16,
    },
    /// `min <= status <= max`
    StatusInRange {
        /// Lowest accepted status
        min: u16,
        /// Highest accepted status
        max: u16,
    },
    /// `duration < max`
    DurationBelow {
        /// Exclusive latency ceiling
        #[serde(with = "humantime_serde")]
        max: Duration,
    },
}

/// A check as written in a config file
///
/// ```json
/// { "name": "is status 200", "rule": "status_equals", "status": 200 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckSpec {
    /// Name reported in metrics
    pub name: String,
    /// Predicate definition
    #[serde(flatten)]
    pub rule: CheckRule,
}

impl CheckSpec {
    /// The default checks: `is status 200` and `response time < 200ms`
    pub fn default_set() -> Vec<CheckSpec> {
        vec![
            CheckSpec {
                name: "is status 200".to_string(),
                rule: CheckRule::StatusEquals { status: 200 },
            },
            CheckSpec {
                name: "response time < 200ms".to_string(),
                rule: CheckRule::DurationBelow {
                    max: Duration::from_millis(200),
                },
            },
        ]
    }

    /// Validate the definition
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: &str| ConfigError::InvalidCheck {
            name: self.name.clone(),
            reason: reason.to_string(),
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty"));
        }
        if self.name == TRANSPORT_ERROR_CHECK {
            return Err(invalid("name is reserved for transport failures"));
        }
        match self.rule {
            CheckRule::StatusInRange { min, max } if min > max => {
                Err(invalid("range minimum exceeds maximum"))
            }
            CheckRule::DurationBelow { max } if max.is_zero() => {
                Err(invalid("duration ceiling must be positive"))
            }
            _ => Ok(()),
        }
    }

    /// Turn the definition into an executable check
    pub fn build(&self) -> Check {
        match self.rule {
            CheckRule::StatusEquals { status } => Check::status_equals(&self.name, status),
            CheckRule::StatusInRange { min, max } => {
                Check::status_in_range(&self.name, min, max)
            }
            CheckRule::DurationBelow { max } => Check::duration_below(&self.name, max),
        }
    }
}

/// Validate a set of check definitions, including name uniqueness
pub fn validate_check_specs(specs: &[CheckSpec]) -> Result<(), ConfigError> {
    for (index, spec) in specs.iter().enumerate() {
        spec.validate()?;
        if specs[..index].iter().any(|other| other.name == spec.name) {
            return Err(ConfigError::InvalidCheck {
                name: spec.name.clone(),
                reason: "duplicate check name".to_string(),
            });
        }
    }
    Ok(())
}
