//! Global request rate limiting

use std::time::Duration;

use governor::{clock::DefaultClock, state::InMemoryState, state::NotKeyed, Quota, RateLimiter};

/// Token bucket shared by every virtual user of a run
///
/// Wrap in `Arc` and hand one clone to each virtual user; the cap applies to
/// the sum of their requests. Fractional rates (e.g. 0.5 rps) are honoured
/// by spacing permits one period apart.
pub struct GlobalRateLimiter {
    limiter: Option<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
    rps: Option<f64>,
}

impl GlobalRateLimiter {
    /// Create a limiter; `None` or a non-positive rate disables limiting
    ///
    /// ```
    /// use loadramp_core::worker::GlobalRateLimiter;
    ///
    /// let limited = GlobalRateLimiter::new(Some(50.0));
    /// assert!(limited.is_enabled());
    ///
    /// let unlimited = GlobalRateLimiter::new(None);
    /// assert!(!unlimited.is_enabled());
    /// ```
    pub fn new(rps: Option<f64>) -> Self {
        let limiter = rps
            .filter(|rps| rps.is_finite() && *rps > 0.0)
            .and_then(|rps| Duration::try_from_secs_f64(1.0 / rps).ok())
            .and_then(Quota::with_period)
            .map(RateLimiter::direct);

        Self {
            rps: limiter.as_ref().and(rps),
            limiter,
        }
    }

    /// A limiter that never waits
    pub fn unlimited() -> Self {
        Self::new(None)
    }

    /// Wait until the next request may be sent
    pub async fn acquire(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().await;
        }
    }

    /// Take a permit if one is available right now
    pub fn try_acquire(&self) -> bool {
        match &self.limiter {
            Some(limiter) => limiter.check().is_ok(),
            None => true,
        }
    }

    /// Whether a cap is in force
    pub fn is_enabled(&self) -> bool {
        self.limiter.is_some()
    }

    /// Configured cap in requests per second
    pub fn rps(&self) -> Option<f64> {
        self.rps
    }
}

impl Default for GlobalRateLimiter {
    fn default() -> Self {
        Self::unlimited()
    }
}

impl std::fmt::Debug for GlobalRateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GlobalRateLimiter")
            .field("rps", &self.rps)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
