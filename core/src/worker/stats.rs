//! Per-virtual-user statistics

use std::time::Duration;

use tokio::time::Instant;

/// Statistics kept locally by one virtual user and returned when it exits
#[derive(Debug, Default, Clone)]
pub struct VirtualUserStats {
    /// Virtual user identifier
    pub id: usize,

    /// Iterations whose outcome was a success
    pub succeeded: usize,

    /// Iterations whose outcome was a failure
    pub failed: usize,

    /// When the virtual user started
    pub started_at: Option<Instant>,

    /// When the virtual user exited
    pub ended_at: Option<Instant>,
}

impl VirtualUserStats {
    /// Create empty stats for virtual user `id`
    pub fn new(id: usize) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// Mark the start
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    /// Mark the end
    pub fn stop(&mut self) {
        self.ended_at = Some(Instant::now());
    }

    /// Count one iteration
    pub fn record(&mut self, success: bool) {
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    /// Total iterations
    pub fn iterations(&self) -> usize {
        self.succeeded + self.failed
    }

    /// Time alive, up to now if still running
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_at.map(|start| {
            self.ended_at
                .map(|end| end.duration_since(start))
                .unwrap_or_else(|| start.elapsed())
        })
    }
}
