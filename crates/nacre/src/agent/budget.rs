//! Attempt and wall-clock budget for one request.

use std::time::Duration;

use tokio::time::Instant;

/// Remaining attempts and time for one request.
///
/// Only the controller mutates the budget, between attempts. The deadline is
/// fixed at creation and never extended.
#[derive(Debug, Clone)]
pub struct ExecutionBudget {
    attempts_remaining: u32,
    deadline: Instant,
    step_timeout: Duration,
}

impl ExecutionBudget {
    /// Start a budget now.
    pub fn new(max_attempts: u32, total_timeout: Duration, step_timeout: Duration) -> Self {
        Self {
            attempts_remaining: max_attempts,
            deadline: Instant::now() + total_timeout,
            step_timeout,
        }
    }

    /// Attempts not yet started.
    pub fn attempts_remaining(&self) -> u32 {
        self.attempts_remaining
    }

    /// Time left before the deadline.
    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    /// Whether the deadline has passed.
    pub fn is_expired(&self) -> bool {
        self.remaining().is_zero()
    }

    /// Timeout for the next sandbox run: `min(step_timeout, remaining)`.
    pub fn next_timeout(&self) -> Duration {
        self.step_timeout.min(self.remaining())
    }

    /// Claim an attempt. Returns false when none are left.
    pub fn start_attempt(&mut self) -> bool {
        if self.attempts_remaining == 0 {
            return false;
        }
        self.attempts_remaining -= 1;
        true
    }
}
