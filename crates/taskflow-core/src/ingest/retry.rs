//! Retry policy: attempt ceiling and backoff delays.

use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(500);

/// Retry policy for persisting one submission.
///
/// Backoff is linear in the attempt index and uncapped; the attempt ceiling
/// is the only bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,

    /// Delay after the first failed attempt.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after attempt `attempt` (1-indexed) failed.
    ///
    /// delay = base_delay * attempt
    ///
    /// With the defaults:
    /// - attempt 1: 0.5s
    /// - attempt 2: 1.0s
    pub fn next_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt.max(1))
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn has_attempts_after(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
