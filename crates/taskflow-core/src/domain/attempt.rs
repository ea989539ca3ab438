//! Attempt records for the persist loop.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// A single persist attempt.
///
/// Records what happened and how long the loop waited afterwards, so the
/// caller can explain (and tests can assert) the retry trace.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// 1-based attempt index.
    pub attempt_number: u32,

    pub succeeded: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Delay slept after this attempt. `None` for the successful or final attempt.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backoff: Option<Duration>,
}

impl AttemptRecord {
    pub fn success(attempt_number: u32) -> Self {
        Self {
            attempt_number,
            succeeded: true,
            error: None,
            backoff: None,
        }
    }

    pub fn failure(attempt_number: u32, error: impl Into<String>) -> Self {
        Self {
            attempt_number,
            succeeded: false,
            error: Some(error.into()),
            backoff: None,
        }
    }

    pub fn with_backoff(mut self, delay: Duration) -> Self {
        self.backoff = Some(delay);
        self
    }
}
