use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::ValidationError;

/// Validated submission: the free-form text the caller wants stored.
///
/// Exists only for the duration of one `submit` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    payload: String,
}

impl TaskRequest {
    /// Parse a raw request body of the form `{"task": "..."}`.
    ///
    /// A body that is valid JSON but not an object, or whose `task` is not a
    /// string, is treated the same as a missing `task`.
    pub fn from_json_body(body: &[u8]) -> Result<Self, ValidationError> {
        let value: serde_json::Value =
            serde_json::from_slice(body).map_err(|_| ValidationError::InvalidJson)?;

        let payload = value
            .get("task")
            .and_then(serde_json::Value::as_str)
            .filter(|task| !task.is_empty())
            .ok_or(ValidationError::MissingTask)?;

        Ok(Self {
            payload: payload.to_string(),
        })
    }

    pub fn payload(&self) -> &str {
        &self.payload
    }

    pub fn into_payload(self) -> String {
        self.payload
    }
}

/// Store-assigned row identifier (monotonic, unique).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(i64);

impl TaskId {
    pub fn new(value: i64) -> Self {
        Self(value)
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// A committed row of the task table.
///
/// `processed` is owned by downstream consumers; ingestion always writes `false`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTask {
    pub id: TaskId,
    pub payload: String,
    pub processed: bool,
}
