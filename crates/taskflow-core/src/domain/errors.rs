//! Errors - 失敗の分類
//!
//! 分類は型で表す：
//! - ValidationError: 呼び出し側の入力ミス（リトライしない）
//! - ConfigError: 運用側の設定ミス（リトライしない、呼び出しは失敗）
//! - StoreError: ストアの一時的な障害（`ingest::persist` が上限までリトライ）

use std::time::Duration;

use thiserror::Error;

/// Rejected request body. Display strings are the HTTP response bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Invalid JSON")]
    InvalidJson,

    #[error("Missing 'task'")]
    MissingTask,
}

/// Connection or service settings that cannot be used.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("connection string is not configured")]
    MissingConnectionString,

    #[error("connection string is missing `{0}`")]
    MissingField(&'static str),

    #[error("connection string has an invalid port: {0}")]
    InvalidPort(String),

    #[error("invalid value for {key}: {value}")]
    InvalidSetting { key: &'static str, value: String },
}

/// Which step of a persist attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorePhase {
    Connect,
    Execute,
    Commit,
}

impl std::fmt::Display for StorePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StorePhase::Connect => "connect",
            StorePhase::Execute => "execute",
            StorePhase::Commit => "commit",
        };
        f.write_str(s)
    }
}

/// A failed persist attempt. Always treated as transient by the retry loop.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("{phase} failed: {message}")]
    Failed { phase: StorePhase, message: String },

    #[error("{phase} timed out after {after:?}")]
    TimedOut { phase: StorePhase, after: Duration },
}

impl StoreError {
    pub fn failed(phase: StorePhase, message: impl Into<String>) -> Self {
        StoreError::Failed {
            phase,
            message: message.into(),
        }
    }

    pub fn timed_out(phase: StorePhase, after: Duration) -> Self {
        StoreError::TimedOut { phase, after }
    }

    pub fn phase(&self) -> StorePhase {
        match self {
            StoreError::Failed { phase, .. } | StoreError::TimedOut { phase, .. } => *phase,
        }
    }
}
