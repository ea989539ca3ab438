//! Ingestion endpoint: validate → resolve config → persist → outcome.
//!
//! Transport-agnostic; `crate::http` maps the outcome onto HTTP.

use std::sync::Arc;

use tracing::{Instrument, error, info, info_span, warn};
use ulid::Ulid;

use super::persist::{PersistOutcome, persist};
use crate::config::{ConnectionDescriptor, IngestConfig};
use crate::domain::{ConfigError, StoreError, StoredTask, TaskRequest, ValidationError};
use crate::ports::TaskStore;

/// Longest error text returned to callers.
pub const MAX_ERROR_LEN: usize = 200;

/// Response class of one submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResultCode {
    Ok,
    BadRequest,
    InternalError,
    ServiceUnavailable,
}

/// What happened to one submission.
#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Stored { row: StoredTask, attempts: u32 },
    ValidationFailed(ValidationError),
    ConfigInvalid(ConfigError),
    StoreUnavailable { attempts: u32, last_error: String },
}

impl IngestOutcome {
    pub fn code(&self) -> ResultCode {
        match self {
            IngestOutcome::Stored { .. } => ResultCode::Ok,
            IngestOutcome::ValidationFailed(_) => ResultCode::BadRequest,
            IngestOutcome::ConfigInvalid(_) => ResultCode::InternalError,
            IngestOutcome::StoreUnavailable { .. } => ResultCode::ServiceUnavailable,
        }
    }

    /// Response body text.
    pub fn message(&self) -> String {
        match self {
            IngestOutcome::Stored { row, .. } => format!("Task added: {}", row.payload),
            IngestOutcome::ValidationFailed(err) => err.to_string(),
            // details stay in the server log
            IngestOutcome::ConfigInvalid(_) => "Invalid connection string format".to_string(),
            IngestOutcome::StoreUnavailable {
                attempts,
                last_error,
            } => format!("Database connection failed after {attempts} attempts: {last_error}"),
        }
    }
}

/// Accepts task submissions and writes them through to the store.
///
/// Holds only immutable shared state, so one instance serves any number of
/// concurrent calls.
#[derive(Clone)]
pub struct IngestEndpoint {
    config: Arc<IngestConfig>,
    store: Arc<dyn TaskStore>,
}

impl IngestEndpoint {
    pub fn new(config: Arc<IngestConfig>, store: Arc<dyn TaskStore>) -> Self {
        Self { config, store }
    }

    /// Handle one raw request body.
    pub async fn submit(&self, body: &[u8]) -> IngestOutcome {
        let span = info_span!(
            "submit",
            submission_id = %Ulid::new(),
            backend = self.store.backend_name()
        );
        self.submit_inner(body).instrument(span).await
    }

    async fn submit_inner(&self, body: &[u8]) -> IngestOutcome {
        info!("task submission received");

        let request = match TaskRequest::from_json_body(body) {
            Ok(request) => request,
            Err(err) => {
                warn!(error = %err, "rejected submission");
                return IngestOutcome::ValidationFailed(err);
            }
        };

        let descriptor = match self.config.descriptor() {
            Ok(descriptor) => descriptor,
            Err(err) => {
                error!(error = %err, "connection string is unusable");
                return IngestOutcome::ConfigInvalid(err);
            }
        };

        let outcome = persist(
            self.store.as_ref(),
            &descriptor,
            request.payload(),
            &self.config.retry,
            self.config.timeouts,
        )
        .await;

        match outcome {
            PersistOutcome::Committed { row, attempts } => IngestOutcome::Stored {
                row,
                attempts: attempts.len() as u32,
            },
            PersistOutcome::Exhausted {
                last_error,
                attempts,
            } => IngestOutcome::StoreUnavailable {
                attempts: attempts.len() as u32,
                last_error: sanitize_error(&descriptor, &last_error),
            },
        }
    }
}

/// Redact credentials and cap the length of an error shown to callers.
pub fn sanitize_error(descriptor: &ConnectionDescriptor, err: &StoreError) -> String {
    let text = descriptor.redact(&err.to_string());
    if text.chars().count() <= MAX_ERROR_LEN {
        return text;
    }
    let mut truncated: String = text.chars().take(MAX_ERROR_LEN).collect();
    truncated.push_str("...");
    truncated
}
