//! Retrying persist: up to `max_attempts` tries with linear backoff.

use tracing::{error, info, warn};

use super::RetryPolicy;
use crate::config::{ConnectTimeouts, ConnectionDescriptor};
use crate::domain::{AttemptRecord, StoreError, StoredTask};
use crate::ports::TaskStore;

/// Result of the retry loop. The last attempt decides.
#[derive(Debug, Clone, PartialEq)]
pub enum PersistOutcome {
    Committed {
        row: StoredTask,
        attempts: Vec<AttemptRecord>,
    },
    Exhausted {
        last_error: StoreError,
        attempts: Vec<AttemptRecord>,
    },
}

impl PersistOutcome {
    pub fn attempts(&self) -> &[AttemptRecord] {
        match self {
            PersistOutcome::Committed { attempts, .. }
            | PersistOutcome::Exhausted { attempts, .. } => attempts,
        }
    }
}

/// Persist `payload`, retrying transient store failures.
///
/// The backoff sleep suspends only the calling task. Every attempt gets a
/// fresh connection from `store`; nothing is shared between attempts.
pub async fn persist(
    store: &dyn TaskStore,
    descriptor: &ConnectionDescriptor,
    payload: &str,
    policy: &RetryPolicy,
    timeouts: ConnectTimeouts,
) -> PersistOutcome {
    let mut attempts = Vec::with_capacity(policy.max_attempts as usize);
    let mut attempt = 1;

    loop {
        match store.insert_task(descriptor, timeouts, payload).await {
            Ok(row) => {
                info!(attempt, task_id = %row.id, "task inserted");
                attempts.push(AttemptRecord::success(attempt));
                return PersistOutcome::Committed { row, attempts };
            }
            Err(err) => {
                let message = descriptor.redact(&err.to_string());
                warn!(attempt, error = %message, "persist attempt failed");

                if !policy.has_attempts_after(attempt) {
                    error!(attempts = attempt, "all persist attempts failed");
                    attempts.push(AttemptRecord::failure(attempt, message));
                    return PersistOutcome::Exhausted {
                        last_error: err,
                        attempts,
                    };
                }

                let delay = policy.next_delay(attempt);
                attempts.push(AttemptRecord::failure(attempt, message).with_backoff(delay));
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
        }
    }
}
