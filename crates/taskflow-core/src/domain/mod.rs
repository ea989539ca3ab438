//! Domain model (requests, rows, attempts, errors).

pub mod attempt;
pub mod errors;
pub mod task;

pub use attempt::AttemptRecord;
pub use errors::{ConfigError, StoreError, StorePhase, ValidationError};
pub use task::{StoredTask, TaskId, TaskRequest};
