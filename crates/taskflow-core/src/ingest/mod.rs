//! Ingest module: endpoint, retrying persist, and retry policy.

pub mod endpoint;
pub mod persist;
mod retry;

pub use endpoint::{IngestEndpoint, IngestOutcome, ResultCode};
pub use persist::{PersistOutcome, persist};
pub use retry::{DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, RetryPolicy};
