//! In-memory task store.
//!
//! Used by tests and by `taskflow serve --store memory`. Faults can be
//! scripted per call to exercise the retry loop without a database.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::config::{ConnectTimeouts, ConnectionDescriptor};
use crate::domain::{StoreError, StorePhase, StoredTask, TaskId};
use crate::ports::TaskStore;

/// A scripted failure for one call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Fail before a connection is opened.
    Connect,
    /// Fail while running the insert.
    Execute,
    /// Fail at commit, after the insert ran.
    Commit,
}

impl Fault {
    fn phase(self) -> StorePhase {
        match self {
            Fault::Connect => StorePhase::Connect,
            Fault::Execute => StorePhase::Execute,
            Fault::Commit => StorePhase::Commit,
        }
    }
}

struct MemoryState {
    /// Committed rows only.
    rows: Vec<StoredTask>,

    next_id: i64,

    /// One entry per call, consumed front to back. Empty means succeed.
    faults: VecDeque<Option<Fault>>,

    calls: u32,
}

pub struct InMemoryTaskStore {
    state: Mutex<MemoryState>,
    open_connections: Arc<AtomicUsize>,
    latency: Option<Duration>,
}

/// Counts as an open connection until dropped.
struct ConnectionGuard {
    open: Arc<AtomicUsize>,
}

impl ConnectionGuard {
    fn acquire(open: &Arc<AtomicUsize>) -> Self {
        open.fetch_add(1, Ordering::SeqCst);
        Self {
            open: Arc::clone(open),
        }
    }
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.open.fetch_sub(1, Ordering::SeqCst);
    }
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState {
                rows: Vec::new(),
                next_id: 1,
                faults: VecDeque::new(),
                calls: 0,
            }),
            open_connections: Arc::new(AtomicUsize::new(0)),
            latency: None,
        }
    }

    /// Script the outcome of the next calls, in order.
    pub fn with_faults(mut self, faults: impl IntoIterator<Item = Option<Fault>>) -> Self {
        self.state.get_mut().faults.extend(faults);
        self
    }

    /// Simulated time spent inside an open connection.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Number of `insert_task` calls so far (i.e. persist attempts).
    pub async fn calls(&self) -> u32 {
        self.state.lock().await.calls
    }

    /// Committed rows, in commit order.
    pub async fn rows(&self) -> Vec<StoredTask> {
        self.state.lock().await.rows.clone()
    }

    pub fn open_connections(&self) -> usize {
        self.open_connections.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn insert_task(
        &self,
        _descriptor: &ConnectionDescriptor,
        timeouts: ConnectTimeouts,
        payload: &str,
    ) -> Result<StoredTask, StoreError> {
        let fault = {
            let mut state = self.state.lock().await;
            state.calls += 1;
            state.faults.pop_front().flatten()
        };

        if fault == Some(Fault::Connect) {
            return Err(StoreError::failed(StorePhase::Connect, "connection refused"));
        }
        let _conn = ConnectionGuard::acquire(&self.open_connections);

        if let Some(latency) = self.latency
            && tokio::time::timeout(timeouts.query, tokio::time::sleep(latency))
                .await
                .is_err()
        {
            return Err(StoreError::timed_out(StorePhase::Execute, timeouts.query));
        }

        // Nothing is visible until the row is pushed below, so an execute or
        // commit fault leaves the table untouched.
        if let Some(fault) = fault {
            return Err(StoreError::failed(fault.phase(), "injected failure"));
        }

        let mut state = self.state.lock().await;
        let row = StoredTask {
            id: TaskId::new(state.next_id),
            payload: payload.to_string(),
            processed: false,
        };
        state.next_id += 1;
        state.rows.push(row.clone());
        Ok(row)
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
