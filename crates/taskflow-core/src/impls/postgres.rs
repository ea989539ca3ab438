//! Postgres-backed task store and change feed.
//!
//! # Ingestion path
//! No pool: every attempt opens its own connection, runs one parameterized
//! `INSERT ... RETURNING` inside a transaction, commits, and closes. A
//! transaction that never reaches commit is rolled back by the server when
//! the connection goes away, so failed attempts leave no row.
//!
//! # Change feed
//! The schema installs an `AFTER INSERT` trigger that announces each committed
//! row on the `task_changes` channel as a one-element JSON array of
//! `{Id, Processed}`. NOTIFY payloads are capped at 8000 bytes, so the task
//! text is never sent; [`PostgresChangeFeed`] loads it by id before logging.
//!
//! # Security notes
//! - The descriptor carries a password; never log it or the connect options.
//! - Payloads are always bound as parameters, never formatted into SQL.

use std::collections::HashMap;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgListener, PgPool, PgPoolOptions};
use sqlx::{Connection, FromRow};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::change_feed::{BatchReport, ChangeRecord, handle_records, parse_batch};
use crate::config::{ConnectTimeouts, ConnectionDescriptor};
use crate::domain::{StoreError, StorePhase, StoredTask, TaskId};
use crate::ports::TaskStore;

/// NOTIFY channel written by the insert trigger.
pub const CHANGE_CHANNEL: &str = "task_changes";

const INSERT_TASK: &str =
    "INSERT INTO tasks (payload) VALUES ($1) RETURNING id, payload, processed";

const SELECT_TASKS: &str = "SELECT id, payload, processed FROM tasks WHERE id = ANY($1)";

/// Pause before listening again after a receive error.
const RECEIVE_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Row shape of the `tasks` table.
#[derive(Debug, Clone, FromRow)]
struct DbTask {
    id: i64,
    payload: String,
    processed: bool,
}

impl From<DbTask> for StoredTask {
    fn from(row: DbTask) -> Self {
        StoredTask {
            id: TaskId::new(row.id),
            payload: row.payload,
            processed: row.processed,
        }
    }
}

/// Build connect options from a parsed descriptor.
pub fn connect_options(descriptor: &ConnectionDescriptor) -> PgConnectOptions {
    PgConnectOptions::new()
        .host(&descriptor.host)
        .port(descriptor.port)
        .database(&descriptor.database)
        .username(&descriptor.user)
        .password(&descriptor.password)
        .application_name("taskflow")
}

/// Open one connection, bounded by `login`.
async fn open_connection(
    descriptor: &ConnectionDescriptor,
    login: Duration,
) -> Result<PgConnection, StoreError> {
    let options = connect_options(descriptor);
    match timeout(login, PgConnection::connect_with(&options)).await {
        Ok(Ok(conn)) => Ok(conn),
        Ok(Err(err)) => Err(StoreError::failed(StorePhase::Connect, err.to_string())),
        Err(_) => Err(StoreError::timed_out(StorePhase::Connect, login)),
    }
}

/// Stateless per-attempt Postgres adapter.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresTaskStore;

impl PostgresTaskStore {
    pub fn new() -> Self {
        Self
    }

    async fn insert_and_commit(
        conn: &mut PgConnection,
        payload: &str,
    ) -> Result<StoredTask, StoreError> {
        let mut tx = conn
            .begin()
            .await
            .map_err(|err| StoreError::failed(StorePhase::Execute, err.to_string()))?;

        let row: DbTask = sqlx::query_as(INSERT_TASK)
            .bind(payload)
            .fetch_one(&mut *tx)
            .await
            .map_err(|err| StoreError::failed(StorePhase::Execute, err.to_string()))?;

        tx.commit()
            .await
            .map_err(|err| StoreError::failed(StorePhase::Commit, err.to_string()))?;

        Ok(row.into())
    }
}

#[async_trait]
impl TaskStore for PostgresTaskStore {
    async fn insert_task(
        &self,
        descriptor: &ConnectionDescriptor,
        timeouts: ConnectTimeouts,
        payload: &str,
    ) -> Result<StoredTask, StoreError> {
        let mut conn = open_connection(descriptor, timeouts.login).await?;

        let result = match timeout(timeouts.query, Self::insert_and_commit(&mut conn, payload)).await
        {
            Ok(result) => result,
            Err(_) => Err(StoreError::timed_out(StorePhase::Execute, timeouts.query)),
        };

        // Release on every path. If close itself stalls the connection is
        // dropped, which closes the socket.
        match timeout(timeouts.login, conn.close()).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => warn!(error = %err, "connection did not close cleanly"),
            Err(_) => warn!("connection close timed out"),
        }

        result
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}

/// Apply the schema (table + change trigger).
pub async fn run_migrations(
    descriptor: &ConnectionDescriptor,
    timeouts: ConnectTimeouts,
) -> Result<(), sqlx::migrate::MigrateError> {
    let mut conn = match timeout(
        timeouts.login,
        PgConnection::connect_with(&connect_options(descriptor)),
    )
    .await
    {
        Ok(conn) => conn?,
        Err(_) => {
            let err = std::io::Error::new(std::io::ErrorKind::TimedOut, "connect timed out");
            return Err(sqlx::Error::from(err).into());
        }
    };
    sqlx::migrate!("./migrations").run(&mut conn).await?;
    conn.close().await?;
    Ok(())
}

/// LISTEN/NOTIFY driven change consumer.
///
/// Holds two connections: one parked in LISTEN, one for loading rows.
pub struct PostgresChangeFeed {
    pool: PgPool,
    listener: PgListener,
}

impl PostgresChangeFeed {
    pub async fn connect(
        descriptor: &ConnectionDescriptor,
        timeouts: ConnectTimeouts,
    ) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .acquire_timeout(timeouts.login)
            .connect_with(connect_options(descriptor))
            .await
            .map_err(|err| StoreError::failed(StorePhase::Connect, err.to_string()))?;

        let mut listener = PgListener::connect_with(&pool)
            .await
            .map_err(|err| StoreError::failed(StorePhase::Connect, err.to_string()))?;
        listener
            .listen(CHANGE_CHANNEL)
            .await
            .map_err(|err| StoreError::failed(StorePhase::Execute, err.to_string()))?;

        info!(channel = CHANGE_CHANNEL, "listening for task changes");
        Ok(Self { pool, listener })
    }

    /// Wait for the next notification and return its records with payloads
    /// filled in. `Ok(None)` for a batch that could not be parsed.
    pub async fn recv_batch(&mut self) -> Result<Option<Vec<ChangeRecord>>, sqlx::Error> {
        let notification = self.listener.recv().await?;
        let Some(records) = parse_batch(notification.payload()) else {
            return Ok(None);
        };
        Ok(Some(self.load_rows(records).await))
    }

    /// Replace announced keys with the current row contents. Records whose
    /// row cannot be read are passed through as announced.
    async fn load_rows(&self, records: Vec<ChangeRecord>) -> Vec<ChangeRecord> {
        let ids: Vec<i64> = records.iter().filter_map(|r| r.id).collect();
        if ids.is_empty() {
            return records;
        }

        let rows: Vec<DbTask> = match sqlx::query_as(SELECT_TASKS)
            .bind(ids)
            .fetch_all(&self.pool)
            .await
        {
            Ok(rows) => rows,
            Err(err) => {
                warn!(error = %err, "failed to load changed rows");
                return records;
            }
        };
        let mut by_id: HashMap<i64, DbTask> = rows.into_iter().map(|row| (row.id, row)).collect();

        records
            .into_iter()
            .map(|record| match record.id.and_then(|id| by_id.remove(&id)) {
                Some(row) => ChangeRecord {
                    id: Some(row.id),
                    payload: Some(row.payload),
                    processed: Some(row.processed),
                },
                None => record,
            })
            .collect()
    }

    /// Consume notifications until `shutdown` resolves. Returns the number of
    /// batches that contained records.
    pub async fn run_until<F>(mut self, shutdown: F) -> u64
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let mut batches = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                next = self.recv_batch() => match next {
                    Ok(Some(records)) => {
                        if let BatchReport::Records(_) = handle_records(&records) {
                            batches += 1;
                        }
                    }
                    Ok(None) => {}
                    Err(err) => {
                        // PgListener reconnects on the next recv.
                        warn!(error = %err, "change feed receive failed");
                        tokio::time::sleep(RECEIVE_RETRY_DELAY).await;
                    }
                },
            }
        }

        self.pool.close().await;
        info!(batches, "change feed stopped");
        batches
    }
}
