mod load;

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use taskflow_core::config::IngestConfig;
use taskflow_core::http;
use taskflow_core::impls::{InMemoryTaskStore, PostgresChangeFeed, PostgresTaskStore};
use taskflow_core::impls::postgres::run_migrations;
use taskflow_core::ingest::IngestEndpoint;
use taskflow_core::observability::init_tracing;
use taskflow_core::ports::TaskStore;
use tracing::{info, warn};

use crate::load::{CLIENT_RETRY, DEFAULT_URL, LoadClient, REQUEST_TIMEOUT, Scenario};

#[derive(Debug, Parser)]
#[command(name = "taskflow", about = "Task ingestion service and tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the HTTP ingestion endpoint.
    Serve {
        /// Overrides TASKFLOW_BIND.
        #[arg(long)]
        bind: Option<SocketAddr>,

        #[arg(long, value_enum, default_value_t = StoreBackend::Postgres)]
        store: StoreBackend,

        /// Apply the schema before serving.
        #[arg(long)]
        migrate: bool,
    },

    /// Log rows as they are committed to the task table.
    Consume,

    /// Apply the schema (table + change trigger) and exit.
    Migrate,

    /// Drive load against a running endpoint and save the results.
    Load {
        #[arg(long, default_value = DEFAULT_URL)]
        url: String,

        #[arg(long, value_enum, default_value_t = Scenario::Suite)]
        scenario: Scenario,

        #[arg(long, default_value = "test_results")]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreBackend {
    Postgres,
    Memory,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve {
            bind,
            store,
            migrate,
        } => serve(bind, store, migrate).await,
        Command::Consume => consume().await,
        Command::Migrate => migrate().await,
        Command::Load {
            url,
            scenario,
            out,
        } => {
            let client = LoadClient::new(url, REQUEST_TIMEOUT, CLIENT_RETRY)?;
            load::run_scenario(&client, scenario, &out).await?;
            Ok(())
        }
    }
}

async fn serve(bind: Option<SocketAddr>, backend: StoreBackend, migrate_first: bool) -> anyhow::Result<()> {
    let mut config = IngestConfig::from_env().context("load ingestion config")?;
    if let Some(bind) = bind {
        config.bind_addr = bind;
    }

    // A bad connection string does not stop the service; each submission
    // answers 500 until it is fixed.
    if let Err(err) = config.descriptor() {
        warn!(error = %err, "connection string unusable; submissions will fail");
    }

    if migrate_first {
        let descriptor = config.descriptor().context("resolve connection for migrations")?;
        run_migrations(&descriptor, config.timeouts)
            .await
            .context("apply schema")?;
    }

    let store: Arc<dyn TaskStore> = match backend {
        StoreBackend::Postgres => Arc::new(PostgresTaskStore::new()),
        StoreBackend::Memory => Arc::new(InMemoryTaskStore::new()),
    };
    info!(
        backend = store.backend_name(),
        max_attempts = config.retry.max_attempts,
        "starting ingestion service"
    );

    let addr = config.bind_addr;
    let endpoint = IngestEndpoint::new(Arc::new(config), store);
    http::serve(endpoint, addr, shutdown_signal())
        .await
        .context("serve http")?;
    info!("ingestion service stopped");
    Ok(())
}

async fn consume() -> anyhow::Result<()> {
    let config = IngestConfig::from_env().context("load consumer config")?;
    let descriptor = config.descriptor().context("resolve connection")?;
    let feed = PostgresChangeFeed::connect(&descriptor, config.timeouts)
        .await
        .context("connect change feed")?;
    feed.run_until(shutdown_signal()).await;
    Ok(())
}

async fn migrate() -> anyhow::Result<()> {
    let config = IngestConfig::from_env().context("load config")?;
    let descriptor = config.descriptor().context("resolve connection")?;
    run_migrations(&descriptor, config.timeouts)
        .await
        .context("apply schema")?;
    info!("schema applied");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_flags() {
        let cli = Cli::try_parse_from([
            "taskflow",
            "serve",
            "--bind",
            "127.0.0.1:8080",
            "--store",
            "memory",
        ])
        .unwrap();
        match cli.command {
            Command::Serve {
                bind,
                store,
                migrate,
            } => {
                assert_eq!(bind, Some("127.0.0.1:8080".parse().unwrap()));
                assert_eq!(store, StoreBackend::Memory);
                assert!(!migrate);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn load_defaults() {
        let cli = Cli::try_parse_from(["taskflow", "load"]).unwrap();
        match cli.command {
            Command::Load {
                url,
                scenario,
                out,
            } => {
                assert_eq!(url, DEFAULT_URL);
                assert_eq!(scenario, Scenario::Suite);
                assert_eq!(out, PathBuf::from("test_results"));
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn rejects_unknown_store() {
        assert!(Cli::try_parse_from(["taskflow", "serve", "--store", "redis"]).is_err());
    }
}
