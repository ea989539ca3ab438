//! Service configuration.
//!
//! Everything here is built once at startup and handed to the endpoint by
//! reference. The hot path never reads the process environment.

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::domain::ConfigError;
use crate::ingest::RetryPolicy;

pub const CONNECTION_STRING_ENV: &str = "SqlConnectionString";
pub const BIND_ENV: &str = "TASKFLOW_BIND";
pub const MAX_ATTEMPTS_ENV: &str = "TASKFLOW_MAX_ATTEMPTS";
pub const BASE_DELAY_MS_ENV: &str = "TASKFLOW_BASE_DELAY_MS";
pub const LOGIN_TIMEOUT_ENV: &str = "TASKFLOW_LOGIN_TIMEOUT_SECS";
pub const QUERY_TIMEOUT_ENV: &str = "TASKFLOW_QUERY_TIMEOUT_SECS";

pub const DEFAULT_BIND: SocketAddr = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 7071);
pub const DEFAULT_LOGIN_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Where and as whom to connect. Parsed from a connection string of the form
/// `Server=tcp:<host>,<port>;Initial Catalog=<db>;User ID=<user>;Password=<pwd>;...`
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionDescriptor {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub user: String,
    pub password: String,
}

impl ConnectionDescriptor {
    /// Keys are matched case-insensitively; unknown keys are ignored. Values
    /// are trimmed except `Password`, which is used exactly as written.
    pub fn parse(conn_str: &str) -> Result<Self, ConfigError> {
        let mut server = None;
        let mut database = None;
        let mut user = None;
        let mut password = None;

        for part in conn_str.split(';') {
            let Some((key, value)) = part.split_once('=') else {
                continue;
            };
            if value.is_empty() {
                continue;
            }
            let key = key.trim().to_ascii_lowercase();
            // passwords are taken verbatim, surrounding spaces included
            if key == "password" {
                password = Some(value);
                continue;
            }
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            match key.as_str() {
                "server" => server = Some(value),
                "initial catalog" => database = Some(value),
                "user id" => user = Some(value),
                _ => {}
            }
        }

        let server = server.ok_or(ConfigError::MissingField("Server"))?;
        let database = database.ok_or(ConfigError::MissingField("Initial Catalog"))?;
        let user = user.ok_or(ConfigError::MissingField("User ID"))?;
        let password = password.ok_or(ConfigError::MissingField("Password"))?;

        let server = server.strip_prefix("tcp:").unwrap_or(server);
        let (host, port) = server
            .split_once(',')
            .ok_or_else(|| ConfigError::InvalidPort(server.to_string()))?;
        let host = host.trim();
        if host.is_empty() {
            return Err(ConfigError::MissingField("Server"));
        }
        let port = port
            .trim()
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort(port.to_string()))?;

        Ok(Self {
            host: host.to_string(),
            port,
            database: database.to_string(),
            user: user.to_string(),
            password: password.to_string(),
        })
    }

    /// Replace every occurrence of the password in `text`.
    pub fn redact(&self, text: &str) -> String {
        if self.password.is_empty() {
            return text.to_string();
        }
        text.replace(&self.password, "***")
    }
}

impl fmt::Debug for ConnectionDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionDescriptor")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"***")
            .finish()
    }
}

/// Per-attempt connection bounds.
///
/// `login` covers establishing the session (network + authentication);
/// `query` covers the insert and its commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectTimeouts {
    pub login: Duration,
    pub query: Duration,
}

impl Default for ConnectTimeouts {
    fn default() -> Self {
        Self {
            login: DEFAULT_LOGIN_TIMEOUT,
            query: DEFAULT_QUERY_TIMEOUT,
        }
    }
}

/// Ingestion service settings.
#[derive(Debug, Clone)]
pub struct IngestConfig {
    /// Raw connection string. Parsed on each call so a bad value surfaces as
    /// a per-request configuration error instead of a crash.
    pub connection_string: Option<String>,
    pub bind_addr: SocketAddr,
    pub retry: RetryPolicy,
    pub timeouts: ConnectTimeouts,
}

impl IngestConfig {
    pub fn new(connection_string: impl Into<String>) -> Self {
        Self {
            connection_string: Some(connection_string.into()),
            bind_addr: DEFAULT_BIND,
            retry: RetryPolicy::default(),
            timeouts: ConnectTimeouts::default(),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = match lookup(BIND_ENV) {
            Some(value) => value.parse().map_err(|_| ConfigError::InvalidSetting {
                key: BIND_ENV,
                value,
            })?,
            None => DEFAULT_BIND,
        };

        let mut retry = RetryPolicy::default();
        if let Some(value) = lookup(MAX_ATTEMPTS_ENV) {
            retry.max_attempts = parse_setting(MAX_ATTEMPTS_ENV, value)?;
            if retry.max_attempts == 0 {
                return Err(ConfigError::InvalidSetting {
                    key: MAX_ATTEMPTS_ENV,
                    value: "0".to_string(),
                });
            }
        }
        if let Some(value) = lookup(BASE_DELAY_MS_ENV) {
            retry.base_delay = Duration::from_millis(parse_setting(BASE_DELAY_MS_ENV, value)?);
        }

        let mut timeouts = ConnectTimeouts::default();
        if let Some(value) = lookup(LOGIN_TIMEOUT_ENV) {
            timeouts.login = Duration::from_secs(parse_setting(LOGIN_TIMEOUT_ENV, value)?);
        }
        if let Some(value) = lookup(QUERY_TIMEOUT_ENV) {
            timeouts.query = Duration::from_secs(parse_setting(QUERY_TIMEOUT_ENV, value)?);
        }

        Ok(Self {
            connection_string: lookup(CONNECTION_STRING_ENV),
            bind_addr,
            retry,
            timeouts,
        })
    }

    /// Resolve the connection descriptor for one call.
    pub fn descriptor(&self) -> Result<ConnectionDescriptor, ConfigError> {
        let conn_str = self
            .connection_string
            .as_deref()
            .ok_or(ConfigError::MissingConnectionString)?;
        ConnectionDescriptor::parse(conn_str)
    }
}

fn parse_setting<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidSetting { key, value })
}
