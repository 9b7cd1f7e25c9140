//! Typed configuration.
//!
//! [`Config`] loads process-level settings from environment variables and
//! fails fast if required ones are missing. [`ConnectionConfig`] parses a
//! queue DSN (`redis://host:port?queue=name`). Passwords are wrapped in
//! `secrecy::SecretString` to keep them out of logs.

pub mod scaling;

use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use url::Url;

use crate::error::{Error, Result};
use crate::store::QueueKeys;

pub use scaling::ScalingConfig;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 6379;
const DEFAULT_BLOCKING_TIMEOUT_SECS: u64 = 30;

#[derive(Debug)]
pub struct Config {
    pub dsn: SecretString,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// In local dev, call `dotenvy::dotenv().ok()` before this.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            dsn: SecretString::from(required_var("REDISQ_DSN")?),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn required_var(name: &str) -> Result<String> {
    std::env::var(name)
        .map_err(|_| Error::Config(format!("required environment variable {name} is not set")))
}

/// Explicit options. Each one overrides the same setting in the DSN.
#[derive(Debug, Default, Deserialize)]
pub struct ConnectionOptions {
    pub queue: Option<String>,
    pub db: Option<i64>,
    pub password: Option<SecretString>,
    pub blocking_timeout: Option<u64>,
}

/// Everything needed to reach one queue.
#[derive(Debug)]
pub struct ConnectionConfig {
    pub tls: bool,
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<SecretString>,
    pub db: Option<i64>,
    pub queue: String,
    /// How long a receiver waits on an empty queue before reporting no message.
    pub blocking_timeout: Duration,
}

impl ConnectionConfig {
    /// Whether this DSN names a store this crate can talk to.
    pub fn supports(dsn: &str) -> bool {
        dsn.starts_with("redis://") || dsn.starts_with("rediss://")
    }

    /// Parse `redis[s]://[[user]:password@]host[:port][/db|/queue]` with optional
    /// `queue`, `db` and `blocking_timeout` query parameters.
    ///
    /// Precedence per setting: explicit option, then query string, then path.
    /// A numeric path segment selects the db; any other path segment names the queue.
    pub fn from_dsn(dsn: &str, options: ConnectionOptions) -> Result<Self> {
        let url = Url::parse(dsn)
            .map_err(|e| Error::Config(format!("the given redis DSN {dsn:?} is invalid: {e}")))?;

        let tls = match url.scheme() {
            "redis" => false,
            "rediss" => true,
            other => {
                return Err(Error::Config(format!(
                    "unsupported DSN scheme {other:?}, expected redis or rediss"
                )));
            }
        };

        let query = |name: &str| {
            url.query_pairs()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.into_owned())
        };

        let path = url.path().trim_matches('/');
        let (path_db, path_queue) = if path.is_empty() {
            (None, None)
        } else {
            match path.parse::<i64>() {
                Ok(db) => (Some(db), None),
                Err(_) => (None, Some(path.to_string())),
            }
        };

        let queue = options
            .queue
            .or_else(|| query("queue"))
            .or(path_queue)
            .filter(|q| !q.is_empty())
            .ok_or_else(|| {
                Error::Config(
                    "the queue option must be included in the DSN or configuration options"
                        .to_string(),
                )
            })?;

        let db = match (options.db, query("db")) {
            (Some(db), _) => Some(db),
            (None, Some(raw)) => Some(
                raw.parse::<i64>()
                    .map_err(|_| Error::Config(format!("db must be an integer, got {raw:?}")))?,
            ),
            (None, None) => path_db,
        };

        let blocking_timeout = match (options.blocking_timeout, query("blocking_timeout")) {
            (Some(secs), _) => secs,
            (None, Some(raw)) => raw.parse::<u64>().map_err(|_| {
                Error::Config(format!("blocking_timeout must be whole seconds, got {raw:?}"))
            })?,
            (None, None) => DEFAULT_BLOCKING_TIMEOUT_SECS,
        };

        let password = options.password.or_else(|| {
            url.password()
                .filter(|p| !p.is_empty())
                .map(|p| SecretString::from(p.to_string()))
        });
        let username = Some(url.username())
            .filter(|u| !u.is_empty())
            .map(str::to_string);

        Ok(Self {
            tls,
            host: url
                .host_str()
                .filter(|h| !h.is_empty())
                .unwrap_or(DEFAULT_HOST)
                .to_string(),
            port: url.port().unwrap_or(DEFAULT_PORT),
            username,
            password,
            db,
            queue,
            blocking_timeout: Duration::from_secs(blocking_timeout),
        })
    }

    pub fn keys(&self) -> QueueKeys {
        QueueKeys::new(&self.queue)
    }

    /// Connection URL for the redis client. Contains the password: pass it
    /// straight to the client, never log it.
    pub fn redis_url(&self) -> Result<String> {
        let scheme = if self.tls { "rediss" } else { "redis" };
        let mut url = Url::parse(&format!("{scheme}://{}:{}", self.host, self.port))
            .map_err(|e| Error::Config(format!("invalid redis host {:?}: {e}", self.host)))?;
        let credentials_rejected =
            || Error::Config("redis host does not accept credentials".to_string());
        if let Some(user) = &self.username {
            url.set_username(user).map_err(|()| credentials_rejected())?;
        }
        if let Some(password) = &self.password {
            url.set_password(Some(password.expose_secret()))
                .map_err(|()| credentials_rejected())?;
        }
        if let Some(db) = self.db {
            url.set_path(&db.to_string());
        }
        Ok(url.into())
    }
}
