use std::env;
use std::time::Duration;

use crate::config::url::Dialect;
use crate::error::{Result, TempDbError};

/// Server coordinates used when a url has to be synthesized, e.g. for
/// temporary databases.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerDefaults {
    pub host: String,
    pub port: Option<u16>,
    pub username: String,
    pub password: Option<String>,
    /// Database the Postgres admin connection attaches to.
    pub admin_database: String,
}

impl ServerDefaults {
    pub fn from_env(dialect: Dialect) -> Result<Self> {
        let port_var = match dialect {
            Dialect::Postgres => Some("TEMPDB_PG_PORT"),
            Dialect::MySql => Some("TEMPDB_MYSQL_PORT"),
            Dialect::Sqlite => None,
        };
        let port = match port_var {
            Some(name) => parse_var::<u16>(name)?.or(dialect.default_port()),
            None => None,
        };
        let username = match non_empty_var("TEMPDB_USER") {
            Some(user) => user,
            None => current_username()?,
        };

        Ok(Self {
            host: non_empty_var("TEMPDB_HOST").unwrap_or_else(|| "localhost".to_string()),
            port,
            username,
            password: non_empty_var("TEMPDB_PASSWORD"),
            admin_database: admin_database(),
        })
    }
}

/// Connection behaviour shared by admin connections and probes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectSettings {
    pub connect_attempts: u32,
    pub retry_interval: Duration,
    pub acquire_timeout: Duration,
    pub sqlx_logging: bool,
}

impl Default for ConnectSettings {
    fn default() -> Self {
        Self {
            connect_attempts: 3,
            retry_interval: Duration::from_millis(200),
            acquire_timeout: Duration::from_millis(5000),
            sqlx_logging: false,
        }
    }
}

impl ConnectSettings {
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            connect_attempts: parse_var::<u32>("TEMPDB_CONNECT_ATTEMPTS")?
                .unwrap_or(defaults.connect_attempts)
                .max(1),
            retry_interval: parse_var::<u64>("TEMPDB_CONNECT_RETRY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_interval),
            acquire_timeout: parse_var::<u64>("TEMPDB_ACQUIRE_TIMEOUT_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.acquire_timeout),
            sqlx_logging: parse_var::<bool>("TEMPDB_SQLX_LOGGING")?
                .unwrap_or(defaults.sqlx_logging),
        })
    }
}

/// Maintenance database that Postgres admin connections attach to.
pub fn admin_database() -> String {
    non_empty_var("TEMPDB_PG_ADMIN_DB").unwrap_or_else(|| "postgres".to_string())
}

/// Login name of the current OS user, checked in the same order as the
/// usual `getuser` lookups.
pub fn current_username() -> Result<String> {
    ["LOGNAME", "USER", "LNAME", "USERNAME"]
        .into_iter()
        .find_map(non_empty_var)
        .ok_or_else(|| TempDbError::Config {
            message: "cannot determine current user: set TEMPDB_USER or USER".to_string(),
        })
}

fn non_empty_var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match non_empty_var(name) {
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|_| TempDbError::Config {
            message: format!("environment variable '{name}' has invalid value '{raw}'"),
        }),
        None => Ok(None),
    }
}
