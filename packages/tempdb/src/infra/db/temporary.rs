//! Randomly named databases that live for the duration of a test.

use std::future::Future;

use rand::Rng;
use tracing::{info, warn};

use crate::config::db::ServerDefaults;
use crate::config::url::{DbUrl, Dialect};
use crate::error::{Result, TempDbError};
use crate::infra::db::catalog::{create_database, drop_database};

pub const TEMPORARY_PREFIX: &str = "tempdb_tmp_";
const SUFFIX_LEN: usize = 10;

/// `tempdb_tmp_` followed by ten random lowercase letters.
pub fn temporary_database_name() -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..SUFFIX_LEN)
        .map(|_| char::from(rng.random_range(b'a'..=b'z')))
        .collect();
    format!("{TEMPORARY_PREFIX}{suffix}")
}

/// A fresh url for a not-yet-created temporary database.
///
/// Server dialects use the environment's server defaults and the current
/// user. SQLite databases are files in the OS temp directory.
pub fn temporary_database_url(dialect: Dialect) -> Result<DbUrl> {
    let name = temporary_database_name();
    match dialect {
        Dialect::Sqlite => {
            let path = std::env::temp_dir().join(format!("{name}.db"));
            Ok(DbUrl::sqlite(Some(path.to_string_lossy().into_owned())))
        }
        Dialect::Postgres | Dialect::MySql => {
            let defaults = ServerDefaults::from_env(dialect)?;
            Ok(DbUrl::new(dialect, Some(defaults.host), Some(name))
                .with_port(defaults.port)
                .with_username(Some(defaults.username))
                .with_password(defaults.password))
        }
    }
}

/// Guard for a created temporary database. Call [`TemporaryDatabase::close`]
/// to drop it; a guard dropped without closing leaves the database behind
/// and logs a warning.
#[derive(Debug)]
pub struct TemporaryDatabase {
    url: DbUrl,
    keep: bool,
    closed: bool,
}

impl TemporaryDatabase {
    pub async fn create(dialect: Dialect) -> Result<Self> {
        Self::create_with(temporary_database_url(dialect)?).await
    }

    /// Create the database named by `url`. Fails if it already exists, so a
    /// guard never owns a database it did not create.
    pub async fn create_with(url: DbUrl) -> Result<Self> {
        if !create_database(&url, None, false).await? {
            return Err(TempDbError::Config {
                message: format!("temporary database already exists: {url}"),
            });
        }
        info!("temporary_database=created url={}", url);
        Ok(Self {
            url,
            keep: false,
            closed: false,
        })
    }

    pub fn url(&self) -> &DbUrl {
        &self.url
    }

    /// Leave the database in place when the guard is closed.
    pub fn keep(&mut self) {
        self.keep = true;
    }

    pub fn is_kept(&self) -> bool {
        self.keep
    }

    /// Drop the database unless it is kept. Returns whether it was dropped.
    pub async fn close(mut self) -> Result<bool> {
        self.closed = true;
        if self.keep {
            info!("temporary_database=kept url={}", self.url);
            return Ok(false);
        }
        drop_database(&self.url).await
    }
}

impl Drop for TemporaryDatabase {
    fn drop(&mut self) {
        if !self.closed && !self.keep {
            warn!("temporary_database=leaked url={} (guard dropped without close)", self.url);
        }
    }
}

/// Create a temporary database, hand its url to `f`, then drop it even if
/// `f` failed. With `do_not_delete` the database is left in place.
pub async fn with_temporary_database<T, F, Fut>(
    dialect: Dialect,
    do_not_delete: bool,
    f: F,
) -> Result<T>
where
    F: FnOnce(DbUrl) -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut db = TemporaryDatabase::create(dialect).await?;
    if do_not_delete {
        db.keep();
    }

    let out = f(db.url().clone()).await;
    let url = db.url().clone();
    let closed = db.close().await;

    match (out, closed) {
        (Ok(value), Ok(_)) => Ok(value),
        (Ok(_), Err(close_err)) => Err(close_err),
        (Err(e), Err(close_err)) => {
            warn!("temporary_database=drop_failed url={} err={}", url, close_err);
            Err(e)
        }
        (Err(e), Ok(_)) => Err(e),
    }
}
