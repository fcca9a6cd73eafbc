use std::future::Future;
use std::ops::Deref;

use futures::future::BoxFuture;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DatabaseTransaction,
    TransactionError, TransactionTrait,
};
use tracing::{debug, info, warn};

use crate::config::db::{admin_database, current_username, ConnectSettings};
use crate::config::url::{DbUrl, Dialect};
use crate::error::{Result, TempDbError};

/// Double-quote an SQL identifier, escaping embedded double quotes.
pub fn quoted_identifier(identifier: &str) -> String {
    format!("\"{}\"", identifier.replace('"', "\"\""))
}

/// Quote an identifier in the dialect's native style. MySQL uses backticks,
/// which work whatever the session's `sql_mode` is.
pub fn quoted_identifier_for(dialect: Dialect, identifier: &str) -> String {
    match dialect {
        Dialect::MySql => format!("`{}`", identifier.replace('`', "``")),
        Dialect::Postgres | Dialect::Sqlite => quoted_identifier(identifier),
    }
}

/// Retry a connection attempt with fixed interval delays.
/// Returns the error of the last attempt once all retries are exhausted.
async fn retry_connection<T, F, Fut>(mut connect_fn: F, settings: &ConnectSettings) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let max_attempts = settings.connect_attempts.max(1);
    let interval_ms = settings.retry_interval.as_millis();
    let mut attempt = 1;

    loop {
        match connect_fn().await {
            Ok(result) => {
                if attempt > 1 {
                    info!(
                        "connection_retry=success attempts={} interval_ms={}",
                        attempt, interval_ms
                    );
                }
                return Ok(result);
            }
            Err(e) if attempt < max_attempts && e.is_database_error() => {
                warn!(
                    "connection_retry=failed attempt={} max_attempts={} interval_ms={} err={}",
                    attempt, max_attempts, interval_ms, e
                );
                tokio::time::sleep(settings.retry_interval).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Options for a throwaway engine holding exactly one connection.
fn single_connection_options(url: &DbUrl, settings: &ConnectSettings) -> ConnectOptions {
    let mut opt = ConnectOptions::new(url.to_connection_string());
    opt.min_connections(1)
        .max_connections(1)
        .connect_timeout(settings.acquire_timeout)
        .acquire_timeout(settings.acquire_timeout)
        .sqlx_logging(settings.sqlx_logging);
    opt
}

/// Open a single-connection engine for `url`. No retries.
pub async fn connect(url: &DbUrl, settings: &ConnectSettings) -> Result<DatabaseConnection> {
    let conn = Database::connect(single_connection_options(url, settings)).await?;
    debug!("connection=open dialect={} url={}", url.dialect(), url);
    Ok(conn)
}

pub(crate) async fn close_quietly(conn: DatabaseConnection, url: &DbUrl) {
    if let Err(e) = conn.close().await {
        debug!("connection=close_failed url={} err={}", url, e);
    }
}

pub(crate) fn flatten_txn_err(err: TransactionError<TempDbError>) -> TempDbError {
    match err {
        TransactionError::Connection(db_err) => TempDbError::Db(db_err),
        TransactionError::Transaction(inner) => inner,
    }
}

/// Run `f` inside a transaction on a fresh single-connection engine.
///
/// Commits when `f` returns `Ok`, rolls back when it returns `Err`, and
/// closes the engine either way.
pub async fn with_connection<T, F>(url: &DbUrl, f: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c DatabaseTransaction) -> BoxFuture<'c, Result<T>> + Send,
    T: Send,
{
    let settings = ConnectSettings::from_env()?;
    let conn = connect(url, &settings).await?;
    let out = conn.transaction::<_, T, TempDbError>(f).await.map_err(flatten_txn_err);
    close_quietly(conn, url).await;
    out
}

/// Retarget `url` at the server itself rather than the database it names.
pub(crate) fn admin_url(url: &DbUrl) -> Result<DbUrl> {
    match url.dialect() {
        Dialect::Postgres => {
            let username = match url.username() {
                Some(user) => user.to_string(),
                None => current_username()?,
            };
            Ok(url
                .clone()
                .with_database(Some(admin_database()))
                .with_username(Some(username)))
        }
        Dialect::MySql => Ok(url.clone().with_database(None)),
        Dialect::Sqlite => Ok(url.clone()),
    }
}

/// A server-level connection used for catalog lookups and DDL.
///
/// Admin connections run in autocommit mode. Identifiers in admin
/// statements are quoted with [`quoted_identifier_for`], so no session
/// setting has to survive the pool replacing its connection.
pub struct AdminConnection {
    conn: DatabaseConnection,
    url: DbUrl,
}

impl AdminConnection {
    pub fn dialect(&self) -> Dialect {
        self.url.dialect()
    }

    /// The retargeted url this connection was opened with.
    pub fn url(&self) -> &DbUrl {
        &self.url
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    /// Run a statement through the simple query protocol. Server DDL such as
    /// `create database` must not be sent as a prepared statement.
    pub async fn execute_sql(&self, sql: &str) -> Result<()> {
        debug!("admin_sql dialect={} sql={}", self.dialect(), sql);
        self.conn.execute_unprepared(sql).await?;
        Ok(())
    }

    pub async fn close(self) -> Result<()> {
        self.conn.close().await?;
        debug!("admin_connection=closed url={}", self.url);
        Ok(())
    }
}

impl Deref for AdminConnection {
    type Target = DatabaseConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

pub async fn admin_connection(url: &DbUrl) -> Result<AdminConnection> {
    let settings = ConnectSettings::from_env()?;
    let target = admin_url(url)?;

    let conn = if target.dialect().is_server() {
        retry_connection(|| connect(&target, &settings), &settings).await?
    } else {
        connect(&target, &settings).await?
    };

    let admin = AdminConnection { conn, url: target };
    info!(
        "admin_connection=open dialect={} url={}",
        admin.dialect(),
        admin.url
    );
    Ok(admin)
}

/// Scoped admin connection; closed once `f` completes, whatever its outcome.
pub async fn with_admin_connection<T, F>(url: &DbUrl, f: F) -> Result<T>
where
    F: for<'c> FnOnce(&'c AdminConnection) -> BoxFuture<'c, Result<T>>,
{
    let admin = admin_connection(url).await?;
    let out = f(&admin).await;
    let admin_url = admin.url.clone();
    if let Err(e) = admin.close().await {
        warn!("admin_connection=close_failed url={} err={}", admin_url, e);
    }
    out
}
