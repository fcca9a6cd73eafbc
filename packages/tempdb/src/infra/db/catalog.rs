//! Database existence checks, creation and removal.

use std::path::Path;

use sea_orm::{ConnectionTrait, Statement};
use tracing::{debug, info};

use crate::config::db::ConnectSettings;
use crate::config::url::{DbUrl, Dialect};
use crate::error::{Result, TempDbError};
use crate::infra::db::core::{
    close_quietly, connect, quoted_identifier_for, with_admin_connection,
};
use crate::infra::db::kill::kill_other_connections;

fn require_database(url: &DbUrl, operation: &'static str) -> Result<String> {
    url.database()
        .map(str::to_string)
        .ok_or(TempDbError::MissingDatabaseName { operation })
}

/// Server dialects cannot act without a target name; SQLite falls back to
/// an in-memory database.
fn require_server_database(url: &DbUrl, operation: &'static str) -> Result<()> {
    if url.dialect().is_server() {
        require_database(url, operation)?;
    }
    Ok(())
}

fn create_statement(dialect: Dialect, name: &str, template: Option<&str>) -> String {
    let template_clause = template
        .map(|t| format!(" template {}", quoted_identifier_for(dialect, t)))
        .unwrap_or_default();
    format!(
        "create database {}{}",
        quoted_identifier_for(dialect, name),
        template_clause
    )
}

/// Connect to `url` and run `select 1`.
///
/// Errors reported by the server or driver become `Ok(false)`; anything
/// else (bad configuration, invalid url) is returned as an error.
pub async fn can_select(url: &DbUrl) -> Result<bool> {
    let settings = ConnectSettings::from_env()?;

    let probe = async {
        let conn = connect(url, &settings).await?;
        let res = conn
            .execute(Statement::from_string(url.backend(), "select 1"))
            .await;
        close_quietly(conn, url).await;
        res.map(|_| ()).map_err(TempDbError::from)
    };

    match probe.await {
        Ok(()) => Ok(true),
        Err(e) if e.is_database_error() => {
            debug!("can_select=false url={} err={}", url, e);
            Ok(false)
        }
        Err(e) => Err(e),
    }
}

/// Look `name` up in the server catalog through an existing connection or
/// transaction.
pub async fn database_exists_on<C>(conn: &C, name: &str) -> Result<bool>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let sql = match Dialect::from(backend) {
        Dialect::Postgres => "SELECT 1 AS found FROM pg_catalog.pg_database WHERE datname = $1",
        Dialect::MySql => {
            "SELECT SCHEMA_NAME FROM INFORMATION_SCHEMA.SCHEMATA WHERE SCHEMA_NAME = ?"
        }
        Dialect::Sqlite => {
            return Err(TempDbError::UnsupportedDialect {
                dialect: Dialect::Sqlite.name(),
                operation: "database_exists_on",
            })
        }
    };

    let row = conn
        .query_one(Statement::from_sql_and_values(backend, sql, [name.into()]))
        .await?;
    Ok(row.is_some())
}

/// Check whether the database named by `url` exists.
///
/// With `test_can_select` the check is a real connection attempt. Otherwise
/// SQLite looks at the filesystem and servers consult their catalog.
pub async fn database_exists(url: &DbUrl, test_can_select: bool) -> Result<bool> {
    if test_can_select {
        return can_select(url).await;
    }

    match url.dialect() {
        Dialect::Sqlite => Ok(url.is_sqlite_memory()
            || url.database().is_some_and(|path| Path::new(path).exists())),
        Dialect::Postgres | Dialect::MySql => {
            let name = require_database(url, "database_exists")?;
            with_admin_connection(url, move |admin| {
                Box::pin(async move { database_exists_on(admin.connection(), &name).await })
            })
            .await
        }
    }
}

/// Create the database named by `url`.
///
/// Returns `false` when it already exists. `template` is only understood by
/// Postgres. With `wipe_if_existing` any existing database is dropped first.
pub async fn create_database(
    url: &DbUrl,
    template: Option<&str>,
    wipe_if_existing: bool,
) -> Result<bool> {
    if template.is_some() && url.dialect() != Dialect::Postgres {
        return Err(TempDbError::UnsupportedDialect {
            dialect: url.dialect().name(),
            operation: "create_database with template",
        });
    }
    require_server_database(url, "create_database")?;

    if wipe_if_existing {
        drop_database(url).await?;
    }

    if database_exists(url, false).await? {
        info!("database=exists action=skip_create url={}", url);
        return Ok(false);
    }

    match url.dialect() {
        Dialect::Sqlite => {
            let settings = ConnectSettings::from_env()?;
            let create_url = url.clone().with_query_param("mode", "rwc");
            let conn = connect(&create_url, &settings).await?;
            close_quietly(conn, &create_url).await;
        }
        Dialect::Postgres | Dialect::MySql => {
            let name = require_database(url, "create_database")?;
            let sql = create_statement(url.dialect(), &name, template);
            with_admin_connection(url, move |admin| {
                Box::pin(async move { admin.execute_sql(&sql).await })
            })
            .await?;
        }
    }

    info!(
        "database=created dialect={} url={} template={}",
        url.dialect(),
        url,
        template.unwrap_or("-")
    );
    Ok(true)
}

/// Drop the database named by `url`, terminating its other connections
/// first. Returns `false` when there was nothing to drop.
pub async fn drop_database(url: &DbUrl) -> Result<bool> {
    require_server_database(url, "drop_database")?;
    if !database_exists(url, false).await? {
        debug!("database=absent action=skip_drop url={}", url);
        return Ok(false);
    }

    match url.dialect() {
        Dialect::Sqlite => {
            let path = match url.database() {
                Some(path) if !url.is_sqlite_memory() => path.to_string(),
                _ => return Ok(false),
            };
            tokio::fs::remove_file(&path).await?;
            for suffix in ["-wal", "-shm", "-journal"] {
                let sidecar = format!("{path}{suffix}");
                if tokio::fs::try_exists(&sidecar).await.unwrap_or(false) {
                    tokio::fs::remove_file(&sidecar).await?;
                }
            }
        }
        Dialect::Postgres | Dialect::MySql => {
            let name = require_database(url, "drop_database")?;
            with_admin_connection(url, move |admin| {
                Box::pin(async move {
                    let quoted = quoted_identifier_for(admin.dialect(), &name);
                    if admin.dialect() == Dialect::Postgres {
                        admin
                            .execute_sql(&format!("revoke connect on database {quoted} from public"))
                            .await?;
                    }
                    let killed =
                        kill_other_connections(admin.connection(), Some(name.as_str()), true)
                            .await?;
                    debug!("database=drop killed_connections={} name={}", killed, name);
                    admin
                        .execute_sql(&format!("drop database if exists {quoted}"))
                        .await
                })
            })
            .await?;
        }
    }

    info!("database=dropped dialect={} url={}", url.dialect(), url);
    Ok(true)
}
