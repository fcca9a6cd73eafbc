//! Terminating other sessions on a database server.

use sea_orm::{ConnectionTrait, Statement, Value};
use tracing::{debug, info};

use crate::config::url::Dialect;
use crate::error::{Result, TempDbError};

const POSTGRES_KILL: &str = "select pg_terminate_backend(psa.pid) as terminated \
     from pg_stat_activity psa \
     where psa.pid <> pg_backend_pid()";

const MYSQL_KILL: &str = "select ID as process_id \
     from information_schema.processlist \
     where ID <> connection_id()";

/// Build the query selecting (and on Postgres, terminating) other sessions.
///
/// A soft kill only targets idle sessions. With `dbname` the query takes a
/// single bind parameter for the database name.
pub fn kill_query(dialect: Dialect, dbname: Option<&str>, hardkill: bool) -> Result<String> {
    let (base, idle_filter, db_filter) = match dialect {
        Dialect::Postgres => (POSTGRES_KILL, "psa.state = 'idle'", "psa.datname = $1"),
        Dialect::MySql => (MYSQL_KILL, "COMMAND = 'Sleep'", "DB = ?"),
        Dialect::Sqlite => {
            return Err(TempDbError::UnsupportedDialect {
                dialect: dialect.name(),
                operation: "kill_other_connections",
            })
        }
    };

    let mut filters = Vec::new();
    if !hardkill {
        filters.push(idle_filter);
    }
    if dbname.is_some() {
        filters.push(db_filter);
    }

    let mut sql = base.to_string();
    if !filters.is_empty() {
        sql.push_str(" and ");
        sql.push_str(&filters.join(" and "));
    }
    Ok(sql)
}

/// Kill other connections to `dbname`, or to the whole server when no name
/// is given. The calling connection is never touched.
///
/// Returns the number of sessions terminated.
pub async fn kill_other_connections<C>(conn: &C, dbname: Option<&str>, hardkill: bool) -> Result<u64>
where
    C: ConnectionTrait,
{
    let backend = conn.get_database_backend();
    let dialect = Dialect::from(backend);
    let sql = kill_query(dialect, dbname, hardkill)?;
    let values: Vec<Value> = dbname.map(|name| vec![name.into()]).unwrap_or_default();

    let rows = conn
        .query_all(Statement::from_sql_and_values(backend, sql.as_str(), values))
        .await?;

    let mut killed = 0u64;
    match dialect {
        Dialect::Postgres => {
            for row in rows {
                if row.try_get::<Option<bool>>("", "terminated")?.unwrap_or(false) {
                    killed += 1;
                }
            }
        }
        Dialect::MySql => {
            for row in rows {
                let pid: u64 = row.try_get("", "process_id")?;
                match conn.execute_unprepared(&format!("kill connection {pid}")).await {
                    Ok(_) => killed += 1,
                    // The session ended between the processlist read and the kill.
                    Err(e) if e.to_string().contains("Unknown thread id") => {
                        debug!("kill=skipped pid={} reason=already_gone", pid);
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Dialect::Sqlite => {}
    }

    info!(
        "kill=done dialect={} database={} hardkill={} killed={}",
        dialect,
        dbname.unwrap_or("*"),
        hardkill,
        killed
    );
    Ok(killed)
}
