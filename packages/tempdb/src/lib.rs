//! Ephemeral database helpers for tests.
//! Creates, checks and drops databases, caches session factories and
//! terminates other server connections on top of SeaORM.

pub mod config;
pub mod error;
pub mod infra;

pub use config::db::{current_username, ConnectSettings, ServerDefaults};
pub use config::url::{DbUrl, Dialect};
pub use error::{Result, TempDbError};
pub use infra::db::catalog::{
    can_select, create_database, database_exists, database_exists_on, drop_database,
};
pub use infra::db::core::{
    admin_connection, connect, quoted_identifier, quoted_identifier_for, with_admin_connection,
    with_connection, AdminConnection,
};
pub use infra::db::kill::{kill_other_connections, kill_query};
pub use infra::db::session_cache::{
    cached_factory_count, clear_session_factories, session, session_factory, with_session,
    Session, SessionOptions,
};
pub use infra::db::temporary::{
    temporary_database_name, temporary_database_url, with_temporary_database, TemporaryDatabase,
};
