pub mod catalog;
pub mod core;
pub mod kill;
pub mod session_cache;
pub mod temporary;

pub use catalog::{can_select, create_database, database_exists, database_exists_on, drop_database};
pub use core::{admin_connection, connect, quoted_identifier, quoted_identifier_for, with_admin_connection, with_connection, AdminConnection};
pub use kill::{kill_other_connections, kill_query};
pub use session_cache::{session, session_factory, with_session, Session, SessionOptions};
pub use temporary::{with_temporary_database, TemporaryDatabase};
