use sea_orm::DbErr;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TempDbError {
    #[error("Database error: {0}")]
    Db(#[from] DbErr),
    #[error("Invalid database url '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("Operation '{operation}' is not supported for dialect {dialect}")]
    UnsupportedDialect {
        dialect: &'static str,
        operation: &'static str,
    },
    #[error("Operation '{operation}' requires a database name in the url")]
    MissingDatabaseName { operation: &'static str },
    #[error("Configuration error: {message}")]
    Config { message: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TempDbError {
    /// The stored url has its password masked; it ends up in logs and on
    /// stderr.
    pub(crate) fn invalid_url(url: &str, reason: impl Into<String>) -> Self {
        TempDbError::InvalidUrl {
            url: crate::config::url::mask_raw_password(url),
            reason: reason.into(),
        }
    }

    /// True when the error came back from the server or driver rather than
    /// from this crate's own validation.
    pub fn is_database_error(&self) -> bool {
        matches!(
            self,
            TempDbError::Db(
                DbErr::Conn(_)
                    | DbErr::ConnectionAcquire(_)
                    | DbErr::Exec(_)
                    | DbErr::Query(_)
            )
        )
    }
}

pub type Result<T, E = TempDbError> = std::result::Result<T, E>;
