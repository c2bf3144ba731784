//! Error types for SQLite operations.

use quarry_query::{ErrorCode, QueryError};
use rusqlite::ffi;
use thiserror::Error;

/// Result type for SQLite operations.
pub type SqliteResult<T> = Result<T, SqliteError>;

/// Error type for SQLite operations.
#[derive(Error, Debug)]
pub enum SqliteError {
    /// SQLite driver error.
    #[error("SQLite error: {0}")]
    Sqlite(#[from] tokio_rusqlite::Error),

    /// No connection became free within the acquire timeout.
    #[error("pool exhausted (max {0} connections)")]
    PoolExhausted(usize),

    /// Pool error.
    #[error("pool error: {0}")]
    Pool(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A value has no SQLite representation.
    #[error("type conversion error: {0}")]
    TypeConversion(String),
}

impl SqliteError {
    /// Create a pool error.
    pub fn pool(msg: impl Into<String>) -> Self {
        Self::Pool(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(msg: impl Into<String>) -> Self {
        Self::TypeConversion(msg.into())
    }

    /// The underlying rusqlite error, if any.
    pub fn rusqlite(&self) -> Option<&rusqlite::Error> {
        match self {
            Self::Sqlite(tokio_rusqlite::Error::Rusqlite(e)) => Some(e),
            Self::Sqlite(tokio_rusqlite::Error::Close((_, e))) => Some(e),
            _ => None,
        }
    }
}

impl From<rusqlite::Error> for SqliteError {
    fn from(err: rusqlite::Error) -> Self {
        Self::Sqlite(tokio_rusqlite::Error::Rusqlite(err))
    }
}

/// Map a SQLite result code to an error code.
///
/// Constraint failures are classified by their extended code.
pub fn classify(error: &ffi::Error) -> ErrorCode {
    match error.extended_code {
        ffi::SQLITE_CONSTRAINT_UNIQUE | ffi::SQLITE_CONSTRAINT_PRIMARYKEY => ErrorCode::UniqueConstraint,
        ffi::SQLITE_CONSTRAINT_FOREIGNKEY => ErrorCode::ForeignKeyConstraint,
        ffi::SQLITE_CONSTRAINT_NOTNULL => ErrorCode::NotNullConstraint,
        ffi::SQLITE_CONSTRAINT_CHECK => ErrorCode::CheckConstraint,
        _ => match error.code {
            ffi::ErrorCode::ConstraintViolation => ErrorCode::CheckConstraint,
            ffi::ErrorCode::DatabaseBusy | ffi::ErrorCode::DatabaseLocked => ErrorCode::ConnectionTimeout,
            ffi::ErrorCode::CannotOpen | ffi::ErrorCode::NotADatabase => ErrorCode::ConnectionFailed,
            ffi::ErrorCode::TypeMismatch => ErrorCode::InvalidDataType,
            _ => ErrorCode::DatabaseError,
        },
    }
}

impl From<SqliteError> for QueryError {
    fn from(err: SqliteError) -> Self {
        if let Some(rusqlite::Error::SqliteFailure(failure, message)) = err.rusqlite() {
            let code = classify(failure);
            let message = message.clone().unwrap_or_else(|| failure.to_string());
            return QueryError::new(code, message).with_source(err);
        }

        match err {
            SqliteError::Sqlite(tokio_rusqlite::Error::ConnectionClosed) => {
                QueryError::connection("connection closed")
            }
            SqliteError::Sqlite(e) => QueryError::database(e.to_string()),
            SqliteError::PoolExhausted(max) => QueryError::pool_exhausted(max),
            SqliteError::Pool(msg) => QueryError::connection(msg),
            SqliteError::Config(msg) => QueryError::config(msg),
            SqliteError::TypeConversion(msg) => QueryError::new(ErrorCode::InvalidDataType, msg),
        }
    }
}
