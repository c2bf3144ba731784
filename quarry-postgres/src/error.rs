//! Error types for PostgreSQL operations.

use quarry_query::{ErrorCode, QueryError};
use thiserror::Error;

/// Result type for PostgreSQL operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur during PostgreSQL operations.
#[derive(Error, Debug)]
pub enum PgError {
    /// Connection pool error.
    #[error("pool error: {0}")]
    Pool(#[from] deadpool_postgres::PoolError),

    /// Pool construction error.
    #[error("pool build error: {0}")]
    Build(#[from] deadpool_postgres::BuildError),

    /// PostgreSQL error.
    #[error("postgres error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// A value could not be bound to a parameter of the given type.
    #[error("type conversion error: {0}")]
    TypeConversion(String),

    /// A column could not be decoded.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

impl PgError {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a type conversion error.
    pub fn type_conversion(message: impl Into<String>) -> Self {
        Self::TypeConversion(message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// The SQLSTATE reported by the server, if any.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Self::Postgres(e) => e.code().map(|code| code.code()),
            Self::Pool(deadpool_postgres::PoolError::Backend(e)) => e.code().map(|code| code.code()),
            _ => None,
        }
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        match self {
            Self::Pool(_) => true,
            Self::Postgres(e) => e.is_closed(),
            _ => false,
        }
    }
}

/// Map a SQLSTATE to an error code.
///
/// Class 23 (integrity constraint violation) maps to the constraint codes;
/// anything unrecognized is a general database error.
pub fn classify_sqlstate(sqlstate: &str) -> ErrorCode {
    match sqlstate {
        "23505" => ErrorCode::UniqueConstraint,
        "23503" | "23001" => ErrorCode::ForeignKeyConstraint,
        "23502" => ErrorCode::NotNullConstraint,
        "23514" | "23P01" => ErrorCode::CheckConstraint,
        s if s.starts_with("23") => ErrorCode::CheckConstraint,
        "42601" => ErrorCode::SqlSyntax,
        "40001" | "40P01" => ErrorCode::TransactionFailed,
        "57014" => ErrorCode::ConnectionTimeout,
        s if s.starts_with("08") => ErrorCode::ConnectionFailed,
        _ => ErrorCode::DatabaseError,
    }
}

impl From<PgError> for QueryError {
    fn from(err: PgError) -> Self {
        if let Some(sqlstate) = err.sqlstate() {
            let code = classify_sqlstate(sqlstate);
            let message = match &err {
                PgError::Postgres(e) => e.as_db_error().map(|db| db.message().to_string()),
                _ => None,
            }
            .unwrap_or_else(|| err.to_string());
            return QueryError::new(code, message).with_source(err);
        }

        match err {
            PgError::Pool(deadpool_postgres::PoolError::Timeout(_)) => {
                QueryError::new(ErrorCode::ConnectionTimeout, "timed out waiting for a pooled connection")
            }
            PgError::Pool(e) => QueryError::connection(e.to_string()),
            PgError::Build(e) => QueryError::config(e.to_string()),
            PgError::Postgres(e) if e.is_closed() => QueryError::connection(e.to_string()),
            PgError::Postgres(e) => QueryError::database(e.to_string()),
            PgError::Config(msg) => QueryError::config(msg),
            PgError::TypeConversion(msg) => QueryError::new(ErrorCode::InvalidDataType, msg),
            PgError::Deserialization(msg) => QueryError::deserialization(msg),
        }
    }
}
