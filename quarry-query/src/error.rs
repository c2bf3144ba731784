//! Error types for query compilation, routing and execution.
//!
//! Every failure surfaces as a [`QueryError`] carrying a stable [`ErrorCode`],
//! a message and optional context (operation, model, field, SQL) plus
//! suggestions.
//!
//! # Error Codes
//!
//! Error codes follow a pattern: Q{category}{number}
//! - 1xxx: Query errors (not found, unknown operator, invalid filter)
//! - 2xxx: Constraint violations (unique, foreign key, cannot create)
//! - 3xxx: Connection errors (establishment, pool, routing)
//! - 4xxx: Transaction errors
//! - 5xxx: Execution errors (syntax, parameters, dialect)
//! - 6xxx: Data errors (storage shapes, serialization)
//! - 7xxx: Configuration errors
//! - 8xxx: Authorization errors
//!
//! ```rust
//! use quarry_query::{ErrorCode, QueryError};
//!
//! let err = QueryError::unknown_operator("between");
//! assert_eq!(err.code, ErrorCode::UnknownOperator);
//! assert_eq!(err.code.code(), "Q1006");
//! assert!(err.to_string().contains("between"));
//! ```

use std::fmt;
use thiserror::Error;

/// Result type for query operations.
pub type QueryResult<T> = Result<T, QueryError>;

/// Error codes for programmatic error handling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    // Query errors (1xxx)
    /// Record not found (Q1001).
    RecordNotFound = 1001,
    /// Invalid filter expression or value shape (Q1003).
    InvalidFilter = 1003,
    /// Invalid sort specifier (Q1004).
    InvalidSort = 1004,
    /// Filter key names an operator outside the fixed table (Q1006).
    UnknownOperator = 1006,

    // Constraint errors (2xxx)
    /// Unique constraint violation (Q2001).
    UniqueConstraint = 2001,
    /// Foreign key constraint violation (Q2002).
    ForeignKeyConstraint = 2002,
    /// Check constraint violation (Q2003).
    CheckConstraint = 2003,
    /// Not null constraint violation (Q2004).
    NotNullConstraint = 2004,
    /// Insert rejected by a storage constraint (Q2010).
    CannotCreateRecord = 2010,

    // Connection errors (3xxx)
    /// Database connection failed (Q3001).
    ConnectionFailed = 3001,
    /// Connection pool exhausted (Q3002).
    PoolExhausted = 3002,
    /// Connection timeout (Q3003).
    ConnectionTimeout = 3003,

    // Transaction errors (4xxx)
    /// Transaction failed (Q4001).
    TransactionFailed = 4001,

    // Query execution errors (5xxx)
    /// SQL syntax error (Q5002).
    SqlSyntax = 5002,
    /// Invalid parameter (Q5003).
    InvalidParameter = 5003,
    /// General database error (Q5005).
    DatabaseError = 5005,
    /// Engine is neither PostgreSQL nor the generic dialect (Q5010).
    UnsupportedDialect = 5010,

    // Data errors (6xxx)
    /// Invalid data type (Q6001).
    InvalidDataType = 6001,
    /// Serialization error (Q6002).
    SerializationError = 6002,
    /// Deserialization error (Q6003).
    DeserializationError = 6003,
    /// Storage value outside the shapes a codec recognizes (Q6010).
    UnsupportedStorageShape = 6010,

    // Configuration errors (7xxx)
    /// Invalid configuration (Q7001).
    InvalidConfiguration = 7001,
    /// Missing configuration (Q7002).
    MissingConfiguration = 7002,
    /// Invalid connection string (Q7003).
    InvalidConnectionString = 7003,

    // Authorization errors (8xxx)
    /// Action denied by the authorization context (Q8001).
    AccessDenied = 8001,

    // Internal errors (9xxx)
    /// Internal error (Q9001).
    Internal = 9001,
}

impl ErrorCode {
    /// Get the error code string (e.g., "Q1001").
    pub fn code(&self) -> String {
        format!("Q{}", *self as u16)
    }

    /// Get a short description of the error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RecordNotFound => "Record not found",
            Self::InvalidFilter => "Invalid filter condition",
            Self::InvalidSort => "Invalid sort specifier",
            Self::UnknownOperator => "Unknown filter operator",
            Self::UniqueConstraint => "Unique constraint violation",
            Self::ForeignKeyConstraint => "Foreign key constraint violation",
            Self::CheckConstraint => "Check constraint violation",
            Self::NotNullConstraint => "Not null constraint violation",
            Self::CannotCreateRecord => "Cannot create record",
            Self::ConnectionFailed => "Database connection failed",
            Self::PoolExhausted => "Connection pool exhausted",
            Self::ConnectionTimeout => "Connection timeout",
            Self::TransactionFailed => "Transaction failed",
            Self::SqlSyntax => "SQL syntax error",
            Self::InvalidParameter => "Invalid parameter",
            Self::DatabaseError => "Database error",
            Self::UnsupportedDialect => "Unsupported dialect",
            Self::InvalidDataType => "Invalid data type",
            Self::SerializationError => "Serialization error",
            Self::DeserializationError => "Deserialization error",
            Self::UnsupportedStorageShape => "Unsupported storage shape",
            Self::InvalidConfiguration => "Invalid configuration",
            Self::MissingConfiguration => "Missing configuration",
            Self::InvalidConnectionString => "Invalid connection string",
            Self::AccessDenied => "Access denied",
            Self::Internal => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Additional context for an error.
#[derive(Debug, Clone, Default)]
pub struct ErrorContext {
    /// The operation that was being performed.
    pub operation: Option<String>,
    /// The model involved.
    pub model: Option<String>,
    /// The field involved.
    pub field: Option<String>,
    /// The SQL statement (if available).
    pub sql: Option<String>,
    /// Suggestions for fixing the error.
    pub suggestions: Vec<String>,
}

/// Errors that can occur during query operations.
#[derive(Error, Debug)]
pub struct QueryError {
    /// The error code.
    pub code: ErrorCode,
    /// The error message.
    pub message: String,
    /// Additional context.
    pub context: ErrorContext,
    /// The source error (if any).
    #[source]
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code.code(), self.message)
    }
}

impl QueryError {
    /// Create a new error with the given code and message.
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            context: ErrorContext::default(),
            source: None,
        }
    }

    /// Add context about the operation.
    pub fn with_context(mut self, operation: impl Into<String>) -> Self {
        self.context.operation = Some(operation.into());
        self
    }

    /// Add a suggestion for fixing the error.
    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.context.suggestions.push(suggestion.into());
        self
    }

    /// Set the model.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.context.model = Some(model.into());
        self
    }

    /// Set the field.
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.context.field = Some(field.into());
        self
    }

    /// Set the SQL statement.
    pub fn with_sql(mut self, sql: impl Into<String>) -> Self {
        self.context.sql = Some(sql.into());
        self
    }

    /// Set the source error.
    pub fn with_source<E: std::error::Error + Send + Sync + 'static>(mut self, source: E) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    // ============== Constructor Functions ==============

    /// Create a not found error.
    pub fn not_found(model: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(
            ErrorCode::RecordNotFound,
            format!("No {} record found matching the query", model),
        )
        .with_model(&model)
        .with_suggestion("Use find_by() to receive None instead of an error")
    }

    /// Create an error for an insert rejected by a storage constraint.
    pub fn cannot_create_record(model: impl Into<String>, reason: impl Into<String>) -> Self {
        let model = model.into();
        Self::new(
            ErrorCode::CannotCreateRecord,
            format!("Cannot create {} record: {}", model, reason.into()),
        )
        .with_model(&model)
        .with_context("create")
    }

    /// Create an unknown operator error.
    pub fn unknown_operator(operator: impl Into<String>) -> Self {
        let operator = operator.into();
        Self::new(
            ErrorCode::UnknownOperator,
            format!("Unknown filter operator `{}`", operator),
        )
        .with_suggestion(
            "Supported operators: lt, lte, gt, gte, eq, neq, exists, prefix, suffix, in, match, contains",
        )
    }

    /// Create an invalid filter error for a value shape an operator cannot handle.
    pub fn invalid_filter(field: impl Into<String>, message: impl Into<String>) -> Self {
        let field = field.into();
        Self::new(
            ErrorCode::InvalidFilter,
            format!("Invalid filter on {}: {}", field, message.into()),
        )
        .with_field(&field)
    }

    /// Create an invalid sort error.
    pub fn invalid_sort(specifier: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InvalidSort,
            format!("Invalid sort specifier `{}`", specifier.into()),
        )
    }

    /// Create an unsupported storage shape error.
    pub fn unsupported_storage_shape(codec: &str, shape: impl fmt::Display) -> Self {
        Self::new(
            ErrorCode::UnsupportedStorageShape,
            format!("{} cannot convert storage value of shape {}", codec, shape),
        )
        .with_suggestion("Check that the column type matches the encoder registered for it")
    }

    /// Create an unsupported dialect error.
    pub fn unsupported_dialect(engine: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::UnsupportedDialect,
            format!("Database engine `{}` is not supported", engine.into()),
        )
        .with_suggestion("Use a PostgreSQL or SQLite connection")
    }

    /// Create an access denied error.
    pub fn access_denied(action: impl fmt::Display, resource: impl Into<String>) -> Self {
        let resource = resource.into();
        Self::new(
            ErrorCode::AccessDenied,
            format!("Not allowed to {} {}", action, resource),
        )
        .with_model(resource)
    }

    /// Create a constraint violation error.
    pub fn constraint_violation(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code, message)
    }

    /// Create an invalid parameter error.
    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidParameter, message)
    }

    /// Create a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::new(ErrorCode::ConnectionFailed, format!("Connection error: {}", message))
            .with_suggestion("Check that the database server is running")
            .with_suggestion("Verify the connection URL is correct")
    }

    /// Create a pool exhausted error.
    pub fn pool_exhausted(max_connections: usize) -> Self {
        Self::new(
            ErrorCode::PoolExhausted,
            format!("Connection pool exhausted (max {} connections)", max_connections),
        )
        .with_suggestion("Increase max_connections in the database configuration")
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::TransactionFailed,
            format!("Transaction error: {}", message.into()),
        )
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidConfiguration, message)
    }

    /// Create a serialization error.
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::SerializationError, message.into())
    }

    /// Create a deserialization error.
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::DeserializationError,
            format!("Failed to deserialize result: {}", message.into()),
        )
    }

    /// Create a general database error.
    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Internal, format!("Internal error: {}", message.into()))
    }

    // ============== Error Checks ==============

    /// Check if this is a not found error.
    pub fn is_not_found(&self) -> bool {
        self.code == ErrorCode::RecordNotFound
    }

    /// Check if this is a constraint violation reported by the engine.
    pub fn is_constraint_violation(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::UniqueConstraint
                | ErrorCode::ForeignKeyConstraint
                | ErrorCode::CheckConstraint
                | ErrorCode::NotNullConstraint
        )
    }

    /// Check if this is a connection error.
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self.code,
            ErrorCode::ConnectionFailed | ErrorCode::PoolExhausted | ErrorCode::ConnectionTimeout
        )
    }

    /// Display the full error with all context and suggestions.
    pub fn display_full(&self) -> String {
        let mut output = format!("Error [{}]: {}\n", self.code.code(), self.message);

        if let Some(ref op) = self.context.operation {
            output.push_str(&format!("  -> While: {}\n", op));
        }
        if let Some(ref model) = self.context.model {
            output.push_str(&format!("  -> Model: {}\n", model));
        }
        if let Some(ref field) = self.context.field {
            output.push_str(&format!("  -> Field: {}\n", field));
        }
        if let Some(ref sql) = self.context.sql {
            let shown: String = sql.chars().take(200).collect();
            let ellipsis = if shown.len() < sql.len() { "..." } else { "" };
            output.push_str(&format!("  -> SQL: {}{}\n", shown, ellipsis));
        }

        if !self.context.suggestions.is_empty() {
            output.push_str("\nSuggestions:\n");
            for (i, suggestion) in self.context.suggestions.iter().enumerate() {
                output.push_str(&format!("  {}. {}\n", i + 1, suggestion));
            }
        }

        output
    }
}

impl From<serde_json::Error> for QueryError {
    fn from(err: serde_json::Error) -> Self {
        QueryError::serialization(err.to_string()).with_source(err)
    }
}
