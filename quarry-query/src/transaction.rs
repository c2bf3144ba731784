//! Explicit transactions with savepoint nesting.
//!
//! Set `QUARRY_DEBUG=true` to see every transaction boundary in the logs.
//!
//! # Isolation Levels
//!
//! ```rust
//! use quarry_query::{Dialect, IsolationLevel, TransactionConfig};
//!
//! let config = TransactionConfig::new().isolation(IsolationLevel::Serializable);
//! assert_eq!(config.to_begin_sql(&Dialect::POSTGRES), "BEGIN ISOLATION LEVEL SERIALIZABLE READ WRITE");
//! assert_eq!(config.to_begin_sql(&Dialect::GENERIC), "BEGIN");
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! let mut tx = session.transaction().await?;
//! let id = questions.create(&mut tx, record).await?;
//! answers.update(&mut tx, &id, changes).await?;
//! tx.commit().await?;
//! ```
//!
//! A transaction opened while another is active becomes a savepoint on the
//! same connection. Dropping a transaction without finishing it rolls it
//! back before the connection runs anything else.
//!
//! `Session::after_commit` defers work until the outermost transaction
//! commits.

use std::ops::{Deref, DerefMut};

use tracing::{debug, warn};

use crate::connection::{Scoped, Session};
use crate::dialect::Dialect;
use crate::error::{QueryError, QueryResult};

/// Transaction isolation levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum IsolationLevel {
    /// Read uncommitted - allows dirty reads.
    ReadUncommitted,
    /// Read committed - prevents dirty reads.
    #[default]
    ReadCommitted,
    /// Repeatable read - prevents non-repeatable reads.
    RepeatableRead,
    /// Serializable - highest isolation level.
    Serializable,
}

impl IsolationLevel {
    /// Get the SQL clause for this isolation level.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadUncommitted => "READ UNCOMMITTED",
            Self::ReadCommitted => "READ COMMITTED",
            Self::RepeatableRead => "REPEATABLE READ",
            Self::Serializable => "SERIALIZABLE",
        }
    }
}

/// Access mode for transactions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AccessMode {
    /// Read-write access (default).
    #[default]
    ReadWrite,
    /// Read-only access.
    ReadOnly,
}

impl AccessMode {
    /// Get the SQL clause for this access mode.
    pub fn as_sql(&self) -> &'static str {
        match self {
            Self::ReadWrite => "READ WRITE",
            Self::ReadOnly => "READ ONLY",
        }
    }
}

/// Configuration for a transaction.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransactionConfig {
    /// Isolation level.
    pub isolation: IsolationLevel,
    /// Access mode.
    pub access_mode: AccessMode,
}

impl TransactionConfig {
    /// Create a default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the isolation level.
    pub fn isolation(mut self, level: IsolationLevel) -> Self {
        self.isolation = level;
        self
    }

    /// Set the access mode.
    pub fn access_mode(mut self, mode: AccessMode) -> Self {
        self.access_mode = mode;
        self
    }

    /// Make the transaction read-only.
    pub fn read_only(self) -> Self {
        self.access_mode(AccessMode::ReadOnly)
    }

    /// The statement that opens the transaction.
    ///
    /// Dialects without isolation clauses get a bare `BEGIN`.
    pub fn to_begin_sql(&self, dialect: &Dialect) -> String {
        if dialect.isolation_levels {
            format!(
                "BEGIN ISOLATION LEVEL {} {}",
                self.isolation.as_sql(),
                self.access_mode.as_sql()
            )
        } else {
            "BEGIN".to_string()
        }
    }
}

/// An open transaction or savepoint.
///
/// Dereferences to the [`Session`] so repository operations run inside it.
pub struct Transaction<'s> {
    scope: Scoped<'s>,
    savepoint: Option<String>,
    finished: bool,
}

impl<'s> Transaction<'s> {
    pub(crate) async fn begin(
        mut scope: Scoped<'s>,
        config: &TransactionConfig,
        dialect: &Dialect,
    ) -> QueryResult<Self> {
        let depth = scope.transaction_depth();
        let savepoint = if depth == 0 {
            let sql = config.to_begin_sql(dialect);
            debug!(sql = %sql, "Beginning transaction");
            scope.connection().batch_execute(&sql).await?;
            None
        } else {
            let name = format!("quarry_sp_{}", depth);
            debug!(savepoint = %name, "Creating savepoint");
            scope.connection().batch_execute(&format!("SAVEPOINT {}", name)).await?;
            Some(name)
        };
        scope.set_transaction_depth(depth + 1);
        Ok(Self {
            scope,
            savepoint,
            finished: false,
        })
    }

    /// The savepoint name when this transaction is nested.
    pub fn savepoint(&self) -> Option<&str> {
        self.savepoint.as_deref()
    }

    /// Commit the transaction, or release the savepoint.
    ///
    /// Committing a top-level transaction runs its after-commit callbacks.
    /// Releasing a savepoint hands them to the parent transaction.
    pub async fn commit(mut self) -> QueryResult<()> {
        let sql = match &self.savepoint {
            Some(name) => format!("RELEASE SAVEPOINT {}", name),
            None => "COMMIT".to_string(),
        };
        self.scope.flush_pending().await?;
        debug!(sql = %sql, "Committing transaction");
        self.scope
            .connection()
            .batch_execute(&sql)
            .await
            .map_err(|err| {
                QueryError::transaction(format!("commit failed: {}", err))
                    .with_sql(sql.clone())
                    .with_source(err)
            })?;
        self.finished = true;

        if self.savepoint.is_none() {
            let callbacks = self.scope.take_after_commit();
            if !callbacks.is_empty() {
                debug!(callbacks = callbacks.len(), "Running after-commit callbacks");
            }
            for callback in callbacks {
                callback();
            }
        }
        Ok(())
    }

    /// Roll back the transaction, or roll back to the savepoint.
    ///
    /// After-commit callbacks registered inside it are discarded.
    pub async fn rollback(mut self) -> QueryResult<()> {
        self.finished = true;
        self.scope.discard_nested();
        let sql = self.rollback_sql();
        debug!(sql = %sql, "Rolling back transaction");
        self.scope.connection().batch_execute(&sql).await
    }

    fn rollback_sql(&self) -> String {
        match &self.savepoint {
            Some(name) => format!("ROLLBACK TO SAVEPOINT {}", name),
            None => "ROLLBACK".to_string(),
        }
    }
}

impl Deref for Transaction<'_> {
    type Target = Session;

    fn deref(&self) -> &Session {
        &self.scope
    }
}

impl DerefMut for Transaction<'_> {
    fn deref_mut(&mut self) -> &mut Session {
        &mut self.scope
    }
}

// An unfinished transaction queues its rollback on the scope. The enclosing
// scope runs it before its next statement; a connection leaving the session
// rolls back in the background.
impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        let sql = self.rollback_sql();
        warn!(sql = %sql, "Transaction dropped without commit or rollback; rolling back");
        self.scope.discard_nested();
        self.scope.defer(sql);
    }
}
