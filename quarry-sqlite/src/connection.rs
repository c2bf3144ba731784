//! SQLite connection wrapper.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use quarry_query::{Connection, QueryResult, Row, Value};
use tokio::sync::OwnedSemaphorePermit;
use tracing::{debug, trace};

use crate::config::SqliteExtensions;
use crate::error::{SqliteError, SqliteResult};
use crate::types;

/// An idle connection waiting in the pool.
pub(crate) struct IdleConnection {
    pub conn: tokio_rusqlite::Connection,
    pub created_at: Instant,
    pub last_used: Instant,
}

pub(crate) type IdleQueue = Arc<Mutex<VecDeque<IdleConnection>>>;

/// A checked-out connection. Returns to its pool when dropped.
pub struct SqliteConnection {
    conn: tokio_rusqlite::Connection,
    extensions: SqliteExtensions,
    _permit: OwnedSemaphorePermit,
    return_to_pool: Option<IdleQueue>,
    created_at: Instant,
}

impl SqliteConnection {
    pub(crate) fn new(
        conn: tokio_rusqlite::Connection,
        extensions: SqliteExtensions,
        permit: OwnedSemaphorePermit,
        return_to_pool: Option<IdleQueue>,
        created_at: Instant,
    ) -> Self {
        Self {
            conn,
            extensions,
            _permit: permit,
            return_to_pool,
            created_at,
        }
    }

    /// Get the inner connection.
    pub fn inner(&self) -> &tokio_rusqlite::Connection {
        &self.conn
    }

    async fn rows(&self, sql: &str, params: &[Value]) -> SqliteResult<Vec<Row>> {
        debug!(sql = %sql, params = params.len(), "Executing query");
        let sql = sql.to_string();
        let params = types::to_params(params)?;
        let extensions = self.extensions;

        let rows = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let columns: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
                let rows = stmt
                    .query_map(rusqlite::params_from_iter(params.iter()), |row| {
                        types::from_row(row, &columns, extensions)
                    })?
                    .collect::<rusqlite::Result<Vec<_>>>()?;
                Ok(rows)
            })
            .await?;
        Ok(rows)
    }

    async fn affected(&self, sql: &str, params: &[Value]) -> SqliteResult<(u64, i64)> {
        debug!(sql = %sql, params = params.len(), "Executing statement");
        let sql = sql.to_string();
        let params = types::to_params(params)?;

        let result = self
            .conn
            .call(move |conn| {
                let mut stmt = conn.prepare_cached(&sql)?;
                let changed = stmt.execute(rusqlite::params_from_iter(params.iter()))?;
                Ok((changed as u64, conn.last_insert_rowid()))
            })
            .await?;
        Ok(result)
    }

    async fn batch(&self, sql: &str) -> SqliteResult<()> {
        debug!(sql = %sql, "Executing batch");
        let sql = sql.to_string();
        self.conn
            .call(move |conn| Ok(conn.execute_batch(&sql)?))
            .await
            .map_err(SqliteError::from)
    }
}

impl std::fmt::Debug for SqliteConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteConnection")
            .field("extensions", &self.extensions)
            .field("pooled", &self.return_to_pool.is_some())
            .finish()
    }
}

#[async_trait]
impl Connection for SqliteConnection {
    fn engine(&self) -> &str {
        "sqlite"
    }

    async fn query(&self, sql: &str, params: &[Value]) -> QueryResult<Vec<Row>> {
        Ok(self.rows(sql, params).await?)
    }

    async fn execute(&self, sql: &str, params: &[Value]) -> QueryResult<u64> {
        Ok(self.affected(sql, params).await?.0)
    }

    /// Returns the rowid of the inserted row, which is the primary key for
    /// `INTEGER PRIMARY KEY` tables.
    async fn insert(&self, sql: &str, params: &[Value], _primary_key: &str) -> QueryResult<Value> {
        let (_, rowid) = self.affected(sql, params).await?;
        Ok(Value::Int(rowid))
    }

    async fn batch_execute(&self, sql: &str) -> QueryResult<()> {
        Ok(self.batch(sql).await?)
    }
}

impl Drop for SqliteConnection {
    fn drop(&mut self) {
        if let Some(pool) = self.return_to_pool.take() {
            trace!("Returning connection to pool");
            pool.lock().push_back(IdleConnection {
                conn: self.conn.clone(),
                created_at: self.created_at,
                last_used: Instant::now(),
            });
        }
    }
}
