//! Connection pool for SQLite.
//!
//! File databases keep a queue of idle connections and reuse them before
//! opening new ones. An in-memory database exists only inside the connection
//! that created it, so its pool holds one shared connection and hands it to
//! one session at a time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use quarry_query::{Connection, ConnectionProvider, QueryResult};
use tokio::sync::{OnceCell, Semaphore};
use tracing::{debug, info, instrument};

use crate::config::SqliteConfig;
use crate::connection::{IdleQueue, SqliteConnection};
use crate::error::{SqliteError, SqliteResult};

/// A pool of SQLite connections for one database.
#[derive(Clone)]
pub struct SqlitePool {
    config: Arc<SqliteConfig>,
    semaphore: Arc<Semaphore>,
    idle: IdleQueue,
    shared: Arc<OnceCell<(tokio_rusqlite::Connection, Instant)>>,
    stats: Arc<Mutex<PoolStats>>,
}

/// Statistics about pool usage.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of connection reuses.
    pub reuses: u64,
    /// Number of new connections opened.
    pub opens: u64,
    /// Number of idle connections closed for exceeding the idle timeout.
    pub expirations: u64,
}

impl SqlitePool {
    /// Build a pool. Connections are opened lazily on first checkout.
    pub fn new(config: SqliteConfig) -> SqliteResult<Self> {
        if config.max_connections == 0 {
            return Err(SqliteError::config("max_connections must be at least 1"));
        }
        let permits = if config.path.is_memory() { 1 } else { config.max_connections };

        info!(
            path = %config.path.as_str(),
            max_connections = %permits,
            "SQLite connection pool created"
        );

        Ok(Self {
            semaphore: Arc::new(Semaphore::new(permits)),
            idle: Arc::new(Mutex::new(VecDeque::with_capacity(permits))),
            shared: Arc::new(OnceCell::new()),
            stats: Arc::new(Mutex::new(PoolStats::default())),
            config: Arc::new(config),
        })
    }

    async fn open_connection(config: &SqliteConfig) -> SqliteResult<tokio_rusqlite::Connection> {
        let conn = if config.path.is_memory() {
            tokio_rusqlite::Connection::open_in_memory().await?
        } else {
            tokio_rusqlite::Connection::open(config.path.as_str()).await?
        };

        let init_sql = config.init_sql();
        conn.call(move |conn| Ok(conn.execute_batch(&init_sql)?)).await?;
        Ok(conn)
    }

    /// Check out a connection, waiting up to the acquire timeout for one to
    /// become free.
    #[instrument(skip(self), fields(path = %self.config.path.as_str()))]
    pub async fn get(&self) -> SqliteResult<SqliteConnection> {
        debug!("Acquiring connection from pool");
        let acquire = self.semaphore.clone().acquire_owned();
        let permit = match tokio::time::timeout(self.config.acquire_timeout, acquire).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(SqliteError::pool("pool is closed")),
            Err(_) => return Err(SqliteError::PoolExhausted(self.max_size())),
        };
        let extensions = self.config.extensions;

        if self.config.path.is_memory() {
            let (conn, created_at) = self
                .shared
                .get_or_try_init(|| async {
                    self.stats.lock().opens += 1;
                    Ok::<_, SqliteError>((Self::open_connection(&self.config).await?, Instant::now()))
                })
                .await?;
            return Ok(SqliteConnection::new(conn.clone(), extensions, permit, None, *created_at));
        }

        if let Some(idle) = self.take_idle() {
            self.stats.lock().reuses += 1;
            return Ok(SqliteConnection::new(
                idle.conn,
                extensions,
                permit,
                Some(self.idle.clone()),
                idle.created_at,
            ));
        }

        debug!("No idle connections, opening new connection");
        let conn = Self::open_connection(&self.config).await?;
        self.stats.lock().opens += 1;
        Ok(SqliteConnection::new(
            conn,
            extensions,
            permit,
            Some(self.idle.clone()),
            Instant::now(),
        ))
    }

    fn take_idle(&self) -> Option<crate::connection::IdleConnection> {
        let mut idle = self.idle.lock();
        while let Some(candidate) = idle.pop_front() {
            let expired = self
                .config
                .idle_timeout
                .is_some_and(|timeout| candidate.last_used.elapsed() > timeout);
            if !expired {
                return Some(candidate);
            }
            self.stats.lock().expirations += 1;
        }
        None
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &SqliteConfig {
        &self.config
    }

    /// The number of connections that may be checked out at once.
    pub fn max_size(&self) -> usize {
        if self.config.path.is_memory() { 1 } else { self.config.max_connections }
    }

    /// Get pool statistics.
    pub fn stats(&self) -> PoolStats {
        self.stats.lock().clone()
    }

    /// Get the number of connections that can be checked out right now.
    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Get the number of idle connections in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }
}

impl std::fmt::Debug for SqlitePool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePool")
            .field("path", &self.config.path)
            .field("max_size", &self.max_size())
            .field("stats", &self.stats())
            .finish()
    }
}

/// Opens connections from a [`SqlitePool`] for a connection router.
#[derive(Debug, Clone)]
pub struct SqliteProvider {
    pool: SqlitePool,
}

impl SqliteProvider {
    /// Wrap a pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Build a pool from a configuration and wrap it.
    pub fn from_config(config: SqliteConfig) -> SqliteResult<Self> {
        Ok(Self::new(SqlitePool::new(config)?))
    }

    /// The wrapped pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Share as a router provider.
    pub fn shared(self) -> Arc<dyn ConnectionProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl ConnectionProvider for SqliteProvider {
    fn engine(&self) -> &str {
        "sqlite"
    }

    async fn connect(&self) -> QueryResult<Arc<dyn Connection>> {
        let connection = self.pool.get().await?;
        Ok(Arc::new(connection))
    }
}
