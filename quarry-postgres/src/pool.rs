//! Connection pool for PostgreSQL.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use deadpool_postgres::{Manager, ManagerConfig, Pool, RecyclingMethod, Runtime};
use quarry_query::{Connection, ConnectionProvider, QueryResult};
use tokio_postgres::NoTls;
use tracing::{debug, info, instrument};

use crate::config::PgConfig;
use crate::connection::PgConnection;
use crate::error::PgResult;

/// A pool of PostgreSQL connections for one target.
#[derive(Clone)]
pub struct PgPool {
    inner: Pool,
    config: Arc<PgConfig>,
}

impl PgPool {
    /// Build a pool. Connections are opened lazily on first checkout.
    pub fn new(config: PgConfig) -> PgResult<Self> {
        let mgr = Manager::from_config(
            config.to_pg_config(),
            NoTls,
            ManagerConfig {
                recycling_method: RecyclingMethod::Fast,
            },
        );

        let pool = Pool::builder(mgr)
            .max_size(config.max_connections)
            .runtime(Runtime::Tokio1)
            .wait_timeout(Some(config.connect_timeout))
            .create_timeout(Some(config.connect_timeout))
            .recycle_timeout(Some(Duration::from_secs(5)))
            .build()?;

        info!(
            host = %config.host,
            port = %config.port,
            database = %config.database,
            max_connections = %config.max_connections,
            "PostgreSQL connection pool created"
        );

        Ok(Self {
            inner: pool,
            config: Arc::new(config),
        })
    }

    /// Check out a connection.
    #[instrument(skip(self), fields(database = %self.config.database))]
    pub async fn get(&self) -> PgResult<PgConnection> {
        debug!("Acquiring connection from pool");
        let client = self.inner.get().await?;
        Ok(PgConnection::new(client, self.config.extensions))
    }

    /// Get the current pool status.
    pub fn status(&self) -> PoolStatus {
        let status = self.inner.status();
        PoolStatus {
            available: status.available as usize,
            size: status.size as usize,
            max_size: status.max_size as usize,
            waiting: status.waiting,
        }
    }

    /// Get the pool configuration.
    pub fn config(&self) -> &PgConfig {
        &self.config
    }

    /// Close the pool and all connections.
    pub fn close(&self) {
        self.inner.close();
        info!("PostgreSQL connection pool closed");
    }
}

impl std::fmt::Debug for PgPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PgPool")
            .field("host", &self.config.host)
            .field("database", &self.config.database)
            .field("status", &self.status())
            .finish()
    }
}

/// Pool status information.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolStatus {
    /// Number of available (idle) connections.
    pub available: usize,
    /// Current total size of the pool.
    pub size: usize,
    /// Maximum size of the pool.
    pub max_size: usize,
    /// Number of tasks waiting for a connection.
    pub waiting: usize,
}

/// Opens connections from a [`PgPool`] for a connection router.
#[derive(Debug, Clone)]
pub struct PgProvider {
    pool: PgPool,
}

impl PgProvider {
    /// Wrap a pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Build a pool from a configuration and wrap it.
    pub fn from_config(config: PgConfig) -> PgResult<Self> {
        Ok(Self::new(PgPool::new(config)?))
    }

    /// The wrapped pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Share as a router provider.
    pub fn shared(self) -> Arc<dyn ConnectionProvider> {
        Arc::new(self)
    }
}

#[async_trait]
impl ConnectionProvider for PgProvider {
    fn engine(&self) -> &str {
        "postgres"
    }

    async fn connect(&self) -> QueryResult<Arc<dyn Connection>> {
        let connection = self.pool.get().await?;
        Ok(Arc::new(connection))
    }
}
