//! SQLite provider for Quarry routers.
//!
//! This crate provides SQLite support for Quarry using `tokio-rusqlite` for
//! asynchronous access.
//!
//! # Features
//!
//! - Pooled file connections with idle reuse
//! - In-memory databases shared by every session of a router
//! - Optional JSON decoding of TEXT cells (`json` extension)
//! - Constraint failures classified by extended result code
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use quarry_query::{DatabaseConfig, Mode};
//!
//! # async fn run() -> quarry_query::QueryResult<()> {
//! let config = DatabaseConfig::simple("sqlite:///var/lib/forum.db").with_extension("json");
//! let router = Arc::new(quarry_sqlite::router_from_config(&config)?);
//!
//! let mut session = router.session();
//! let scope = session.client(Mode::Read).await?;
//! let rows = scope.connection().query("SELECT 1 AS one", &[]).await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod types;

use quarry_query::connection::Targets;
use quarry_query::{ConnectionRouter, DatabaseConfig, QueryError, QueryResult};

pub use config::{DatabasePath, JournalMode, SqliteConfig, SqliteExtensions, SynchronousMode};
pub use connection::SqliteConnection;
pub use error::{SqliteError, SqliteResult};
pub use pool::{PoolStats, SqlitePool, SqliteProvider};

/// Build a router over SQLite pools from a database configuration.
///
/// The configuration is validated first; every target must use a SQLite URI
/// and every extension name must be known.
pub fn router_from_config(config: &DatabaseConfig) -> QueryResult<ConnectionRouter> {
    let targets = config.validate()?;
    let engine = targets.engine()?;
    if engine != "sqlite" {
        return Err(QueryError::config(format!(
            "quarry-sqlite cannot open `{}` targets",
            engine
        )));
    }
    let extensions = SqliteExtensions::from_config(config)?;

    match targets {
        Targets::Simple(target) => {
            let provider = SqliteProvider::from_config(SqliteConfig::from_target(&target, extensions)?)?;
            Ok(ConnectionRouter::simple(provider.shared()))
        }
        Targets::Cluster { master, replica } => {
            let primary = SqliteProvider::from_config(SqliteConfig::from_target(&master, extensions)?)?;
            let replica = SqliteProvider::from_config(SqliteConfig::from_target(&replica, extensions)?)?;
            ConnectionRouter::cluster(primary.shared(), vec![replica.shared()])
        }
    }
}
