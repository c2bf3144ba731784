//! # quarry-postgres
//!
//! PostgreSQL provider for Quarry routers.
//!
//! This crate provides:
//! - Connection pools on `deadpool-postgres`, one per database target
//! - Prepared statement caching per pooled connection
//! - Parameter binding driven by the server's inferred placeholder types
//! - Optional native decoding of arrays (`pg_array`) and JSON (`pg_json`)
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quarry_query::DatabaseConfig;
//!
//! let config = DatabaseConfig::from_toml_str(r#"
//!     mode = "cluster"
//!     extensions = ["pg_array", "pg_json"]
//!     master = { uri = "postgres://app@primary/forum", max_connections = 20 }
//!     replica = { uri = "postgres://app@replica/forum" }
//! "#)?;
//!
//! let router = Arc::new(quarry_postgres::router_from_config(&config)?);
//! let mut session = router.session();
//! ```

pub mod config;
pub mod connection;
pub mod error;
pub mod pool;
pub mod types;

use quarry_query::connection::Targets;
use quarry_query::{ConnectionRouter, DatabaseConfig, QueryError, QueryResult};

pub use config::{PG_ARRAY, PG_JSON, PgConfig, PgExtensions};
pub use connection::PgConnection;
pub use error::{PgError, PgResult};
pub use pool::{PgPool, PgProvider, PoolStatus};

/// Build a router over PostgreSQL pools from a database configuration.
///
/// The configuration is validated first; every target must use a
/// `postgres://` URI and every extension name must be known.
pub fn router_from_config(config: &DatabaseConfig) -> QueryResult<ConnectionRouter> {
    let targets = config.validate()?;
    let engine = targets.engine()?;
    if engine != "postgres" {
        return Err(QueryError::config(format!(
            "quarry-postgres cannot open `{}` targets",
            engine
        )));
    }
    let extensions = PgExtensions::from_config(config)?;

    match targets {
        Targets::Simple(target) => {
            let provider = PgProvider::from_config(PgConfig::from_target(&target, extensions)?)?;
            Ok(ConnectionRouter::simple(provider.shared()))
        }
        Targets::Cluster { master, replica } => {
            let primary = PgProvider::from_config(PgConfig::from_target(&master, extensions)?)?;
            let replica = PgProvider::from_config(PgConfig::from_target(&replica, extensions)?)?;
            ConnectionRouter::cluster(primary.shared(), vec![replica.shared()])
        }
    }
}

/// Prelude for convenient imports.
pub mod prelude {
    pub use crate::config::{PgConfig, PgExtensions};
    pub use crate::connection::PgConnection;
    pub use crate::error::{PgError, PgResult};
    pub use crate::pool::{PgPool, PgProvider};
    pub use crate::router_from_config;
}
