//! Connections, topology configuration and connection routing.
//!
//! Drivers implement [`Connection`] and [`ConnectionProvider`]. A
//! [`ConnectionRouter`] holds the providers for one topology (a single database,
//! or a primary with replicas) and hands out connections to a [`Session`], the
//! per-unit-of-work context that tracks which connection is in scope.

mod config;
mod env;
mod router;
mod session;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::QueryResult;
use crate::value::{Row, Value};

pub use config::{ConfigError, DEFAULT_MAX_CONNECTIONS, DatabaseConfig, TargetConfig, Targets, TopologyMode};
pub use env::{EnvExpander, EnvSource, MapEnvSource, StdEnvSource, expand_env};
pub use router::{ConnectionRouter, Mode, Target, Topology};
pub use session::{ConnectionState, Scoped, Session};

/// A live database connection.
///
/// All statements use the dialect's placeholder syntax and receive their
/// parameters as [`Value`]s.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Engine name (`"postgres"` or `"sqlite"`).
    fn engine(&self) -> &str;

    /// Run a statement that returns rows.
    async fn query(&self, sql: &str, params: &[Value]) -> QueryResult<Vec<Row>>;

    /// Run a statement and return the number of affected rows.
    async fn execute(&self, sql: &str, params: &[Value]) -> QueryResult<u64>;

    /// Run an `INSERT` and return the generated value of `primary_key`.
    async fn insert(&self, sql: &str, params: &[Value], primary_key: &str) -> QueryResult<Value>;

    /// Run one or more parameterless statements.
    async fn batch_execute(&self, sql: &str) -> QueryResult<()>;
}

/// Opens connections to one database target.
#[async_trait]
pub trait ConnectionProvider: Send + Sync {
    /// Engine name of the connections this provider opens.
    fn engine(&self) -> &str;

    /// Open (or check out) a connection.
    async fn connect(&self) -> QueryResult<Arc<dyn Connection>>;
}
