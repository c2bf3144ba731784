//! # quarry-query
//!
//! The dialect-agnostic core of Quarry:
//! - Filter compilation from `column[.subcolumn]*[__operator]` keys to SQL predicates
//! - Per-field encoders (JSON documents, native arrays)
//! - Connection routing over simple and primary/replica topologies
//! - Repositories with capped-count pagination
//!
//! Drivers live in `quarry-postgres` and `quarry-sqlite`.
//!
//! ## Filters
//!
//! ```rust
//! use quarry_query::{Dialect, Query, filters};
//! use quarry_query::filter::{FilterCompiler, NoCustomFilters};
//!
//! let query = FilterCompiler::new(Dialect::GENERIC)
//!     .filter_by(
//!         Query::table(Dialect::GENERIC, "questions"),
//!         &filters! { "id__eq" => vec![2002, 2003], "content__match" => "50%" },
//!         &NoCustomFilters,
//!     )
//!     .unwrap();
//!
//! let (sql, params) = query.to_select_sql();
//! assert_eq!(
//!     sql,
//!     r#"SELECT * FROM "questions" WHERE ("id" IN (?, ?)) AND (LOWER("content") LIKE LOWER(?) ESCAPE '\')"#
//! );
//! assert_eq!(params.len(), 3);
//! ```
//!
//! ## Sessions
//!
//! ```rust,ignore
//! let router = Arc::new(quarry_postgres::router_from_config(&DatabaseConfig::from_env()?)?);
//! let mut session = router.session();
//!
//! // Reads inside a read-write scope stay on the primary.
//! let mut tx = session.transaction().await?;
//! let id = questions.create(&mut tx, record).await?;
//! let fresh = questions.find_by(&mut tx, filters! { "id" => id.as_str() }).await?;
//! tx.commit().await?;
//! ```

pub mod connection;
pub mod dialect;
pub mod encoder;
pub mod error;
pub mod filter;
pub mod logging;
pub mod pagination;
pub mod query;
pub mod repository;
pub mod sql;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod transaction;
pub mod types;
pub mod value;

pub use connection::{
    Connection, ConnectionProvider, ConnectionRouter, ConnectionState, DatabaseConfig, Mode, Scoped, Session,
    Target, TargetConfig, Topology, TopologyMode,
};
pub use dialect::Dialect;
pub use encoder::{Encoder, EncoderRegistry, JsonEncoder, PgArrayEncoder};
pub use error::{ErrorCode, ErrorContext, QueryError, QueryResult};
pub use filter::{CustomFilters, FilterCompiler, FilterExpression, FilterSource, Operator};
pub use pagination::{COUNT_CAP, CountMetadata, Pagination};
pub use query::Query;
pub use repository::{Action, AuthContext, IndexOptions, IndexResult, Model, Repository, ScopeRule, SystemAuth};
pub use sql::{SqlBuilder, SqlFragment};
pub use transaction::{AccessMode, IsolationLevel, Transaction, TransactionConfig};
pub use types::{OrderByField, SortOrder, SortSpec};
pub use value::{Record, Row, Shape, Value};

pub use logging::init as init_logging;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::connection::{ConnectionRouter, DatabaseConfig, Mode, Session};
    pub use crate::encoder::{Encoder, EncoderRegistry, JsonEncoder, PgArrayEncoder};
    pub use crate::error::{ErrorCode, QueryError, QueryResult};
    pub use crate::filter::{CustomFilters, FilterExpression, FilterSource};
    pub use crate::filters;
    pub use crate::pagination::{CountMetadata, Pagination};
    pub use crate::query::Query;
    pub use crate::repository::{Action, AuthContext, IndexOptions, IndexResult, Model, Repository, ScopeRule, SystemAuth};
    pub use crate::transaction::{IsolationLevel, Transaction, TransactionConfig};
    pub use crate::types::{OrderByField, SortOrder, SortSpec};
    pub use crate::value::{Record, Row, Value};
}
