//! # Quarry
//!
//! A data-access layer for SQL repositories.
//!
//! Quarry provides:
//! - A filter compiler turning `column[.subcolumn]*[__operator]` keys into SQL predicates
//! - Per-field encoders for JSON documents and native arrays
//! - Connection routing over a single database or a primary with replicas
//! - Repositories with capped-count pagination
//! - PostgreSQL and SQLite providers
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use quarry::prelude::*;
//!
//! struct Questions;
//!
//! impl Model for Questions {
//!     const TABLE_NAME: &'static str = "questions";
//!
//!     fn encoders(registry: &mut EncoderRegistry) {
//!         registry.register("custom", JsonEncoder);
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> QueryResult<()> {
//!     let router = Arc::new(quarry::sqlite::router_from_config(&DatabaseConfig::from_env()?)?);
//!     let mut session = router.session();
//!     let questions = Repository::<Questions>::new(Arc::new(SystemAuth));
//!
//!     let page = questions
//!         .index(&mut session, filters! { "content__match" => "rust" }, IndexOptions::new().items_per_page(20))
//!         .await?;
//!     println!("{} of {:?}", page.rows.len(), page.metadata);
//!     Ok(())
//! }
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub use quarry_query::*;

/// PostgreSQL provider.
#[cfg(feature = "postgres")]
#[cfg_attr(docsrs, doc(cfg(feature = "postgres")))]
pub mod postgres {
    pub use quarry_postgres::*;
}

/// SQLite provider.
#[cfg(feature = "sqlite")]
#[cfg_attr(docsrs, doc(cfg(feature = "sqlite")))]
pub mod sqlite {
    pub use quarry_sqlite::*;
}

/// Build a router for whichever engine the configuration names.
///
/// Fails with `UnsupportedDialect` when the engine's driver feature is not
/// enabled.
pub fn router_from_config(config: &DatabaseConfig) -> QueryResult<ConnectionRouter> {
    let engine = config.validate()?.engine()?;
    match engine {
        #[cfg(feature = "postgres")]
        "postgres" => quarry_postgres::router_from_config(config),
        #[cfg(feature = "sqlite")]
        "sqlite" => quarry_sqlite::router_from_config(config),
        other => Err(QueryError::unsupported_dialect(other)),
    }
}
