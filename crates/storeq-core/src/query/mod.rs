//! Query layer for storeq.
//!
//! A [`QuerySpec`](storeq_proto::QuerySpec) flows through the
//! [`ClauseBuilder`] into a [`RenderedClause`], which a storage backend
//! executes (SQLite through [`select_sql`]/[`count_sql`], the memory backend
//! through the [`PredicateEvaluator`]). Rows come back raw and are typed by
//! the hydrator. The [`QueryEngine`] ties this to the cache layer.

pub mod clause;
mod date;
mod engine;
pub mod filter;
pub mod hydrate;
pub mod key;
pub mod sql;

pub use clause::{
    escape_like, ClauseBuilder, OrderDirection, OrderSpec, Predicate, Projection, RenderedClause,
};
pub use engine::QueryEngine;
pub use filter::PredicateEvaluator;
pub use hydrate::{hydrate, hydrate_projected};
pub use key::{item_key, list_key, query_namespace};
pub use sql::{count_sql, select_sql, SqlStatement};
