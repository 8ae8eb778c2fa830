//! storeq core - clause building, caching and query execution.
//!
//! This crate turns declarative list queries over entity tables into
//! parameterized SQL, caches their results by a normalized key, and hydrates
//! the returned rows into typed entities.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use storeq_core::{ColumnDef, EngineConfig, EntitySchema, MemoryStorage, QueryCache, QueryEngine};
//! use storeq_core::proto::{QuerySpec, Value};
//!
//! let schema = EntitySchema::new("notes", "id")
//!     .with_column(ColumnDef::integer("id").sortable())
//!     .with_column(ColumnDef::text("title").searchable());
//! let storage = MemoryStorage::new().with_table(&schema);
//! let engine = QueryEngine::new(
//!     schema,
//!     Arc::new(storage),
//!     Arc::new(QueryCache::in_memory()),
//!     EngineConfig::default(),
//! )
//! .unwrap();
//!
//! engine
//!     .add_item(vec![("title".to_string(), Value::from("hello"))])
//!     .unwrap();
//! let result = engine.query(&QuerySpec::new().with_search("hell")).unwrap();
//! assert_eq!(result.len(), 1);
//! ```

#[cfg(feature = "mimalloc")]
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

pub mod cache;
pub mod config;
pub mod error;
pub mod query;
pub mod schema;
pub mod storage;

pub use cache::{
    CacheBackend, CacheStats, CachedValue, MemoryCache, QueryCache, SledCache, SledCacheConfig,
};
pub use config::EngineConfig;
pub use error::{BuildError, CacheError, QueryError, SchemaError, StorageError};
pub use query::{
    ClauseBuilder, OrderDirection, OrderSpec, Predicate, Projection, QueryEngine, RenderedClause,
};
pub use schema::{ColumnDef, ColumnType, EntitySchema};
pub use storage::{MemoryStorage, RawRow, SqliteConfig, SqliteStorage, Storage};

/// Re-export protocol types.
pub use storeq_proto as proto;
