//! Storage backends.
//!
//! A backend executes [`RenderedClause`]s and the single-row writes of the
//! query engine. Rows travel as raw `(column, value)` pairs; typing them is
//! the hydrator's job.

mod config;
mod memory;
mod pool;
mod sqlite;

pub use config::SqliteConfig;
pub use memory::MemoryStorage;
pub use pool::{ConnectionPool, PooledConnection};
pub use sqlite::SqliteStorage;

use storeq_proto::Value;

use crate::error::StorageError;
use crate::query::RenderedClause;
use crate::schema::EntitySchema;

/// A row as returned by a backend.
pub type RawRow = Vec<(String, Value)>;

/// A relational store the query engine can run against.
pub trait Storage: Send + Sync {
    /// Fetch the rows matching a clause, ordered and paginated.
    fn select(&self, clause: &RenderedClause) -> Result<Vec<RawRow>, StorageError>;

    /// Count the rows matching a clause, ignoring ordering and pagination.
    fn count(&self, clause: &RenderedClause) -> Result<u64, StorageError>;

    /// Insert a row. Returns its primary key, assigned by the backend if
    /// the row has none.
    fn insert(&self, schema: &EntitySchema, row: RawRow) -> Result<Value, StorageError>;

    /// Apply changes to the row with primary key `id`. Returns false if no
    /// such row exists.
    fn update(&self, schema: &EntitySchema, id: &Value, changes: RawRow) -> Result<bool, StorageError>;

    /// Delete the row with primary key `id`. Returns false if no such row exists.
    fn delete(&self, schema: &EntitySchema, id: &Value) -> Result<bool, StorageError>;
}
