//! Schema descriptors.
//!
//! A descriptor names the table, its columns with their semantic types and
//! search / sort flags, the primary key, and the cache group of one entity type.

mod column;
mod entity;

pub use column::{ColumnDef, ColumnType};
pub use entity::EntitySchema;
