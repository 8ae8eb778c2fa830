//! Core error types.

use std::time::Duration;

use thiserror::Error;

/// Invalid entity schema descriptor.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SchemaError {
    /// Table, alias or column name is not a plain identifier.
    #[error("invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Schema declares no columns.
    #[error("table {0} has no columns")]
    NoColumns(String),

    /// Two columns share a name.
    #[error("duplicate column: {0}")]
    DuplicateColumn(String),

    /// Primary key does not name a declared column.
    #[error("primary key {0} is not a declared column")]
    MissingPrimaryKey(String),
}

/// A query input that could not be turned into a clause.
///
/// These never fail a query. The offending fragment is dropped and the
/// error is kept as a diagnostic on the rendered clause.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BuildError {
    /// Date query has an unusable shape.
    #[error("malformed date query {key}: {reason}")]
    MalformedDateQuery { key: String, reason: String },

    /// Date bound could not be parsed.
    #[error("invalid date in {key}: {value}")]
    InvalidDate { key: String, value: String },

    /// Date clause names a column that is not a datetime column.
    #[error("unknown date column in {key}: {column}")]
    UnknownDateColumn { key: String, column: String },

    /// Filter value cannot be coerced to the column type.
    #[error("invalid value for filter {key}: {reason}")]
    InvalidFilterValue { key: String, reason: String },
}

/// Errors from the storage backends.
#[derive(Debug, Error)]
pub enum StorageError {
    /// SQLite error.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// No pooled connection became free in time.
    #[error("timed out after {0:?} waiting for a connection")]
    PoolTimeout(Duration),

    /// Table is not registered with the backend.
    #[error("unknown table: {0}")]
    UnknownTable(String),

    /// Row data is unusable.
    #[error("invalid row: {0}")]
    InvalidRow(String),
}

/// Errors from the cache backends.
#[derive(Debug, Error)]
pub enum CacheError {
    /// Backend cannot be reached.
    #[error("cache unavailable: {0}")]
    Unavailable(String),

    /// Sled error.
    #[error("sled error: {0}")]
    Sled(#[from] sled::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization error.
    #[error("deserialization error: {0}")]
    Deserialization(String),
}

/// Errors returned by the query engine.
#[derive(Debug, Error)]
pub enum QueryError {
    /// Storage failed while executing a query or write.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// An entity could not be converted into the requested shape.
    #[error("shape error: {0}")]
    Shape(#[from] storeq_proto::Error),

    /// A filter column is not part of the schema.
    #[error("unknown column: {0}")]
    UnknownColumn(String),
}
