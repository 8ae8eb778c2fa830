//! storeq protocol types.
//!
//! This crate defines the caller-facing types of the storeq query layer.
//!
//! # Modules
//!
//! - [`value`] - Runtime values for parameters, rows and entities
//! - [`spec`] - The query specification and its JSON form
//! - [`date`] - Typed builders for date query inputs
//! - [`result`] - Hydrated entities and query results
//! - [`error`] - Boundary error types
//!
//! # Example
//!
//! ```
//! use storeq_proto::QuerySpec;
//!
//! let spec = QuerySpec::from_json_str(r#"{ "order_id": 5, "fields": "all" }"#).unwrap();
//! assert!(spec.filters.contains_key("order_id"));
//! ```

pub mod date;
pub mod error;
pub mod result;
pub mod spec;
pub mod value;

pub use date::{DateBound, DateClause, DateQuery, DateRange, Relation};
pub use error::Error;
pub use result::{Entity, QueryResult};
pub use spec::{Fields, FilterValue, OrderBy, QuerySpec};
pub use value::Value;
