//! Boundary error types.

use thiserror::Error;

/// Errors raised while turning caller input into query types.
#[derive(Debug, Error)]
pub enum Error {
    /// The query specification input was not a key/value mapping.
    #[error("invalid query specification: {0}")]
    InvalidSpec(String),

    /// JSON text could not be parsed.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// An entity could not be converted into the requested item shape.
    #[error("item shape error: {0}")]
    Shape(String),
}
