//! Query engine configuration.

use std::time::Duration;

use serde::Deserialize;
use storeq_proto::spec::DEFAULT_NUMBER;

/// Configuration for a [`QueryEngine`](crate::QueryEngine).
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Use the cache layer at all. When false every query goes to storage.
    pub cache_enabled: bool,

    /// Lifetime of cache entries in milliseconds. None means until invalidated.
    pub cache_ttl_ms: Option<u64>,

    /// Page size applied when a spec has no `number`.
    pub default_number: i64,

    /// Upper bound on the page size. None means no cap.
    pub max_number: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            cache_enabled: true,
            cache_ttl_ms: None,
            default_number: DEFAULT_NUMBER,
            max_number: None,
        }
    }
}

impl EngineConfig {
    /// Create the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a configuration from JSON text. Missing keys take defaults.
    pub fn from_json_str(input: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(input)
    }

    /// Bypass the cache layer.
    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    /// Expire cache entries after `ttl`.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl_ms = Some(ttl.as_millis() as u64);
        self
    }

    /// Set the default page size.
    pub fn with_default_number(mut self, number: i64) -> Self {
        self.default_number = number;
        self
    }

    /// Cap the page size.
    pub fn with_max_number(mut self, max: u64) -> Self {
        self.max_number = Some(max);
        self
    }

    /// Cache entry lifetime.
    pub fn cache_ttl(&self) -> Option<Duration> {
        self.cache_ttl_ms.map(Duration::from_millis)
    }
}
