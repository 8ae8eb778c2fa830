//! Storage configuration.

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for the SQLite storage backend.
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Path to the database file.
    pub path: PathBuf,

    /// Use a private in-memory database.
    pub in_memory: bool,

    /// Number of pooled connections. Forced to 1 for in-memory databases,
    /// since each connection would otherwise see its own empty database.
    pub pool_size: usize,

    /// How long `acquire` waits for a free connection.
    pub acquire_timeout: Duration,

    /// How long SQLite retries on a locked database.
    pub busy_timeout: Duration,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./storeq.db"),
            in_memory: false,
            pool_size: 4,
            acquire_timeout: Duration::from_secs(30),
            busy_timeout: Duration::from_secs(5),
        }
    }
}

impl SqliteConfig {
    /// Create a new configuration with the given database file.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create an in-memory configuration for testing.
    pub fn in_memory() -> Self {
        Self {
            path: PathBuf::from(":memory:"),
            in_memory: true,
            ..Default::default()
        }
    }

    /// Set the pool size.
    pub fn with_pool_size(mut self, size: usize) -> Self {
        self.pool_size = size;
        self
    }

    /// Set the acquire timeout.
    pub fn with_acquire_timeout(mut self, timeout: Duration) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    /// Set the busy timeout.
    pub fn with_busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }

    /// Pool size actually used.
    pub(crate) fn effective_pool_size(&self) -> usize {
        if self.in_memory {
            1
        } else {
            self.pool_size.max(1)
        }
    }
}
