//! Persistent cache backend on sled.
//!
//! Each group is a sled tree named `cache:<group>`, so invalidating a group is
//! a single `drop_tree`. Entries are rkyv-encoded records carrying their
//! expiry time; expired records are removed lazily on read.

use std::path::PathBuf;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rkyv::{Archive, Deserialize, Serialize};
use tracing::{debug, info};

use super::{CacheBackend, CachedValue};
use crate::error::CacheError;

const TREE_PREFIX: &str = "cache:";

/// Configuration for the sled cache backend.
#[derive(Debug, Clone)]
pub struct SledCacheConfig {
    /// Path to the cache directory.
    pub path: PathBuf,

    /// Page cache capacity in bytes.
    pub cache_capacity: u64,

    /// Flush interval in milliseconds. None means flush on every write.
    pub flush_every_ms: Option<u64>,

    /// Temporary database (deleted on drop).
    pub temporary: bool,
}

impl Default for SledCacheConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("./storeq_cache"),
            cache_capacity: 64 * 1024 * 1024, // 64MB
            flush_every_ms: Some(1000),
            temporary: false,
        }
    }
}

impl SledCacheConfig {
    /// Create a new configuration with the given path.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            ..Default::default()
        }
    }

    /// Create a temporary configuration for testing.
    pub fn temporary() -> Self {
        Self {
            path: PathBuf::from(""),
            temporary: true,
            ..Default::default()
        }
    }

    /// Set the page cache capacity.
    pub fn with_cache_capacity(mut self, bytes: u64) -> Self {
        self.cache_capacity = bytes;
        self
    }

    /// Convert to sled configuration.
    pub(crate) fn to_sled_config(&self) -> sled::Config {
        let mut config = sled::Config::new().cache_capacity(self.cache_capacity);

        if self.temporary {
            config = config.temporary(true);
        } else {
            config = config.path(&self.path);
        }

        if let Some(ms) = self.flush_every_ms {
            config = config.flush_every_ms(Some(ms));
        }

        config
    }
}

/// A stored entry with its absolute expiry (microseconds since the epoch).
#[derive(Debug, Clone, Archive, Serialize, Deserialize)]
struct CacheRecord {
    value: CachedValue,
    expires_at: Option<u64>,
}

impl CacheRecord {
    fn to_bytes(&self) -> Result<Vec<u8>, CacheError> {
        rkyv::to_bytes::<rkyv::rancor::Error>(self)
            .map(|bytes| bytes.to_vec())
            .map_err(|e| CacheError::Serialization(e.to_string()))
    }

    fn from_bytes(bytes: &[u8]) -> Result<Self, CacheError> {
        // sled values carry no alignment guarantee
        let mut aligned = rkyv::util::AlignedVec::<16>::with_capacity(bytes.len());
        aligned.extend_from_slice(bytes);
        rkyv::from_bytes::<Self, rkyv::rancor::Error>(&aligned)
            .map_err(|e| CacheError::Deserialization(e.to_string()))
    }

    fn is_expired(&self, now: u64) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Cache backend that survives process restarts.
pub struct SledCache {
    db: sled::Db,
}

impl SledCache {
    /// Open or create a cache database.
    pub fn open(config: SledCacheConfig) -> Result<Self, CacheError> {
        let db = config.to_sled_config().open()?;
        info!(path = ?config.path, temporary = config.temporary, "opened sled cache");
        Ok(Self { db })
    }

    /// Flush pending writes to disk.
    pub fn flush(&self) -> Result<(), CacheError> {
        self.db.flush()?;
        Ok(())
    }

    fn tree(&self, group: &str) -> Result<sled::Tree, CacheError> {
        Ok(self.db.open_tree(format!("{}{}", TREE_PREFIX, group))?)
    }
}

impl CacheBackend for SledCache {
    fn get(&self, group: &str, key: &str) -> Result<Option<CachedValue>, CacheError> {
        let tree = self.tree(group)?;
        let Some(bytes) = tree.get(key.as_bytes())? else {
            return Ok(None);
        };

        let record = match CacheRecord::from_bytes(&bytes) {
            Ok(record) => record,
            Err(e) => {
                debug!(group = %group, key = %key, error = %e, "dropping undecodable cache record");
                tree.remove(key.as_bytes())?;
                return Ok(None);
            }
        };

        if record.is_expired(current_micros()) {
            tree.remove(key.as_bytes())?;
            return Ok(None);
        }
        Ok(Some(record.value))
    }

    fn set(
        &self,
        group: &str,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let record = CacheRecord {
            value,
            expires_at: ttl.map(|ttl| current_micros().saturating_add(ttl.as_micros() as u64)),
        };
        self.tree(group)?.insert(key.as_bytes(), record.to_bytes()?)?;
        Ok(())
    }

    fn delete(&self, group: &str, key: &str) -> Result<(), CacheError> {
        self.tree(group)?.remove(key.as_bytes())?;
        Ok(())
    }

    fn invalidate_group(&self, group: &str) -> Result<(), CacheError> {
        self.db.drop_tree(format!("{}{}", TREE_PREFIX, group))?;
        Ok(())
    }
}

fn current_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
