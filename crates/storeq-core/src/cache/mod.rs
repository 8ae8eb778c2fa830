//! Group-scoped result cache.
//!
//! Backends store [`CachedValue`]s under `(group, key)`. The [`QueryCache`]
//! layer on top decides what goes where:
//!
//! - list and count results live in the `<group>:queries` namespace, keyed by
//!   the hash of the normalized query ([`crate::query::key::list_key`])
//! - items live in the `<group>` namespace, keyed by `<group>:<id>`
//!
//! A write to an entity drops its item entry and the whole query namespace,
//! since any cached list may have included (or should now include) the row.
//!
//! Backend failures never fail a query. They are logged, counted, and treated
//! as a miss (reads) or skipped (writes).

mod disk;
mod memory;

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Duration;

use rkyv::{Archive, Deserialize, Serialize};
use storeq_proto::{Entity, Value};
use tracing::{debug, warn};

use crate::error::CacheError;
use crate::query::key::{item_key, query_namespace};

pub use disk::{SledCache, SledCacheConfig};
pub use memory::MemoryCache;

/// A value stored in the cache.
#[derive(Debug, Clone, PartialEq, Archive, Serialize, Deserialize)]
pub enum CachedValue {
    /// Primary keys of a list query, in result order, plus the total if computed.
    List { ids: Vec<Value>, total: Option<u64> },
    /// A fully hydrated item.
    Item(Entity),
    /// Result of a count query.
    Count(u64),
}

/// Storage for cached values, partitioned by group.
pub trait CacheBackend: Send + Sync {
    /// Get a live entry.
    fn get(&self, group: &str, key: &str) -> Result<Option<CachedValue>, CacheError>;

    /// Store an entry, replacing any previous one.
    fn set(
        &self,
        group: &str,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError>;

    /// Remove one entry.
    fn delete(&self, group: &str, key: &str) -> Result<(), CacheError>;

    /// Remove every entry of a group.
    fn invalidate_group(&self, group: &str) -> Result<(), CacheError>;
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    writes: AtomicU64,
    invalidations: AtomicU64,
    errors: AtomicU64,
}

impl CacheStats {
    /// Get hit count.
    pub fn hits(&self) -> u64 {
        self.hits.load(AtomicOrdering::Relaxed)
    }

    /// Get miss count.
    pub fn misses(&self) -> u64 {
        self.misses.load(AtomicOrdering::Relaxed)
    }

    /// Get write count.
    pub fn writes(&self) -> u64 {
        self.writes.load(AtomicOrdering::Relaxed)
    }

    /// Get invalidation count (keys and groups).
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(AtomicOrdering::Relaxed)
    }

    /// Get backend error count.
    pub fn errors(&self) -> u64 {
        self.errors.load(AtomicOrdering::Relaxed)
    }

    /// Calculate hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let hits = self.hits() as f64;
        let total = hits + self.misses() as f64;
        if total > 0.0 {
            hits / total
        } else {
            0.0
        }
    }
}

/// The cache layer used by the query engine.
pub struct QueryCache {
    backend: Arc<dyn CacheBackend>,
    stats: CacheStats,
}

impl QueryCache {
    /// Wrap a backend.
    pub fn new(backend: impl CacheBackend + 'static) -> Self {
        Self::from_arc(Arc::new(backend))
    }

    /// Wrap a shared backend.
    pub fn from_arc(backend: Arc<dyn CacheBackend>) -> Self {
        Self {
            backend,
            stats: CacheStats::default(),
        }
    }

    /// An unbounded in-process cache.
    pub fn in_memory() -> Self {
        Self::new(MemoryCache::new())
    }

    /// Get the statistics.
    pub fn stats(&self) -> &CacheStats {
        &self.stats
    }

    /// Cached ids and total of a list query.
    pub fn get_list(&self, group: &str, key: &str) -> Option<(Vec<Value>, Option<u64>)> {
        match self.lookup(&query_namespace(group), key)? {
            CachedValue::List { ids, total } => Some((ids, total)),
            _ => None,
        }
    }

    /// Store the ids and total of a list query.
    pub fn set_list(&self, group: &str, key: &str, ids: Vec<Value>, total: Option<u64>, ttl: Option<Duration>) {
        self.store(&query_namespace(group), key, CachedValue::List { ids, total }, ttl);
    }

    /// Cached result of a count query.
    pub fn get_count(&self, group: &str, key: &str) -> Option<u64> {
        match self.lookup(&query_namespace(group), key)? {
            CachedValue::Count(count) => Some(count),
            _ => None,
        }
    }

    /// Store the result of a count query.
    pub fn set_count(&self, group: &str, key: &str, count: u64, ttl: Option<Duration>) {
        self.store(&query_namespace(group), key, CachedValue::Count(count), ttl);
    }

    /// Cached item by primary key.
    pub fn get_item(&self, group: &str, id: &Value) -> Option<Entity> {
        match self.lookup(group, &item_key(group, id))? {
            CachedValue::Item(entity) => Some(entity),
            _ => None,
        }
    }

    /// Store an item under its primary key.
    pub fn set_item(&self, group: &str, entity: &Entity, ttl: Option<Duration>) {
        let key = item_key(group, entity.id());
        self.store(group, &key, CachedValue::Item(entity.clone()), ttl);
    }

    /// Drop one item.
    pub fn invalidate_item(&self, group: &str, id: &Value) {
        let key = item_key(group, id);
        self.stats.invalidations.fetch_add(1, AtomicOrdering::Relaxed);
        if let Err(e) = self.backend.delete(group, &key) {
            self.record_error("delete", group, &e);
        }
    }

    /// Drop every list and count entry of a group.
    pub fn invalidate_queries(&self, group: &str) {
        let namespace = query_namespace(group);
        self.stats.invalidations.fetch_add(1, AtomicOrdering::Relaxed);
        if let Err(e) = self.backend.invalidate_group(&namespace) {
            self.record_error("invalidate", &namespace, &e);
        }
    }

    /// Drop everything cached for a group: items, lists and counts.
    pub fn invalidate_group(&self, group: &str) {
        debug!(group = %group, "invalidating cache group");
        self.invalidate_queries(group);
        self.stats.invalidations.fetch_add(1, AtomicOrdering::Relaxed);
        if let Err(e) = self.backend.invalidate_group(group) {
            self.record_error("invalidate", group, &e);
        }
    }

    /// Invalidate after a write to the item with primary key `id`.
    pub fn invalidate_after_write(&self, group: &str, id: &Value) {
        debug!(group = %group, id = %id, "invalidating after write");
        self.invalidate_item(group, id);
        self.invalidate_queries(group);
    }

    fn lookup(&self, namespace: &str, key: &str) -> Option<CachedValue> {
        match self.backend.get(namespace, key) {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, AtomicOrdering::Relaxed);
                Some(value)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                None
            }
            Err(e) => {
                self.stats.misses.fetch_add(1, AtomicOrdering::Relaxed);
                self.record_error("get", namespace, &e);
                None
            }
        }
    }

    fn store(&self, namespace: &str, key: &str, value: CachedValue, ttl: Option<Duration>) {
        match self.backend.set(namespace, key, value, ttl) {
            Ok(()) => {
                self.stats.writes.fetch_add(1, AtomicOrdering::Relaxed);
            }
            Err(e) => self.record_error("set", namespace, &e),
        }
    }

    fn record_error(&self, op: &str, namespace: &str, error: &CacheError) {
        self.stats.errors.fetch_add(1, AtomicOrdering::Relaxed);
        warn!(op = %op, namespace = %namespace, error = %error, "cache backend error, bypassing cache");
    }
}
