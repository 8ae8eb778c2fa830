//! In-process cache backend.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use super::{CacheBackend, CachedValue};
use crate::error::CacheError;

#[derive(Debug, Clone)]
struct MemoryEntry {
    value: CachedValue,
    inserted_at: Instant,
    expires_at: Option<Instant>,
}

impl MemoryEntry {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at.is_some_and(|at| now >= at)
    }
}

/// Cache backend over concurrent hash maps, one per group.
///
/// Groups are dropped wholesale on invalidation, so invalidating a group is
/// O(1) regardless of how many entries it holds.
#[derive(Debug, Default)]
pub struct MemoryCache {
    groups: DashMap<String, DashMap<String, MemoryEntry>>,
    max_entries_per_group: Option<usize>,
}

impl MemoryCache {
    /// Create an unbounded cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache that holds at most `max` entries per group.
    ///
    /// When a group is full, expired entries are purged first, then the
    /// oldest entry is evicted.
    pub fn with_max_entries_per_group(max: usize) -> Self {
        Self {
            groups: DashMap::new(),
            max_entries_per_group: Some(max.max(1)),
        }
    }

    /// Number of entries in a group, including expired ones not yet purged.
    pub fn group_len(&self, group: &str) -> usize {
        self.groups.get(group).map(|g| g.len()).unwrap_or(0)
    }

    fn make_room(&self, entries: &DashMap<String, MemoryEntry>, max: usize) {
        if entries.len() < max {
            return;
        }

        let now = Instant::now();
        entries.retain(|_, entry| !entry.is_expired(now));
        if entries.len() < max {
            return;
        }

        let oldest = entries
            .iter()
            .min_by_key(|entry| entry.inserted_at)
            .map(|entry| entry.key().clone());
        if let Some(key) = oldest {
            entries.remove(&key);
        }
    }
}

impl CacheBackend for MemoryCache {
    fn get(&self, group: &str, key: &str) -> Result<Option<CachedValue>, CacheError> {
        let Some(entries) = self.groups.get(group) else {
            return Ok(None);
        };

        let expired = match entries.get(key) {
            Some(entry) if entry.is_expired(Instant::now()) => true,
            Some(entry) => return Ok(Some(entry.value.clone())),
            None => return Ok(None),
        };
        if expired {
            entries.remove(key);
        }
        Ok(None)
    }

    fn set(
        &self,
        group: &str,
        key: &str,
        value: CachedValue,
        ttl: Option<Duration>,
    ) -> Result<(), CacheError> {
        let now = Instant::now();
        let entry = MemoryEntry {
            value,
            inserted_at: now,
            expires_at: ttl.map(|ttl| now + ttl),
        };

        let entries = self.groups.entry(group.to_string()).or_default();
        if let Some(max) = self.max_entries_per_group {
            if !entries.contains_key(key) {
                self.make_room(&entries, max);
            }
        }
        entries.insert(key.to_string(), entry);
        Ok(())
    }

    fn delete(&self, group: &str, key: &str) -> Result<(), CacheError> {
        if let Some(entries) = self.groups.get(group) {
            entries.remove(key);
        }
        Ok(())
    }

    fn invalidate_group(&self, group: &str) -> Result<(), CacheError> {
        self.groups.remove(group);
        Ok(())
    }
}
