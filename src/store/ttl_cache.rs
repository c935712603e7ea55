//! A TTL-bounded key-value cache.
//!
//! Entries silently expire `ttl` after their last write. Reads never observe
//! expired entries; stale map slots are reclaimed by [`TtlCache::purge_expired`],
//! which callers invoke opportunistically (the sweep tick does it for the
//! process-wide caches) to prevent unbounded growth.
//!
//! The cache has no interior locking. Each logical owner wraps its cache in
//! whatever synchronization its access pattern needs; most owners are either
//! single-writer or idempotent-replacement, which the surrounding mutex or
//! exclusive ownership already covers.

use std::collections::HashMap;
use std::hash::Hash;

use chrono::{DateTime, Duration, Utc};

/// A key-value cache whose entries expire a fixed duration after insertion.
#[derive(Debug, Clone)]
pub struct TtlCache<K, V> {
    ttl: Duration,
    entries: HashMap<K, (V, DateTime<Utc>)>,
}

impl<K: Eq + Hash, V> TtlCache<K, V> {
    /// Creates an empty cache with the given time-to-live.
    pub fn new(ttl: Duration) -> Self {
        TtlCache {
            ttl,
            entries: HashMap::new(),
        }
    }

    /// The configured time-to-live.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Inserts a value, stamping it with the current time.
    pub fn insert(&mut self, key: K, value: V) {
        self.insert_at(key, value, Utc::now());
    }

    /// Inserts a value with an explicit write timestamp (for tests and the
    /// sweep, which already carry a `now`).
    pub fn insert_at(&mut self, key: K, value: V, now: DateTime<Utc>) {
        self.entries.insert(key, (value, now));
    }

    /// Returns the live value for `key`, if any.
    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_at(key, Utc::now())
    }

    /// Returns the value for `key` if it was written within the TTL window
    /// ending at `now`.
    pub fn get_at(&self, key: &K, now: DateTime<Utc>) -> Option<&V> {
        self.entries
            .get(key)
            .filter(|(_, written)| now - *written <= self.ttl)
            .map(|(value, _)| value)
    }

    /// True if a live entry exists for `key`.
    pub fn contains(&self, key: &K) -> bool {
        self.get(key).is_some()
    }

    /// Removes the entry for `key`, returning its value if it was live.
    pub fn remove(&mut self, key: &K) -> Option<V> {
        let now = Utc::now();
        self.entries
            .remove(key)
            .filter(|(_, written)| now - *written <= self.ttl)
            .map(|(value, _)| value)
    }

    /// Drops every expired entry. Returns the number removed.
    pub fn purge_expired(&mut self) -> usize {
        self.purge_expired_at(Utc::now())
    }

    /// Drops entries expired as of `now`. Returns the number removed.
    pub fn purge_expired_at(&mut self, now: DateTime<Utc>) -> usize {
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries.retain(|_, (_, written)| now - *written <= ttl);
        before - self.entries.len()
    }

    /// Number of slots currently held, including not-yet-purged expired ones.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
