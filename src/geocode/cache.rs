use crate::types::{AddressData, GeoPosition};
use std::collections::HashMap;
use tokio::time::{Duration, Instant};

/// Cache key: coordinates rounded to `precision` decimals (3 = ~100 m)
pub fn cache_key(position: &GeoPosition, precision: usize) -> String {
    format!(
        "{:.*},{:.*}",
        precision,
        position.lat(),
        precision,
        position.lon()
    )
}

#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub key: String,
    pub data: AddressData,
    /// Insert time, for TTL expiry
    pub timestamp: Instant,
    pub last_accessed: Instant,
    /// Lookup sequence number that produced this entry
    pub seq: u64,
}

/// Outcome of `GeocodeCache::insert`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    Stored { evicted: usize },
    /// Existing entry came from a newer lookup
    Stale,
}

/// Bounded reverse-geocode cache
///
/// # Eviction
/// - Absolute TTL: expired entries count as absent and are purged lazily
/// - Capacity: inserting a new key at `max_size` first purges expired
///   entries, then, if still full, removes the least-recently-accessed
///   quarter (at least one)
pub struct GeocodeCache {
    entries: HashMap<String, CacheEntry>,
    max_size: usize,
    ttl: Duration,
}

impl GeocodeCache {
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        GeocodeCache {
            entries: HashMap::with_capacity(max_size),
            max_size,
            ttl,
        }
    }

    /// Fresh entry for `key`, refreshing its access time. Expired entries are removed.
    pub fn get(&mut self, key: &str) -> Option<AddressData> {
        let now = Instant::now();
        let expired = match self.entries.get_mut(key) {
            None => return None,
            Some(entry) if now.duration_since(entry.timestamp) > self.ttl => true,
            Some(entry) => {
                entry.last_accessed = now;
                return Some(entry.data.clone());
            }
        };

        if expired {
            self.entries.remove(key);
        }
        None
    }

    /// Store `data` for `key` unless the current entry came from a newer lookup.
    pub fn insert(&mut self, key: String, data: AddressData, seq: u64) -> InsertOutcome {
        if self.max_size == 0 {
            return InsertOutcome::Stored { evicted: 0 };
        }

        let now = Instant::now();
        if let Some(existing) = self.entries.get_mut(&key) {
            if existing.seq > seq {
                return InsertOutcome::Stale;
            }
            existing.data = data;
            existing.timestamp = now;
            existing.last_accessed = now;
            existing.seq = seq;
            return InsertOutcome::Stored { evicted: 0 };
        }

        let mut evicted = 0;
        if self.entries.len() >= self.max_size {
            evicted += self.purge_expired();
        }
        if self.entries.len() >= self.max_size {
            evicted += self.evict_least_recent();
        }

        self.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                data,
                timestamp: now,
                last_accessed: now,
                seq,
            },
        );
        InsertOutcome::Stored { evicted }
    }

    /// Drop the least-recently-accessed quarter of entries
    fn evict_least_recent(&mut self) -> usize {
        let count = (self.entries.len() / 4).max(1);

        let mut by_access: Vec<(Instant, String)> = self
            .entries
            .values()
            .map(|entry| (entry.last_accessed, entry.key.clone()))
            .collect();
        by_access.sort();

        for (_, key) in by_access.into_iter().take(count) {
            self.entries.remove(&key);
        }
        count
    }

    /// Remove every expired entry; returns how many were dropped
    fn purge_expired(&mut self) -> usize {
        let now = Instant::now();
        let ttl = self.ttl;
        let before = self.entries.len();
        self.entries
            .retain(|_, entry| now.duration_since(entry.timestamp) <= ttl);
        before - self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }
}
