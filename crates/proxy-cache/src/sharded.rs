use crate::entry::{CacheEntry, CacheStats, Slot};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Number of shards. Must be a power of two for fast modulo via bitmask.
const NUM_SHARDS: usize = 64;
const SHARD_MASK: u64 = (NUM_SHARDS as u64) - 1;

type Shard = RwLock<HashMap<String, Slot>>;

/// Thread-safe response cache keyed by string, with per-entry expiry.
///
/// Keys are spread over 64 independent shards, each behind its own `RwLock`:
///
/// - **lookups** take a read lock on one shard and clone out an `Arc`, so a
///   reader never observes a half-written entry.
/// - **stores** take a write lock on one shard and swap the whole slot.
/// - **flush** write-locks the shards one at a time; concurrent lookups on
///   other shards keep going.
///
/// Expired entries are never returned. They stay in memory until
/// [`ResponseCache::purge_expired`] runs, which the proxy schedules
/// periodically.
pub struct ResponseCache {
    shards: Box<[Shard]>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl ResponseCache {
    pub fn new() -> Self {
        let shards: Vec<Shard> = (0..NUM_SHARDS)
            .map(|_| RwLock::new(HashMap::new()))
            .collect();

        Self {
            shards: shards.into_boxed_slice(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Hash a key and return the shard index.
    #[inline]
    fn shard_index(key: &str) -> usize {
        let hash = ahash::RandomState::with_seeds(1, 2, 3, 4).hash_one(key);
        (hash & SHARD_MASK) as usize
    }

    fn shard(&self, key: &str) -> &Shard {
        &self.shards[Self::shard_index(key)]
    }

    /// Look up a key. Returns `None` if the key is absent or its entry expired.
    pub fn get(&self, key: &str) -> Option<Arc<CacheEntry>> {
        let now = Instant::now();
        let found = self
            .shard(key)
            .read()
            .get(key)
            .filter(|slot| !slot.is_expired(now))
            .map(|slot| Arc::clone(&slot.entry));

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Store `entry` under `key`, replacing any previous entry. The entry
    /// stays visible for `ttl` from now.
    pub fn set(&self, key: impl Into<String>, entry: CacheEntry, ttl: Duration) {
        let key = key.into();
        let slot = Slot {
            entry: Arc::new(entry),
            expires_at: Instant::now() + ttl,
        };
        self.shard(&key).write().insert(key, slot);
    }

    /// Drop every entry. Returns how many entries were removed.
    pub fn flush(&self) -> usize {
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.write();
                let n = shard.len();
                shard.clear();
                n
            })
            .sum()
    }

    /// Physically remove entries whose expiry has passed. Returns the count.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        self.shards
            .iter()
            .map(|shard| {
                let mut shard = shard.write();
                let before = shard.len();
                shard.retain(|_, slot| !slot.is_expired(now));
                before - shard.len()
            })
            .sum()
    }

    /// Total number of stored entries across all shards, expired ones included.
    pub fn len(&self) -> usize {
        self.shards.iter().map(|s| s.read().len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.shards.iter().all(|s| s.read().is_empty())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            entries: self.len(),
        }
    }
}

impl Default for ResponseCache {
    fn default() -> Self {
        Self::new()
    }
}
