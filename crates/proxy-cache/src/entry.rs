use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use std::time::Instant;

/// Snapshot of an upstream response as stored in the cache.
///
/// Owns its headers and body outright, so it outlives the response it was
/// taken from and can be handed to any number of readers.
#[derive(Clone, Debug)]
pub struct CacheEntry {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl CacheEntry {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }
}

/// A stored entry plus the instant it stops being visible.
#[derive(Clone, Debug)]
pub(crate) struct Slot {
    pub entry: std::sync::Arc<CacheEntry>,
    pub expires_at: Instant,
}

impl Slot {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Snapshot of cache statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Physically present entries, expired ones included until the next sweep.
    pub entries: usize,
}
