//! Block digest cache
//!
//! Bounded LRU map from block hash to block digest with:
//! - Read promotion
//! - Purge on delete
//! - Hit/miss statistics
//!
//! The cache only accelerates reads and short-circuits repeated indexing.
//! Dropping it loses nothing.

use crate::core::{BlockDigest, HashDigest};
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;

// =============================================================================
// Constants
// =============================================================================

/// Default number of cached block digests
pub const DEFAULT_CACHE_CAPACITY: usize = 512;

// =============================================================================
// Block Digest Cache
// =============================================================================

struct Inner {
    entries: LruCache<HashDigest, BlockDigest>,
    stats: CacheStats,
}

/// Thread-safe LRU cache of block digests
pub struct BlockDigestCache {
    inner: Mutex<Inner>,
}

impl BlockDigestCache {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CACHE_CAPACITY)
    }

    /// A capacity of zero is raised to one
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            inner: Mutex::new(Inner {
                entries: LruCache::new(capacity),
                stats: CacheStats::default(),
            }),
        }
    }

    /// Look up a digest, promoting it on hit
    pub fn get(&self, hash: &HashDigest) -> Option<BlockDigest> {
        let mut inner = self.inner.lock();
        let result = inner.entries.get(hash).cloned();
        if result.is_some() {
            inner.stats.hits += 1;
        } else {
            inner.stats.misses += 1;
        }
        result
    }

    /// Membership test without promotion
    pub fn contains(&self, hash: &HashDigest) -> bool {
        self.inner.lock().entries.contains(hash)
    }

    /// Insert or refresh a digest
    pub fn insert(&self, digest: BlockDigest) {
        let mut inner = self.inner.lock();
        if let Some((evicted, _)) = inner.entries.push(digest.hash(), digest) {
            // push returns the old entry for the same key on update
            if inner.entries.contains(&evicted) {
                return;
            }
            inner.stats.evictions += 1;
        }
        inner.stats.inserts += 1;
    }

    /// Drop a digest; returns whether it was cached
    pub fn remove(&self, hash: &HashDigest) -> bool {
        let mut inner = self.inner.lock();
        let removed = inner.entries.pop(hash).is_some();
        if removed {
            inner.stats.deletes += 1;
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.inner.lock().entries.cap().get()
    }

    pub fn clear(&self) {
        self.inner.lock().entries.clear();
    }

    pub fn stats(&self) -> CacheStats {
        self.inner.lock().stats.clone()
    }
}

impl Default for BlockDigestCache {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Cache Statistics
// =============================================================================

/// Cache performance statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub inserts: u64,
    pub deletes: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::BlockRecord;

    fn make_digest(i: u8) -> BlockDigest {
        BlockRecord::new(i as i64, HashDigest::new([i; 32]), None, vec![]).to_digest()
    }

    #[test]
    fn test_cache_insert_get() {
        let cache = BlockDigestCache::new();
        cache.insert(make_digest(1));

        let result = cache.get(&HashDigest::new([1; 32]));
        assert_eq!(result.map(|d| d.index()), Some(1));
        assert!(cache.get(&HashDigest::new([2; 32])).is_none());

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_rate(), 0.5);
    }

    #[test]
    fn test_cache_remove() {
        let cache = BlockDigestCache::new();
        cache.insert(make_digest(1));
        assert!(cache.contains(&HashDigest::new([1; 32])));

        assert!(cache.remove(&HashDigest::new([1; 32])));
        assert!(!cache.contains(&HashDigest::new([1; 32])));
        assert!(!cache.remove(&HashDigest::new([1; 32])));
    }

    #[test]
    fn test_cache_eviction_respects_promotion() {
        let cache = BlockDigestCache::with_capacity(2);
        cache.insert(make_digest(1));
        cache.insert(make_digest(2));

        // Promote 1 so 2 becomes least recently used
        assert!(cache.get(&HashDigest::new([1; 32])).is_some());
        cache.insert(make_digest(3));

        assert_eq!(cache.len(), 2);
        assert!(cache.contains(&HashDigest::new([1; 32])));
        assert!(!cache.contains(&HashDigest::new([2; 32])));
        assert_eq!(cache.stats().evictions, 1);
    }

    #[test]
    fn test_update_is_not_an_eviction() {
        let cache = BlockDigestCache::with_capacity(2);
        cache.insert(make_digest(1));
        cache.insert(make_digest(1));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.stats().evictions, 0);
    }

    #[test]
    fn test_zero_capacity_is_raised() {
        let cache = BlockDigestCache::with_capacity(0);
        assert_eq!(cache.capacity(), 1);
    }
}
