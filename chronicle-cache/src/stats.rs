//! Cache usage counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of a cache's counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that found nothing cached.
    pub misses: u64,
    /// Lookups answered by a miss tombstone.
    pub tombstone_hits: u64,
    /// Loader invocations.
    pub loads: u64,
    /// Successful bucket writes.
    pub stored: u64,
    /// Writes given up because the identity lock timed out.
    pub abandoned_writes: u64,
    /// Identity invalidations.
    pub invalidations: u64,
}

impl CacheStats {
    /// Calculate the hit rate (0.0 to 1.0). Tombstone hits are not counted.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    hits: AtomicU64,
    misses: AtomicU64,
    tombstone_hits: AtomicU64,
    loads: AtomicU64,
    stored: AtomicU64,
    abandoned_writes: AtomicU64,
    invalidations: AtomicU64,
}

impl CacheCounters {
    pub(crate) fn hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn tombstone_hit(&self) {
        self.tombstone_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn load(&self) {
        self.loads.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn abandoned_write(&self) {
        self.abandoned_writes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            tombstone_hits: self.tombstone_hits.load(Ordering::Relaxed),
            loads: self.loads.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            abandoned_writes: self.abandoned_writes.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_rate() {
        assert_eq!(CacheStats::default().hit_rate(), 0.0);

        let stats = CacheStats {
            hits: 3,
            misses: 1,
            tombstone_hits: 10,
            ..Default::default()
        };
        assert!((stats.hit_rate() - 0.75).abs() < f64::EPSILON);
    }

    #[test]
    fn test_counters_snapshot() {
        let counters = CacheCounters::default();
        counters.hit();
        counters.hit();
        counters.miss();
        counters.load();
        counters.stored();
        counters.abandoned_write();
        counters.invalidation();
        counters.tombstone_hit();

        let stats = counters.snapshot();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.stored, 1);
        assert_eq!(stats.abandoned_writes, 1);
        assert_eq!(stats.invalidations, 1);
        assert_eq!(stats.tombstone_hits, 1);
    }
}
