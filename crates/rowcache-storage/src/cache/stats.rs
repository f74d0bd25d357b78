//! Row cache statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for the shared row cache.
#[derive(Debug, Default)]
pub struct RowCacheStats {
    /// Rows looked up.
    lookups: AtomicU64,
    /// Lookups answered from the cache.
    hits: AtomicU64,
    /// Rows loaded from the backing mapper.
    loads: AtomicU64,
    /// Entries stored by committed writes.
    stores: AtomicU64,
    /// Entries dropped for capacity.
    evictions: AtomicU64,
    /// Entries dropped by invalidations or failed commits.
    invalidations: AtomicU64,
}

impl RowCacheStats {
    /// Creates zeroed statistics.
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub(crate) fn record_lookup(&self, hit: bool) {
        self.lookups.fetch_add(1, Ordering::Relaxed);
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[inline]
    pub(crate) fn record_loads(&self, n: u64) {
        self.loads.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_store(&self) {
        self.stores.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_evictions(&self, n: u64) {
        self.evictions.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub(crate) fn record_invalidation(&self) {
        self.invalidations.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the number of rows looked up.
    pub fn lookups(&self) -> u64 {
        self.lookups.load(Ordering::Relaxed)
    }

    /// Returns the number of lookups answered from the cache.
    pub fn hits(&self) -> u64 {
        self.hits.load(Ordering::Relaxed)
    }

    /// Returns the number of rows loaded from the backing mapper.
    pub fn loads(&self) -> u64 {
        self.loads.load(Ordering::Relaxed)
    }

    /// Returns the number of entries stored by writes.
    pub fn stores(&self) -> u64 {
        self.stores.load(Ordering::Relaxed)
    }

    /// Returns the number of capacity evictions.
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Returns the number of invalidated entries.
    pub fn invalidations(&self) -> u64 {
        self.invalidations.load(Ordering::Relaxed)
    }

    /// Returns the hit ratio (0.0 to 1.0).
    pub fn hit_ratio(&self) -> f64 {
        let lookups = self.lookups();
        if lookups == 0 {
            0.0
        } else {
            self.hits() as f64 / lookups as f64
        }
    }
}

impl fmt::Display for RowCacheStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "RowCacheStats {{ lookups: {}, hits: {}, hit_ratio: {:.2}%, loads: {}, evictions: {} }}",
            self.lookups(),
            self.hits(),
            self.hit_ratio() * 100.0,
            self.loads(),
            self.evictions()
        )
    }
}
