//! Shared row cache.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, MutexGuard};
use rowcache_common::constants::ROW_CACHE_EVICTION_PERCENT;
use rowcache_common::error::RowCacheResult;
use rowcache_common::types::RowId;
use rowcache_invalidation::Invalidations;
use tracing::debug;

use super::stats::RowCacheStats;
use crate::row::{Row, RowData};

/// What the cache knows about a row.
#[derive(Debug, Clone, PartialEq)]
pub enum CacheEntry {
    /// The row exists with this payload.
    Present(RowData),
    /// The row is known not to exist.
    Absent,
}

#[derive(Debug, Default)]
struct Slot {
    entry: Option<CacheEntry>,
    last_access: u64,
}

/// A concurrent cache of committed rows shared by all sessions of a
/// repository.
///
/// Each row has its own slot lock, held across the whole read-or-populate
/// sequence, so a commit publishing a newer row can never be overwritten by
/// a concurrent reader populating the slot with what it read earlier.
#[derive(Debug)]
pub struct RowCache {
    slots: DashMap<RowId, Arc<Mutex<Slot>>>,
    capacity: usize,
    clock: AtomicU64,
    stats: RowCacheStats,
}

impl RowCache {
    /// Creates a cache holding up to `capacity` rows.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: DashMap::new(),
            capacity: capacity.max(1),
            clock: AtomicU64::new(0),
            stats: RowCacheStats::new(),
        }
    }

    /// Returns the number of cached rows.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Returns the capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Returns the statistics.
    pub fn stats(&self) -> &RowCacheStats {
        &self.stats
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed)
    }

    fn slot(&self, row_id: &RowId) -> Arc<Mutex<Slot>> {
        Arc::clone(
            self.slots
                .entry(row_id.clone())
                .or_insert_with(|| Arc::new(Mutex::new(Slot::default())))
                .value(),
        )
    }

    /// Returns the cached entry for a row, if any.
    pub fn get(&self, row_id: &RowId) -> Option<CacheEntry> {
        let slot = self.slots.get(row_id).map(|s| Arc::clone(s.value()));
        let entry = slot.and_then(|slot| {
            let mut slot = slot.lock();
            slot.last_access = self.tick();
            slot.entry.clone()
        });
        self.stats.record_lookup(entry.is_some());
        entry
    }

    /// Stores what a committed write left behind.
    pub fn put(&self, row_id: &RowId, entry: CacheEntry) {
        let slot = self.slot(row_id);
        {
            let mut slot = slot.lock();
            slot.entry = Some(entry);
            slot.last_access = self.tick();
        }
        self.stats.record_store();
        self.maybe_evict();
    }

    /// Forgets a row.
    pub fn evict(&self, row_id: &RowId) {
        if self.slots.remove(row_id).is_some() {
            self.stats.record_invalidation();
        }
    }

    /// Forgets every row an invalidation names; `all` clears the cache.
    pub fn invalidate(&self, invalidations: &Invalidations) {
        if invalidations.is_all() {
            self.clear();
            return;
        }
        for row_id in invalidations.modified().chain(invalidations.deleted()) {
            self.evict(row_id);
        }
    }

    /// Forgets everything.
    pub fn clear(&self) {
        let n = self.slots.len();
        self.slots.clear();
        debug!(rows = n, "row cache cleared");
    }

    /// Reads rows through the cache.
    ///
    /// Rows not cached are fetched with one call to `load`, which returns
    /// the rows it found; requested rows it does not return are cached as
    /// absent. Only present rows are returned, in request order.
    pub fn read_through<F>(&self, row_ids: &[RowId], load: F) -> RowCacheResult<Vec<Row>>
    where
        F: FnOnce(&[RowId]) -> RowCacheResult<Vec<Row>>,
    {
        if row_ids.is_empty() {
            return Ok(Vec::new());
        }

        // Lock slots in a global order so concurrent batch readers cannot
        // deadlock.
        let ordered: BTreeSet<&RowId> = row_ids.iter().collect();
        let slots: Vec<(&RowId, Arc<Mutex<Slot>>)> =
            ordered.into_iter().map(|r| (r, self.slot(r))).collect();
        let mut guards: Vec<(&RowId, MutexGuard<'_, Slot>)> =
            slots.iter().map(|(r, s)| (*r, s.lock())).collect();

        let missing: Vec<RowId> = guards
            .iter()
            .filter(|(_, g)| g.entry.is_none())
            .map(|(r, _)| (*r).clone())
            .collect();
        for (_, guard) in &guards {
            self.stats.record_lookup(guard.entry.is_some());
        }

        if !missing.is_empty() {
            let loaded = load(&missing)?;
            self.stats.record_loads(missing.len() as u64);
            let mut loaded: std::collections::HashMap<RowId, RowData> =
                loaded.into_iter().map(|row| (row.row_id, row.data)).collect();
            for (row_id, guard) in guards.iter_mut() {
                if guard.entry.is_none() {
                    guard.entry = Some(match loaded.remove(*row_id) {
                        Some(data) => CacheEntry::Present(data),
                        None => CacheEntry::Absent,
                    });
                }
            }
        }

        let now = self.tick();
        let mut found = std::collections::HashMap::with_capacity(guards.len());
        for (row_id, guard) in guards.iter_mut() {
            guard.last_access = now;
            if let Some(CacheEntry::Present(data)) = &guard.entry {
                found.insert(*row_id, data.clone());
            }
        }
        drop(guards);

        let rows = row_ids
            .iter()
            .filter_map(|r| {
                found.get(r).map(|data| Row {
                    row_id: r.clone(),
                    data: data.clone(),
                })
            })
            .collect();
        self.maybe_evict();
        Ok(rows)
    }

    /// Drops the least recently used tenth of the cache once it overflows.
    fn maybe_evict(&self) {
        let len = self.slots.len();
        if len <= self.capacity {
            return;
        }
        let target = (self.capacity * ROW_CACHE_EVICTION_PERCENT / 100).max(1) + (len - self.capacity);

        let mut candidates: Vec<(u64, RowId)> = self
            .slots
            .iter()
            .filter_map(|e| e.value().try_lock().map(|s| (s.last_access, e.key().clone())))
            .collect();
        candidates.sort_unstable_by_key(|(tick, _)| *tick);

        let mut evicted = 0u64;
        for (_, row_id) in candidates.into_iter().take(target) {
            if self.slots.remove(&row_id).is_some() {
                evicted += 1;
            }
        }
        self.stats.record_evictions(evicted);
        debug!(evicted, remaining = self.slots.len(), "row cache evicted");
    }
}
