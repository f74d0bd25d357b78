//! Per-consumer invalidation accumulator.

use std::fmt;

use parking_lot::Mutex;

use crate::invalidations::Invalidations;

/// Accumulates invalidations for one consumer.
///
/// Any number of producers may append concurrently; the single owner drains
/// the queue with [`InvalidationsQueue::get_invalidations`], which atomically
/// swaps in an empty set so that no contribution is lost or duplicated across
/// a drain boundary.
pub struct InvalidationsQueue {
    /// Name used in logs.
    name: String,
    /// The accumulated set.
    invalidations: Mutex<Invalidations>,
}

impl InvalidationsQueue {
    /// Creates an empty queue.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            invalidations: Mutex::new(Invalidations::new()),
        }
    }

    /// Returns the queue name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Appends invalidations to the queue.
    pub fn add_invalidations(&self, invalidations: &Invalidations) {
        if invalidations.is_empty() {
            return;
        }
        self.invalidations.lock().add(invalidations);
    }

    /// Drains the queue, returning everything accumulated since the last
    /// drain.
    pub fn get_invalidations(&self) -> Invalidations {
        std::mem::take(&mut *self.invalidations.lock())
    }

    /// Returns true if nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.invalidations.lock().is_empty()
    }
}

impl fmt::Debug for InvalidationsQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationsQueue")
            .field("name", &self.name)
            .field("pending", &self.invalidations.lock().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowcache_common::types::RowId;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_drain_resets() {
        let queue = InvalidationsQueue::new("q");
        let mut inv = Invalidations::new();
        inv.add_modified(RowId::new("t", 1));
        queue.add_invalidations(&inv);

        assert!(!queue.is_empty());
        let drained = queue.get_invalidations();
        assert_eq!(drained, inv);
        assert!(queue.is_empty());
        assert!(queue.get_invalidations().is_empty());
    }

    #[test]
    fn test_concurrent_appends_drain_exactly_once() {
        let queue = Arc::new(InvalidationsQueue::new("shared"));
        let threads = 8;
        let per_thread = 250;

        let handles: Vec<_> = (0..threads)
            .map(|t| {
                let queue = Arc::clone(&queue);
                thread::spawn(move || {
                    for i in 0..per_thread {
                        let mut inv = Invalidations::new();
                        inv.add_modified(RowId::new("t", (t * per_thread + i) as i64));
                        queue.add_invalidations(&inv);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let drained = queue.get_invalidations();
        assert_eq!(drained.len(), threads * per_thread);
        for id in 0..(threads * per_thread) as i64 {
            assert!(drained.is_modified(&RowId::new("t", id)));
        }
        assert!(queue.is_empty());
    }

    #[test]
    fn test_concurrent_drain_loses_nothing() {
        let queue = Arc::new(InvalidationsQueue::new("racing"));
        let total = 2000_i64;

        let producer = {
            let queue = Arc::clone(&queue);
            thread::spawn(move || {
                for id in 0..total {
                    let mut inv = Invalidations::new();
                    inv.add_deleted(RowId::new("t", id));
                    queue.add_invalidations(&inv);
                }
            })
        };

        let mut collected = Invalidations::new();
        while !producer.is_finished() {
            collected.add(&queue.get_invalidations());
        }
        producer.join().unwrap();
        collected.add(&queue.get_invalidations());

        assert_eq!(collected.len(), total as usize);
    }
}
