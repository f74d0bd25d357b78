//! Same-process fan-out of invalidations.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::invalidations::Invalidations;
use crate::queue::InvalidationsQueue;

/// Broadcasts invalidations to a registry of queues.
///
/// Broadcasting copies the registry and delivers outside the lock, so
/// registration never waits on delivery. A queue registered while a broadcast
/// is in flight may miss that broadcast; its owner has not observed any state
/// yet, so it cannot hold a stale copy.
pub struct InvalidationsPropagator {
    /// Name used in logs.
    name: String,
    /// Registered queues.
    queues: Mutex<Vec<Arc<InvalidationsQueue>>>,
}

impl InvalidationsPropagator {
    /// Creates a propagator with no queues.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            queues: Mutex::new(Vec::new()),
        }
    }

    /// Returns the propagator name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Registers a queue. Registering the same queue twice has no effect.
    pub fn add_queue(&self, queue: Arc<InvalidationsQueue>) {
        let mut queues = self.queues.lock();
        if !queues.iter().any(|q| Arc::ptr_eq(q, &queue)) {
            queues.push(queue);
        }
    }

    /// Unregisters a queue. Returns false if it was not registered.
    pub fn remove_queue(&self, queue: &Arc<InvalidationsQueue>) -> bool {
        let mut queues = self.queues.lock();
        let before = queues.len();
        queues.retain(|q| !Arc::ptr_eq(q, queue));
        queues.len() != before
    }

    /// Returns the number of registered queues.
    pub fn queue_count(&self) -> usize {
        self.queues.lock().len()
    }

    /// Pushes invalidations to every registered queue except `exclude`.
    ///
    /// Returns the number of queues that received the set.
    pub fn propagate_invalidations(
        &self,
        invalidations: &Invalidations,
        exclude: Option<&Arc<InvalidationsQueue>>,
    ) -> usize {
        if invalidations.is_empty() {
            return 0;
        }
        let snapshot: Vec<Arc<InvalidationsQueue>> = self.queues.lock().clone();

        let mut delivered = 0;
        for queue in &snapshot {
            if exclude.map_or(false, |ex| Arc::ptr_eq(ex, queue)) {
                continue;
            }
            queue.add_invalidations(invalidations);
            delivered += 1;
        }
        debug!(
            propagator = %self.name,
            delivered,
            entries = invalidations.len(),
            "propagated invalidations"
        );
        delivered
    }
}

impl fmt::Debug for InvalidationsPropagator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InvalidationsPropagator")
            .field("name", &self.name)
            .field("queues", &self.queue_count())
            .finish()
    }
}
