//! Repository wiring.
//!
//! A [`Repository`] is shared by every session of a process. It holds the
//! pieces sessions coordinate through:
//!
//! - the session propagator, with one queue per open session
//! - the event propagator, which feeds the repository event queue and any
//!   listener queue registered on it
//! - the process-wide [`RowCache`], when enabled
//! - the [`ClusterInvalidator`], when clustering is enabled

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rowcache_common::config::RepositoryConfig;
use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{NodeId, SessionId};
use rowcache_invalidation::{
    ClusterInvalidator, Invalidations, InvalidationsPropagator, InvalidationsQueue,
};
use rowcache_storage::{CachingMapper, Model, PersistenceContext, RowCache, RowMapper};
use tracing::{debug, error, info, warn};

use crate::session::TransactionalSession;

/// Shared state of one repository within a process.
pub struct Repository {
    config: RepositoryConfig,
    model: Arc<Model>,
    propagator: InvalidationsPropagator,
    event_propagator: InvalidationsPropagator,
    event_queue: Arc<InvalidationsQueue>,
    row_cache: Option<Arc<RowCache>>,
    cluster: Option<Arc<dyn ClusterInvalidator>>,
    next_session: AtomicU64,
    closed: AtomicBool,
}

impl Repository {
    /// Creates a repository without cluster invalidation.
    pub fn new(config: RepositoryConfig, model: Arc<Model>) -> RowCacheResult<Arc<Self>> {
        config.validate()?;
        if config.cluster.enabled {
            warn!(
                repository = %config.name,
                "clustering is enabled but no cluster invalidator was supplied"
            );
        }
        Ok(Arc::new(Self::build(config, model, None)))
    }

    /// Creates a repository that exchanges invalidations with other nodes.
    ///
    /// The invalidator is initialized with this node's id and the repository
    /// name.
    pub fn with_cluster(
        config: RepositoryConfig,
        model: Arc<Model>,
        cluster: Arc<dyn ClusterInvalidator>,
    ) -> RowCacheResult<Arc<Self>> {
        config.validate()?;
        if !config.cluster.enabled {
            return Err(RowCacheError::InvalidConfig {
                message: "a cluster invalidator requires cluster.enabled".to_string(),
            });
        }
        cluster.initialize(config.node_id, &config.name)?;
        info!(repository = %config.name, node = %config.node_id, "cluster invalidation enabled");
        Ok(Arc::new(Self::build(config, model, Some(cluster))))
    }

    fn build(
        config: RepositoryConfig,
        model: Arc<Model>,
        cluster: Option<Arc<dyn ClusterInvalidator>>,
    ) -> Self {
        let row_cache = config
            .cache
            .enabled
            .then(|| Arc::new(RowCache::new(config.cache.capacity)));
        let event_queue = Arc::new(InvalidationsQueue::new(format!("{}-events", config.name)));
        let event_propagator = InvalidationsPropagator::new(format!("{}-events", config.name));
        event_propagator.add_queue(Arc::clone(&event_queue));
        Self {
            propagator: InvalidationsPropagator::new(format!("{}-sessions", config.name)),
            event_propagator,
            event_queue,
            row_cache,
            cluster,
            model,
            config,
            next_session: AtomicU64::new(1),
            closed: AtomicBool::new(false),
        }
    }

    /// Returns the repository name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Returns this node's id.
    pub fn node_id(&self) -> NodeId {
        self.config.node_id
    }

    /// Returns the configuration.
    pub fn config(&self) -> &RepositoryConfig {
        &self.config
    }

    /// Returns the model.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Returns the process-wide row cache, if enabled.
    pub fn row_cache(&self) -> Option<&Arc<RowCache>> {
        self.row_cache.as_ref()
    }

    /// Returns the repository event queue, which receives every committed
    /// invalidation, local or remote.
    pub fn event_queue(&self) -> &Arc<InvalidationsQueue> {
        &self.event_queue
    }

    /// Registers an additional listener for committed invalidations.
    pub fn add_event_listener(&self, queue: Arc<InvalidationsQueue>) {
        self.event_propagator.add_queue(queue);
    }

    /// Unregisters a listener.
    pub fn remove_event_listener(&self, queue: &Arc<InvalidationsQueue>) -> bool {
        self.event_propagator.remove_queue(queue)
    }

    /// Returns the number of open sessions.
    pub fn session_count(&self) -> usize {
        self.propagator.queue_count()
    }

    /// Returns true once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Opens a session over a mapper.
    ///
    /// When the row cache is enabled the mapper is wrapped in a
    /// [`CachingMapper`] sharing it.
    pub fn open_session(self: &Arc<Self>, mapper: Box<dyn RowMapper>) -> TransactionalSession {
        let id = SessionId::new(self.next_session.fetch_add(1, Ordering::Relaxed));
        let mapper: Box<dyn RowMapper> = match &self.row_cache {
            Some(cache) => {
                let mut caching = CachingMapper::new(mapper, Arc::clone(cache));
                caching.set_session(id);
                Box::new(caching)
            }
            None => mapper,
        };
        let context = PersistenceContext::new(
            Arc::clone(&self.model),
            mapper,
            self.config.context.clone(),
            id,
        );
        let queue = Arc::new(InvalidationsQueue::new(id.to_string()));
        self.propagator.add_queue(Arc::clone(&queue));
        debug!(repository = %self.config.name, session = %id, "session opened");
        TransactionalSession::new(id, Arc::clone(self), context, queue)
    }

    pub(crate) fn detach_session(&self, id: SessionId, queue: &Arc<InvalidationsQueue>) {
        if self.propagator.remove_queue(queue) {
            debug!(repository = %self.config.name, session = %id, "session closed");
        }
    }

    /// Publishes invalidations committed by a local session to every other
    /// local session, the event listeners and the other nodes.
    ///
    /// Cluster send failures are logged and otherwise ignored.
    pub(crate) fn publish(
        &self,
        invalidations: &Invalidations,
        origin: Option<&Arc<InvalidationsQueue>>,
    ) {
        if invalidations.is_empty() {
            return;
        }
        self.propagator.propagate_invalidations(invalidations, origin);
        self.event_propagator
            .propagate_invalidations(invalidations, None);
        if let Some(cluster) = &self.cluster {
            if let Err(e) = cluster.send_invalidations(invalidations) {
                error!(
                    repository = %self.config.name,
                    error = %e,
                    "failed to send invalidations to other nodes"
                );
            }
        }
    }

    /// Pulls invalidations received from other nodes, evicts them from the
    /// row cache and queues them for every local session.
    ///
    /// Returns what was received. Receive failures are logged and yield an
    /// empty set.
    pub fn receive_cluster_invalidations(&self) -> Invalidations {
        let Some(cluster) = &self.cluster else {
            return Invalidations::new();
        };
        let invalidations = match cluster.receive_invalidations() {
            Ok(invalidations) => invalidations,
            Err(e) => {
                error!(
                    repository = %self.config.name,
                    error = %e,
                    "failed to receive invalidations from other nodes"
                );
                return Invalidations::new();
            }
        };
        if invalidations.is_empty() {
            return invalidations;
        }
        if let Some(cache) = &self.row_cache {
            cache.invalidate(&invalidations);
        }
        self.propagator.propagate_invalidations(&invalidations, None);
        self.event_propagator
            .propagate_invalidations(&invalidations, None);
        debug!(
            repository = %self.config.name,
            entries = invalidations.len(),
            "received invalidations from other nodes"
        );
        invalidations
    }

    /// Clears the row cache and tells every session, here and on other
    /// nodes, to drop its caches.
    pub fn clear_caches(&self) {
        if let Some(cache) = &self.row_cache {
            cache.clear();
        }
        info!(repository = %self.config.name, "clearing all caches");
        self.publish(&Invalidations::everything(), None);
    }

    /// Closes the cluster invalidator.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(cluster) = &self.cluster {
            cluster.close();
        }
        info!(repository = %self.config.name, "repository closed");
    }
}

impl fmt::Debug for Repository {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Repository")
            .field("name", &self.config.name)
            .field("node_id", &self.config.node_id)
            .field("sessions", &self.session_count())
            .field("row_cache", &self.row_cache.is_some())
            .field("cluster", &self.cluster.is_some())
            .finish()
    }
}
