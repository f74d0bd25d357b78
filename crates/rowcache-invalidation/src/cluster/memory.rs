//! In-memory cluster transport for testing.
//!
//! Every invalidator attached to the same [`MemoryClusterNetwork`] behaves
//! like a node sharing one backing store. Frames go through the real wire
//! encoding, and one-way or bidirectional partitions can be injected to
//! exercise the best-effort delivery contract.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rowcache_common::types::NodeId;
use tracing::{debug, info, warn};

use super::frame;
use super::{ClusterInvalidator, InvalidationMessage, TransportError, TransportResult};
use crate::invalidations::Invalidations;

/// Pending frames of one node.
type Inbox = Mutex<VecDeque<Bytes>>;

/// A shared network for memory invalidators.
#[derive(Debug, Default)]
pub struct MemoryClusterNetwork {
    /// Inbox of each (repository, node).
    nodes: DashMap<(String, NodeId), Arc<Inbox>>,
    /// Network partitions: (from, to) pairs that are blocked.
    partitions: RwLock<Vec<(NodeId, NodeId)>>,
}

impl MemoryClusterNetwork {
    /// Creates a new memory network.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a new memory network wrapped in Arc.
    pub fn shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Creates an invalidator attached to this network. It joins the network
    /// when initialized.
    pub fn create_invalidator(self: &Arc<Self>) -> MemoryClusterInvalidator {
        MemoryClusterInvalidator {
            network: Arc::clone(self),
            binding: RwLock::new(None),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
        }
    }

    /// Drops frames from `from` to `to` (one-way partition).
    pub fn add_partition(&self, from: NodeId, to: NodeId) {
        self.partitions.write().push((from, to));
    }

    /// Drops frames between two nodes in both directions.
    pub fn add_partition_bidirectional(&self, node1: NodeId, node2: NodeId) {
        let mut partitions = self.partitions.write();
        partitions.push((node1, node2));
        partitions.push((node2, node1));
    }

    /// Removes all partitions involving a node.
    pub fn heal_node(&self, node_id: NodeId) {
        self.partitions
            .write()
            .retain(|&(f, t)| f != node_id && t != node_id);
    }

    /// Removes all partitions.
    pub fn heal_all(&self) {
        self.partitions.write().clear();
    }

    /// Checks if there's a partition from `from` to `to`.
    pub fn is_partitioned(&self, from: NodeId, to: NodeId) -> bool {
        self.partitions.read().iter().any(|&(f, t)| f == from && t == to)
    }

    /// Returns the nodes attached for a repository.
    pub fn node_ids(&self, repository: &str) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self
            .nodes
            .iter()
            .filter(|e| e.key().0 == repository)
            .map(|e| e.key().1)
            .collect();
        ids.sort();
        ids
    }

    fn register(&self, repository: &str, node_id: NodeId) -> Arc<Inbox> {
        let inbox = Arc::new(Mutex::new(VecDeque::new()));
        self.nodes
            .insert((repository.to_string(), node_id), Arc::clone(&inbox));
        inbox
    }

    fn unregister(&self, repository: &str, node_id: NodeId) {
        self.nodes.remove(&(repository.to_string(), node_id));
    }

    /// Delivers a frame to every other node of the repository. Returns the
    /// number of inboxes reached.
    fn broadcast(&self, repository: &str, from: NodeId, data: &Bytes) -> usize {
        let targets: Vec<(NodeId, Arc<Inbox>)> = self
            .nodes
            .iter()
            .filter(|e| e.key().0 == repository && e.key().1 != from)
            .map(|e| (e.key().1, Arc::clone(e.value())))
            .collect();

        let mut reached = 0;
        for (node_id, inbox) in targets {
            if self.is_partitioned(from, node_id) {
                // Silently drop the frame (simulates network failure)
                continue;
            }
            inbox.lock().push_back(data.clone());
            reached += 1;
        }
        reached
    }
}

struct Binding {
    node_id: NodeId,
    repository: String,
    inbox: Arc<Inbox>,
}

/// In-memory cluster invalidator.
pub struct MemoryClusterInvalidator {
    /// The shared network.
    network: Arc<MemoryClusterNetwork>,
    /// Set by `initialize`.
    binding: RwLock<Option<Binding>>,
    /// Whether the invalidator is closed.
    closed: AtomicBool,
    /// When set, every send fails.
    fail_sends: AtomicBool,
}

impl MemoryClusterInvalidator {
    /// Makes subsequent sends fail, to exercise error paths.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Release);
    }

    /// Returns the node this invalidator is bound to.
    pub fn node_id(&self) -> Option<NodeId> {
        self.binding.read().as_ref().map(|b| b.node_id)
    }

    /// Returns the number of frames waiting to be received.
    pub fn pending_frames(&self) -> usize {
        self.binding
            .read()
            .as_ref()
            .map_or(0, |b| b.inbox.lock().len())
    }

    fn check_open(&self) -> TransportResult<()> {
        if self.closed.load(Ordering::Acquire) {
            Err(TransportError::Closed)
        } else {
            Ok(())
        }
    }
}

impl fmt::Debug for MemoryClusterInvalidator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryClusterInvalidator")
            .field("node_id", &self.node_id())
            .field("closed", &self.closed)
            .finish()
    }
}

impl ClusterInvalidator for MemoryClusterInvalidator {
    fn initialize(&self, node_id: NodeId, repository: &str) -> TransportResult<()> {
        self.check_open()?;
        let mut binding = self.binding.write();
        if let Some(old) = binding.take() {
            self.network.unregister(&old.repository, old.node_id);
        }
        let inbox = self.network.register(repository, node_id);
        *binding = Some(Binding {
            node_id,
            repository: repository.to_string(),
            inbox,
        });
        info!(node = %node_id, repository, "cluster invalidator initialized");
        Ok(())
    }

    fn send_invalidations(&self, invalidations: &Invalidations) -> TransportResult<()> {
        self.check_open()?;
        let binding = self.binding.read();
        let binding = binding.as_ref().ok_or(TransportError::NotInitialized)?;

        if self.fail_sends.load(Ordering::Acquire) {
            return Err(TransportError::DeliveryFailed {
                node_id: binding.node_id,
                reason: "send failure injected".to_string(),
            });
        }
        if invalidations.is_empty() {
            return Ok(());
        }

        let message = InvalidationMessage::new(binding.repository.clone(), invalidations.clone());
        let data = frame::encode(binding.node_id, &message)?;
        let reached = self
            .network
            .broadcast(&binding.repository, binding.node_id, &data);
        debug!(
            node = %binding.node_id,
            reached,
            entries = invalidations.len(),
            "sent cluster invalidations"
        );
        Ok(())
    }

    fn receive_invalidations(&self) -> TransportResult<Invalidations> {
        self.check_open()?;
        let binding = self.binding.read();
        let binding = binding.as_ref().ok_or(TransportError::NotInitialized)?;

        let frames = std::mem::take(&mut *binding.inbox.lock());
        let mut received = Invalidations::new();
        for data in frames {
            match frame::decode(data) {
                Ok((from, message)) if message.repository == binding.repository => {
                    debug!(from = %from, entries = message.invalidations.len(), "received cluster invalidations");
                    received.add(&message.invalidations);
                }
                Ok((from, message)) => {
                    warn!(
                        from = %from,
                        repository = %message.repository,
                        "dropping invalidations for another repository"
                    );
                }
                Err(e) => {
                    warn!(error = %e, "dropping undecodable invalidation frame");
                }
            }
        }
        Ok(received)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(binding) = self.binding.write().take() {
            self.network.unregister(&binding.repository, binding.node_id);
            info!(node = %binding.node_id, "cluster invalidator closed");
        }
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }
}
