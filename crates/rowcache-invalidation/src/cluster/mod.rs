//! Cross-node invalidation transport.
//!
//! Processes sharing one backing store exchange the invalidations of their
//! committed transactions through a [`ClusterInvalidator`]. Delivery is
//! best-effort: a lost message leaves a remote cache stale until the next
//! invalidation of the same rows or an explicit cache clear.
//!
//! - `ClusterInvalidator` trait: the send/receive contract
//! - `frame`: the length-prefixed wire encoding
//! - `MemoryClusterNetwork` / `MemoryClusterInvalidator`: an in-process
//!   transport with partition simulation, used by tests

pub mod frame;
mod memory;

pub use memory::{MemoryClusterInvalidator, MemoryClusterNetwork};

use rowcache_common::types::NodeId;
use rowcache_common::RowCacheError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::invalidations::Invalidations;

/// Errors that can occur in cluster transport operations.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The invalidator was used before `initialize`.
    #[error("cluster invalidator not initialized")]
    NotInitialized,

    /// Delivery to a peer failed.
    #[error("delivery failed to node {node_id}: {reason}")]
    DeliveryFailed {
        /// The target node.
        node_id: NodeId,
        /// The reason for failure.
        reason: String,
    },

    /// Message serialization failed.
    #[error("serialization failed: {0}")]
    SerializationFailed(String),

    /// Message deserialization failed.
    #[error("deserialization failed: {0}")]
    DeserializationFailed(String),

    /// The transport is closed.
    #[error("transport closed")]
    Closed,
}

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;

impl From<TransportError> for RowCacheError {
    fn from(e: TransportError) -> Self {
        match e {
            TransportError::SerializationFailed(message)
            | TransportError::DeserializationFailed(message) => RowCacheError::Codec { message },
            other => RowCacheError::transport(other.to_string()),
        }
    }
}

/// The payload carried by one invalidation frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage {
    /// Repository the invalidations belong to.
    pub repository: String,
    /// The invalidations.
    pub invalidations: Invalidations,
}

impl InvalidationMessage {
    /// Creates a new message.
    pub fn new(repository: impl Into<String>, invalidations: Invalidations) -> Self {
        Self {
            repository: repository.into(),
            invalidations,
        }
    }
}

/// Trait for cross-node invalidation transports.
///
/// One invalidator serves one repository on one node. It is shared by every
/// session of the repository, so all methods take `&self`.
pub trait ClusterInvalidator: Send + Sync {
    /// Binds the invalidator to a node and repository. Must be called once
    /// before any send or receive.
    fn initialize(&self, node_id: NodeId, repository: &str) -> TransportResult<()>;

    /// Publishes invalidations to every other node of the repository.
    fn send_invalidations(&self, invalidations: &Invalidations) -> TransportResult<()>;

    /// Returns everything received since the last call, merged into one set.
    fn receive_invalidations(&self) -> TransportResult<Invalidations>;

    /// Stops sending and receiving. Idempotent.
    fn close(&self);

    /// Returns true once `close` has been called.
    fn is_closed(&self) -> bool;
}
