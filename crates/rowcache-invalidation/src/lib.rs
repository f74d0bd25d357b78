//! # rowcache-invalidation
//!
//! The invalidation protocol that keeps per-session fragment caches coherent.
//!
//! - **Invalidations**: a mergeable pair of RowId sets tagged modified or
//!   deleted, the payload of the whole protocol
//! - **InvalidationsQueue**: a per-consumer accumulator with many producers
//!   and one draining consumer
//! - **InvalidationsPropagator**: same-process fan-out of a session's
//!   committed changes to every other registered queue
//! - **ClusterInvalidator**: the cross-node transport abstraction, with a
//!   framed wire codec and an in-memory implementation
//!
//! # Architecture
//!
//! ```text
//!   Session A commit                          Session B start
//!        │                                          ▲
//!        ▼                                          │ drain
//! ┌──────────────┐  push (except A's queue)  ┌──────────────┐
//! │  Propagator  │──────────────────────────▶│   Queue (B)  │
//! └──────────────┘                           └──────────────┘
//!        │ send                                     ▲
//!        ▼                                          │ fan-out on receive
//! ┌──────────────────┐   frames    ┌──────────────────┐
//! │ ClusterInvalidator│───────────▶│ ClusterInvalidator│  (other node)
//! └──────────────────┘             └──────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cluster;
pub mod invalidations;
pub mod propagator;
pub mod queue;

pub use cluster::{
    ClusterInvalidator, InvalidationMessage, MemoryClusterInvalidator, MemoryClusterNetwork,
    TransportError, TransportResult,
};
pub use invalidations::{InvalidationKind, Invalidations};
pub use propagator::InvalidationsPropagator;
pub use queue::InvalidationsQueue;
