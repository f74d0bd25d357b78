//! # rowcache-session
//!
//! Transactional sessions over the fragment cache, and the repository that
//! wires them together.
//!
//! This crate provides:
//!
//! - **Repository**: owns the session propagator, the repository event
//!   queue, the optional cluster invalidator and the process-wide row cache,
//!   and opens sessions
//! - **TransactionalSession**: drives a persistence context through an
//!   XA-shaped lifecycle, draining invalidations at transaction start and
//!   publishing its own after commit
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────── Repository ─────────────────────────────┐
//! │                                                                     │
//! │  ┌───────────┐  ┌───────────┐      propagator       ┌────────────┐  │
//! │  │ session 1 │  │ session 2 │ ◄──── (queues) ─────► │ event queue│  │
//! │  │  context  │  │  context  │                       └────────────┘  │
//! │  └─────┬─────┘  └─────┬─────┘                                       │
//! │        │ CachingMapper│                                             │
//! │        └──────┬───────┘                                             │
//! │         ┌─────▼─────┐                        ┌───────────────────┐  │
//! │         │ RowCache  │                        │ ClusterInvalidator│◄─┼──► other nodes
//! │         └─────┬─────┘                        └───────────────────┘  │
//! └───────────────┼─────────────────────────────────────────────────────┘
//!                 ▼
//!           backing store
//! ```
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rowcache_common::config::RepositoryConfig;
//! use rowcache_common::types::{EndFlags, StartFlags, Value, Xid};
//! use rowcache_session::Repository;
//! use rowcache_storage::{MemoryMapper, MemoryStore, Model};
//!
//! let model = Arc::new(Model::new());
//! let store = MemoryStore::shared(Arc::clone(&model));
//! let repository = Repository::new(RepositoryConfig::for_testing(), model).unwrap();
//!
//! let mut session = repository.open_session(Box::new(MemoryMapper::new(Arc::clone(&store))));
//! let xid = Xid::new(1, 0);
//! session.start(xid, StartFlags::NoFlags).unwrap();
//! let row_id = session
//!     .context_mut()
//!     .create_new("hierarchy", [("title".to_string(), Value::from("v1"))].into())
//!     .unwrap();
//! session.end(xid, EndFlags::Success).unwrap();
//! session.commit(xid, true).unwrap();
//!
//! assert!(store.get(&row_id).is_some());
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod repository;
pub mod session;

pub use repository::Repository;
pub use session::{SessionState, TransactionalSession};
