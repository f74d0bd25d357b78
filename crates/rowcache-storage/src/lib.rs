//! # rowcache-storage
//!
//! Row-level storage and the per-session fragment cache.
//!
//! This crate provides:
//!
//! - **Rows**: the physical payload of a storage location and the batch of
//!   creates, updates and deletes a flush produces
//! - **Fragments**: cached rows with their dirty/invalidation state machine
//!   and the collection diff that turns list edits into minimal writes
//! - **Mappers**: the `RowMapper` storage abstraction, an in-memory
//!   transactional backing store, and the `CachingMapper` that layers the
//!   process-wide `RowCache` over any mapper
//! - **PersistenceContext**: the per-session cache that mediates fetch,
//!   create and delete, builds save batches, applies invalidations and keeps
//!   selections
//!
//! ## Example
//!
//! ```rust
//! use std::sync::Arc;
//! use rowcache_common::config::ContextConfig;
//! use rowcache_common::types::{RowId, SessionId, Value};
//! use rowcache_storage::{MemoryMapper, MemoryStore, Model, PersistenceContext};
//!
//! let model = Arc::new(Model::new());
//! let store = MemoryStore::shared(Arc::clone(&model));
//! let mapper = MemoryMapper::new(store);
//! let mut context = PersistenceContext::new(
//!     model,
//!     Box::new(mapper),
//!     ContextConfig::default(),
//!     SessionId::new(1),
//! );
//!
//! let row_id = context.create_new("hierarchy", [("title".to_string(), Value::from("v1"))].into()).unwrap();
//! context.flush().unwrap();
//! assert_eq!(context.get_value(&row_id, "title").unwrap(), Some(Value::from("v1")));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod cache;
pub mod context;
pub mod fragment;
pub mod mapper;
pub mod model;
pub mod row;

pub use cache::{CacheEntry, RowCache, RowCacheStats};
pub use context::{ContextStats, PersistenceContext, SelectionContext};
pub use fragment::{is_prefix, CollectionFragment, Fragment, SimpleFragment, StatefulFragment};
pub use mapper::{CachingMapper, FailurePoint, MemoryMapper, MemoryStore, RowMapper};
pub use model::{Model, SelectionType};
pub use row::{CollectionWrite, Row, RowBatch, RowData, RowUpdate, UpdateWrite};
