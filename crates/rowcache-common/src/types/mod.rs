//! Type definitions for rowcache.
//!
//! This module contains all core type definitions used across the cache.

mod binary;
mod ids;
mod row_id;
mod state;
mod value;
mod xa;

pub use binary::Binary;
pub use ids::{Ident, NodeId, SessionId};
pub use row_id::RowId;
pub use state::FragmentState;
pub use value::Value;
pub use xa::{EndFlags, PrepareVote, StartFlags, Xid};
