//! # rowcache-common
//!
//! Common types, errors, and configuration for the rowcache fragment cache.
//!
//! This crate provides the foundational types shared by every rowcache
//! component:
//!
//! - **Types**: storage locations (`RowId`, `Ident`), scalar `Value`s,
//!   `Binary` content references, node and session identifiers, the
//!   fragment lifecycle `FragmentState`, and the two-phase-commit
//!   vocabulary (`Xid`, `StartFlags`, `EndFlags`, `PrepareVote`)
//! - **Errors**: unified error handling with `RowCacheError`
//! - **Config**: repository configuration loadable from TOML
//! - **Constants**: system-wide defaults and limits
//!
//! ## Example
//!
//! ```rust
//! use rowcache_common::types::{RowId, Value};
//! use rowcache_common::error::RowCacheResult;
//!
//! fn example() -> RowCacheResult<()> {
//!     let row_id = RowId::new("hierarchy", 42);
//!     let value = Value::from("title");
//!     assert_eq!(row_id.table(), "hierarchy");
//!     assert!(!value.is_null());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;

// Re-export commonly used items at the crate root
pub use constants::*;
pub use error::{ErrorCode, RowCacheError, RowCacheResult};
pub use types::{
    Binary, EndFlags, FragmentState, Ident, NodeId, PrepareVote, RowId, SessionId, StartFlags,
    Value, Xid,
};
