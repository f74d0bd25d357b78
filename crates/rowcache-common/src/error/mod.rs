//! Error handling for rowcache.
//!
//! This module provides a unified error type and result alias used
//! across all rowcache components.

mod rowcache;

pub use rowcache::{ErrorCode, RowCacheError};

/// Result type alias for rowcache operations.
pub type RowCacheResult<T> = std::result::Result<T, RowCacheError>;
