//! The process-wide row cache shared by every session's caching mapper.

mod row_cache;
mod stats;

pub use row_cache::{CacheEntry, RowCache};
pub use stats::RowCacheStats;
