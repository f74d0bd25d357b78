//! System-wide constants for rowcache.

// =============================================================================
// Cache Constants
// =============================================================================

/// Default capacity of the process-wide row cache, in rows.
pub const DEFAULT_MAPPER_CACHE_CAPACITY: usize = 100_000;

/// Fraction of the row cache evicted at once when it overflows, in percent.
pub const ROW_CACHE_EVICTION_PERCENT: usize = 10;

/// Selection size above which a warning is logged.
pub const DEFAULT_SELECTION_WARN_THRESHOLD: usize = 15_000;

// =============================================================================
// Cluster Constants
// =============================================================================

/// Default node identifier when none is configured.
pub const DEFAULT_NODE_ID: u64 = 1;

/// Default repository name.
pub const DEFAULT_REPOSITORY_NAME: &str = "default";

/// Magic number for invalidation frames ("RCIV").
pub const FRAME_MAGIC: u32 = 0x5243_4956;

/// Maximum encoded invalidation payload (16 MB).
pub const MAX_FRAME_PAYLOAD: usize = 16 * 1024 * 1024;

/// Frame header size: magic (4) + node (8) + length (4).
pub const FRAME_HEADER_SIZE: usize = 4 + 8 + 4;

// =============================================================================
// Selection Constants
// =============================================================================

/// Prefix of the pseudo-table names used to invalidate selections.
pub const SELECTION_TABLE_PREFIX: &str = "__SELECT_";

/// Suffix of the pseudo-table names used to invalidate selections.
pub const SELECTION_TABLE_SUFFIX: &str = "__";
