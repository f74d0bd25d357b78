//! rowcache performance benchmarks
//!
//! This crate contains benchmarks for:
//! - Invalidation sets, queues and propagation fan-out
//! - The cluster frame codec
//! - The shared row cache and collection diffs
//! - Persistence context reads and flushes
//!
//! Run benchmarks with:
//! ```bash
//! cargo bench -p rowcache-bench
//! ```

pub mod utils;
