//! # rowcache-test
//!
//! Integration tests for rowcache.
//!
//! This crate contains:
//! - Shared fixtures: a document model, single- and multi-node setups
//! - Workload generators for concurrent sessions
//! - End-to-end scenario tests under `tests/`

#![warn(missing_docs)]
#![warn(clippy::all)]

/// Test utilities and helpers
pub mod utils;

/// Workload generators
pub mod workload;
