//! Configuration for rowcache.
//!
//! This module provides configuration structures for a repository and the
//! caches it drives.

mod repository;

pub use repository::{
    ClusterConfig, ConflictPolicy, ContextConfig, MapperCacheConfig, RepositoryConfig,
};
