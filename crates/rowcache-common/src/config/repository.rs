//! Repository configuration structures.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants::{
    DEFAULT_MAPPER_CACHE_CAPACITY, DEFAULT_NODE_ID, DEFAULT_REPOSITORY_NAME,
    DEFAULT_SELECTION_WARN_THRESHOLD,
};
use crate::error::{RowCacheError, RowCacheResult};
use crate::types::NodeId;

/// Main repository configuration.
///
/// # Example
///
/// ```rust
/// use rowcache_common::config::RepositoryConfig;
///
/// let config = RepositoryConfig::default();
/// assert_eq!(config.name, "default");
/// assert!(config.cache.enabled);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryConfig {
    /// Repository identity shared by every node of a cluster.
    #[serde(default = "default_name")]
    pub name: String,

    /// Identifier of this node in the cluster.
    #[serde(default = "default_node_id")]
    pub node_id: NodeId,

    /// Cross-node invalidation settings.
    #[serde(default)]
    pub cluster: ClusterConfig,

    /// Process-wide row cache settings.
    #[serde(default)]
    pub cache: MapperCacheConfig,

    /// Per-session persistence context settings.
    #[serde(default)]
    pub context: ContextConfig,
}

fn default_name() -> String {
    DEFAULT_REPOSITORY_NAME.to_string()
}

fn default_node_id() -> NodeId {
    NodeId::new(DEFAULT_NODE_ID)
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            node_id: default_node_id(),
            cluster: ClusterConfig::default(),
            cache: MapperCacheConfig::default(),
            context: ContextConfig::default(),
        }
    }
}

impl RepositoryConfig {
    /// Creates a configuration for the named repository.
    #[must_use]
    pub fn with_name(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    /// Creates a small configuration for testing.
    #[must_use]
    pub fn for_testing() -> Self {
        Self {
            name: "test".to_string(),
            node_id: default_node_id(),
            cluster: ClusterConfig::default(),
            cache: MapperCacheConfig {
                enabled: true,
                capacity: 1024,
            },
            context: ContextConfig::default(),
        }
    }

    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> RowCacheResult<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration from a TOML file.
    pub fn from_file(path: &Path) -> RowCacheResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| RowCacheError::InvalidConfig {
            message: format!("cannot read {}: {}", path.display(), e),
        })?;
        Self::from_toml_str(&content)
    }

    /// Serializes this configuration to TOML.
    pub fn to_toml_string(&self) -> RowCacheResult<String> {
        toml::to_string_pretty(self).map_err(|e| RowCacheError::InvalidConfig {
            message: e.to_string(),
        })
    }

    /// Validates the configuration.
    pub fn validate(&self) -> RowCacheResult<()> {
        if self.name.trim().is_empty() {
            return Err(RowCacheError::InvalidConfig {
                message: "repository name must not be empty".to_string(),
            });
        }

        if self.cache.enabled && self.cache.capacity == 0 {
            return Err(RowCacheError::InvalidConfig {
                message: "cache.capacity must be positive when the cache is enabled".to_string(),
            });
        }

        if self.context.selection_warn_threshold == 0 {
            return Err(RowCacheError::InvalidConfig {
                message: "context.selection_warn_threshold must be positive".to_string(),
            });
        }

        Ok(())
    }
}

/// Cross-node invalidation configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Whether invalidations are exchanged with other nodes.
    #[serde(default)]
    pub enabled: bool,
}

/// Process-wide row cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MapperCacheConfig {
    /// Whether sessions share a row cache in front of their mappers.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum number of cached rows.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

fn default_true() -> bool {
    true
}

fn default_cache_capacity() -> usize {
    DEFAULT_MAPPER_CACHE_CAPACITY
}

impl Default for MapperCacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            capacity: DEFAULT_MAPPER_CACHE_CAPACITY,
        }
    }
}

/// What happens when an invalidation names a fragment that also carries an
/// unflushed local change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Keep the local change; it is flushed, and the fragment is refetched
    /// on its next access afterwards.
    #[default]
    Overwrite,
    /// Drop the local change as soon as the invalidation is applied.
    Discard,
    /// Fail the next flush with a concurrent update error.
    Reject,
}

/// Persistence context configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextConfig {
    /// Selections with more members than this are logged.
    #[serde(default = "default_selection_warn_threshold")]
    pub selection_warn_threshold: usize,

    /// Policy for invalidations hitting locally modified fragments.
    #[serde(default)]
    pub conflict_policy: ConflictPolicy,

    /// Rewrite whole collections instead of appending to them.
    #[serde(default)]
    pub collection_delete_before_append: bool,
}

fn default_selection_warn_threshold() -> usize {
    DEFAULT_SELECTION_WARN_THRESHOLD
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            selection_warn_threshold: DEFAULT_SELECTION_WARN_THRESHOLD,
            conflict_policy: ConflictPolicy::default(),
            collection_delete_before_append: false,
        }
    }
}
