//! Cache error types.

use std::fmt;
use thiserror::Error;

use crate::types::{FragmentState, RowId};

/// Error codes for categorizing errors.
///
/// These codes can be used for programmatic error handling and
/// are stable across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ErrorCode {
    // General errors (0x0000 - 0x00FF)
    /// Internal error (bug).
    Internal = 0x0001,
    /// Invalid configuration.
    InvalidConfig = 0x0002,

    // Storage errors (0x0100 - 0x01FF)
    /// Backing store read or write failed.
    StorageFailure = 0x0100,

    // Fragment errors (0x0200 - 0x02FF)
    /// Forbidden fragment state transition.
    IllegalTransition = 0x0200,
    /// Write to a read-only property.
    ReadOnlyProperty = 0x0201,
    /// Local change conflicts with a concurrent one.
    ConcurrentUpdate = 0x0202,

    // Transaction errors (0x0300 - 0x03FF)
    /// Transaction lifecycle misuse or failure.
    Transaction = 0x0300,

    // Invalidation errors (0x0400 - 0x04FF)
    /// Cluster invalidation send or receive failed.
    InvalidationTransport = 0x0400,
    /// Invalidation frame could not be encoded or decoded.
    Codec = 0x0401,
}

impl ErrorCode {
    /// Returns the numeric code.
    #[inline]
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self as u16
    }

    /// Returns the error category name.
    #[must_use]
    pub const fn category(&self) -> &'static str {
        match (*self as u16) >> 8 {
            0x00 => "General",
            0x01 => "Storage",
            0x02 => "Fragment",
            0x03 => "Transaction",
            0x04 => "Invalidation",
            _ => "Unknown",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// The main error type for rowcache.
///
/// # Example
///
/// ```rust
/// use rowcache_common::error::{RowCacheError, RowCacheResult};
///
/// fn read() -> RowCacheResult<()> {
///     Err(RowCacheError::storage("connection reset"))
/// }
/// assert!(read().unwrap_err().is_storage_failure());
/// ```
#[derive(Debug, Error)]
pub enum RowCacheError {
    // ==========================================================================
    // General Errors
    // ==========================================================================
    /// Internal error - this indicates a bug.
    #[error("internal error: {message}")]
    Internal {
        /// Error message.
        message: String,
    },

    /// Invalid configuration.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Storage Errors
    // ==========================================================================
    /// Mapper I/O or backing-store error.
    ///
    /// Propagated to the caller, who is responsible for rolling back.
    #[error("storage failure: {message}")]
    StorageFailure {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Fragment Errors
    // ==========================================================================
    /// A fragment was asked to perform a transition its state forbids.
    #[error("illegal {operation} on {row_id} in state {state}")]
    IllegalFragmentTransition {
        /// The fragment's row.
        row_id: RowId,
        /// The fragment's state at the time.
        state: FragmentState,
        /// The attempted operation.
        operation: &'static str,
    },

    /// A read-only property was written.
    #[error("property '{key}' of {row_id} is read-only")]
    ReadOnlyProperty {
        /// The fragment's row.
        row_id: RowId,
        /// The property name.
        key: String,
    },

    /// A local change collides with a concurrent change from elsewhere.
    #[error("concurrent update of {row_id}")]
    ConcurrentUpdate {
        /// The contested row.
        row_id: RowId,
    },

    // ==========================================================================
    // Transaction Errors
    // ==========================================================================
    /// Transaction lifecycle error.
    #[error("transaction error: {message}")]
    Transaction {
        /// Error message.
        message: String,
    },

    // ==========================================================================
    // Invalidation Errors
    // ==========================================================================
    /// Send or receive failure on the cluster channel.
    #[error("invalidation transport failure: {message}")]
    InvalidationTransport {
        /// Error message.
        message: String,
    },

    /// Invalidation frame encode/decode failure.
    #[error("codec error: {message}")]
    Codec {
        /// Error message.
        message: String,
    },
}

impl RowCacheError {
    /// Returns the error code for this error.
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Internal { .. } => ErrorCode::Internal,
            Self::InvalidConfig { .. } => ErrorCode::InvalidConfig,
            Self::StorageFailure { .. } => ErrorCode::StorageFailure,
            Self::IllegalFragmentTransition { .. } => ErrorCode::IllegalTransition,
            Self::ReadOnlyProperty { .. } => ErrorCode::ReadOnlyProperty,
            Self::ConcurrentUpdate { .. } => ErrorCode::ConcurrentUpdate,
            Self::Transaction { .. } => ErrorCode::Transaction,
            Self::InvalidationTransport { .. } => ErrorCode::InvalidationTransport,
            Self::Codec { .. } => ErrorCode::Codec,
        }
    }

    /// Returns true if this is a backing-store failure.
    #[must_use]
    pub const fn is_storage_failure(&self) -> bool {
        matches!(self, Self::StorageFailure { .. })
    }

    /// Returns true if this error reports a programming mistake that must
    /// not be retried.
    #[must_use]
    pub const fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Self::IllegalFragmentTransition { .. } | Self::ReadOnlyProperty { .. } | Self::Internal { .. }
        )
    }

    /// Returns true if this error is a conflict with a concurrent writer.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrentUpdate { .. })
    }

    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a storage failure.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::StorageFailure {
            message: message.into(),
        }
    }

    /// Creates a transaction error.
    #[must_use]
    pub fn transaction(message: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
        }
    }

    /// Creates an invalidation transport failure.
    #[must_use]
    pub fn transport(message: impl Into<String>) -> Self {
        Self::InvalidationTransport {
            message: message.into(),
        }
    }

    /// Creates an illegal transition error.
    #[must_use]
    pub fn illegal_transition(row_id: &RowId, state: FragmentState, operation: &'static str) -> Self {
        Self::IllegalFragmentTransition {
            row_id: row_id.clone(),
            state,
            operation,
        }
    }
}

impl From<toml::de::Error> for RowCacheError {
    fn from(e: toml::de::Error) -> Self {
        Self::InvalidConfig {
            message: e.to_string(),
        }
    }
}
