//! Fragment lifecycle states.
//!
//! ```text
//!               fetch (found)                 fetch (missing)
//!                    │                              │
//!                    ▼                              ▼
//!   ┌──────────┐  set/mark   ┌──────────┐     ┌──────────┐  create  ┌─────────┐
//!   │ PRISTINE │────────────▶│ MODIFIED │     │  ABSENT  │─────────▶│ CREATED │
//!   └──────────┘             └──────────┘     └──────────┘          └─────────┘
//!     ▲   │ remote                │ flush          ▲                     │ flush
//!     │   ▼ invalidation          ▼                │ flush               ▼
//!     │ ┌──────────────────┐   PRISTINE      ┌─────────┐             PRISTINE
//!     │ │ INVALIDATED_*    │                 │ DELETED │◀── remove
//!     │ └──────────────────┘                 └─────────┘
//!     └──── access (refetch)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle state of a cached fragment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FragmentState {
    /// Confirmed not to exist upstream.
    Absent,
    /// Matches upstream, valid for reading.
    Pristine,
    /// New, never flushed.
    Created,
    /// Locally changed, not yet flushed.
    Modified,
    /// Locally deleted, not yet flushed.
    Deleted,
    /// Changed by another session or node; must be refetched before reading.
    InvalidatedModified,
    /// Deleted by another session or node; must be refetched before reading.
    InvalidatedDeleted,
}

impl FragmentState {
    /// Returns true if the fragment holds unflushed local changes.
    #[inline]
    pub fn is_dirty(self) -> bool {
        matches!(self, Self::Created | Self::Modified | Self::Deleted)
    }

    /// Returns true if the fragment must be refetched before its next read.
    #[inline]
    pub fn is_invalidated(self) -> bool {
        matches!(self, Self::InvalidatedModified | Self::InvalidatedDeleted)
    }

    /// Returns true if the fragment's data can be returned without I/O.
    #[inline]
    pub fn is_readable(self) -> bool {
        matches!(self, Self::Pristine | Self::Created | Self::Modified)
    }
}

impl fmt::Display for FragmentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Absent => "ABSENT",
            Self::Pristine => "PRISTINE",
            Self::Created => "CREATED",
            Self::Modified => "MODIFIED",
            Self::Deleted => "DELETED",
            Self::InvalidatedModified => "INVALIDATED_MODIFIED",
            Self::InvalidatedDeleted => "INVALIDATED_DELETED",
        };
        f.write_str(name)
    }
}
