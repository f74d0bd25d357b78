//! Storage location of a fragment.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::Ident;
use crate::constants::{SELECTION_TABLE_PREFIX, SELECTION_TABLE_SUFFIX};

/// Identifies a storage location: a table name plus a row identifier.
///
/// `RowId` is a pure value used as a map key and as the payload of
/// invalidations. It is immutable; rebinding a temporary id to a
/// server-assigned one produces a new `RowId` (see [`RowId::with_id`]) and any
/// index keyed by the old one must be updated by removal and reinsertion.
///
/// # Example
///
/// ```rust
/// use rowcache_common::types::RowId;
///
/// let a = RowId::new("acls", 3);
/// let b = RowId::new("acls", 3);
/// assert_eq!(a, b);
/// ```
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RowId {
    table: String,
    id: Ident,
}

impl RowId {
    /// Creates a new row id.
    pub fn new(table: impl Into<String>, id: impl Into<Ident>) -> Self {
        Self {
            table: table.into(),
            id: id.into(),
        }
    }

    /// Returns the table name.
    #[inline]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the row identifier.
    #[inline]
    pub fn id(&self) -> &Ident {
        &self.id
    }

    /// Returns a row id for the same table with another identifier.
    #[must_use]
    pub fn with_id(&self, id: impl Into<Ident>) -> Self {
        Self {
            table: self.table.clone(),
            id: id.into(),
        }
    }

    /// Returns true if the table is a selection pseudo-table.
    pub fn is_selection(&self) -> bool {
        self.table.starts_with(SELECTION_TABLE_PREFIX)
            && self.table.ends_with(SELECTION_TABLE_SUFFIX)
            && self.table.len() > SELECTION_TABLE_PREFIX.len() + SELECTION_TABLE_SUFFIX.len()
    }
}

impl fmt::Debug for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RowId({}, {:?})", self.table, self.id)
    }
}

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.table, self.id)
    }
}
