//! Invalidation sets.
//!
//! An [`Invalidations`] records which rows (and which selections, through
//! their pseudo-table RowIds) became stale, tagged modified or deleted.
//! Merging is a per-kind set union, so it is commutative, associative and
//! idempotent. Absent sets are distinguished from empty ones so that the hot
//! path of merging nothing never allocates.

use std::collections::HashSet;
use std::fmt;

use rowcache_common::types::RowId;
use serde::{Deserialize, Serialize};

/// The kind of change an invalidation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InvalidationKind {
    /// The row's content changed.
    Modified,
    /// The row was removed.
    Deleted,
}

impl fmt::Display for InvalidationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvalidationKind::Modified => write!(f, "modified"),
            InvalidationKind::Deleted => write!(f, "deleted"),
        }
    }
}

/// A set of invalidated rows.
///
/// A RowId may legally be present in both the modified and the deleted set
/// (for instance after merging a remote update and a remote delete); deletion
/// wins when the set is applied, see [`Invalidations::kind_of`].
///
/// # Example
///
/// ```rust
/// use rowcache_common::types::RowId;
/// use rowcache_invalidation::{InvalidationKind, Invalidations};
///
/// let mut a = Invalidations::new();
/// a.add_modified(RowId::new("hierarchy", 1));
///
/// let mut b = Invalidations::new();
/// b.add_deleted(RowId::new("hierarchy", 1));
///
/// a.add(&b);
/// assert_eq!(a.kind_of(&RowId::new("hierarchy", 1)), Some(InvalidationKind::Deleted));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Invalidations {
    /// Everything must be invalidated.
    all: bool,
    /// Rows whose content changed; `None` when nothing was recorded.
    modified: Option<HashSet<RowId>>,
    /// Rows that were removed; `None` when nothing was recorded.
    deleted: Option<HashSet<RowId>>,
}

impl Invalidations {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set that invalidates every cache.
    pub fn everything() -> Self {
        Self {
            all: true,
            ..Self::default()
        }
    }

    /// Returns true if every cache must be cleared.
    #[inline]
    pub fn is_all(&self) -> bool {
        self.all
    }

    /// Returns true if nothing is invalidated.
    pub fn is_empty(&self) -> bool {
        !self.all
            && self.modified.as_ref().map_or(true, HashSet::is_empty)
            && self.deleted.as_ref().map_or(true, HashSet::is_empty)
    }

    /// Returns the number of entries across both kinds.
    pub fn len(&self) -> usize {
        self.modified.as_ref().map_or(0, HashSet::len) + self.deleted.as_ref().map_or(0, HashSet::len)
    }

    /// Merges another set into this one.
    pub fn add(&mut self, other: &Invalidations) {
        self.all |= other.all;
        if let Some(modified) = other.modified.as_ref().filter(|s| !s.is_empty()) {
            self.modified
                .get_or_insert_with(HashSet::new)
                .extend(modified.iter().cloned());
        }
        if let Some(deleted) = other.deleted.as_ref().filter(|s| !s.is_empty()) {
            self.deleted
                .get_or_insert_with(HashSet::new)
                .extend(deleted.iter().cloned());
        }
    }

    /// Records a modified row.
    pub fn add_modified(&mut self, row_id: RowId) {
        self.modified.get_or_insert_with(HashSet::new).insert(row_id);
    }

    /// Records a deleted row.
    pub fn add_deleted(&mut self, row_id: RowId) {
        self.deleted.get_or_insert_with(HashSet::new).insert(row_id);
    }

    /// Records a row with the given kind.
    pub fn add_row(&mut self, row_id: RowId, kind: InvalidationKind) {
        match kind {
            InvalidationKind::Modified => self.add_modified(row_id),
            InvalidationKind::Deleted => self.add_deleted(row_id),
        }
    }

    /// Iterates over the rows recorded as modified.
    pub fn modified(&self) -> impl Iterator<Item = &RowId> {
        self.modified.iter().flatten()
    }

    /// Iterates over the rows recorded as deleted.
    pub fn deleted(&self) -> impl Iterator<Item = &RowId> {
        self.deleted.iter().flatten()
    }

    /// Iterates over the rows recorded as modified and not also deleted.
    pub fn effective_modified(&self) -> impl Iterator<Item = &RowId> {
        self.modified().filter(move |row_id| !self.is_deleted(row_id))
    }

    /// Returns true if the row is recorded as deleted.
    pub fn is_deleted(&self, row_id: &RowId) -> bool {
        self.deleted.as_ref().map_or(false, |s| s.contains(row_id))
    }

    /// Returns true if the row is recorded as modified.
    pub fn is_modified(&self, row_id: &RowId) -> bool {
        self.modified.as_ref().map_or(false, |s| s.contains(row_id))
    }

    /// Returns how the row must be treated when this set is applied.
    ///
    /// Deletion takes precedence over modification.
    pub fn kind_of(&self, row_id: &RowId) -> Option<InvalidationKind> {
        if self.is_deleted(row_id) {
            Some(InvalidationKind::Deleted)
        } else if self.is_modified(row_id) {
            Some(InvalidationKind::Modified)
        } else {
            None
        }
    }

    /// Iterates over every named row with its effective kind.
    pub fn entries(&self) -> impl Iterator<Item = (&RowId, InvalidationKind)> {
        self.deleted()
            .map(|row_id| (row_id, InvalidationKind::Deleted))
            .chain(
                self.effective_modified()
                    .map(|row_id| (row_id, InvalidationKind::Modified)),
            )
    }
}

impl fmt::Display for Invalidations {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Invalidations(all={}, modified={}, deleted={})",
            self.all,
            self.modified.as_ref().map_or(0, HashSet::len),
            self.deleted.as_ref().map_or(0, HashSet::len)
        )
    }
}
