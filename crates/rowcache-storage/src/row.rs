//! Rows and write batches.
//!
//! A [`Row`] is the physical payload of one storage location: a map of
//! column values for a single-row table, or an ordered array for a
//! collection table. A flush turns the dirty fragments of a session into one
//! [`RowBatch`].

use std::collections::BTreeMap;
use std::fmt;

use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{RowId, Value};
use rowcache_invalidation::Invalidations;
use serde::{Deserialize, Serialize};

/// Column values of a single-row fragment.
pub type Columns = BTreeMap<String, Value>;

/// The payload of a row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RowData {
    /// Column name to value.
    Simple(Columns),
    /// Ordered values sharing one row id.
    Collection(Vec<Value>),
}

impl RowData {
    /// Returns true for collection payloads.
    pub fn is_collection(&self) -> bool {
        matches!(self, RowData::Collection(_))
    }

    /// Returns an empty payload of the requested shape.
    pub fn empty(collection: bool) -> Self {
        if collection {
            RowData::Collection(Vec::new())
        } else {
            RowData::Simple(Columns::new())
        }
    }
}

/// A row: a location and its payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    /// The storage location.
    pub row_id: RowId,
    /// The payload.
    pub data: RowData,
}

impl Row {
    /// Creates a single-row payload.
    pub fn simple(row_id: RowId, columns: Columns) -> Self {
        Self {
            row_id,
            data: RowData::Simple(columns),
        }
    }

    /// Creates a collection payload.
    pub fn collection(row_id: RowId, values: Vec<Value>) -> Self {
        Self {
            row_id,
            data: RowData::Collection(values),
        }
    }
}

impl fmt::Display for Row {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.data {
            RowData::Simple(columns) => write!(f, "Row({}, {} columns)", self.row_id, columns.len()),
            RowData::Collection(values) => write!(f, "Row({}, {} values)", self.row_id, values.len()),
        }
    }
}

/// The minimal write for a collection fragment.
#[derive(Debug, Clone, PartialEq)]
pub enum CollectionWrite {
    /// Nothing was stored before; insert every value from offset 0.
    Insert(Vec<Value>),
    /// The stored values are a prefix; add the tail starting at `offset`.
    Append {
        /// Index of the first new element.
        offset: usize,
        /// The new tail.
        values: Vec<Value>,
    },
    /// Replace the whole collection (possibly with nothing).
    Replace(Vec<Value>),
}

impl CollectionWrite {
    /// Applies the write to stored values.
    ///
    /// Fails if an append does not line up with the stored length.
    pub fn apply(&self, stored: &mut Vec<Value>) -> RowCacheResult<()> {
        match self {
            CollectionWrite::Insert(values) | CollectionWrite::Replace(values) => {
                stored.clear();
                stored.extend(values.iter().cloned());
            }
            CollectionWrite::Append { offset, values } => {
                if *offset != stored.len() {
                    return Err(RowCacheError::storage(format!(
                        "append at offset {} but {} values are stored",
                        offset,
                        stored.len()
                    )));
                }
                stored.extend(values.iter().cloned());
            }
        }
        Ok(())
    }

    /// Returns the number of values carried by the write.
    pub fn len(&self) -> usize {
        match self {
            CollectionWrite::Insert(values)
            | CollectionWrite::Replace(values)
            | CollectionWrite::Append { values, .. } => values.len(),
        }
    }

    /// Returns true if the write carries no values.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What part of a row an update touches.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateWrite {
    /// Only these columns changed.
    Columns(Vec<String>),
    /// The collection changed as described.
    Collection(CollectionWrite),
}

/// An update of an existing row.
///
/// Carries the full current row alongside the description of what changed,
/// so that caches can store the new state without reading it back.
#[derive(Debug, Clone, PartialEq)]
pub struct RowUpdate {
    /// The full row after the update.
    pub row: Row,
    /// The changed part.
    pub write: UpdateWrite,
}

/// Everything one flush writes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowBatch {
    /// Rows to insert, in creation order.
    pub creates: Vec<Row>,
    /// Rows to update.
    pub updates: Vec<RowUpdate>,
    /// Rows to delete.
    pub deletes: Vec<RowId>,
}

impl RowBatch {
    /// Creates an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the batch writes nothing.
    pub fn is_empty(&self) -> bool {
        self.creates.is_empty() && self.updates.is_empty() && self.deletes.is_empty()
    }

    /// Returns the number of operations.
    pub fn len(&self) -> usize {
        self.creates.len() + self.updates.len() + self.deletes.len()
    }

    /// Iterates over every row id the batch touches.
    pub fn row_ids(&self) -> impl Iterator<Item = &RowId> {
        self.creates
            .iter()
            .map(|r| &r.row_id)
            .chain(self.updates.iter().map(|u| &u.row.row_id))
            .chain(self.deletes.iter())
    }

    /// Returns what other sessions must invalidate once the batch commits.
    ///
    /// Creates are reported as modified so that other sessions holding an
    /// absent fragment for the same row refetch it.
    pub fn invalidations(&self) -> Invalidations {
        let mut invalidations = Invalidations::new();
        for row in &self.creates {
            invalidations.add_modified(row.row_id.clone());
        }
        for update in &self.updates {
            invalidations.add_modified(update.row.row_id.clone());
        }
        for row_id in &self.deletes {
            invalidations.add_deleted(row_id.clone());
        }
        invalidations
    }
}
