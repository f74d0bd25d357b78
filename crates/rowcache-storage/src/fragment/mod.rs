//! Cached fragments and their lifecycle.
//!
//! A fragment is the in-memory copy of one row ([`SimpleFragment`]) or one
//! ordered group of rows ([`CollectionFragment`]). Both share the state
//! machine implemented by the provided methods of [`StatefulFragment`]:
//!
//! - reads of an `INVALIDATED_*` fragment trigger a refetch (performed by the
//!   owning context, which calls [`StatefulFragment::refetched`])
//! - writes move `PRISTINE` and `INVALIDATED_MODIFIED` to `MODIFIED`;
//!   `CREATED` stays `CREATED`; `ABSENT`, `DELETED` and `INVALIDATED_DELETED`
//!   refuse writes
//! - a flush moves `CREATED`/`MODIFIED` to `PRISTINE` and `DELETED` to
//!   `ABSENT`
//! - an invalidation arriving for a clean fragment flips it to
//!   `INVALIDATED_*` at once; for a dirty fragment it is remembered and
//!   applied when the fragment is flushed or rolled back

mod collection;
mod simple;

pub use collection::{is_prefix, CollectionFragment};
pub use simple::SimpleFragment;

use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{FragmentState, RowId};
use rowcache_invalidation::InvalidationKind;

use crate::row::RowData;

/// Identity and lifecycle state shared by every fragment kind.
#[derive(Debug, Clone, PartialEq)]
pub struct FragmentCore {
    row_id: RowId,
    state: FragmentState,
    /// Invalidation received while the fragment was dirty.
    pending: Option<InvalidationKind>,
}

impl FragmentCore {
    /// Creates a core in the given state.
    pub fn new(row_id: RowId, state: FragmentState) -> Self {
        Self {
            row_id,
            state,
            pending: None,
        }
    }

    fn invalidated(kind: InvalidationKind) -> FragmentState {
        match kind {
            InvalidationKind::Modified => FragmentState::InvalidatedModified,
            InvalidationKind::Deleted => FragmentState::InvalidatedDeleted,
        }
    }

    /// Returns the state a dirty fragment lands in once its local change is
    /// settled.
    fn settled_state(&mut self) -> FragmentState {
        self.pending
            .take()
            .map_or(FragmentState::Pristine, Self::invalidated)
    }
}

/// The state machine shared by single-row and collection fragments.
///
/// Implementors provide content handling; transitions are provided.
pub trait StatefulFragment {
    /// Returns the shared core.
    fn core(&self) -> &FragmentCore;

    /// Returns the shared core mutably.
    fn core_mut(&mut self) -> &mut FragmentCore;

    /// Returns true if the content differs from the last consistent baseline.
    fn is_dirty(&self) -> bool;

    /// Makes the current content the new baseline.
    fn clear_dirty(&mut self);

    /// Reverts the content to the baseline.
    fn restore(&mut self);

    /// Empties both content and baseline.
    fn reset(&mut self);

    /// Replaces content and baseline with a fetched payload.
    fn load(&mut self, data: RowData) -> RowCacheResult<()>;

    /// Returns a copy of the current content.
    fn data(&self) -> RowData;

    /// Returns the fragment's row.
    fn row_id(&self) -> &RowId {
        &self.core().row_id
    }

    /// Returns the lifecycle state.
    fn state(&self) -> FragmentState {
        self.core().state
    }

    /// Returns the invalidation remembered while dirty, if any.
    fn pending_invalidation(&self) -> Option<InvalidationKind> {
        self.core().pending
    }

    /// Records a local modification.
    ///
    /// `CREATED` stays `CREATED`; rows that do not exist cannot be modified.
    /// A stale fragment keeps its invalidation pending, so it is refetched
    /// once the change is settled.
    fn mark_modified(&mut self) -> RowCacheResult<()> {
        let core = self.core_mut();
        match core.state {
            FragmentState::Created | FragmentState::Modified => Ok(()),
            FragmentState::Pristine => {
                core.state = FragmentState::Modified;
                Ok(())
            }
            FragmentState::InvalidatedModified => {
                core.state = FragmentState::Modified;
                core.pending = Some(InvalidationKind::Modified);
                Ok(())
            }
            state @ (FragmentState::Absent
            | FragmentState::Deleted
            | FragmentState::InvalidatedDeleted) => Err(RowCacheError::illegal_transition(
                &core.row_id,
                state,
                "modify",
            )),
        }
    }

    /// Records a local deletion and returns the new state.
    ///
    /// A fragment created in this session simply disappears (`ABSENT`), as
    /// does one already known to be gone.
    fn mark_deleted(&mut self) -> RowCacheResult<FragmentState> {
        let state = self.state();
        let next = match state {
            FragmentState::Created | FragmentState::Absent | FragmentState::InvalidatedDeleted => {
                self.reset();
                self.core_mut().pending = None;
                FragmentState::Absent
            }
            FragmentState::Pristine | FragmentState::Modified => FragmentState::Deleted,
            FragmentState::InvalidatedModified => {
                let core = self.core_mut();
                if core.pending.is_none() {
                    core.pending = Some(InvalidationKind::Modified);
                }
                FragmentState::Deleted
            }
            FragmentState::Deleted => {
                return Err(RowCacheError::illegal_transition(self.row_id(), state, "delete"))
            }
        };
        self.core_mut().state = next;
        Ok(next)
    }

    /// Applies an invalidation from another session or node.
    fn apply_invalidation(&mut self, kind: InvalidationKind) {
        let core = self.core_mut();
        match (core.state, kind) {
            (FragmentState::Pristine, _) => core.state = FragmentCore::invalidated(kind),
            (FragmentState::Absent, InvalidationKind::Modified) => {
                core.state = FragmentState::InvalidatedModified
            }
            (FragmentState::Absent, InvalidationKind::Deleted) => {}
            (FragmentState::InvalidatedModified, InvalidationKind::Deleted) => {
                core.state = FragmentState::InvalidatedDeleted
            }
            (FragmentState::InvalidatedModified | FragmentState::InvalidatedDeleted, _) => {}
            (FragmentState::Created | FragmentState::Modified | FragmentState::Deleted, _) => {
                if core.pending != Some(InvalidationKind::Deleted) {
                    core.pending = Some(kind);
                }
            }
        }
    }

    /// Drops the local change of a dirty fragment in favour of an incoming
    /// invalidation.
    fn discard_local_change(&mut self, kind: InvalidationKind) {
        self.restore();
        let core = self.core_mut();
        core.pending = None;
        core.state = FragmentCore::invalidated(kind);
    }

    /// Settles the fragment after its content was written.
    fn flushed(&mut self) {
        match self.state() {
            FragmentState::Created | FragmentState::Modified => {
                self.clear_dirty();
                let core = self.core_mut();
                core.state = core.settled_state();
            }
            FragmentState::Deleted => {
                self.reset();
                let core = self.core_mut();
                core.pending = None;
                core.state = FragmentState::Absent;
            }
            _ => {}
        }
    }

    /// Reverts an unflushed local change.
    fn rolled_back(&mut self) {
        match self.state() {
            FragmentState::Created => {
                self.reset();
                let core = self.core_mut();
                core.pending = None;
                core.state = FragmentState::Absent;
            }
            FragmentState::Modified | FragmentState::Deleted => {
                self.restore();
                let core = self.core_mut();
                core.state = core.settled_state();
            }
            _ => {}
        }
    }

    /// Installs freshly fetched content; `None` means the row is gone.
    fn refetched(&mut self, data: Option<RowData>) -> RowCacheResult<()> {
        let state = match data {
            Some(data) => {
                self.load(data)?;
                FragmentState::Pristine
            }
            None => {
                self.reset();
                FragmentState::Absent
            }
        };
        let core = self.core_mut();
        core.pending = None;
        core.state = state;
        Ok(())
    }

    /// Re-keys the fragment.
    fn rebind(&mut self, row_id: RowId) {
        self.core_mut().row_id = row_id;
    }
}

/// A cached fragment of either kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Fragment {
    /// One row of column values.
    Simple(SimpleFragment),
    /// An ordered array of values.
    Collection(CollectionFragment),
}

impl Fragment {
    /// Creates a fragment from a fetched payload.
    pub fn from_data(row_id: RowId, data: RowData, state: FragmentState) -> Self {
        match data {
            RowData::Simple(columns) => {
                Fragment::Simple(SimpleFragment::new(row_id, columns, state))
            }
            RowData::Collection(values) => {
                Fragment::Collection(CollectionFragment::new(row_id, values, state))
            }
        }
    }

    /// Creates an `ABSENT` fragment.
    pub fn absent(row_id: RowId, collection: bool) -> Self {
        Self::from_data(row_id, RowData::empty(collection), FragmentState::Absent)
    }

    /// Returns true for collection fragments.
    pub fn is_collection(&self) -> bool {
        matches!(self, Fragment::Collection(_))
    }

    /// Returns the single-row fragment, or an error for collections.
    pub fn as_simple(&self) -> RowCacheResult<&SimpleFragment> {
        match self {
            Fragment::Simple(f) => Ok(f),
            Fragment::Collection(f) => Err(not_a(f.row_id(), "single-row")),
        }
    }

    /// Returns the single-row fragment mutably, or an error for collections.
    pub fn as_simple_mut(&mut self) -> RowCacheResult<&mut SimpleFragment> {
        match self {
            Fragment::Simple(f) => Ok(f),
            Fragment::Collection(f) => Err(not_a(f.row_id(), "single-row")),
        }
    }

    /// Returns the collection fragment, or an error for single rows.
    pub fn as_collection(&self) -> RowCacheResult<&CollectionFragment> {
        match self {
            Fragment::Collection(f) => Ok(f),
            Fragment::Simple(f) => Err(not_a(f.row_id(), "collection")),
        }
    }

    /// Returns the collection fragment mutably, or an error for single rows.
    pub fn as_collection_mut(&mut self) -> RowCacheResult<&mut CollectionFragment> {
        match self {
            Fragment::Collection(f) => Ok(f),
            Fragment::Simple(f) => Err(not_a(f.row_id(), "collection")),
        }
    }
}

fn not_a(row_id: &RowId, kind: &str) -> RowCacheError {
    RowCacheError::internal(format!("{} is not a {} fragment", row_id, kind))
}

impl StatefulFragment for Fragment {
    fn core(&self) -> &FragmentCore {
        match self {
            Fragment::Simple(f) => f.core(),
            Fragment::Collection(f) => f.core(),
        }
    }

    fn core_mut(&mut self) -> &mut FragmentCore {
        match self {
            Fragment::Simple(f) => f.core_mut(),
            Fragment::Collection(f) => f.core_mut(),
        }
    }

    fn is_dirty(&self) -> bool {
        match self {
            Fragment::Simple(f) => f.is_dirty(),
            Fragment::Collection(f) => f.is_dirty(),
        }
    }

    fn clear_dirty(&mut self) {
        match self {
            Fragment::Simple(f) => f.clear_dirty(),
            Fragment::Collection(f) => f.clear_dirty(),
        }
    }

    fn restore(&mut self) {
        match self {
            Fragment::Simple(f) => f.restore(),
            Fragment::Collection(f) => f.restore(),
        }
    }

    fn reset(&mut self) {
        match self {
            Fragment::Simple(f) => f.reset(),
            Fragment::Collection(f) => f.reset(),
        }
    }

    fn load(&mut self, data: RowData) -> RowCacheResult<()> {
        match self {
            Fragment::Simple(f) => f.load(data),
            Fragment::Collection(f) => f.load(data),
        }
    }

    fn data(&self) -> RowData {
        match self {
            Fragment::Simple(f) => f.data(),
            Fragment::Collection(f) => f.data(),
        }
    }
}
