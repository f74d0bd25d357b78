//! The per-session fragment cache.
//!
//! A [`PersistenceContext`] holds every fragment a session has touched,
//! tracks which of them are dirty, turns them into a [`RowBatch`] on flush
//! and applies invalidations coming from other sessions. It owns the
//! session's mapper, which is usually a [`CachingMapper`](crate::CachingMapper)
//! over the repository's shared [`RowCache`](crate::RowCache).
//!
//! ## Fragment lookup
//!
//! ```text
//!   get(row_id)
//!       │
//!       ├── cached, readable ────────────────► fragment
//!       ├── cached, INVALIDATED_* ──► refetch ► fragment (PRISTINE or ABSENT)
//!       ├── id generated here ──────► ABSENT, mapper not consulted
//!       └── not cached ─────────────► mapper read ► fragment (PRISTINE or ABSENT)
//! ```

mod selection;

pub use selection::SelectionContext;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use rowcache_common::config::{ConflictPolicy, ContextConfig};
use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{FragmentState, Ident, RowId, SessionId, Value};
use rowcache_invalidation::{InvalidationKind, Invalidations};
use tracing::{debug, error, trace, warn};

use crate::fragment::{CollectionFragment, Fragment, SimpleFragment, StatefulFragment};
use crate::mapper::RowMapper;
use crate::model::Model;
use crate::row::{Columns, Row, RowBatch, RowData, RowUpdate, UpdateWrite};

/// Point-in-time counters of a context.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ContextStats {
    /// Fragment and selection lookups.
    pub lookups: u64,
    /// Lookups answered without the mapper.
    pub hits: u64,
    /// Cached fragments.
    pub fragments: usize,
    /// Dirty fragments.
    pub dirty: usize,
    /// Cached selections.
    pub selections: usize,
    /// Entries in the mapper's cache.
    pub mapper_cache: usize,
}

impl fmt::Display for ContextStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "lookups={} hits={} fragments={} dirty={} selections={} mapper_cache={}",
            self.lookups, self.hits, self.fragments, self.dirty, self.selections, self.mapper_cache
        )
    }
}

/// The fragment cache of one session.
pub struct PersistenceContext {
    model: Arc<Model>,
    mapper: Box<dyn RowMapper>,
    config: ContextConfig,
    session_id: SessionId,

    fragments: HashMap<RowId, Fragment>,
    /// Dirty rows, in the order they first became dirty.
    dirty: HashSet<RowId>,
    dirty_order: Vec<RowId>,
    /// Ids generated by this session and not flushed yet.
    created_ids: HashSet<Ident>,
    selections: Vec<SelectionContext>,

    /// What the current transaction has written so far.
    transaction_invalidations: Invalidations,
    /// Rows written by the current transaction.
    flushed_rows: HashSet<RowId>,

    lookups: u64,
    hits: u64,
}

impl PersistenceContext {
    /// Creates an empty context over a mapper.
    pub fn new(
        model: Arc<Model>,
        mapper: Box<dyn RowMapper>,
        config: ContextConfig,
        session_id: SessionId,
    ) -> Self {
        let selections = model
            .selections()
            .iter()
            .map(|s| SelectionContext::new(s.clone(), config.selection_warn_threshold))
            .collect();
        Self {
            model,
            mapper,
            config,
            session_id,
            fragments: HashMap::new(),
            dirty: HashSet::new(),
            dirty_order: Vec::new(),
            created_ids: HashSet::new(),
            selections,
            transaction_invalidations: Invalidations::new(),
            flushed_rows: HashSet::new(),
            lookups: 0,
            hits: 0,
        }
    }

    /// Returns the owning session.
    pub fn session_id(&self) -> SessionId {
        self.session_id
    }

    /// Returns the model.
    pub fn model(&self) -> &Arc<Model> {
        &self.model
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Returns the mapper.
    pub fn mapper_mut(&mut self) -> &mut dyn RowMapper {
        self.mapper.as_mut()
    }

    /// Returns true if some fragment has unflushed changes.
    pub fn is_dirty(&self) -> bool {
        !self.dirty.is_empty()
    }

    // =========================================================================
    // Ids
    // =========================================================================

    /// Generates an id for a new row and remembers it as new.
    pub fn generate_new_id(&mut self) -> RowCacheResult<Ident> {
        let id = self.mapper.generate_new_id()?;
        self.created_ids.insert(id.clone());
        Ok(id)
    }

    /// Remembers an externally chosen id as new.
    pub fn register_new_id(&mut self, id: Ident) {
        self.created_ids.insert(id);
    }

    /// Returns true if the id was generated here and not flushed yet; rows
    /// with such ids cannot exist in storage.
    pub fn is_id_new(&self, id: &Ident) -> bool {
        self.created_ids.contains(id)
    }

    // =========================================================================
    // Lookup
    // =========================================================================

    /// Returns a cached fragment without fetching or refetching.
    pub fn fragment(&self, row_id: &RowId) -> Option<&Fragment> {
        self.fragments.get(row_id)
    }

    /// Returns a fragment, fetching it if it is not cached and refetching
    /// it if it was invalidated.
    ///
    /// Rows that do not exist are cached as `ABSENT`; they are returned only
    /// if `allow_absent` is set.
    pub fn get(&mut self, row_id: &RowId, allow_absent: bool) -> RowCacheResult<Option<&Fragment>> {
        self.lookups += 1;
        let stale = match self.fragments.get(row_id).map(|f| f.state()) {
            Some(state) if state.is_invalidated() => true,
            Some(_) => {
                self.hits += 1;
                false
            }
            None => {
                self.load_missing(std::slice::from_ref(row_id))?;
                false
            }
        };
        if stale {
            self.refetch(std::slice::from_ref(row_id))?;
        }
        Ok(self
            .fragments
            .get(row_id)
            .filter(|f| allow_absent || f.state() != FragmentState::Absent))
    }

    /// Returns many fragments, fetching everything missing or stale with a
    /// single mapper call each. Deleted rows are skipped, as are absent ones
    /// unless `allow_absent` is set. Order follows `row_ids`.
    pub fn get_multi(
        &mut self,
        row_ids: &[RowId],
        allow_absent: bool,
    ) -> RowCacheResult<Vec<&Fragment>> {
        self.lookups += row_ids.len() as u64;
        let mut missing = Vec::new();
        let mut stale = Vec::new();
        let mut seen = HashSet::new();
        for row_id in row_ids {
            if !seen.insert(row_id) {
                continue;
            }
            match self.fragments.get(row_id).map(|f| f.state()) {
                None => missing.push(row_id.clone()),
                Some(state) if state.is_invalidated() => stale.push(row_id.clone()),
                Some(_) => self.hits += 1,
            }
        }
        self.load_missing(&missing)?;
        self.refetch(&stale)?;

        Ok(row_ids
            .iter()
            .filter_map(|row_id| self.fragments.get(row_id))
            .filter(|f| match f.state() {
                FragmentState::Deleted => false,
                FragmentState::Absent => allow_absent,
                _ => true,
            })
            .collect())
    }

    /// Reads one column. Returns `None` if the row does not exist.
    pub fn get_value(&mut self, row_id: &RowId, key: &str) -> RowCacheResult<Option<Value>> {
        match self.get(row_id, false)? {
            Some(fragment) if fragment.state() != FragmentState::Deleted => {
                Ok(Some(fragment.as_simple()?.get(key)))
            }
            _ => Ok(None),
        }
    }

    /// Reads a collection; missing collections read as empty.
    pub fn get_collection(&mut self, row_id: &RowId) -> RowCacheResult<Vec<Value>> {
        match self.get(row_id, true)? {
            Some(fragment) if fragment.state().is_readable() => {
                Ok(fragment.as_collection()?.values().to_vec())
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Loads a fragment if it is not cached and refetches it if it is
    /// stale, so local changes apply to current content.
    fn ensure_fresh(&mut self, row_id: &RowId) -> RowCacheResult<()> {
        match self.fragments.get(row_id).map(|f| f.state()) {
            None => self.load_missing(std::slice::from_ref(row_id)),
            Some(state) if state.is_invalidated() => self.refetch(std::slice::from_ref(row_id)),
            Some(_) => Ok(()),
        }
    }

    fn load_missing(&mut self, row_ids: &[RowId]) -> RowCacheResult<()> {
        let mut to_read = Vec::new();
        for row_id in row_ids {
            if self.created_ids.contains(row_id.id()) {
                let collection = self.model.is_collection_table(row_id.table());
                self.fragments
                    .insert(row_id.clone(), Fragment::absent(row_id.clone(), collection));
            } else {
                to_read.push(row_id.clone());
            }
        }
        if to_read.is_empty() {
            return Ok(());
        }

        let mut found = Self::by_row_id(self.mapper.read(&to_read)?);
        for row_id in to_read {
            let fragment = match found.remove(&row_id) {
                Some(data) => Fragment::from_data(row_id.clone(), data, FragmentState::Pristine),
                None => {
                    let collection = self.model.is_collection_table(row_id.table());
                    Fragment::absent(row_id.clone(), collection)
                }
            };
            self.fragments.insert(row_id, fragment);
        }
        Ok(())
    }

    fn refetch(&mut self, row_ids: &[RowId]) -> RowCacheResult<()> {
        if row_ids.is_empty() {
            return Ok(());
        }
        trace!(session = %self.session_id, count = row_ids.len(), "refetching invalidated fragments");
        let mut found = Self::by_row_id(self.mapper.read(row_ids)?);
        for row_id in row_ids {
            if let Some(fragment) = self.fragments.get_mut(row_id) {
                fragment.refetched(found.remove(row_id))?;
            }
        }
        Ok(())
    }

    fn by_row_id(rows: Vec<Row>) -> HashMap<RowId, RowData> {
        rows.into_iter().map(|row| (row.row_id, row.data)).collect()
    }

    // =========================================================================
    // Local changes
    // =========================================================================

    /// Creates a row. The row must not be cached in a state where it exists.
    pub fn create(&mut self, row_id: RowId, columns: Columns) -> RowCacheResult<()> {
        if self.model.is_collection_table(row_id.table()) {
            return Err(RowCacheError::internal(format!(
                "{} is a collection, use create_collection",
                row_id
            )));
        }
        self.check_creatable(&row_id)?;
        for selection in &mut self.selections {
            let kind = selection.selection_type();
            if kind.table() == row_id.table() {
                let criterion = kind.criterion_of(&columns);
                selection.record_change(row_id.id(), None, criterion);
            }
        }
        let fragment = SimpleFragment::new(row_id.clone(), columns, FragmentState::Created);
        self.fragments.insert(row_id.clone(), Fragment::Simple(fragment));
        self.mark_dirty(&row_id);
        Ok(())
    }

    /// Creates a collection.
    pub fn create_collection(&mut self, row_id: RowId, values: Vec<Value>) -> RowCacheResult<()> {
        if !self.model.is_collection_table(row_id.table()) {
            return Err(RowCacheError::internal(format!(
                "{} is not a collection",
                row_id
            )));
        }
        self.check_creatable(&row_id)?;
        let fragment = CollectionFragment::new(row_id.clone(), values, FragmentState::Created);
        self.fragments
            .insert(row_id.clone(), Fragment::Collection(fragment));
        self.mark_dirty(&row_id);
        Ok(())
    }

    /// Creates a row under a freshly generated id.
    pub fn create_new(&mut self, table: &str, columns: Columns) -> RowCacheResult<RowId> {
        let id = self.generate_new_id()?;
        let row_id = RowId::new(table, id);
        self.create(row_id.clone(), columns)?;
        Ok(row_id)
    }

    fn check_creatable(&self, row_id: &RowId) -> RowCacheResult<()> {
        match self.fragments.get(row_id).map(|f| f.state()) {
            None | Some(FragmentState::Absent) | Some(FragmentState::InvalidatedDeleted) => Ok(()),
            Some(state) => Err(RowCacheError::illegal_transition(row_id, state, "create")),
        }
    }

    /// Writes one column. Returns false if the value was unchanged.
    ///
    /// An invalidated fragment is refetched first, so columns not written
    /// here and the selections the row belongs to reflect committed state.
    pub fn set_value(&mut self, row_id: &RowId, key: &str, value: Value) -> RowCacheResult<bool> {
        if self.model.is_read_only(row_id.table(), key) {
            return Err(RowCacheError::ReadOnlyProperty {
                row_id: row_id.clone(),
                key: key.to_string(),
            });
        }
        self.ensure_fresh(row_id)?;

        let changed = {
            let fragment = self
                .fragments
                .get_mut(row_id)
                .ok_or_else(|| RowCacheError::internal(format!("{} vanished", row_id)))?
                .as_simple_mut()?;
            let affected: Vec<usize> = self
                .selections
                .iter()
                .enumerate()
                .filter(|(_, s)| {
                    let kind = s.selection_type();
                    kind.table() == row_id.table() && kind.depends_on(key)
                })
                .map(|(i, _)| i)
                .collect();
            let before: Vec<Option<Ident>> = affected
                .iter()
                .map(|&i| self.selections[i].selection_type().criterion_of(fragment.values()))
                .collect();

            let changed = fragment.set(key, value)?;
            if changed {
                for (&i, old) in affected.iter().zip(before) {
                    let new = self.selections[i]
                        .selection_type()
                        .criterion_of(fragment.values());
                    self.selections[i].record_change(row_id.id(), old, new);
                }
            }
            changed
        };
        if changed {
            self.mark_dirty(row_id);
        }
        Ok(changed)
    }

    /// Replaces a collection's values. Returns false if they were unchanged.
    pub fn set_collection(&mut self, row_id: &RowId, values: Vec<Value>) -> RowCacheResult<bool> {
        self.ensure_fresh(row_id)?;
        let changed = self
            .fragments
            .get_mut(row_id)
            .ok_or_else(|| RowCacheError::internal(format!("{} vanished", row_id)))?
            .as_collection_mut()?
            .set(values)?;
        if changed {
            self.mark_dirty(row_id);
        }
        Ok(changed)
    }

    /// Marks a fragment modified without changing its content.
    pub fn mark_modified(&mut self, row_id: &RowId) -> RowCacheResult<()> {
        self.ensure_fresh(row_id)?;
        self.fragments
            .get_mut(row_id)
            .ok_or_else(|| RowCacheError::internal(format!("{} vanished", row_id)))?
            .mark_modified()?;
        self.mark_dirty(row_id);
        Ok(())
    }

    /// Deletes a row. Deleting a row that was created and never flushed
    /// simply forgets it; deleting a row that does not exist does nothing.
    pub fn remove(&mut self, row_id: &RowId) -> RowCacheResult<()> {
        self.ensure_fresh(row_id)?;
        let fragment = self
            .fragments
            .get_mut(row_id)
            .ok_or_else(|| RowCacheError::internal(format!("{} vanished", row_id)))?;
        let had_content = fragment.state().is_readable();

        let before: Vec<Option<Ident>> = match (&*fragment, had_content) {
            (Fragment::Simple(simple), true) => self
                .selections
                .iter()
                .map(|s| {
                    let kind = s.selection_type();
                    if kind.table() == row_id.table() {
                        kind.criterion_of(simple.values())
                    } else {
                        None
                    }
                })
                .collect(),
            _ => Vec::new(),
        };

        match fragment.mark_deleted()? {
            FragmentState::Deleted => self.mark_dirty(row_id),
            _ => self.unmark_dirty(row_id),
        }
        for (selection, old) in self.selections.iter_mut().zip(before) {
            selection.record_change(row_id.id(), old, None);
        }
        Ok(())
    }

    fn mark_dirty(&mut self, row_id: &RowId) {
        if self.dirty.insert(row_id.clone()) {
            self.dirty_order.push(row_id.clone());
        }
    }

    fn unmark_dirty(&mut self, row_id: &RowId) {
        if self.dirty.remove(row_id) {
            self.dirty_order.retain(|r| r != row_id);
        }
    }

    // =========================================================================
    // Flush
    // =========================================================================

    /// Collects every dirty fragment into a batch and settles the fragments.
    ///
    /// Creates come first in the order the rows were created, so that rows
    /// referencing a parent are inserted after it.
    pub fn get_save_batch(&mut self) -> RowCacheResult<RowBatch> {
        if self.config.conflict_policy == ConflictPolicy::Reject {
            for row_id in &self.dirty_order {
                let contested = self
                    .fragments
                    .get(row_id)
                    .map_or(false, |f| f.pending_invalidation().is_some());
                if contested {
                    return Err(RowCacheError::ConcurrentUpdate {
                        row_id: row_id.clone(),
                    });
                }
            }
        }

        let dirty_order = std::mem::take(&mut self.dirty_order);
        self.dirty.clear();
        let (creates, others): (Vec<RowId>, Vec<RowId>) =
            dirty_order.into_iter().partition(|row_id| {
                self.fragments
                    .get(row_id)
                    .map_or(false, |f| f.state() == FragmentState::Created)
            });

        let mut batch = RowBatch::new();
        for row_id in creates {
            if let Some(fragment) = self.fragments.get_mut(&row_id) {
                batch.creates.push(Row {
                    row_id,
                    data: fragment.data(),
                });
                fragment.flushed();
            }
        }

        let delete_before_append = self.config.collection_delete_before_append;
        for row_id in others {
            let Some(fragment) = self.fragments.get_mut(&row_id) else {
                continue;
            };
            match fragment.state() {
                FragmentState::Modified => {
                    let write = match &*fragment {
                        Fragment::Simple(simple) => {
                            let keys = simple.dirty_keys();
                            (!keys.is_empty()).then_some(UpdateWrite::Columns(keys))
                        }
                        Fragment::Collection(collection) => collection
                            .diff(delete_before_append)
                            .map(UpdateWrite::Collection),
                    };
                    if let Some(write) = write {
                        batch.updates.push(RowUpdate {
                            row: Row {
                                row_id,
                                data: fragment.data(),
                            },
                            write,
                        });
                    }
                    fragment.flushed();
                }
                FragmentState::Deleted => {
                    fragment.flushed();
                    batch.deletes.push(row_id);
                }
                state => {
                    error!(row = %row_id, state = %state, "unexpected fragment state in dirty set");
                }
            }
        }
        self.created_ids.clear();
        Ok(batch)
    }

    /// Writes every local change through the mapper and records what the
    /// transaction has to report to other sessions. Returns what was written.
    pub fn flush(&mut self) -> RowCacheResult<RowBatch> {
        let batch = self.get_save_batch()?;
        let mut selection_invalidations = Invalidations::new();
        for selection in &mut self.selections {
            selection.take_invalidations(&mut selection_invalidations);
        }
        if batch.is_empty() && selection_invalidations.is_empty() {
            return Ok(batch);
        }

        self.flushed_rows.extend(batch.row_ids().cloned());
        if !batch.is_empty() {
            self.mapper.write(&batch)?;
        }
        self.transaction_invalidations.add(&batch.invalidations());
        self.transaction_invalidations.add(&selection_invalidations);
        debug!(
            session = %self.session_id,
            creates = batch.creates.len(),
            updates = batch.updates.len(),
            deletes = batch.deletes.len(),
            "flushed"
        );
        Ok(batch)
    }

    /// Returns what the current transaction has written so far.
    pub fn transaction_invalidations(&self) -> &Invalidations {
        &self.transaction_invalidations
    }

    /// Returns what the finished transaction wrote and starts afresh.
    pub fn take_transaction_invalidations(&mut self) -> Invalidations {
        self.flushed_rows.clear();
        std::mem::take(&mut self.transaction_invalidations)
    }

    // =========================================================================
    // Invalidations
    // =========================================================================

    /// Applies invalidations received from other sessions or nodes.
    pub fn process_invalidations(&mut self, invalidations: &Invalidations) {
        if invalidations.is_empty() {
            return;
        }
        if invalidations.is_all() {
            debug!(session = %self.session_id, "invalidating all local caches");
            self.clear_local_caches();
            let dirty: Vec<RowId> = self.dirty_order.clone();
            for row_id in dirty {
                self.invalidate_fragment(&row_id, InvalidationKind::Modified);
            }
            return;
        }

        trace!(session = %self.session_id, invalidations = %invalidations, "processing invalidations");
        for (row_id, kind) in invalidations.entries() {
            for selection in &mut self.selections {
                selection.process_invalidation(row_id);
            }
            if !row_id.is_selection() {
                self.invalidate_fragment(row_id, kind);
            }
        }
    }

    fn invalidate_fragment(&mut self, row_id: &RowId, kind: InvalidationKind) {
        let policy = self.config.conflict_policy;
        let Some(fragment) = self.fragments.get_mut(row_id) else {
            return;
        };
        let state = fragment.state();
        if state.is_dirty() && state != FragmentState::Created && policy == ConflictPolicy::Discard {
            warn!(row = %row_id, state = %state, "discarding local change after concurrent update");
            fragment.discard_local_change(kind);
            self.unmark_dirty(row_id);
        } else {
            fragment.apply_invalidation(kind);
        }
    }

    /// Drops every clean fragment and every cached selection. Dirty
    /// fragments are kept so that no local change is lost.
    pub fn clear_local_caches(&mut self) {
        self.fragments.retain(|_, f| f.state().is_dirty());
        for selection in &mut self.selections {
            selection.clear_cached();
        }
    }

    /// Drops everything cached, local changes included, along with the
    /// mapper's cache. Returns the number of fragments dropped.
    pub fn clear_caches(&mut self) -> usize {
        self.mapper.clear_cache();
        let count = self.fragments.len();
        if !self.dirty.is_empty() {
            warn!(session = %self.session_id, dirty = self.dirty.len(), "clearing caches with unflushed changes");
        }
        self.fragments.clear();
        self.dirty.clear();
        self.dirty_order.clear();
        self.created_ids.clear();
        for selection in &mut self.selections {
            selection.clear();
        }
        count
    }

    // =========================================================================
    // Rollback
    // =========================================================================

    /// Reverts the context after the transaction rolled back.
    ///
    /// Unflushed changes are undone. Rows flushed during the transaction are
    /// marked invalidated, as their cached content reflects writes that no
    /// longer exist.
    pub fn rollback(&mut self) {
        let dirty_order = std::mem::take(&mut self.dirty_order);
        self.dirty.clear();
        for row_id in &dirty_order {
            if let Some(fragment) = self.fragments.get_mut(row_id) {
                fragment.rolled_back();
            }
        }

        let flushed = std::mem::take(&mut self.flushed_rows);
        for row_id in &flushed {
            if let Some(fragment) = self.fragments.get_mut(row_id) {
                fragment.apply_invalidation(InvalidationKind::Modified);
            }
        }

        self.created_ids.clear();
        self.transaction_invalidations = Invalidations::new();
        for selection in &mut self.selections {
            selection.clear();
        }
        debug!(
            session = %self.session_id,
            reverted = dirty_order.len(),
            invalidated = flushed.len(),
            "rolled back"
        );
    }

    // =========================================================================
    // Rebind
    // =========================================================================

    /// Re-keys a created, unflushed row under another id.
    pub fn rebind_id(&mut self, row_id: &RowId, new_id: Ident) -> RowCacheResult<RowId> {
        match self.fragments.get(row_id).map(|f| f.state()) {
            Some(FragmentState::Created) => {}
            Some(state) => return Err(RowCacheError::illegal_transition(row_id, state, "rebind")),
            None => return Err(RowCacheError::internal(format!("{} is not cached", row_id))),
        }
        let new_row_id = row_id.with_id(new_id.clone());
        if self.fragments.contains_key(&new_row_id) {
            return Err(RowCacheError::internal(format!(
                "{} is already cached",
                new_row_id
            )));
        }

        let mut fragment = self
            .fragments
            .remove(row_id)
            .ok_or_else(|| RowCacheError::internal(format!("{} vanished", row_id)))?;
        fragment.rebind(new_row_id.clone());
        if let Fragment::Simple(simple) = &fragment {
            for selection in &mut self.selections {
                let kind = selection.selection_type();
                if kind.table() == row_id.table() {
                    let criterion = kind.criterion_of(simple.values());
                    selection.record_change(row_id.id(), criterion.clone(), None);
                    selection.record_change(&new_id, None, criterion);
                }
            }
        }
        self.fragments.insert(new_row_id.clone(), fragment);

        if self.dirty.remove(row_id) {
            self.dirty.insert(new_row_id.clone());
            for entry in &mut self.dirty_order {
                if entry == row_id {
                    *entry = new_row_id.clone();
                }
            }
        }
        self.created_ids.insert(new_id);
        warn!(from = %row_id, to = %new_row_id, "rebinding created row");
        Ok(new_row_id)
    }

    // =========================================================================
    // Selections
    // =========================================================================

    /// Returns the member ids of a selection, from cache or from the mapper.
    ///
    /// Results read from the mapper are reconciled with unflushed local
    /// changes before being cached.
    pub fn selection(&mut self, name: &str, criterion: &Ident) -> RowCacheResult<Vec<Ident>> {
        let index = self
            .selections
            .iter()
            .position(|s| s.selection_type().name() == name)
            .ok_or_else(|| RowCacheError::internal(format!("unknown selection '{}'", name)))?;
        self.lookups += 1;
        if let Some(ids) = self.selections[index].get(criterion) {
            self.hits += 1;
            return Ok(ids.to_vec());
        }

        let kind = self.selections[index].selection_type().clone();
        let mut ids = self.mapper.read_selection(&kind, criterion)?;
        for row_id in &self.dirty_order {
            if row_id.table() != kind.table() {
                continue;
            }
            let Some(Fragment::Simple(simple)) = self.fragments.get(row_id) else {
                continue;
            };
            let member = simple.state() != FragmentState::Deleted
                && kind.criterion_of(simple.values()).as_ref() == Some(criterion);
            let position = ids.iter().position(|id| id == row_id.id());
            match (member, position) {
                (true, None) => ids.push(row_id.id().clone()),
                (false, Some(position)) => {
                    ids.remove(position);
                }
                _ => {}
            }
        }
        self.selections[index].put(criterion.clone(), ids.clone());
        Ok(ids)
    }

    /// Returns current counters.
    pub fn stats(&self) -> ContextStats {
        ContextStats {
            lookups: self.lookups,
            hits: self.hits,
            fragments: self.fragments.len(),
            dirty: self.dirty.len(),
            selections: self.selections.iter().map(SelectionContext::len).sum(),
            mapper_cache: self.mapper.cache_size(),
        }
    }
}

impl fmt::Debug for PersistenceContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PersistenceContext")
            .field("session_id", &self.session_id)
            .field("fragments", &self.fragments.len())
            .field("dirty", &self.dirty.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::{MemoryMapper, MemoryStore};
    use crate::model::SelectionType;
    use crate::row::CollectionWrite;
    use rowcache_common::types::{StartFlags, Xid};

    fn model() -> Arc<Model> {
        Arc::new(
            Model::new()
                .with_collection_table("acls")
                .with_read_only_property("hierarchy", "uuid")
                .with_selection(SelectionType::new("children", "hierarchy", "parentid")),
        )
    }

    fn doc(parent: i64, title: &str) -> Columns {
        let mut columns = Columns::new();
        columns.insert("parentid".to_string(), Value::Int(parent));
        columns.insert("title".to_string(), Value::from(title));
        columns
    }

    fn hierarchy(id: i64) -> RowId {
        RowId::new("hierarchy", id)
    }

    fn seeded_store() -> Arc<MemoryStore> {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(Arc::clone(&store));
        mapper.insert_row(Row::simple(hierarchy(100), doc(1, "v1"))).unwrap();
        mapper.insert_row(Row::simple(hierarchy(101), doc(1, "other"))).unwrap();
        mapper
            .insert_row(Row::collection(
                RowId::new("acls", 100),
                vec![Value::from("a"), Value::from("b")],
            ))
            .unwrap();
        store
    }

    fn context_with(store: &Arc<MemoryStore>, config: ContextConfig, session: u64) -> PersistenceContext {
        PersistenceContext::new(
            model(),
            Box::new(MemoryMapper::new(Arc::clone(store))),
            config,
            SessionId::new(session),
        )
    }

    fn context(store: &Arc<MemoryStore>) -> PersistenceContext {
        context_with(store, ContextConfig::default(), 1)
    }

    fn state(context: &PersistenceContext, row_id: &RowId) -> Option<FragmentState> {
        context.fragment(row_id).map(|f| f.state())
    }

    #[test]
    fn test_create_flush_read() {
        let store = seeded_store();
        let mut ctx = context(&store);

        let row_id = ctx.create_new("hierarchy", doc(100, "new")).unwrap();
        assert!(ctx.is_dirty());
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::Created));

        let batch = ctx.flush().unwrap();
        assert_eq!(batch.creates.len(), 1);
        assert!(!ctx.is_dirty());
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::Pristine));
        assert!(!ctx.is_id_new(row_id.id()));
        assert!(store.get(&row_id).is_some());
        assert_eq!(ctx.get_value(&row_id, "title").unwrap(), Some(Value::from("new")));
    }

    #[test]
    fn test_absent_row_is_cached() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let row_id = hierarchy(555);

        assert!(ctx.get(&row_id, false).unwrap().is_none());
        let fragment = ctx.get(&row_id, true).unwrap().unwrap();
        assert_eq!(fragment.state(), FragmentState::Absent);
        assert_eq!(store.read_count(), 1);
    }

    #[test]
    fn test_new_id_skips_mapper() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let id = ctx.generate_new_id().unwrap();
        assert!(ctx.is_id_new(&id));

        let fragment = ctx.get(&RowId::new("hierarchy", id), true).unwrap().unwrap();
        assert_eq!(fragment.state(), FragmentState::Absent);
        assert_eq!(store.read_count(), 0);
    }

    #[test]
    fn test_set_on_absent_requires_create() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let row_id = hierarchy(555);

        let err = ctx.set_value(&row_id, "title", Value::from("x")).unwrap_err();
        assert!(matches!(err, RowCacheError::IllegalFragmentTransition { .. }));

        ctx.create(row_id.clone(), doc(1, "x")).unwrap();
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::Created));
        let err = ctx.create(row_id, doc(1, "y")).unwrap_err();
        assert!(err.is_programming_error());
    }

    #[test]
    fn test_create_over_cached_row_is_refused() {
        let store = seeded_store();
        let mut ctx = context(&store);
        ctx.get(&hierarchy(101), false).unwrap();
        let err = ctx.create(hierarchy(101), doc(1, "y")).unwrap_err();
        assert!(matches!(
            err,
            RowCacheError::IllegalFragmentTransition { operation: "create", .. }
        ));
    }

    #[test]
    fn test_read_only_property() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let err = ctx
            .set_value(&hierarchy(100), "uuid", Value::from("x"))
            .unwrap_err();
        assert!(matches!(err, RowCacheError::ReadOnlyProperty { .. }));
        assert!(!ctx.is_dirty());
    }

    #[test]
    fn test_update_writes_only_dirty_columns() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let row_id = hierarchy(100);

        assert!(ctx.set_value(&row_id, "title", Value::from("v2")).unwrap());
        assert!(!ctx.set_value(&row_id, "parentid", Value::Int(1)).unwrap());

        let batch = ctx.get_save_batch().unwrap();
        assert_eq!(batch.updates.len(), 1);
        assert_eq!(
            batch.updates[0].write,
            UpdateWrite::Columns(vec!["title".to_string()])
        );
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::Pristine));
    }

    #[test]
    fn test_collection_append() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let row_id = RowId::new("acls", 100);

        assert_eq!(ctx.get_collection(&row_id).unwrap().len(), 2);
        let values = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        assert!(ctx.set_collection(&row_id, values.clone()).unwrap());

        let batch = ctx.flush().unwrap();
        assert_eq!(
            batch.updates[0].write,
            UpdateWrite::Collection(CollectionWrite::Append {
                offset: 2,
                values: vec![Value::from("c")],
            })
        );
        assert_eq!(store.get(&row_id), Some(RowData::Collection(values)));
    }

    #[test]
    fn test_collection_delete_before_append() {
        let store = seeded_store();
        let config = ContextConfig {
            collection_delete_before_append: true,
            ..ContextConfig::default()
        };
        let mut ctx = context_with(&store, config, 1);
        let row_id = RowId::new("acls", 100);

        ctx.get_collection(&row_id).unwrap();
        let values = vec![Value::from("a"), Value::from("b"), Value::from("c")];
        ctx.set_collection(&row_id, values.clone()).unwrap();

        let batch = ctx.get_save_batch().unwrap();
        assert_eq!(
            batch.updates[0].write,
            UpdateWrite::Collection(CollectionWrite::Replace(values))
        );
    }

    #[test]
    fn test_creates_come_first_in_creation_order() {
        let store = seeded_store();
        let mut ctx = context(&store);

        ctx.set_value(&hierarchy(100), "title", Value::from("v2")).unwrap();
        let first = ctx.create_new("hierarchy", doc(100, "first")).unwrap();
        let second = ctx.create_new("hierarchy", doc(100, "second")).unwrap();
        ctx.remove(&hierarchy(101)).unwrap();

        let batch = ctx.flush().unwrap();
        let created: Vec<&RowId> = batch.creates.iter().map(|r| &r.row_id).collect();
        assert_eq!(created, vec![&first, &second]);
        assert_eq!(batch.updates.len(), 1);
        assert_eq!(batch.deletes, vec![hierarchy(101)]);

        let invalidations = ctx.take_transaction_invalidations();
        assert!(invalidations.is_modified(&first));
        assert!(invalidations.is_modified(&hierarchy(100)));
        assert!(invalidations.is_deleted(&hierarchy(101)));
    }

    #[test]
    fn test_remove_created_forgets_it() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let row_id = ctx.create_new("hierarchy", doc(100, "tmp")).unwrap();

        ctx.remove(&row_id).unwrap();
        assert!(!ctx.is_dirty());
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::Absent));
        assert!(ctx.flush().unwrap().is_empty());
    }

    #[test]
    fn test_remove_twice_fails() {
        let store = seeded_store();
        let mut ctx = context(&store);
        ctx.remove(&hierarchy(100)).unwrap();
        assert!(ctx.remove(&hierarchy(100)).is_err());
        // Removing a row that does not exist is a no-op
        ctx.remove(&hierarchy(555)).unwrap();
    }

    #[test]
    fn test_invalidated_fragment_is_refetched() {
        let store = seeded_store();
        let mut reader = context_with(&store, ContextConfig::default(), 1);
        let mut writer = context_with(&store, ContextConfig::default(), 2);
        let row_id = hierarchy(100);

        assert_eq!(reader.get_value(&row_id, "title").unwrap(), Some(Value::from("v1")));
        writer.set_value(&row_id, "title", Value::from("v2")).unwrap();
        writer.flush().unwrap();

        reader.process_invalidations(&writer.take_transaction_invalidations());
        assert_eq!(state(&reader, &row_id), Some(FragmentState::InvalidatedModified));
        assert_eq!(reader.get_value(&row_id, "title").unwrap(), Some(Value::from("v2")));
        assert_eq!(state(&reader, &row_id), Some(FragmentState::Pristine));
    }

    #[test]
    fn test_deleted_invalidation_wins() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let row_id = hierarchy(100);
        ctx.get(&row_id, false).unwrap();

        let mut invalidations = Invalidations::new();
        invalidations.add_modified(row_id.clone());
        invalidations.add_deleted(row_id.clone());
        ctx.process_invalidations(&invalidations);
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::InvalidatedDeleted));

        MemoryMapper::new(Arc::clone(&store)).delete_row(row_id.clone()).unwrap();
        assert_eq!(ctx.get_value(&row_id, "title").unwrap(), None);
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::Absent));
    }

    #[test]
    fn test_write_to_invalidated_fragment_refetches_first() {
        let store = seeded_store();
        let mut reader = context_with(&store, ContextConfig::default(), 1);
        let mut writer = context_with(&store, ContextConfig::default(), 2);
        let row_id = hierarchy(100);
        reader.get(&row_id, false).unwrap();

        writer.set_value(&row_id, "title", Value::from("theirs")).unwrap();
        writer.flush().unwrap();
        reader.process_invalidations(&writer.take_transaction_invalidations());
        let reads = store.read_count();

        assert!(reader.set_value(&row_id, "parentid", Value::Int(2)).unwrap());
        assert_eq!(store.read_count(), reads + 1);
        let batch = reader.flush().unwrap();
        assert_eq!(
            batch.updates[0].write,
            UpdateWrite::Columns(vec!["parentid".to_string()])
        );
        assert_eq!(state(&reader, &row_id), Some(FragmentState::Pristine));
        assert_eq!(reader.get_value(&row_id, "title").unwrap(), Some(Value::from("theirs")));
    }

    #[test]
    fn test_move_of_invalidated_row_touches_current_parent() {
        let store = seeded_store();
        let mut reader = context_with(&store, ContextConfig::default(), 1);
        let mut writer = context_with(&store, ContextConfig::default(), 2);
        let row_id = hierarchy(100);
        reader.get(&row_id, false).unwrap();

        writer.set_value(&row_id, "parentid", Value::Int(3)).unwrap();
        writer.flush().unwrap();
        reader.process_invalidations(&writer.take_transaction_invalidations());

        reader.set_value(&row_id, "parentid", Value::Int(4)).unwrap();
        reader.flush().unwrap();
        let sent = reader.take_transaction_invalidations();
        assert!(sent.is_modified(&RowId::new("__SELECT_children__", 3)));
        assert!(sent.is_modified(&RowId::new("__SELECT_children__", 4)));
        assert!(!sent.is_modified(&RowId::new("__SELECT_children__", 1)));
    }

    #[test]
    fn test_overwrite_policy_keeps_local_change() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let row_id = hierarchy(100);
        ctx.set_value(&row_id, "title", Value::from("mine")).unwrap();

        let mut invalidations = Invalidations::new();
        invalidations.add_modified(row_id.clone());
        ctx.process_invalidations(&invalidations);
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::Modified));

        ctx.flush().unwrap();
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::InvalidatedModified));
        assert_eq!(ctx.get_value(&row_id, "title").unwrap(), Some(Value::from("mine")));
    }

    #[test]
    fn test_discard_policy_drops_local_change() {
        let store = seeded_store();
        let config = ContextConfig {
            conflict_policy: ConflictPolicy::Discard,
            ..ContextConfig::default()
        };
        let mut ctx = context_with(&store, config, 1);
        let mut other = context_with(&store, ContextConfig::default(), 2);
        let row_id = hierarchy(100);

        ctx.set_value(&row_id, "title", Value::from("mine")).unwrap();
        other.set_value(&row_id, "title", Value::from("theirs")).unwrap();
        other.flush().unwrap();

        ctx.process_invalidations(&other.take_transaction_invalidations());
        assert!(!ctx.is_dirty());
        assert_eq!(ctx.get_value(&row_id, "title").unwrap(), Some(Value::from("theirs")));
    }

    #[test]
    fn test_reject_policy_fails_flush() {
        let store = seeded_store();
        let config = ContextConfig {
            conflict_policy: ConflictPolicy::Reject,
            ..ContextConfig::default()
        };
        let mut ctx = context_with(&store, config, 1);
        let row_id = hierarchy(100);
        ctx.set_value(&row_id, "title", Value::from("mine")).unwrap();

        let mut invalidations = Invalidations::new();
        invalidations.add_modified(row_id.clone());
        ctx.process_invalidations(&invalidations);

        let err = ctx.flush().unwrap_err();
        assert!(err.is_conflict());
        // Nothing was settled
        assert!(ctx.is_dirty());
    }

    #[test]
    fn test_invalidate_all_keeps_dirty_fragments() {
        let store = seeded_store();
        let mut ctx = context(&store);
        ctx.get(&hierarchy(101), false).unwrap();
        ctx.set_value(&hierarchy(100), "title", Value::from("mine")).unwrap();
        ctx.selection("children", &Ident::Int(1)).unwrap();

        ctx.process_invalidations(&Invalidations::everything());
        assert!(ctx.fragment(&hierarchy(101)).is_none());
        assert_eq!(state(&ctx, &hierarchy(100)), Some(FragmentState::Modified));
        assert_eq!(ctx.stats().selections, 0);
        assert!(ctx.is_dirty());
    }

    #[test]
    fn test_rollback_reverts_and_invalidates() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let xid = Xid::new(1, 0);
        let row_id = hierarchy(100);

        ctx.mapper_mut().start(xid, StartFlags::NoFlags).unwrap();
        ctx.set_value(&row_id, "title", Value::from("v2")).unwrap();
        let created = ctx.create_new("hierarchy", doc(100, "new")).unwrap();
        ctx.flush().unwrap();
        ctx.set_value(&row_id, "title", Value::from("v3")).unwrap();

        ctx.mapper_mut().rollback(xid).unwrap();
        ctx.rollback();

        assert!(!ctx.is_dirty());
        assert_eq!(state(&ctx, &row_id), Some(FragmentState::InvalidatedModified));
        assert_eq!(ctx.get_value(&row_id, "title").unwrap(), Some(Value::from("v1")));
        assert_eq!(ctx.get_value(&created, "title").unwrap(), None);
        assert!(ctx.take_transaction_invalidations().is_empty());
    }

    #[test]
    fn test_rebind_created_row() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let row_id = ctx.create_new("hierarchy", doc(1, "new")).unwrap();

        let rebound = ctx.rebind_id(&row_id, Ident::Int(9000)).unwrap();
        assert_eq!(rebound, hierarchy(9000));
        assert!(ctx.fragment(&row_id).is_none());
        assert_eq!(ctx.fragment(&rebound).unwrap().row_id(), &rebound);

        let batch = ctx.flush().unwrap();
        assert_eq!(batch.creates[0].row_id, rebound);
        assert!(store.get(&rebound).is_some());

        let err = ctx.rebind_id(&rebound, Ident::Int(9001)).unwrap_err();
        assert!(err.is_programming_error());
    }

    #[test]
    fn test_selection_is_cached_and_tracks_local_changes() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let parent = Ident::Int(1);

        let ids = ctx.selection("children", &parent).unwrap();
        assert_eq!(ids, vec![Ident::Int(100), Ident::Int(101)]);

        let child = ctx.create_new("hierarchy", doc(1, "child")).unwrap();
        let ids = ctx.selection("children", &parent).unwrap();
        assert_eq!(ids.len(), 3);
        assert!(ids.contains(child.id()));

        // Moving a child out of the parent
        ctx.set_value(&hierarchy(101), "parentid", Value::Int(2)).unwrap();
        let ids = ctx.selection("children", &parent).unwrap();
        assert!(!ids.contains(&Ident::Int(101)));

        ctx.flush().unwrap();
        let invalidations = ctx.take_transaction_invalidations();
        assert!(invalidations.is_modified(&RowId::new("__SELECT_children__", 1)));
        assert!(invalidations.is_modified(&RowId::new("__SELECT_children__", 2)));
        assert!(ctx.stats().hits >= 2);
    }

    #[test]
    fn test_selection_reconciles_unflushed_changes() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let child = ctx.create_new("hierarchy", doc(1, "child")).unwrap();
        ctx.remove(&hierarchy(100)).unwrap();

        let ids = ctx.selection("children", &Ident::Int(1)).unwrap();
        assert_eq!(ids, vec![Ident::Int(101), child.id().clone()]);
    }

    #[test]
    fn test_selection_dropped_by_invalidation() {
        let store = seeded_store();
        let mut ctx = context(&store);
        ctx.selection("children", &Ident::Int(1)).unwrap();
        assert_eq!(ctx.stats().selections, 1);

        let mut invalidations = Invalidations::new();
        invalidations.add_modified(RowId::new("__SELECT_children__", 1));
        ctx.process_invalidations(&invalidations);
        assert_eq!(ctx.stats().selections, 0);

        assert!(ctx.selection("nope", &Ident::Int(1)).is_err());
    }

    #[test]
    fn test_get_multi_batches_reads() {
        let store = seeded_store();
        let mut ctx = context(&store);
        let ids = vec![hierarchy(100), hierarchy(101), hierarchy(555)];

        let fragments = ctx.get_multi(&ids, false).unwrap();
        assert_eq!(fragments.len(), 2);
        assert_eq!(store.read_count(), 3);

        let fragments = ctx.get_multi(&ids, true).unwrap();
        assert_eq!(fragments.len(), 3);
        assert_eq!(store.read_count(), 3);
        assert_eq!(ctx.stats().hits, 3);
    }

    #[test]
    fn test_clear_caches() {
        let store = seeded_store();
        let mut ctx = context(&store);
        ctx.get(&hierarchy(100), false).unwrap();
        ctx.set_value(&hierarchy(101), "title", Value::from("x")).unwrap();

        assert_eq!(ctx.clear_caches(), 2);
        assert!(!ctx.is_dirty());
        assert_eq!(ctx.stats().fragments, 0);
    }
}
