//! Cached selections.

use std::collections::{HashMap, HashSet};

use rowcache_common::types::{Ident, RowId};
use rowcache_invalidation::Invalidations;
use tracing::warn;

use crate::model::SelectionType;

/// The cached selections of one [`SelectionType`] within a session.
///
/// A selection is dropped as a whole when an invalidation names its
/// pseudo-table RowId or one of its member rows. Local creates, moves and
/// deletes of member rows update cached selections in place and are
/// remembered so that other sessions can be told at the next flush.
#[derive(Debug, Clone)]
pub struct SelectionContext {
    selection_type: SelectionType,
    /// Member ids by criterion.
    selections: HashMap<Ident, Vec<Ident>>,
    /// Criteria whose membership changed locally since the last flush.
    touched: HashSet<Ident>,
    warn_threshold: usize,
}

impl SelectionContext {
    /// Creates an empty context.
    pub fn new(selection_type: SelectionType, warn_threshold: usize) -> Self {
        Self {
            selection_type,
            selections: HashMap::new(),
            touched: HashSet::new(),
            warn_threshold,
        }
    }

    /// Returns the selection type.
    pub fn selection_type(&self) -> &SelectionType {
        &self.selection_type
    }

    /// Returns the number of cached selections.
    pub fn len(&self) -> usize {
        self.selections.len()
    }

    /// Returns true if nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.selections.is_empty()
    }

    /// Returns a cached selection.
    pub fn get(&self, criterion: &Ident) -> Option<&[Ident]> {
        self.selections.get(criterion).map(Vec::as_slice)
    }

    /// Caches a selection.
    pub fn put(&mut self, criterion: Ident, ids: Vec<Ident>) {
        if ids.len() > self.warn_threshold {
            warn!(
                selection = %self.selection_type.name(),
                criterion = %criterion,
                size = ids.len(),
                threshold = self.warn_threshold,
                "selection exceeds size threshold"
            );
        }
        self.selections.insert(criterion, ids);
    }

    /// Records that member `id` moved from one criterion to another
    /// (`None` meaning "not a member").
    pub fn record_change(&mut self, id: &Ident, old: Option<Ident>, new: Option<Ident>) {
        if old == new {
            return;
        }
        if let Some(old) = old {
            if let Some(ids) = self.selections.get_mut(&old) {
                ids.retain(|x| x != id);
            }
            self.touched.insert(old);
        }
        if let Some(new) = new {
            if let Some(ids) = self.selections.get_mut(&new) {
                if !ids.contains(id) {
                    ids.push(id.clone());
                }
            }
            self.touched.insert(new);
        }
    }

    /// Moves the locally changed criteria into `invalidations`.
    pub fn take_invalidations(&mut self, invalidations: &mut Invalidations) {
        for criterion in self.touched.drain() {
            invalidations.add_modified(self.selection_type.selection_row_id(&criterion));
        }
    }

    /// Drops whatever an invalidated RowId affects. Returns the number of
    /// selections dropped.
    pub fn process_invalidation(&mut self, row_id: &RowId) -> usize {
        let before = self.selections.len();
        if row_id.table() == self.selection_type.pseudo_table() {
            self.selections.remove(row_id.id());
        } else if row_id.table() == self.selection_type.table() {
            let member = row_id.id();
            self.selections.retain(|_, ids| !ids.contains(member));
        }
        before - self.selections.len()
    }

    /// Drops every cached selection, keeping pending local changes.
    pub fn clear_cached(&mut self) {
        self.selections.clear();
    }

    /// Drops everything.
    pub fn clear(&mut self) {
        self.selections.clear();
        self.touched.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> SelectionContext {
        SelectionContext::new(SelectionType::new("children", "hierarchy", "parentid"), 10)
    }

    #[test]
    fn test_local_move_updates_cached() {
        let mut ctx = context();
        ctx.put(Ident::Int(1), vec![Ident::Int(10), Ident::Int(11)]);
        ctx.put(Ident::Int(2), vec![]);

        ctx.record_change(&Ident::Int(10), Some(Ident::Int(1)), Some(Ident::Int(2)));
        assert_eq!(ctx.get(&Ident::Int(1)).unwrap(), &[Ident::Int(11)]);
        assert_eq!(ctx.get(&Ident::Int(2)).unwrap(), &[Ident::Int(10)]);

        let mut inv = Invalidations::new();
        ctx.take_invalidations(&mut inv);
        assert_eq!(inv.len(), 2);
        assert!(inv.is_modified(&RowId::new("__SELECT_children__", 1)));

        let mut again = Invalidations::new();
        ctx.take_invalidations(&mut again);
        assert!(again.is_empty());
    }

    #[test]
    fn test_pseudo_table_invalidation_drops_selection() {
        let mut ctx = context();
        ctx.put(Ident::Int(1), vec![Ident::Int(10)]);
        ctx.put(Ident::Int(2), vec![Ident::Int(20)]);

        assert_eq!(ctx.process_invalidation(&RowId::new("__SELECT_children__", 1)), 1);
        assert!(ctx.get(&Ident::Int(1)).is_none());
        assert!(ctx.get(&Ident::Int(2)).is_some());
    }

    #[test]
    fn test_member_invalidation_drops_selection() {
        let mut ctx = context();
        ctx.put(Ident::Int(1), vec![Ident::Int(10)]);
        ctx.put(Ident::Int(2), vec![Ident::Int(20)]);

        assert_eq!(ctx.process_invalidation(&RowId::new("hierarchy", 20)), 1);
        assert!(ctx.get(&Ident::Int(2)).is_none());
        assert_eq!(ctx.process_invalidation(&RowId::new("acls", 10)), 0);
    }

    #[test]
    fn test_unchanged_criterion_is_not_touched() {
        let mut ctx = context();
        ctx.record_change(&Ident::Int(10), Some(Ident::Int(1)), Some(Ident::Int(1)));
        let mut inv = Invalidations::new();
        ctx.take_invalidations(&mut inv);
        assert!(inv.is_empty());
    }

    #[test]
    fn test_oversize_selection_is_still_cached() {
        let mut ctx = context();
        let ids: Vec<Ident> = (0..20).map(Ident::Int).collect();
        ctx.put(Ident::Int(1), ids);
        assert_eq!(ctx.get(&Ident::Int(1)).unwrap().len(), 20);
    }
}
