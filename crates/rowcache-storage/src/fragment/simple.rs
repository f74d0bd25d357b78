//! Single-row fragments.

use std::collections::BTreeSet;

use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{FragmentState, RowId, Value};

use super::{FragmentCore, StatefulFragment};
use crate::row::{Columns, RowData};

/// A cached row of column values.
///
/// Dirty columns are the ones whose value differs from the baseline, plus
/// any column written while the fragment was `INVALIDATED_MODIFIED` (the
/// baseline may be stale, so such writes always go through).
#[derive(Debug, Clone, PartialEq)]
pub struct SimpleFragment {
    core: FragmentCore,
    values: Columns,
    old_values: Columns,
    forced: BTreeSet<String>,
}

impl SimpleFragment {
    /// Creates a fragment whose baseline equals its content.
    pub fn new(row_id: RowId, values: Columns, state: FragmentState) -> Self {
        let old_values = if state == FragmentState::Created {
            Columns::new()
        } else {
            values.clone()
        };
        Self {
            core: FragmentCore::new(row_id, state),
            values,
            old_values,
            forced: BTreeSet::new(),
        }
    }

    /// Returns a column value; missing columns read as null.
    pub fn get(&self, key: &str) -> Value {
        self.values.get(key).cloned().unwrap_or_default()
    }

    /// Returns every column.
    pub fn values(&self) -> &Columns {
        &self.values
    }

    /// Writes a column. Returns false if the write was a no-op.
    pub fn set(&mut self, key: &str, value: Value) -> RowCacheResult<bool> {
        let state = self.core.state;
        let invalidated = state == FragmentState::InvalidatedModified;
        if !invalidated && self.values.get(key).unwrap_or(&Value::Null) == &value {
            if matches!(
                state,
                FragmentState::Absent | FragmentState::Deleted | FragmentState::InvalidatedDeleted
            ) {
                return Err(RowCacheError::illegal_transition(&self.core.row_id, state, "set"));
            }
            return Ok(false);
        }
        self.mark_modified()?;
        if invalidated {
            self.forced.insert(key.to_string());
        }
        self.values.insert(key.to_string(), value);
        Ok(true)
    }

    /// Returns the columns that must be written.
    pub fn dirty_keys(&self) -> Vec<String> {
        let mut keys: BTreeSet<&String> = self.forced.iter().collect();
        for (key, value) in &self.values {
            if self.old_values.get(key).unwrap_or(&Value::Null) != value {
                keys.insert(key);
            }
        }
        keys.into_iter().cloned().collect()
    }
}

impl StatefulFragment for SimpleFragment {
    fn core(&self) -> &FragmentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FragmentCore {
        &mut self.core
    }

    fn is_dirty(&self) -> bool {
        !self.forced.is_empty()
            || self
                .values
                .iter()
                .any(|(k, v)| self.old_values.get(k).unwrap_or(&Value::Null) != v)
    }

    fn clear_dirty(&mut self) {
        self.old_values = self.values.clone();
        self.forced.clear();
    }

    fn restore(&mut self) {
        self.values = self.old_values.clone();
        self.forced.clear();
    }

    fn reset(&mut self) {
        self.values.clear();
        self.old_values.clear();
        self.forced.clear();
    }

    fn load(&mut self, data: RowData) -> RowCacheResult<()> {
        match data {
            RowData::Simple(columns) => {
                self.old_values = columns.clone();
                self.values = columns;
                self.forced.clear();
                Ok(())
            }
            RowData::Collection(_) => Err(RowCacheError::internal(format!(
                "collection payload fetched for single-row fragment {}",
                self.core.row_id
            ))),
        }
    }

    fn data(&self) -> RowData {
        RowData::Simple(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rowcache_invalidation::InvalidationKind;

    fn fragment(state: FragmentState) -> SimpleFragment {
        let mut values = Columns::new();
        values.insert("title".to_string(), Value::from("v1"));
        values.insert("pos".to_string(), Value::Int(1));
        SimpleFragment::new(RowId::new("hierarchy", 1), values, state)
    }

    #[test]
    fn test_set_equal_is_noop() {
        let mut f = fragment(FragmentState::Pristine);
        assert!(!f.set("title", Value::from("v1")).unwrap());
        assert_eq!(f.state(), FragmentState::Pristine);
        assert!(!f.is_dirty());
    }

    #[test]
    fn test_set_missing_key_to_null_is_noop() {
        let mut f = fragment(FragmentState::Pristine);
        assert!(!f.set("description", Value::Null).unwrap());
        assert_eq!(f.get("description"), Value::Null);
    }

    #[test]
    fn test_dirty_keys() {
        let mut f = fragment(FragmentState::Pristine);
        f.set("title", Value::from("v2")).unwrap();
        f.set("description", Value::from("d")).unwrap();
        assert_eq!(f.dirty_keys(), vec!["description".to_string(), "title".to_string()]);
    }

    #[test]
    fn test_set_back_to_baseline_is_clean() {
        let mut f = fragment(FragmentState::Pristine);
        f.set("title", Value::from("v2")).unwrap();
        f.set("title", Value::from("v1")).unwrap();
        assert_eq!(f.state(), FragmentState::Modified);
        assert!(!f.is_dirty());
        assert!(f.dirty_keys().is_empty());
    }

    #[test]
    fn test_invalidated_modified_writes_through() {
        let mut f = fragment(FragmentState::InvalidatedModified);
        assert!(f.set("title", Value::from("v1")).unwrap());
        assert_eq!(f.state(), FragmentState::Modified);
        assert_eq!(f.dirty_keys(), vec!["title".to_string()]);
        assert_eq!(f.pending_invalidation(), Some(InvalidationKind::Modified));
    }

    #[test]
    fn test_stale_fragment_refetched_after_write() {
        let mut f = fragment(FragmentState::InvalidatedModified);
        f.set("title", Value::from("v2")).unwrap();
        f.flushed();
        assert_eq!(f.state(), FragmentState::InvalidatedModified);

        let mut f = fragment(FragmentState::InvalidatedModified);
        f.set("title", Value::from("v2")).unwrap();
        f.rolled_back();
        assert_eq!(f.state(), FragmentState::InvalidatedModified);
        assert_eq!(f.get("title"), Value::from("v1"));
    }

    #[test]
    fn test_created_stays_created() {
        let mut f = fragment(FragmentState::Created);
        assert!(f.is_dirty());
        f.set("title", Value::from("v2")).unwrap();
        assert_eq!(f.state(), FragmentState::Created);
    }

    #[test]
    fn test_set_refused_when_gone() {
        for state in [
            FragmentState::Absent,
            FragmentState::Deleted,
            FragmentState::InvalidatedDeleted,
        ] {
            let mut f = fragment(state);
            assert!(f.set("title", Value::from("v2")).is_err());
            assert!(f.set("title", Value::from("v1")).is_err());
        }
    }
}
