//! Collection fragments and the collection diff.

use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{FragmentState, RowId, Value};

use super::{FragmentCore, StatefulFragment};
use crate::row::{CollectionWrite, RowData};

/// Returns true iff `left` is strictly shorter than `right` and equal to
/// `right` element by element over its length.
///
/// ```rust
/// use rowcache_common::types::Value;
/// use rowcache_storage::is_prefix;
///
/// let ab = [Value::from("a"), Value::from("b")];
/// let abc = [Value::from("a"), Value::from("b"), Value::from("c")];
/// assert!(is_prefix(&ab, &abc));
/// assert!(!is_prefix(&abc, &abc));
/// ```
pub fn is_prefix(left: &[Value], right: &[Value]) -> bool {
    left.len() < right.len() && left.iter().zip(right).all(|(l, r)| l == r)
}

/// A cached ordered array of values.
///
/// `old_values` is `None` until the collection has been persisted once.
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionFragment {
    core: FragmentCore,
    values: Vec<Value>,
    old_values: Option<Vec<Value>>,
    force_replace: bool,
}

impl CollectionFragment {
    /// Creates a fragment; a `CREATED` fragment has no baseline.
    pub fn new(row_id: RowId, values: Vec<Value>, state: FragmentState) -> Self {
        let old_values = (state != FragmentState::Created).then(|| values.clone());
        Self {
            core: FragmentCore::new(row_id, state),
            values,
            old_values,
            force_replace: false,
        }
    }

    /// Returns the values.
    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Replaces the values. Returns false if the write was a no-op.
    pub fn set(&mut self, values: Vec<Value>) -> RowCacheResult<bool> {
        let invalidated = self.core.state == FragmentState::InvalidatedModified;
        if !invalidated && values == self.values {
            let state = self.core.state;
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
            self.force_replace = true;
        }
        self.values = values;
        Ok(true)
    }

    /// Computes the minimal write bringing the stored collection from the
    /// baseline to the current values, or `None` if nothing changed.
    ///
    /// With `delete_before_append` the append optimisation is disabled and
    /// a changed collection is always fully replaced.
    pub fn diff(&self, delete_before_append: bool) -> Option<CollectionWrite> {
        if self.force_replace {
            return Some(CollectionWrite::Replace(self.values.clone()));
        }
        match self.old_values.as_deref() {
            Some(old) if old == self.values.as_slice() => None,
            None if self.values.is_empty() => None,
            None | Some([]) => Some(CollectionWrite::Insert(self.values.clone())),
            Some(old) if !delete_before_append && is_prefix(old, &self.values) => {
                Some(CollectionWrite::Append {
                    offset: old.len(),
                    values: self.values[old.len()..].to_vec(),
                })
            }
            Some(_) => Some(CollectionWrite::Replace(self.values.clone())),
        }
    }
}

impl StatefulFragment for CollectionFragment {
    fn core(&self) -> &FragmentCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut FragmentCore {
        &mut self.core
    }

    fn is_dirty(&self) -> bool {
        self.diff(false).is_some()
    }

    fn clear_dirty(&mut self) {
        self.old_values = Some(self.values.clone());
        self.force_replace = false;
    }

    fn restore(&mut self) {
        self.values = self.old_values.clone().unwrap_or_default();
        self.force_replace = false;
    }

    fn reset(&mut self) {
        self.values.clear();
        self.old_values = Some(Vec::new());
        self.force_replace = false;
    }

    fn load(&mut self, data: RowData) -> RowCacheResult<()> {
        match data {
            RowData::Collection(values) => {
                self.old_values = Some(values.clone());
                self.values = values;
                self.force_replace = false;
                Ok(())
            }
            RowData::Simple(_) => Err(RowCacheError::internal(format!(
                "single-row payload fetched for collection fragment {}",
                self.core.row_id
            ))),
        }
    }

    fn data(&self) -> RowData {
        RowData::Collection(self.values.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn strings(values: &[&str]) -> Vec<Value> {
        values.iter().map(|s| Value::from(*s)).collect()
    }

    fn pristine(values: &[&str]) -> CollectionFragment {
        CollectionFragment::new(RowId::new("acls", 1), strings(values), FragmentState::Pristine)
    }

    #[test]
    fn test_is_prefix() {
        assert!(is_prefix(&strings(&[]), &strings(&["a"])));
        assert!(is_prefix(&strings(&["a"]), &strings(&["a", "b"])));
        assert!(!is_prefix(&strings(&["a", "b"]), &strings(&["a", "b"])));
        assert!(!is_prefix(&strings(&["a", "b", "c"]), &strings(&["a", "b"])));
        assert!(!is_prefix(&strings(&["a", "x"]), &strings(&["a", "b", "c"])));
        assert!(is_prefix(
            &[Value::Null, Value::Int(1)],
            &[Value::Null, Value::Int(1), Value::Null]
        ));
    }

    #[test]
    fn test_unchanged_has_no_write() {
        let f = pristine(&["a", "b"]);
        assert_eq!(f.diff(false), None);
        assert!(!f.is_dirty());
    }

    #[test]
    fn test_append_tail_only() {
        let mut f = pristine(&["a", "b"]);
        f.set(strings(&["a", "b", "c"])).unwrap();
        assert_eq!(
            f.diff(false),
            Some(CollectionWrite::Append {
                offset: 2,
                values: strings(&["c"]),
            })
        );
    }

    #[test]
    fn test_changed_element_replaces() {
        let mut f = pristine(&["a", "b"]);
        f.set(strings(&["a", "x"])).unwrap();
        assert_eq!(f.diff(false), Some(CollectionWrite::Replace(strings(&["a", "x"]))));
    }

    #[test]
    fn test_shrink_replaces() {
        let mut f = pristine(&["a", "b"]);
        f.set(strings(&["a"])).unwrap();
        assert_eq!(f.diff(false), Some(CollectionWrite::Replace(strings(&["a"]))));

        f.set(Vec::new()).unwrap();
        assert_eq!(f.diff(false), Some(CollectionWrite::Replace(Vec::new())));
    }

    #[test]
    fn test_empty_baseline_inserts() {
        let mut f = pristine(&[]);
        f.set(strings(&["a"])).unwrap();
        assert_eq!(f.diff(false), Some(CollectionWrite::Insert(strings(&["a"]))));

        let created = CollectionFragment::new(
            RowId::new("acls", 2),
            strings(&["a", "b"]),
            FragmentState::Created,
        );
        assert_eq!(
            created.diff(false),
            Some(CollectionWrite::Insert(strings(&["a", "b"])))
        );
    }

    #[test]
    fn test_delete_before_append_replaces() {
        let mut f = pristine(&["a", "b"]);
        f.set(strings(&["a", "b", "c"])).unwrap();
        assert_eq!(
            f.diff(true),
            Some(CollectionWrite::Replace(strings(&["a", "b", "c"])))
        );
    }

    #[test]
    fn test_invalidated_forces_replace() {
        let mut f = CollectionFragment::new(
            RowId::new("acls", 1),
            strings(&["a"]),
            FragmentState::InvalidatedModified,
        );
        assert!(f.set(strings(&["a", "b"])).unwrap());
        assert_eq!(f.state(), FragmentState::Modified);
        assert_eq!(
            f.diff(false),
            Some(CollectionWrite::Replace(strings(&["a", "b"])))
        );
    }

    #[test]
    fn test_restore_and_clear() {
        let mut f = pristine(&["a"]);
        f.set(strings(&["b"])).unwrap();
        f.restore();
        assert_eq!(f.values(), strings(&["a"]).as_slice());

        f.set(strings(&["b"])).unwrap();
        f.clear_dirty();
        assert!(!f.is_dirty());
    }

    #[test]
    fn test_diff_applies_to_baseline() {
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let alphabet = ["a", "b", "c", "d"];
        let random_list = |rng: &mut StdRng| -> Vec<Value> {
            let len = rng.gen_range(0..6);
            (0..len)
                .map(|_| {
                    if rng.gen_bool(0.1) {
                        Value::Null
                    } else {
                        Value::from(alphabet[rng.gen_range(0..alphabet.len())])
                    }
                })
                .collect()
        };

        for _ in 0..500 {
            let old = random_list(&mut rng);
            let mut new = if rng.gen_bool(0.4) {
                old.clone()
            } else {
                random_list(&mut rng)
            };
            if rng.gen_bool(0.3) {
                new.extend(random_list(&mut rng));
            }

            for delete_before_append in [false, true] {
                let mut f = CollectionFragment::new(
                    RowId::new("acls", 1),
                    old.clone(),
                    FragmentState::Pristine,
                );
                f.set(new.clone()).unwrap();

                let mut stored = old.clone();
                if let Some(write) = f.diff(delete_before_append) {
                    write.apply(&mut stored).unwrap();
                }
                assert_eq!(stored, new, "old={:?} new={:?}", old, new);
            }
        }
    }
}
