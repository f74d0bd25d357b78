//! Table model: which tables hold collections, which columns are read-only,
//! and which selections are cached.

use std::collections::{HashMap, HashSet};

use rowcache_common::constants::{SELECTION_TABLE_PREFIX, SELECTION_TABLE_SUFFIX};
use rowcache_common::types::{Ident, RowId, Value};

use crate::row::Columns;

/// A kind of cached selection: "all rows of `table` whose `criterion_key`
/// column equals X", optionally restricted by an equality filter.
///
/// # Example
///
/// ```rust
/// use rowcache_common::types::{Ident, Value};
/// use rowcache_storage::SelectionType;
///
/// let children = SelectionType::new("children", "hierarchy", "parentid")
///     .with_filter("isproperty", Value::Bool(false));
/// assert_eq!(children.pseudo_table(), "__SELECT_children__");
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionType {
    name: String,
    table: String,
    criterion_key: String,
    filter: Option<(String, Value)>,
}

impl SelectionType {
    /// Creates a selection type.
    pub fn new(
        name: impl Into<String>,
        table: impl Into<String>,
        criterion_key: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            criterion_key: criterion_key.into(),
            filter: None,
        }
    }

    /// Restricts the selection to rows whose `key` column equals `value`.
    pub fn with_filter(mut self, key: impl Into<String>, value: Value) -> Self {
        self.filter = Some((key.into(), value));
        self
    }

    /// Returns the selection name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the member table.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Returns the column holding the criterion.
    pub fn criterion_key(&self) -> &str {
        &self.criterion_key
    }

    /// Returns the pseudo-table name used in invalidations.
    pub fn pseudo_table(&self) -> String {
        format!("{}{}{}", SELECTION_TABLE_PREFIX, self.name, SELECTION_TABLE_SUFFIX)
    }

    /// Returns the RowId naming one selection in invalidations.
    pub fn selection_row_id(&self, criterion: &Ident) -> RowId {
        RowId::new(self.pseudo_table(), criterion.clone())
    }

    /// Returns true if `key` influences membership.
    pub fn depends_on(&self, key: &str) -> bool {
        key == self.criterion_key || self.filter.as_ref().map_or(false, |(k, _)| k == key)
    }

    /// Returns the selection a member row belongs to, if any.
    pub fn criterion_of(&self, columns: &Columns) -> Option<Ident> {
        if let Some((key, expected)) = &self.filter {
            if columns.get(key).unwrap_or(&Value::Null) != expected {
                return None;
            }
        }
        columns.get(&self.criterion_key).and_then(Ident::from_value)
    }
}

/// The table model shared by every component of a repository.
#[derive(Debug, Clone, Default)]
pub struct Model {
    collection_tables: HashSet<String>,
    read_only: HashMap<String, HashSet<String>>,
    selections: Vec<SelectionType>,
}

impl Model {
    /// Creates a model where every table holds single rows.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a collection table.
    pub fn with_collection_table(mut self, table: impl Into<String>) -> Self {
        self.collection_tables.insert(table.into());
        self
    }

    /// Declares a read-only column.
    pub fn with_read_only_property(mut self, table: impl Into<String>, key: impl Into<String>) -> Self {
        self.read_only
            .entry(table.into())
            .or_default()
            .insert(key.into());
        self
    }

    /// Declares a cached selection.
    pub fn with_selection(mut self, selection: SelectionType) -> Self {
        self.selections.push(selection);
        self
    }

    /// Returns true if the table holds collections.
    pub fn is_collection_table(&self, table: &str) -> bool {
        self.collection_tables.contains(table)
    }

    /// Returns true if the column cannot be written.
    pub fn is_read_only(&self, table: &str, key: &str) -> bool {
        self.read_only
            .get(table)
            .map_or(false, |keys| keys.contains(key))
    }

    /// Returns every declared selection.
    pub fn selections(&self) -> &[SelectionType] {
        &self.selections
    }

    /// Looks up a selection by name.
    pub fn selection(&self, name: &str) -> Option<&SelectionType> {
        self.selections.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(pairs: &[(&str, Value)]) -> Columns {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_selection_row_id_is_selection() {
        let sel = SelectionType::new("children", "hierarchy", "parentid");
        let row_id = sel.selection_row_id(&Ident::Int(5));
        assert!(row_id.is_selection());
        assert_eq!(row_id.table(), "__SELECT_children__");
    }

    #[test]
    fn test_criterion_with_filter() {
        let sel = SelectionType::new("children", "hierarchy", "parentid")
            .with_filter("isproperty", Value::Bool(false));

        let member = columns(&[("parentid", Value::Int(5)), ("isproperty", Value::Bool(false))]);
        assert_eq!(sel.criterion_of(&member), Some(Ident::Int(5)));

        let property = columns(&[("parentid", Value::Int(5)), ("isproperty", Value::Bool(true))]);
        assert_eq!(sel.criterion_of(&property), None);

        let orphan = columns(&[("isproperty", Value::Bool(false))]);
        assert_eq!(sel.criterion_of(&orphan), None);

        assert!(sel.depends_on("parentid"));
        assert!(sel.depends_on("isproperty"));
        assert!(!sel.depends_on("title"));
    }

    #[test]
    fn test_model_lookups() {
        let model = Model::new()
            .with_collection_table("acls")
            .with_read_only_property("hierarchy", "primarytype")
            .with_selection(SelectionType::new("children", "hierarchy", "parentid"));

        assert!(model.is_collection_table("acls"));
        assert!(!model.is_collection_table("hierarchy"));
        assert!(model.is_read_only("hierarchy", "primarytype"));
        assert!(!model.is_read_only("hierarchy", "title"));
        assert!(model.selection("children").is_some());
        assert!(model.selection("versions").is_none());
    }
}
