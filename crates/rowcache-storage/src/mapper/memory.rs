//! In-memory transactional backing store.
//!
//! A [`MemoryStore`] holds committed rows and is shared by every
//! [`MemoryMapper`] of a repository, playing the part of the database. Each
//! mapper buffers the writes of its current transaction and applies them
//! atomically on commit; outside a transaction writes apply at once.
//! Readers only see committed rows plus their own buffered writes.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{EndFlags, Ident, PrepareVote, RowId, StartFlags, Xid};
use tracing::debug;

use super::RowMapper;
use crate::model::{Model, SelectionType};
use crate::row::{Row, RowBatch, RowData, UpdateWrite};

/// Writes of one transaction: `None` marks a deletion.
type Overlay = HashMap<RowId, Option<RowData>>;

/// Operations that can be made to fail once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailurePoint {
    /// Any read.
    Read,
    /// Any write.
    Write,
    /// Prepare.
    Prepare,
    /// Commit.
    Commit,
    /// Rollback.
    Rollback,
}

/// Committed rows shared by all memory mappers.
#[derive(Debug)]
pub struct MemoryStore {
    model: Arc<Model>,
    rows: RwLock<HashMap<RowId, RowData>>,
    prepared: Mutex<HashMap<Xid, Overlay>>,
    failures: Mutex<HashSet<FailurePoint>>,
    next_id: AtomicI64,
    reads: AtomicU64,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new(model: Arc<Model>) -> Self {
        Self {
            model,
            rows: RwLock::new(HashMap::new()),
            prepared: Mutex::new(HashMap::new()),
            failures: Mutex::new(HashSet::new()),
            next_id: AtomicI64::new(1),
            reads: AtomicU64::new(0),
        }
    }

    /// Creates an empty store wrapped in Arc.
    pub fn shared(model: Arc<Model>) -> Arc<Self> {
        Arc::new(Self::new(model))
    }

    /// Makes the next operation of the given kind fail.
    pub fn fail_next(&self, point: FailurePoint) {
        self.failures.lock().insert(point);
    }

    fn check(&self, point: FailurePoint) -> RowCacheResult<()> {
        if self.failures.lock().remove(&point) {
            return Err(RowCacheError::storage(format!("injected {:?} failure", point)));
        }
        Ok(())
    }

    /// Returns the committed payload of a row.
    pub fn get(&self, row_id: &RowId) -> Option<RowData> {
        self.rows.read().get(row_id).cloned()
    }

    /// Returns the number of committed rows.
    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    /// Returns true if nothing is committed.
    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    /// Returns how many rows were read from the store.
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    fn current(&self, overlay: &Overlay, row_id: &RowId) -> Option<RowData> {
        match overlay.get(row_id) {
            Some(data) => data.clone(),
            None => self.get(row_id),
        }
    }

    /// Returns `base` with the batch applied on top, without touching the
    /// committed rows.
    fn stage(&self, base: &Overlay, batch: &RowBatch) -> RowCacheResult<Overlay> {
        let mut staged = base.clone();

        for row in &batch.creates {
            let exists = matches!(
                self.current(&staged, &row.row_id),
                Some(RowData::Simple(_))
            );
            if exists {
                return Err(RowCacheError::storage(format!(
                    "row {} already exists",
                    row.row_id
                )));
            }
            staged.insert(row.row_id.clone(), Some(row.data.clone()));
        }

        for update in &batch.updates {
            let row_id = &update.row.row_id;
            let next = match (&update.write, self.current(&staged, row_id)) {
                (UpdateWrite::Columns(keys), Some(RowData::Simple(mut columns))) => {
                    let RowData::Simple(source) = &update.row.data else {
                        return Err(RowCacheError::storage(format!(
                            "column update of {} carries a collection",
                            row_id
                        )));
                    };
                    for key in keys {
                        columns.insert(key.clone(), source.get(key).cloned().unwrap_or_default());
                    }
                    RowData::Simple(columns)
                }
                (UpdateWrite::Columns(_), _) => {
                    return Err(RowCacheError::storage(format!("row {} does not exist", row_id)))
                }
                (UpdateWrite::Collection(write), current) => {
                    let mut values = match current {
                        Some(RowData::Collection(values)) => values,
                        None => Vec::new(),
                        Some(RowData::Simple(_)) => {
                            return Err(RowCacheError::storage(format!(
                                "row {} is not a collection",
                                row_id
                            )))
                        }
                    };
                    write.apply(&mut values)?;
                    RowData::Collection(values)
                }
            };
            staged.insert(row_id.clone(), Some(next));
        }

        for row_id in &batch.deletes {
            staged.insert(row_id.clone(), None);
        }
        Ok(staged)
    }

    fn apply(&self, overlay: Overlay) {
        let mut rows = self.rows.write();
        for (row_id, data) in overlay {
            match data {
                Some(data) => {
                    rows.insert(row_id, data);
                }
                None => {
                    rows.remove(&row_id);
                }
            }
        }
    }
}

/// A mapper over a [`MemoryStore`].
#[derive(Debug)]
pub struct MemoryMapper {
    store: Arc<MemoryStore>,
    transaction: Option<(Xid, Overlay)>,
    timeout: u32,
}

impl MemoryMapper {
    /// Creates a mapper over a shared store.
    pub fn new(store: Arc<MemoryStore>) -> Self {
        Self {
            store,
            transaction: None,
            timeout: 0,
        }
    }

    /// Returns the shared store.
    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    /// Returns true while a transaction is open.
    pub fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    fn overlay(&self) -> Option<&Overlay> {
        self.transaction.as_ref().map(|(_, o)| o)
    }

    fn check_xid(&self, xid: Xid) -> RowCacheResult<()> {
        match &self.transaction {
            Some((current, _)) if *current == xid => Ok(()),
            Some((current, _)) => Err(RowCacheError::transaction(format!(
                "transaction {} is active, not {}",
                current, xid
            ))),
            None => Err(RowCacheError::transaction(format!(
                "no active transaction for {}",
                xid
            ))),
        }
    }
}

impl RowMapper for MemoryMapper {
    fn read(&mut self, row_ids: &[RowId]) -> RowCacheResult<Vec<Row>> {
        self.store.check(FailurePoint::Read)?;
        self.store
            .reads
            .fetch_add(row_ids.len() as u64, Ordering::Relaxed);

        let empty = Overlay::new();
        let overlay = self.overlay().unwrap_or(&empty);
        let rows = row_ids
            .iter()
            .filter_map(|row_id| match self.store.current(overlay, row_id) {
                Some(data) => Some(Row {
                    row_id: row_id.clone(),
                    data,
                }),
                None if self.store.model.is_collection_table(row_id.table()) => {
                    Some(Row::collection(row_id.clone(), Vec::new()))
                }
                None => None,
            })
            .collect();
        Ok(rows)
    }

    fn read_selection(
        &mut self,
        selection: &SelectionType,
        criterion: &Ident,
    ) -> RowCacheResult<Vec<Ident>> {
        self.store.check(FailurePoint::Read)?;

        let mut members: BTreeMap<Ident, bool> = BTreeMap::new();
        let matches = |data: &RowData| match data {
            RowData::Simple(columns) => selection.criterion_of(columns).as_ref() == Some(criterion),
            RowData::Collection(_) => false,
        };
        for (row_id, data) in self.store.rows.read().iter() {
            if row_id.table() == selection.table() && matches(data) {
                members.insert(row_id.id().clone(), true);
            }
        }
        if let Some(overlay) = self.overlay() {
            for (row_id, data) in overlay {
                if row_id.table() == selection.table() {
                    let member = data.as_ref().map_or(false, |d| matches(d));
                    members.insert(row_id.id().clone(), member);
                }
            }
        }
        Ok(members
            .into_iter()
            .filter_map(|(id, member)| member.then_some(id))
            .collect())
    }

    fn write(&mut self, batch: &RowBatch) -> RowCacheResult<()> {
        self.store.check(FailurePoint::Write)?;
        if batch.is_empty() {
            return Ok(());
        }
        match &mut self.transaction {
            Some((_, overlay)) => {
                *overlay = self.store.stage(overlay, batch)?;
            }
            None => {
                let staged = self.store.stage(&Overlay::new(), batch)?;
                self.store.apply(staged);
            }
        }
        debug!(
            creates = batch.creates.len(),
            updates = batch.updates.len(),
            deletes = batch.deletes.len(),
            "memory mapper write"
        );
        Ok(())
    }

    fn generate_new_id(&mut self) -> RowCacheResult<Ident> {
        Ok(Ident::Int(self.store.next_id.fetch_add(1, Ordering::Relaxed)))
    }

    fn start(&mut self, xid: Xid, flags: StartFlags) -> RowCacheResult<()> {
        if flags.is_fresh() {
            if let Some((current, _)) = &self.transaction {
                return Err(RowCacheError::transaction(format!(
                    "cannot start {}: transaction {} is active",
                    xid, current
                )));
            }
            self.transaction = Some((xid, Overlay::new()));
            Ok(())
        } else {
            self.check_xid(xid)
        }
    }

    fn end(&mut self, xid: Xid, _flags: EndFlags) -> RowCacheResult<()> {
        self.check_xid(xid)
    }

    fn prepare(&mut self, xid: Xid) -> RowCacheResult<PrepareVote> {
        self.store.check(FailurePoint::Prepare)?;
        self.check_xid(xid)?;
        let Some((_, overlay)) = self.transaction.take() else {
            return Err(RowCacheError::internal("transaction vanished during prepare"));
        };
        if overlay.is_empty() {
            return Ok(PrepareVote::ReadOnly);
        }
        self.store.prepared.lock().insert(xid, overlay);
        Ok(PrepareVote::Ok)
    }

    fn commit(&mut self, xid: Xid, one_phase: bool) -> RowCacheResult<()> {
        let overlay = match self.transaction.take() {
            Some((current, overlay)) if current == xid => Some(overlay),
            Some(other) => {
                self.transaction = Some(other);
                None
            }
            None => None,
        };
        let overlay = match overlay {
            Some(overlay) => overlay,
            None if !one_phase => self.store.prepared.lock().remove(&xid).ok_or_else(|| {
                RowCacheError::transaction(format!("transaction {} is not prepared", xid))
            })?,
            None => {
                return Err(RowCacheError::transaction(format!(
                    "no active transaction for {}",
                    xid
                )))
            }
        };
        // A failed commit leaves nothing applied.
        self.store.check(FailurePoint::Commit)?;
        self.store.apply(overlay);
        Ok(())
    }

    fn rollback(&mut self, xid: Xid) -> RowCacheResult<()> {
        if matches!(&self.transaction, Some((current, _)) if *current == xid) {
            self.transaction = None;
        }
        self.store.prepared.lock().remove(&xid);
        self.store.check(FailurePoint::Rollback)
    }

    fn forget(&mut self, xid: Xid) -> RowCacheResult<()> {
        self.store.prepared.lock().remove(&xid);
        Ok(())
    }

    fn recover(&mut self) -> RowCacheResult<Vec<Xid>> {
        let mut xids: Vec<Xid> = self.store.prepared.lock().keys().copied().collect();
        xids.sort();
        Ok(xids)
    }

    fn transaction_timeout(&self) -> u32 {
        self.timeout
    }

    fn set_transaction_timeout(&mut self, seconds: u32) -> bool {
        self.timeout = seconds;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::{CollectionWrite, Columns, RowUpdate};
    use rowcache_common::types::Value;

    fn column(store: &MemoryStore, row_id: &RowId, key: &str) -> Option<Value> {
        match store.get(row_id)? {
            RowData::Simple(columns) => columns.get(key).cloned(),
            RowData::Collection(_) => None,
        }
    }

    fn model() -> Arc<Model> {
        Arc::new(
            Model::new()
                .with_collection_table("acls")
                .with_selection(SelectionType::new("children", "hierarchy", "parentid")),
        )
    }

    fn doc(id: i64, parent: i64, title: &str) -> Row {
        let mut columns = Columns::new();
        columns.insert("parentid".to_string(), Value::Int(parent));
        columns.insert("title".to_string(), Value::from(title));
        Row::simple(RowId::new("hierarchy", id), columns)
    }

    fn title_update(id: i64, parent: i64, title: &str) -> RowUpdate {
        RowUpdate {
            row: doc(id, parent, title),
            write: UpdateWrite::Columns(vec!["title".to_string()]),
        }
    }

    #[test]
    fn test_autocommit_write_and_read() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(Arc::clone(&store));
        mapper.insert_row(doc(1, 0, "v1")).unwrap();

        let row = mapper.read_row(&RowId::new("hierarchy", 1)).unwrap().unwrap();
        assert_eq!(row, doc(1, 0, "v1"));
        assert!(mapper.read_row(&RowId::new("hierarchy", 2)).unwrap().is_none());
        assert!(mapper
            .read_collection(&RowId::new("acls", 1))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_transaction_isolation() {
        let store = MemoryStore::shared(model());
        let mut writer = MemoryMapper::new(Arc::clone(&store));
        let mut reader = MemoryMapper::new(Arc::clone(&store));
        let xid = Xid::new(1, 0);
        let row_id = RowId::new("hierarchy", 1);

        writer.start(xid, StartFlags::NoFlags).unwrap();
        writer.insert_row(doc(1, 0, "v1")).unwrap();
        assert!(writer.read_row(&row_id).unwrap().is_some());
        assert!(reader.read_row(&row_id).unwrap().is_none());

        writer.end(xid, EndFlags::Success).unwrap();
        assert_eq!(writer.prepare(xid).unwrap(), PrepareVote::Ok);
        assert_eq!(writer.recover().unwrap(), vec![xid]);
        writer.commit(xid, false).unwrap();
        assert!(reader.read_row(&row_id).unwrap().is_some());
        assert!(writer.recover().unwrap().is_empty());
    }

    #[test]
    fn test_read_only_prepare() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(store);
        let xid = Xid::new(2, 0);
        mapper.start(xid, StartFlags::NoFlags).unwrap();
        assert_eq!(mapper.prepare(xid).unwrap(), PrepareVote::ReadOnly);
        assert!(!mapper.in_transaction());
    }

    #[test]
    fn test_rollback_discards() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(Arc::clone(&store));
        let xid = Xid::new(3, 0);
        mapper.start(xid, StartFlags::NoFlags).unwrap();
        mapper.insert_row(doc(1, 0, "v1")).unwrap();
        mapper.rollback(xid).unwrap();
        assert!(store.is_empty());
        // Rolling back again is harmless
        mapper.rollback(xid).unwrap();
    }

    #[test]
    fn test_column_update_merges() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(Arc::clone(&store));
        mapper.insert_row(doc(1, 7, "v1")).unwrap();
        mapper.update_row(title_update(1, 99, "v2")).unwrap();

        let row_id = RowId::new("hierarchy", 1);
        assert_eq!(column(&store, &row_id, "title"), Some(Value::from("v2")));
        // Only the listed column is written
        assert_eq!(column(&store, &row_id, "parentid"), Some(Value::Int(7)));
    }

    #[test]
    fn test_update_missing_row_fails() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(store);
        let err = mapper.update_row(title_update(1, 0, "v2")).unwrap_err();
        assert!(err.is_storage_failure());
    }

    #[test]
    fn test_duplicate_create_fails_atomically() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(Arc::clone(&store));
        mapper.insert_row(doc(1, 0, "v1")).unwrap();

        let mut batch = RowBatch::new();
        batch.creates.push(doc(2, 0, "two"));
        batch.creates.push(doc(1, 0, "again"));
        assert!(mapper.write(&batch).is_err());
        assert!(store.get(&RowId::new("hierarchy", 2)).is_none());
    }

    #[test]
    fn test_collection_append() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(Arc::clone(&store));
        let row_id = RowId::new("acls", 1);
        let values = vec![Value::from("a"), Value::from("b")];
        mapper
            .insert_row(Row::collection(row_id.clone(), values.clone()))
            .unwrap();

        let mut all = values.clone();
        all.push(Value::from("c"));
        mapper
            .update_row(RowUpdate {
                row: Row::collection(row_id.clone(), all.clone()),
                write: UpdateWrite::Collection(CollectionWrite::Append {
                    offset: 2,
                    values: vec![Value::from("c")],
                }),
            })
            .unwrap();
        assert_eq!(mapper.read_collection(&row_id).unwrap(), all);
    }

    #[test]
    fn test_selection_sees_own_writes() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(Arc::clone(&store));
        let children = SelectionType::new("children", "hierarchy", "parentid");
        mapper.insert_row(doc(1, 10, "a")).unwrap();
        mapper.insert_row(doc(2, 10, "b")).unwrap();
        mapper.insert_row(doc(3, 11, "c")).unwrap();

        let xid = Xid::new(4, 0);
        mapper.start(xid, StartFlags::NoFlags).unwrap();
        mapper.delete_row(RowId::new("hierarchy", 2)).unwrap();
        mapper.insert_row(doc(4, 10, "d")).unwrap();

        let ids = mapper.read_selection(&children, &Ident::Int(10)).unwrap();
        assert_eq!(ids, vec![Ident::Int(1), Ident::Int(4)]);

        let mut other = MemoryMapper::new(store);
        let ids = other.read_selection(&children, &Ident::Int(10)).unwrap();
        assert_eq!(ids, vec![Ident::Int(1), Ident::Int(2)]);
    }

    #[test]
    fn test_injected_failures_fire_once() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(Arc::clone(&store));
        store.fail_next(FailurePoint::Read);
        assert!(mapper.read(&[RowId::new("hierarchy", 1)]).is_err());
        assert!(mapper.read(&[RowId::new("hierarchy", 1)]).is_ok());

        let xid = Xid::new(5, 0);
        mapper.start(xid, StartFlags::NoFlags).unwrap();
        mapper.insert_row(doc(1, 0, "v1")).unwrap();
        store.fail_next(FailurePoint::Commit);
        assert!(mapper.commit(xid, true).is_err());
        assert!(store.is_empty());
        assert!(!mapper.in_transaction());
    }

    #[test]
    fn test_nested_start_refused() {
        let store = MemoryStore::shared(model());
        let mut mapper = MemoryMapper::new(store);
        mapper.start(Xid::new(1, 0), StartFlags::NoFlags).unwrap();
        assert!(mapper.start(Xid::new(2, 0), StartFlags::NoFlags).is_err());
        assert!(mapper.start(Xid::new(1, 0), StartFlags::Join).is_ok());
        assert!(mapper.generate_new_id().unwrap() != mapper.generate_new_id().unwrap());
    }
}
