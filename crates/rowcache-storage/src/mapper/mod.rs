//! Row storage abstraction.
//!
//! A [`RowMapper`] reads and writes rows in the backing store and takes part
//! in the two-phase-commit protocol driven by the session. Two
//! implementations live here:
//!
//! - [`MemoryMapper`]: a transactional in-memory store, shared between
//!   mappers through [`MemoryStore`], with failure injection
//! - [`CachingMapper`]: wraps any mapper with the process-wide
//!   [`RowCache`](crate::cache::RowCache)

mod caching;
mod memory;

pub use caching::CachingMapper;
pub use memory::{FailurePoint, MemoryMapper, MemoryStore};

use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{EndFlags, Ident, PrepareVote, RowId, StartFlags, Value, Xid};

use crate::model::SelectionType;
use crate::row::{Row, RowBatch, RowData, RowUpdate};

/// Storage of rows in the backing store.
///
/// Reads return only the rows that exist, except for collection tables where
/// a row is always returned (empty when nothing is stored). Errors surface as
/// [`RowCacheError::StorageFailure`].
pub trait RowMapper: Send {
    /// Reads many rows at once.
    fn read(&mut self, row_ids: &[RowId]) -> RowCacheResult<Vec<Row>>;

    /// Returns the ids of the member rows of a selection, sorted.
    fn read_selection(
        &mut self,
        selection: &SelectionType,
        criterion: &Ident,
    ) -> RowCacheResult<Vec<Ident>>;

    /// Writes a batch atomically.
    fn write(&mut self, batch: &RowBatch) -> RowCacheResult<()>;

    /// Allocates a fresh row id.
    fn generate_new_id(&mut self) -> RowCacheResult<Ident>;

    /// Starts or resumes the work of a transaction branch.
    fn start(&mut self, xid: Xid, flags: StartFlags) -> RowCacheResult<()>;

    /// Ends the work of a transaction branch.
    fn end(&mut self, xid: Xid, flags: EndFlags) -> RowCacheResult<()>;

    /// Prepares a transaction branch for commit.
    fn prepare(&mut self, xid: Xid) -> RowCacheResult<PrepareVote>;

    /// Commits a transaction branch.
    fn commit(&mut self, xid: Xid, one_phase: bool) -> RowCacheResult<()>;

    /// Rolls back a transaction branch.
    fn rollback(&mut self, xid: Xid) -> RowCacheResult<()>;

    /// Forgets a heuristically completed branch.
    fn forget(&mut self, xid: Xid) -> RowCacheResult<()>;

    /// Lists prepared branches.
    fn recover(&mut self) -> RowCacheResult<Vec<Xid>>;

    /// Returns the transaction timeout in seconds (0 means none).
    fn transaction_timeout(&self) -> u32;

    /// Sets the transaction timeout. Returns false if unsupported.
    fn set_transaction_timeout(&mut self, seconds: u32) -> bool;

    /// Drops any cached state.
    fn clear_cache(&mut self) {}

    /// Returns the number of cached rows.
    fn cache_size(&self) -> usize {
        0
    }

    /// Reads one row.
    fn read_row(&mut self, row_id: &RowId) -> RowCacheResult<Option<Row>> {
        Ok(self.read(std::slice::from_ref(row_id))?.into_iter().next())
    }

    /// Reads the values of a collection row.
    fn read_collection(&mut self, row_id: &RowId) -> RowCacheResult<Vec<Value>> {
        match self.read_row(row_id)? {
            None => Ok(Vec::new()),
            Some(Row {
                data: RowData::Collection(values),
                ..
            }) => Ok(values),
            Some(row) => Err(RowCacheError::internal(format!(
                "{} is not a collection row",
                row.row_id
            ))),
        }
    }

    /// Inserts one row.
    fn insert_row(&mut self, row: Row) -> RowCacheResult<()> {
        let mut batch = RowBatch::new();
        batch.creates.push(row);
        self.write(&batch)
    }

    /// Updates one row.
    fn update_row(&mut self, update: RowUpdate) -> RowCacheResult<()> {
        let mut batch = RowBatch::new();
        batch.updates.push(update);
        self.write(&batch)
    }

    /// Deletes one row.
    fn delete_row(&mut self, row_id: RowId) -> RowCacheResult<()> {
        let mut batch = RowBatch::new();
        batch.deletes.push(row_id);
        self.write(&batch)
    }
}
