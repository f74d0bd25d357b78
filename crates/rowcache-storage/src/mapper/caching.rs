//! Mapper decorator adding the process-wide row cache.

use std::collections::HashSet;
use std::sync::Arc;

use rowcache_common::error::RowCacheResult;
use rowcache_common::types::{EndFlags, Ident, PrepareVote, RowId, SessionId, StartFlags, Xid};
use tracing::{debug, warn};

use super::RowMapper;
use crate::cache::RowCache;
use crate::model::SelectionType;
use crate::row::{Row, RowBatch};

/// Wraps a mapper with the repository's shared [`RowCache`].
///
/// Reads of rows this session has not written go through the shared cache.
/// Rows written inside a transaction are read from the delegate until the
/// transaction ends, so other sessions never see uncommitted rows through
/// the cache. Once the delegate has applied a write, successfully or not,
/// the written rows are evicted and the next reader loads them afresh.
/// Evicting rather than storing the written values keeps two sessions
/// committing the same row from leaving the older value cached.
pub struct CachingMapper {
    delegate: Box<dyn RowMapper>,
    cache: Arc<RowCache>,
    session: Option<SessionId>,
    /// Rows written by the current transaction.
    pending: HashSet<RowId>,
    in_transaction: bool,
}

impl CachingMapper {
    /// Wraps `delegate` with the shared cache.
    pub fn new(delegate: Box<dyn RowMapper>, cache: Arc<RowCache>) -> Self {
        Self {
            delegate,
            cache,
            session: None,
            pending: HashSet::new(),
            in_transaction: false,
        }
    }

    /// Records the owning session, for diagnostics.
    pub fn set_session(&mut self, session: SessionId) {
        self.session = Some(session);
    }

    /// Returns the shared cache.
    pub fn cache(&self) -> &Arc<RowCache> {
        &self.cache
    }

    fn evict_written(&mut self) {
        let n = self.pending.len();
        for row_id in self.pending.drain() {
            self.cache.evict(&row_id);
        }
        if n > 0 {
            debug!(session = ?self.session, rows = n, "evicted written rows from shared cache");
        }
    }
}

impl RowMapper for CachingMapper {
    fn read(&mut self, row_ids: &[RowId]) -> RowCacheResult<Vec<Row>> {
        let (own, shared): (Vec<RowId>, Vec<RowId>) = row_ids
            .iter()
            .cloned()
            .partition(|r| self.pending.contains(r));

        let mut rows = if own.is_empty() {
            Vec::new()
        } else {
            self.delegate.read(&own)?
        };
        let delegate = &mut self.delegate;
        rows.extend(self.cache.read_through(&shared, |missing| delegate.read(missing))?);
        Ok(rows)
    }

    fn read_selection(
        &mut self,
        selection: &SelectionType,
        criterion: &Ident,
    ) -> RowCacheResult<Vec<Ident>> {
        self.delegate.read_selection(selection, criterion)
    }

    fn write(&mut self, batch: &RowBatch) -> RowCacheResult<()> {
        self.delegate.write(batch)?;
        if self.in_transaction {
            self.pending.extend(batch.row_ids().cloned());
        } else {
            for row_id in batch.row_ids() {
                self.cache.evict(row_id);
            }
        }
        Ok(())
    }

    fn generate_new_id(&mut self) -> RowCacheResult<Ident> {
        self.delegate.generate_new_id()
    }

    fn start(&mut self, xid: Xid, flags: StartFlags) -> RowCacheResult<()> {
        self.delegate.start(xid, flags)?;
        if flags.is_fresh() {
            self.pending.clear();
            self.in_transaction = true;
        }
        Ok(())
    }

    fn end(&mut self, xid: Xid, flags: EndFlags) -> RowCacheResult<()> {
        self.delegate.end(xid, flags)
    }

    fn prepare(&mut self, xid: Xid) -> RowCacheResult<PrepareVote> {
        let vote = self.delegate.prepare(xid)?;
        if vote == PrepareVote::ReadOnly {
            self.pending.clear();
            self.in_transaction = false;
        }
        Ok(vote)
    }

    fn commit(&mut self, xid: Xid, one_phase: bool) -> RowCacheResult<()> {
        let result = self.delegate.commit(xid, one_phase);
        if let Err(e) = &result {
            warn!(session = ?self.session, error = %e, "commit failed");
        }
        self.evict_written();
        self.in_transaction = false;
        result
    }

    fn rollback(&mut self, xid: Xid) -> RowCacheResult<()> {
        self.pending.clear();
        self.in_transaction = false;
        self.delegate.rollback(xid)
    }

    fn forget(&mut self, xid: Xid) -> RowCacheResult<()> {
        self.delegate.forget(xid)
    }

    fn recover(&mut self) -> RowCacheResult<Vec<Xid>> {
        self.delegate.recover()
    }

    fn transaction_timeout(&self) -> u32 {
        self.delegate.transaction_timeout()
    }

    fn set_transaction_timeout(&mut self, seconds: u32) -> bool {
        self.delegate.set_transaction_timeout(seconds)
    }

    fn clear_cache(&mut self) {
        self.cache.clear();
        self.delegate.clear_cache();
    }

    fn cache_size(&self) -> usize {
        self.cache.len()
    }
}
