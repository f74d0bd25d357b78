//! Transactional sessions.
//!
//! A [`TransactionalSession`] brackets the work of one persistence context
//! in an XA-shaped protocol:
//!
//! ```text
//!  start ──► (reads/writes) ──► end ──► prepare ──► commit
//!    │                           │         │           │
//!    │ drain invalidations       │ flush   │ ReadOnly: │ publish what
//!    │ into the context          │         └─ publish ─┤ was flushed
//!    │                           │                     │
//!    └───────────────────────────┴──── rollback ───────┘ revert context
//! ```
//!
//! Invalidations are published only after the mapper's commit returned, so
//! other sessions never hear about writes before they are durable.

use std::fmt;
use std::sync::Arc;

use rowcache_common::error::{RowCacheError, RowCacheResult};
use rowcache_common::types::{EndFlags, PrepareVote, SessionId, StartFlags, Xid};
use rowcache_invalidation::{Invalidations, InvalidationsQueue};
use rowcache_storage::{ContextStats, PersistenceContext};
use tracing::{debug, warn};

use crate::repository::Repository;

/// Lifecycle state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No transaction is associated.
    Idle,
    /// A transaction is active.
    InTransaction,
    /// The transaction was ended and awaits prepare or commit.
    Ended,
    /// The session is closed.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "IDLE"),
            SessionState::InTransaction => write!(f, "IN_TRANSACTION"),
            SessionState::Ended => write!(f, "ENDED"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// A session bound to one persistence context.
pub struct TransactionalSession {
    id: SessionId,
    repository: Arc<Repository>,
    context: PersistenceContext,
    /// Invalidations pushed by other local sessions and by cluster receive.
    queue: Arc<InvalidationsQueue>,
    state: SessionState,
    current: Option<Xid>,
}

impl TransactionalSession {
    pub(crate) fn new(
        id: SessionId,
        repository: Arc<Repository>,
        context: PersistenceContext,
        queue: Arc<InvalidationsQueue>,
    ) -> Self {
        Self {
            id,
            repository,
            context,
            queue,
            state: SessionState::Idle,
            current: None,
        }
    }

    /// Returns the session id.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Returns the lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true while a transaction is associated, ended or not.
    pub fn in_transaction(&self) -> bool {
        matches!(self.state, SessionState::InTransaction | SessionState::Ended)
    }

    /// Returns the current transaction.
    pub fn current_xid(&self) -> Option<Xid> {
        self.current
    }

    /// Returns the repository.
    pub fn repository(&self) -> &Arc<Repository> {
        &self.repository
    }

    /// Returns the persistence context.
    pub fn context(&self) -> &PersistenceContext {
        &self.context
    }

    /// Returns the persistence context for reads and writes.
    pub fn context_mut(&mut self) -> &mut PersistenceContext {
        &mut self.context
    }

    /// Returns cache counters.
    pub fn stats(&self) -> ContextStats {
        self.context.stats()
    }

    fn check_open(&self) -> RowCacheResult<()> {
        if self.state == SessionState::Closed {
            return Err(RowCacheError::transaction(format!("{} is closed", self.id)));
        }
        Ok(())
    }

    fn check_current(&self, xid: Xid) -> RowCacheResult<()> {
        match self.current {
            Some(current) if current == xid => Ok(()),
            Some(current) => Err(RowCacheError::transaction(format!(
                "{} is associated with {}, not {}",
                self.id, current, xid
            ))),
            None => Err(RowCacheError::transaction(format!(
                "{} has no transaction {}",
                self.id, xid
            ))),
        }
    }

    // =========================================================================
    // XA lifecycle
    // =========================================================================

    /// Associates the session with a transaction.
    ///
    /// A fresh transaction first applies every invalidation received since
    /// the previous one, so no read in it can see a value another session
    /// already replaced.
    pub fn start(&mut self, xid: Xid, flags: StartFlags) -> RowCacheResult<()> {
        self.check_open()?;
        if flags.is_fresh() {
            if let Some(current) = self.current {
                return Err(RowCacheError::transaction(format!(
                    "{} cannot start {}: {} is active",
                    self.id, xid, current
                )));
            }
            self.process_received_invalidations();
        } else {
            self.check_current(xid)?;
        }
        self.context.mapper_mut().start(xid, flags)?;
        self.current = Some(xid);
        self.state = SessionState::InTransaction;
        debug!(session = %self.id, xid = %xid, ?flags, "transaction started");
        Ok(())
    }

    /// Dissociates the session from the transaction, flushing local changes
    /// unless the transaction failed.
    pub fn end(&mut self, xid: Xid, flags: EndFlags) -> RowCacheResult<()> {
        self.check_current(xid)?;
        if flags != EndFlags::Fail {
            if let Err(e) = self.context.flush() {
                if let Err(end_error) = self.context.mapper_mut().end(xid, EndFlags::Fail) {
                    warn!(session = %self.id, xid = %xid, error = %end_error, "end after failed flush also failed");
                }
                self.state = SessionState::Ended;
                return Err(e);
            }
        }
        self.context.mapper_mut().end(xid, flags)?;
        self.state = SessionState::Ended;
        debug!(session = %self.id, xid = %xid, ?flags, "transaction ended");
        Ok(())
    }

    /// Votes on the transaction.
    ///
    /// A read-only vote means commit will not be called, so the transaction
    /// is finished here.
    pub fn prepare(&mut self, xid: Xid) -> RowCacheResult<PrepareVote> {
        self.check_current(xid)?;
        let vote = self.context.mapper_mut().prepare(xid)?;
        if vote == PrepareVote::ReadOnly {
            debug!(session = %self.id, xid = %xid, "read-only transaction finished at prepare");
            self.commit_done();
        }
        Ok(vote)
    }

    /// Commits the transaction and publishes what it wrote.
    ///
    /// Invalidations for flushed rows are published whether or not the
    /// mapper commit succeeded. A failed commit also reverts the context.
    pub fn commit(&mut self, xid: Xid, one_phase: bool) -> RowCacheResult<()> {
        self.check_open()?;
        self.check_current(xid)?;
        let result = self.context.mapper_mut().commit(xid, one_phase);
        match result {
            Ok(()) => {
                debug!(session = %self.id, xid = %xid, one_phase, "transaction committed");
                self.commit_done();
                Ok(())
            }
            Err(e) => {
                let flushed = self.context.transaction_invalidations().clone();
                self.context.rollback();
                self.repository.publish(&flushed, Some(&self.queue));
                self.finish();
                Err(RowCacheError::transaction(format!(
                    "commit of {} failed: {}",
                    xid, e
                )))
            }
        }
    }

    /// Rolls the transaction back and reverts the context.
    pub fn rollback(&mut self, xid: Xid) -> RowCacheResult<()> {
        self.check_open()?;
        self.check_current(xid)?;
        let result = self.context.mapper_mut().rollback(xid);
        self.context.rollback();
        // Nothing survives a rollback, but keep the protocol symmetric
        self.commit_done();
        debug!(session = %self.id, xid = %xid, "transaction rolled back");
        result.map_err(|e| RowCacheError::transaction(format!("rollback of {} failed: {}", xid, e)))
    }

    /// Forgets a heuristically completed transaction.
    pub fn forget(&mut self, xid: Xid) -> RowCacheResult<()> {
        self.context.mapper_mut().forget(xid)
    }

    /// Lists prepared transactions.
    pub fn recover(&mut self) -> RowCacheResult<Vec<Xid>> {
        self.context.mapper_mut().recover()
    }

    /// Returns the transaction timeout in seconds.
    pub fn transaction_timeout(&mut self) -> u32 {
        self.context.mapper_mut().transaction_timeout()
    }

    /// Sets the transaction timeout in seconds.
    pub fn set_transaction_timeout(&mut self, seconds: u32) -> bool {
        self.context.mapper_mut().set_transaction_timeout(seconds)
    }

    fn commit_done(&mut self) {
        let invalidations = self.context.take_transaction_invalidations();
        self.repository.publish(&invalidations, Some(&self.queue));
        self.finish();
    }

    fn finish(&mut self) {
        self.current = None;
        if self.state != SessionState::Closed {
            self.state = SessionState::Idle;
        }
    }

    // =========================================================================
    // Outside the lifecycle
    // =========================================================================

    /// Flushes local changes.
    ///
    /// Outside a transaction the writes are already durable, so they are
    /// published at once. Invalidations received meanwhile are then applied.
    pub fn save(&mut self) -> RowCacheResult<()> {
        self.check_open()?;
        self.context.flush()?;
        if !self.in_transaction() {
            let invalidations = self.context.take_transaction_invalidations();
            self.repository.publish(&invalidations, Some(&self.queue));
        }
        self.process_received_invalidations();
        Ok(())
    }

    /// Applies every invalidation queued for this session, pulling from the
    /// cluster first. Returns what was applied.
    pub fn process_received_invalidations(&mut self) -> Invalidations {
        self.repository.receive_cluster_invalidations();
        let invalidations = self.queue.get_invalidations();
        if !invalidations.is_empty() {
            debug!(session = %self.id, entries = invalidations.len(), "applying received invalidations");
            self.context.process_invalidations(&invalidations);
        }
        invalidations
    }

    /// Drops everything the context caches. Returns the number of fragments
    /// dropped.
    pub fn clear_caches(&mut self) -> usize {
        self.context.clear_caches()
    }

    /// Closes the session.
    pub fn close(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        if let Some(xid) = self.current {
            warn!(session = %self.id, xid = %xid, "closing session with an active transaction");
        }
        self.repository.detach_session(self.id, &self.queue);
        self.state = SessionState::Closed;
    }
}

impl Drop for TransactionalSession {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl fmt::Debug for TransactionalSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionalSession")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("current", &self.current)
            .finish()
    }
}
