//! Two-phase-commit vocabulary shared by sessions and mappers.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A global transaction branch identifier.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Xid {
    global: u64,
    branch: u32,
}

impl Xid {
    /// Creates a new transaction branch identifier.
    #[must_use]
    pub const fn new(global: u64, branch: u32) -> Self {
        Self { global, branch }
    }

    /// Returns the global transaction id.
    #[must_use]
    pub const fn global(&self) -> u64 {
        self.global
    }

    /// Returns the branch qualifier.
    #[must_use]
    pub const fn branch(&self) -> u32 {
        self.branch
    }
}

impl fmt::Debug for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Xid({}:{})", self.global, self.branch)
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.global, self.branch)
    }
}

/// Flags passed when a transaction branch starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartFlags {
    /// A fresh transaction.
    NoFlags,
    /// Joining an existing branch.
    Join,
    /// Resuming a suspended branch.
    Resume,
}

impl StartFlags {
    /// Returns true if this starts a fresh (non-resumed) transaction.
    #[inline]
    pub fn is_fresh(self) -> bool {
        self == Self::NoFlags
    }
}

/// Flags passed when the work of a transaction branch ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndFlags {
    /// The work completed successfully.
    Success,
    /// The work failed; the branch will be rolled back.
    Fail,
    /// The branch is suspended and may be resumed.
    Suspend,
}

/// Outcome of the prepare phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrepareVote {
    /// Ready to commit.
    Ok,
    /// Nothing was written; commit will not be called.
    ReadOnly,
}
