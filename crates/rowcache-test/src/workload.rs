//! Random edit workloads.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rowcache_common::error::RowCacheResult;
use rowcache_common::types::{Ident, RowId, Value};
use rowcache_session::TransactionalSession;
use rowcache_storage::PersistenceContext;

use crate::utils::{doc, in_transaction, ACLS, HIERARCHY};

/// One edit against a seeded document.
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    /// Overwrites the title.
    SetTitle {
        /// Target document.
        doc: Ident,
        /// New title.
        title: String,
    },
    /// Appends an access control entry.
    AppendAcl {
        /// Target document.
        doc: Ident,
        /// New entry.
        entry: String,
    },
    /// Reads the title.
    Read {
        /// Target document.
        doc: Ident,
    },
}

impl Operation {
    /// Applies the operation to a context.
    pub fn apply(&self, context: &mut PersistenceContext) -> RowCacheResult<()> {
        match self {
            Operation::SetTitle { doc, title } => {
                let row_id = RowId::new(HIERARCHY, doc.clone());
                context.set_value(&row_id, "title", Value::from(title.as_str()))?;
            }
            Operation::AppendAcl { doc, entry } => {
                let row_id = RowId::new(ACLS, doc.clone());
                let mut values = context.get_collection(&row_id)?;
                values.push(Value::from(entry.as_str()));
                context.set_collection(&row_id, values)?;
            }
            Operation::Read { doc } => {
                context.get_value(&RowId::new(HIERARCHY, doc.clone()), "title")?;
            }
        }
        Ok(())
    }
}

/// Generates a reproducible stream of operations over a set of documents.
pub struct EditWorkload {
    rng: StdRng,
    docs: Vec<Ident>,
    writer: String,
    counter: u64,
}

impl EditWorkload {
    /// Creates a workload; `writer` tags every written value.
    pub fn new(seed: u64, docs: Vec<Ident>, writer: impl Into<String>) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            docs,
            writer: writer.into(),
            counter: 0,
        }
    }

    /// Returns the next operation.
    pub fn next_operation(&mut self) -> Operation {
        let doc = self.docs[self.rng.gen_range(0..self.docs.len())].clone();
        self.counter += 1;
        match self.rng.gen_range(0..10) {
            0..=3 => Operation::SetTitle {
                doc,
                title: format!("{}-{}", self.writer, self.counter),
            },
            4..=5 => Operation::AppendAcl {
                doc,
                entry: format!("{}-{}", self.writer, self.counter),
            },
            _ => Operation::Read { doc },
        }
    }
}

/// Creates `count` documents under parent 0 in one transaction and returns
/// their ids.
pub fn seed_documents(session: &mut TransactionalSession, count: usize) -> RowCacheResult<Vec<Ident>> {
    in_transaction(session, |context| {
        let mut ids = Vec::with_capacity(count);
        for i in 0..count {
            let row_id = context.create_new(HIERARCHY, doc(0, &format!("doc-{}", i)))?;
            ids.push(row_id.id().clone());
        }
        Ok(ids)
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workload_is_reproducible() {
        let docs = vec![Ident::Int(1), Ident::Int(2), Ident::Int(3)];
        let mut a = EditWorkload::new(7, docs.clone(), "w");
        let mut b = EditWorkload::new(7, docs, "w");
        for _ in 0..50 {
            assert_eq!(a.next_operation(), b.next_operation());
        }
    }
}
