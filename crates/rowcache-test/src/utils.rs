//! Fixtures shared by the scenario tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use rowcache_common::config::RepositoryConfig;
use rowcache_common::error::RowCacheResult;
use rowcache_common::types::{EndFlags, NodeId, StartFlags, Value, Xid};
use rowcache_invalidation::{ClusterInvalidator, MemoryClusterInvalidator, MemoryClusterNetwork};
use rowcache_session::{Repository, TransactionalSession};
use rowcache_storage::row::Columns;
use rowcache_storage::{MemoryMapper, MemoryStore, Model, PersistenceContext, SelectionType};

/// Table holding one row per document.
pub const HIERARCHY: &str = "hierarchy";

/// Collection table of access control entries.
pub const ACLS: &str = "acls";

/// Selection of the children of a document.
pub const CHILDREN: &str = "children";

static XID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Returns a transaction id never returned before in this process.
pub fn next_xid() -> Xid {
    Xid::new(XID_COUNTER.fetch_add(1, Ordering::Relaxed), 0)
}

/// The document model used throughout the tests.
pub fn document_model() -> Arc<Model> {
    Arc::new(
        Model::new()
            .with_collection_table(ACLS)
            .with_read_only_property(HIERARCHY, "uuid")
            .with_selection(SelectionType::new(CHILDREN, HIERARCHY, "parentid")),
    )
}

/// Columns of a document row.
pub fn doc(parent: i64, title: &str) -> Columns {
    let mut columns = Columns::new();
    columns.insert("parentid".to_string(), Value::Int(parent));
    columns.insert("title".to_string(), Value::from(title));
    columns
}

/// One process: a repository over a backing store.
pub struct Node {
    /// The backing store, shared by every node of a cluster.
    pub store: Arc<MemoryStore>,
    /// The repository of this node.
    pub repository: Arc<Repository>,
    /// The node's invalidator, when clustered.
    pub cluster: Option<Arc<MemoryClusterInvalidator>>,
}

impl Node {
    /// Creates a standalone node with its own store.
    pub fn standalone(config: RepositoryConfig) -> RowCacheResult<Self> {
        let model = document_model();
        let store = MemoryStore::shared(Arc::clone(&model));
        let repository = Repository::new(config, model)?;
        Ok(Self {
            store,
            repository,
            cluster: None,
        })
    }

    /// Creates a node joined to `network` over a shared store.
    pub fn clustered(
        network: &Arc<MemoryClusterNetwork>,
        store: &Arc<MemoryStore>,
        node_id: u64,
    ) -> RowCacheResult<Self> {
        let mut config = RepositoryConfig::for_testing();
        config.node_id = NodeId::new(node_id);
        config.cluster.enabled = true;
        let cluster = Arc::new(network.create_invalidator());
        let repository = Repository::with_cluster(
            config,
            document_model(),
            Arc::clone(&cluster) as Arc<dyn ClusterInvalidator>,
        )?;
        Ok(Self {
            store: Arc::clone(store),
            repository,
            cluster: Some(cluster),
        })
    }

    /// Opens a session on this node.
    pub fn session(&self) -> TransactionalSession {
        self.repository
            .open_session(Box::new(MemoryMapper::new(Arc::clone(&self.store))))
    }
}

/// Runs `work` in a one-phase-committed transaction.
pub fn in_transaction<T, F>(session: &mut TransactionalSession, work: F) -> RowCacheResult<T>
where
    F: FnOnce(&mut PersistenceContext) -> RowCacheResult<T>,
{
    let xid = next_xid();
    session.start(xid, StartFlags::NoFlags)?;
    let result = match work(session.context_mut()) {
        Ok(value) => value,
        Err(e) => {
            session.end(xid, EndFlags::Fail)?;
            session.rollback(xid)?;
            return Err(e);
        }
    };
    if let Err(e) = session.end(xid, EndFlags::Success) {
        session.rollback(xid)?;
        return Err(e);
    }
    session.commit(xid, true)?;
    Ok(result)
}
