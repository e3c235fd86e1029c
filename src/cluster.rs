//! The cluster collaborator (spec section 6): leader lookup, membership, the consensus barrier,
//! and the replicated checkpoint primitive. This is the out-of-scope consensus/replication
//! implementation, specified here purely as the trait boundary the gateway consumes - the same
//! role `dqlite_cluster`'s vtable (`xLeader`, `xServers`, `xRegister`, `xBarrier`, `xCheckpoint`,
//! `xRecover`, `xPromote`, `xDemote`) plays for `gateway.c`.

use crate::engine::DbHandle;
use crate::error::EngineError;

/// One member of the cluster, as returned by [`Cluster::servers`].
#[derive(Debug, Clone, PartialEq)]
pub struct ServerInfo {
    pub id: u64,
    pub address: String,
}

/// Shared across every gateway on the node; must be safe for concurrent invocation since the
/// gateway never synchronizes access to it (spec section 5, "Shared resources").
pub trait Cluster: Send + Sync {
    /// Current leader's address, or `None` if the cluster doesn't currently know one.
    fn leader(&self) -> Option<String>;

    /// Current cluster membership.
    fn servers(&self) -> Result<Vec<ServerInfo>, EngineError>;

    /// Register a newly opened database's connection with the cluster, so the consensus layer
    /// can route writes and wire up the WAL hook's own cluster-side bookkeeping (spec section
    /// 4.4).
    fn register(&self, db: &dyn DbHandle);

    /// Block until every previously committed replicated log entry has been applied locally
    /// (spec section 4.5 and the GLOSSARY entry for "Consensus barrier").
    fn barrier(&self) -> Result<(), EngineError>;

    /// Perform a cluster-wide checkpoint, truncating the WAL on every replica together (spec
    /// section 4.7 and the GLOSSARY entry for "Replicated checkpoint").
    fn checkpoint(&self, db: &dyn DbHandle) -> Result<(), EngineError>;

    /// Declared for completeness with the source vtable; not called by the gateway core (spec
    /// section 6 lists these as "not consumed by the core").
    fn recover(&self) {}
    fn promote(&self) {}
    fn demote(&self) {}
}
