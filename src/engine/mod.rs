//! The embedded SQL engine collaborator (spec section 6): statement preparation, binding,
//! stepping, finalization, WAL hook registration, and the shared-memory view the checkpoint
//! decision procedure inspects. This is out of scope per spec section 1 ("The embedded SQL
//! engine itself"); this module only defines the trait boundary the gateway consumes, plus one
//! concrete `rusqlite`-backed implementation (see `rusqlite_engine`) so the crate is runnable and
//! testable - the same split `sqld` draws between `trait Database`/`trait Connection`
//! (`sqld/src/database/mod.rs`) and its concrete `LibSqlDb` (`sqld/src/database/libsql.rs`).

mod rusqlite_engine;

pub use rusqlite_engine::RusqliteEngine;

use crate::error::EngineError;
use crate::value::{Row, Value};

/// Outcome of stepping a statement to completion (`exec`, spec section 4.5).
#[derive(Debug, Clone, Copy)]
pub struct ExecResult {
    pub last_insert_id: i64,
    pub rows_affected: u64,
}

/// Outcome of one invocation of the row producer (spec section 4.6).
#[derive(Debug, Clone)]
pub enum BatchOutcome {
    /// The statement wrote as many rows as fit and has more left; the statement must be kept
    /// around for the next batch.
    RowAvailable(Vec<Row>),
    /// The statement is exhausted; no more batches follow.
    Done(Vec<Row>),
}

/// A single prepared statement, addressable within its owning database's registry by a
/// `u32` id (spec section 3, "prepared-statement registry keyed by a per-db statement
/// identifier").
pub trait Statement: Send {
    /// Number of `?`-style bind parameters the statement declares.
    fn param_count(&self) -> u32;

    /// Bind positional parameters decoded from a request's trailing message bytes.
    fn bind(&mut self, params: &[Value]) -> Result<(), EngineError>;

    /// Step the statement to completion, as `exec` does (spec section 4.5).
    fn exec(&mut self) -> Result<ExecResult, EngineError>;

    /// Produce one batch of rows, stopping once the batch has grown past `max_batch_bytes` or
    /// the statement is exhausted (spec section 4.6).
    fn query_batch(&mut self, max_batch_bytes: usize) -> Result<BatchOutcome, EngineError>;
}

/// A read-only view over the WAL-index shared-memory region backing an open database, as probed
/// by the checkpoint decision procedure (spec section 4.7 and the GLOSSARY entries for "Reader
/// mark" and "mxFrame").
pub trait WalSharedMemory {
    /// Number of reader slots, including the always-zero slot 0 (`DQLITE__FORMAT_WAL_NREADER` in
    /// the source).
    fn reader_slots(&self) -> usize;

    /// The highest valid WAL frame; frames beyond it are not yet committed.
    fn mx_frame(&self) -> u32;

    /// The frontier a given reader slot is pinned to.
    fn read_mark(&self, slot: usize) -> u32;

    /// Attempt to acquire reader slot `slot`'s lock exclusively and non-blockingly, to confirm no
    /// reader is actually using it. Always released again immediately by the caller via
    /// `unlock_reader` once probed (spec section 4.7, step 3).
    fn try_lock_reader(&self, slot: usize) -> Result<LockOutcome, EngineError>;

    /// Release a lock acquired via `try_lock_reader`.
    fn unlock_reader(&self, slot: usize);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired,
    Busy,
}

/// The narrow, object-safe handle a [`crate::cluster::Cluster`] collaborator is given: enough to
/// register a connection or target a checkpoint without needing the full [`Database`] trait
/// (whose associated types make it impossible to use as `dyn Database`). Mirrors how the C
/// source hands the cluster a bare `sqlite3 *db` pointer rather than the gateway's own `struct
/// dqlite__db`.
pub trait DbHandle: Send {
    fn id(&self) -> u32;
}

/// An open database handle (spec section 3, "Database handle"). Implementations own the
/// prepared-statement registry and the WAL-hook plumbing.
pub trait Database: DbHandle {
    type Statement: Statement;
    type Wal<'a>: WalSharedMemory + 'a
    where
        Self: 'a;

    /// Prepare the first statement in `sql`, returning its new id, its bind-parameter count, and
    /// any SQL text left over after that first statement (spec section 4.5, `prepare`). Returns
    /// `Ok(None)` rather than an error when `sql` holds nothing but whitespace/comments and so
    /// yields no statement to run - the engine itself treats this as a successful no-op
    /// (`dqlite__db_prepare` in the source only ever fails on a genuine syntax error), leaving it
    /// to each caller to decide what a statement-less prepare means for its own request kind.
    fn prepare(&mut self, sql: &str) -> Result<Option<(u32, u32, Option<String>)>, EngineError>;

    /// Look up a previously prepared statement by id.
    fn statement_mut(&mut self, stmt_id: u32) -> Option<&mut Self::Statement>;

    /// Remove a statement from the registry, finalizing it (spec section 4.5, `finalize`).
    fn finalize(&mut self, stmt_id: u32) -> Result<(), EngineError>;

    /// A read-only view of the WAL-index shared memory for the checkpoint decision procedure.
    fn wal_shared_memory(&self) -> Result<Self::Wal<'_>, EngineError>;
}

/// The piece of the `open` handler (spec section 4.4) that is necessarily concrete: constructing
/// a fresh engine database and wiring up its WAL hook. Split out from [`Database`] so the
/// gateway can stay generic over "any engine that can be opened and hooked this way" without
/// needing to know how.
pub trait OpenableDatabase: Database + Sized {
    fn open(
        name: &str,
        flags: u32,
        options: &crate::options::GatewayOptions,
    ) -> Result<Self, EngineError>;

    fn install_checkpoint_hook(
        &mut self,
        cluster: std::sync::Arc<dyn crate::cluster::Cluster>,
        checkpoint_threshold: u32,
    );
}
