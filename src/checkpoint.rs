//! The checkpoint decision procedure (spec section 4.7): installed as the engine's WAL hook
//! immediately after `open`, invoked after every successful commit that produced new WAL frames,
//! and responsible for deciding whether this is a good moment to ask the cluster to checkpoint
//! every replica's WAL together.
//!
//! Kept as a free function over the [`WalSharedMemory`]/[`Cluster`]/[`DbHandle`] trait objects
//! rather than a method on the concrete engine so it can be exercised directly against fakes (see
//! `tests/gateway.rs`) without going through real SQLite shared memory - mirroring how `sqld`'s
//! own test module stubs its external collaborators (`sqld/src/test/bottomless.rs`).

use crate::cluster::Cluster;
use crate::engine::{DbHandle, LockOutcome, WalSharedMemory};

/// Runs the four steps of spec section 4.7. Never returns an error: every failure path here is
/// "postpone" or "swallow and let the engine retry at the next commit," per spec section 7
/// ("Checkpoint hook failures are silent").
pub fn maybe_checkpoint(
    pages: u32,
    checkpoint_threshold: u32,
    wal: &dyn WalSharedMemory,
    cluster: &dyn Cluster,
    db: &dyn DbHandle,
) {
    // Step 1.
    if pages < checkpoint_threshold {
        return;
    }

    // Step 2.
    let mx_frame = wal.mx_frame();

    // Step 3.
    for slot in 1..wal.reader_slots() {
        let read_mark = wal.read_mark(slot);
        if mx_frame <= read_mark {
            continue;
        }
        match wal.try_lock_reader(slot) {
            Ok(LockOutcome::Busy) => {
                tracing::trace!(slot, mx_frame, read_mark, "reader active, postponing checkpoint");
                return;
            }
            Ok(LockOutcome::Acquired) => {
                wal.unlock_reader(slot);
            }
            Err(err) => {
                tracing::debug!(%err, slot, "failed probing reader lock, postponing checkpoint");
                return;
            }
        }
    }

    // Step 4.
    if let Err(err) = cluster.checkpoint(db) {
        tracing::debug!(%err, db_id = db.id(), "replicated checkpoint failed, ignoring");
    }
}
