//! The flush callback (spec sections 4.2, 6): the gateway's only way of announcing a completed
//! response to the connection's I/O layer. The I/O layer itself - reading requests off the wire
//! and writing responses back - is out of scope (spec section 1); this trait is the seam.

use crate::response::Response;

/// The Rust shape of `xFlush(ctx, response)`. Implementations are expected to serialize and
/// transmit `response`, then eventually call [`crate::gateway::Gateway::flushed`] to release (or,
/// for a partial query, resume) the slot that produced it.
pub trait FlushSink {
    fn flush(&mut self, response: &Response);
}
