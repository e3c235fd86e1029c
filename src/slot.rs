//! Request slots (spec section 3): the two fixed in-flight-request cells a gateway admits
//! against. Slot 0 ("data") takes every database-affecting request; slot 1 ("control") takes
//! heartbeat and interrupt. A request kind always maps to the same slot (spec section 4.1).

use crate::request::Request;
use crate::response::Response;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotId {
    Data = 0,
    Control = 1,
}

/// One request slot. Mirrors `struct dqlite__gateway_ctx`: a request reference, a reusable
/// response buffer, and - for slot 0 only - an optional resumable statement.
pub struct Slot {
    request: Option<Request>,
    response: Response,
    /// Id of the statement a partially-delivered query is resuming from, if any. Only ever set
    /// on the data slot, and only when the most recent response on that slot was a partial row
    /// batch (spec section 3's invariant).
    resumable_stmt: Option<u32>,
}

impl Slot {
    pub fn new() -> Self {
        Self {
            request: None,
            response: Response::reset(),
            resumable_stmt: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.request.is_none()
    }

    pub fn occupy(&mut self, request: Request) {
        self.request = Some(request);
    }

    pub fn request(&self) -> &Request {
        self.request
            .as_ref()
            .expect("occupied slot always holds a request")
    }

    pub fn response(&self) -> &Response {
        &self.response
    }

    pub fn set_response(&mut self, response: Response) {
        self.response = response;
    }

    pub fn resumable_stmt(&self) -> Option<u32> {
        self.resumable_stmt
    }

    pub fn set_resumable_stmt(&mut self, stmt_id: Option<u32>) {
        self.resumable_stmt = stmt_id;
    }

    /// Release the slot, dropping the request it held (spec section 4.6, resumption protocol:
    /// "otherwise clears the slot's current request, making it idle").
    pub fn release(&mut self) {
        self.request = None;
        self.resumable_stmt = None;
    }
}

impl Default for Slot {
    fn default() -> Self {
        Self::new()
    }
}
