//! Client request kinds (spec sections 4.3-4.5, 6).
//!
//! Parsing wire bytes into these values is the wire codec's job and out of scope for this crate
//! (spec section 1); a `Request` here is already a fully decoded value, owned by the I/O layer,
//! that the gateway only ever borrows for the duration of a single [`Gateway::submit`]
//! (spec section 3, "Request objects are owned by the I/O layer; the gateway never outlives a
//! request it references").

/// Bit flags passed to the engine's `open`, mirroring SQLite's own `SQLITE_OPEN_*` flags.
pub mod open_flags {
    pub const READ_ONLY: u32 = 0x01;
    pub const READ_WRITE: u32 = 0x02;
    pub const CREATE: u32 = 0x04;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    Leader,
    Client,
    Heartbeat,
    Open,
    Prepare,
    Exec,
    Query,
    Finalize,
    ExecSql,
    QuerySql,
    Interrupt,
    /// Not a real request kind; stands in for whatever numeric type the wire codec could not
    /// map to one of the above (spec section 4.2, "Unknown request kind").
    Unknown,
}

impl RequestKind {
    /// Which slot (spec section 3) a request of this kind is always dispatched to.
    pub fn slot(self) -> crate::slot::SlotId {
        use crate::slot::SlotId;
        match self {
            RequestKind::Heartbeat | RequestKind::Interrupt => SlotId::Control,
            _ => SlotId::Data,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Request {
    Leader,
    Client,
    Heartbeat { timestamp: u64 },
    Open {
        name: String,
        flags: u32,
    },
    Prepare {
        db_id: u32,
        sql: String,
    },
    Exec {
        db_id: u32,
        stmt_id: u32,
        params: Vec<u8>,
    },
    Query {
        db_id: u32,
        stmt_id: u32,
        params: Vec<u8>,
    },
    Finalize {
        db_id: u32,
        stmt_id: u32,
    },
    ExecSql {
        db_id: u32,
        sql: String,
        params: Vec<u8>,
    },
    QuerySql {
        db_id: u32,
        sql: String,
        params: Vec<u8>,
    },
    Interrupt,
    /// Carries the raw numeric kind the wire codec could not recognize, purely so the dispatcher
    /// can name it in the generic-error message (spec section 4.2).
    Unknown(u32),
}

impl Request {
    pub fn kind(&self) -> RequestKind {
        match self {
            Request::Leader => RequestKind::Leader,
            Request::Client => RequestKind::Client,
            Request::Heartbeat { .. } => RequestKind::Heartbeat,
            Request::Open { .. } => RequestKind::Open,
            Request::Prepare { .. } => RequestKind::Prepare,
            Request::Exec { .. } => RequestKind::Exec,
            Request::Query { .. } => RequestKind::Query,
            Request::Finalize { .. } => RequestKind::Finalize,
            Request::ExecSql { .. } => RequestKind::ExecSql,
            Request::QuerySql { .. } => RequestKind::QuerySql,
            Request::Interrupt => RequestKind::Interrupt,
            Request::Unknown(_) => RequestKind::Unknown,
        }
    }
}
