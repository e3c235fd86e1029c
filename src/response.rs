//! Response kinds (spec section 6) and the terminator used by streamed `rows` responses.

use crate::cluster::ServerInfo;
use crate::error::Code;
use crate::value::Row;

/// Whether a `rows` response is the last batch for its query (spec section 4.6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Terminator {
    Part = 0,
    Done = 1,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Failure { code: Code, message: String },
    Server { address: String },
    Servers { servers: Vec<ServerInfo> },
    Welcome { heartbeat_timeout: u32 },
    Db { id: u32 },
    Stmt { db_id: u32, stmt_id: u32, params: u32 },
    Result { last_insert_id: i64, rows_affected: u64 },
    Rows { rows: Vec<Row>, terminator: Terminator },
    Empty,
}

impl Response {
    /// Placeholder value a slot is initialized with and reset to between requests (spec section
    /// 3, "Response object ... owns any heap-allocated strings it references ... After flush,
    /// the gateway resets these fields before reusing the buffer"). In Rust the reset is just
    /// replacing the value - any owned `String`/`Vec` payload from the previous response is
    /// dropped at that point, which is the same discipline without a manual free step.
    pub fn reset() -> Response {
        Response::Empty
    }

    pub fn failure(code: Code, message: impl Into<String>) -> Response {
        Response::Failure {
            code,
            message: message.into(),
        }
    }
}

impl From<crate::error::Error> for Response {
    fn from(err: crate::error::Error) -> Self {
        let code = err.code();
        Response::failure(code, err.to_string())
    }
}
