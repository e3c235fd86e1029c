//! Error types for the gateway.
//!
//! Every handler converts failures into a [`Response::Failure`](crate::response::Response::Failure)
//! on the occupied slot; the only error that ever escapes a handler and reaches the caller of
//! [`Gateway::submit`](crate::gateway::Gateway::submit) is [`Error::ConcurrentRequestLimitExceeded`],
//! which is the sole admission-refusal path described in spec section 7.

/// Numeric error code carried on a failure response.
///
/// Mirrors dqlite's choice of reusing SQLite's own result codes for everything that isn't a
/// protocol-level admission error, so a `Code` is "drawn from the engine's and cluster's code
/// space plus the protocol kind for admission errors" (spec section 6).
pub type Code = i32;

/// `SQLITE_ERROR` - generic / unknown request kind.
pub const CODE_GENERIC: Code = rusqlite::ffi::SQLITE_ERROR;
/// `SQLITE_BUSY` - a second `open` while a database is already open.
pub const CODE_BUSY: Code = rusqlite::ffi::SQLITE_BUSY;
/// `SQLITE_NOTFOUND` - unknown db id or stmt id.
pub const CODE_NOT_FOUND: Code = rusqlite::ffi::SQLITE_NOTFOUND;
/// `SQLITE_NOMEM` - the allocation-style failure used for a missing cluster leader.
pub const CODE_NOMEM: Code = rusqlite::ffi::SQLITE_NOMEM;
/// Not an actual SQLite code; used only for the admission-refusal path, which never reaches a
/// response (it aborts `submit` before a slot is touched).
pub const CODE_PROTOCOL: Code = -1;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("concurrent request limit exceeded")]
    ConcurrentRequestLimitExceeded,

    #[error("a database for this connection is already open")]
    DatabaseAlreadyOpen,

    #[error("no db with id {0}")]
    NoSuchDatabase(u32),

    #[error("no stmt with id {0}")]
    NoSuchStatement(u32),

    #[error("failed to get cluster leader")]
    NoLeader,

    #[error("failed to get cluster servers")]
    Servers(#[source] EngineError),

    #[error("raft barrier failed")]
    Barrier(#[source] EngineError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("invalid request type {0}")]
    UnknownRequestKind(u32),
}

impl Error {
    /// The code to stamp on a `Response::Failure` produced from this error.
    pub fn code(&self) -> Code {
        match self {
            Error::ConcurrentRequestLimitExceeded => CODE_PROTOCOL,
            Error::DatabaseAlreadyOpen => CODE_BUSY,
            Error::NoSuchDatabase(_) | Error::NoSuchStatement(_) => CODE_NOT_FOUND,
            Error::NoLeader => CODE_NOMEM,
            Error::Servers(e) | Error::Barrier(e) => e.code,
            Error::Engine(e) => e.code,
            Error::UnknownRequestKind(_) => CODE_GENERIC,
        }
    }
}

/// An error surfaced by the engine collaborator (see spec section 6, "Engine collaborator").
///
/// Carries the engine's own code alongside human-readable text, the way `dqlite__db_prepare` /
/// `dqlite__stmt_bind` leave their message in `db->error` / `stmt->error` for the gateway to copy
/// into its own error buffer.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct EngineError {
    pub code: Code,
    pub message: String,
}

impl EngineError {
    pub fn new(code: Code, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl From<rusqlite::Error> for EngineError {
    fn from(err: rusqlite::Error) -> Self {
        let code = match &err {
            rusqlite::Error::SqliteFailure(e, _) => e.extended_code,
            _ => CODE_GENERIC,
        };
        EngineError::new(code, err.to_string())
    }
}
