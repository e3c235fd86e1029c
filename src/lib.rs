//! A per-connection request gateway for a replicated SQL service.
//!
//! Mirrors the role dqlite's `gateway.c` plays in that project: one [`gateway::Gateway`] per
//! client connection, admitting requests into one of two fixed slots, dispatching them to the
//! embedded SQL engine behind a consensus barrier, and streaming query results back in bounded
//! batches with an explicit resumption protocol. The wire codec, the engine itself, and the
//! consensus/replication layer are all out of scope (see `SPEC_FULL.md` section 1); this crate
//! defines the trait boundaries to each (`engine`, `cluster`, `flush`) and ships one concrete,
//! `rusqlite`-backed engine so the whole thing is runnable and testable end to end.

pub mod checkpoint;
pub mod cluster;
pub mod engine;
pub mod error;
pub mod flush;
pub mod gateway;
pub mod options;
pub mod request;
pub mod response;
pub mod slot;
pub mod value;

pub use cluster::{Cluster, ServerInfo};
pub use engine::{Database, DbHandle, OpenableDatabase, RusqliteEngine, Statement};
pub use error::{Error, EngineError};
pub use flush::FlushSink;
pub use gateway::Gateway;
pub use options::GatewayOptions;
pub use request::{Request, RequestKind};
pub use response::{Response, Terminator};
pub use slot::SlotId;
pub use value::{Row, Value};
