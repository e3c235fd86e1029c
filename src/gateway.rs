//! The gateway itself (spec sections 2-5): admission, dispatch, the statement handlers, and the
//! streaming-query resumption protocol. One [`Gateway`] exists per client connection.

use std::sync::Arc;

use crate::cluster::Cluster;
use crate::engine::{BatchOutcome, Database, DbHandle, OpenableDatabase};
use crate::error::{Error, CODE_GENERIC};
use crate::flush::FlushSink;
use crate::options::GatewayOptions;
use crate::request::{Request, RequestKind};
use crate::response::{Response, Terminator};
use crate::slot::{Slot, SlotId};
use crate::value::decode_params;

/// Rows are batched until they'd push a response past this many encoded bytes (spec section 4.6,
/// "the body is a bounded buffer owned by the slot"). The real message-body bound belongs to the
/// wire codec (out of scope, spec section 1); this crate needs *a* concrete bound to be runnable
/// and testable, and exposes it as a constructor parameter so tests can force small batches (see
/// spec section 8, scenario 3).
pub const DEFAULT_MAX_BATCH_BYTES: usize = 4096;

/// Per-connection gateway (spec section 2). Generic over the engine implementation so the core
/// admission/dispatch/streaming logic never depends on `rusqlite` directly - only
/// `engine::rusqlite_engine::RusqliteEngine` does.
pub struct Gateway<D: OpenableDatabase> {
    client_id: u64,
    heartbeat: u64,
    cluster: Arc<dyn Cluster>,
    options: GatewayOptions,
    max_batch_bytes: usize,
    db: Option<D>,
    slots: [Slot; 2],
}

impl<D: OpenableDatabase> Gateway<D> {
    pub fn new(client_id: u64, cluster: Arc<dyn Cluster>, options: GatewayOptions) -> Self {
        Self::with_max_batch_bytes(client_id, cluster, options, DEFAULT_MAX_BATCH_BYTES)
    }

    pub fn with_max_batch_bytes(
        client_id: u64,
        cluster: Arc<dyn Cluster>,
        options: GatewayOptions,
        max_batch_bytes: usize,
    ) -> Self {
        Self {
            client_id,
            heartbeat: 0,
            cluster,
            options,
            max_batch_bytes,
            db: None,
            slots: [Slot::new(), Slot::new()],
        }
    }

    pub fn client_id(&self) -> u64 {
        self.client_id
    }

    pub fn last_heartbeat(&self) -> u64 {
        self.heartbeat
    }

    fn slot(&self, id: SlotId) -> &Slot {
        &self.slots[id as usize]
    }

    fn slot_mut(&mut self, id: SlotId) -> &mut Slot {
        &mut self.slots[id as usize]
    }

    /// spec section 4.1, `accept`.
    pub fn accept(&self, kind: RequestKind) -> bool {
        self.slot(kind.slot()).is_idle()
    }

    /// spec section 4.1, `submit`. The only error path that ever escapes a handler (spec section
    /// 7): admission refusal, which never touches a slot.
    pub fn submit(&mut self, request: Request, flush: &mut dyn FlushSink) -> Result<(), Error> {
        let kind = request.kind();
        if !self.accept(kind) {
            return Err(Error::ConcurrentRequestLimitExceeded);
        }

        let slot_id = kind.slot();
        self.slot_mut(slot_id).occupy(request);
        self.dispatch(slot_id);
        flush.flush(self.slot(slot_id).response());
        Ok(())
    }

    /// spec section 4.6, "Resumption protocol". Called by the I/O layer once it has finished
    /// transmitting the response that occupied `slot_id`.
    pub fn flushed(&mut self, slot_id: SlotId, flush: &mut dyn FlushSink) {
        self.slot_mut(slot_id).set_response(Response::reset());

        match self.slot(slot_id).resumable_stmt() {
            Some(stmt_id) => {
                let db_id = self.db.as_ref().map(DbHandle::id).unwrap_or_default();
                let response = self.query_batch(slot_id, db_id, stmt_id);
                self.slot_mut(slot_id).set_response(response);
                flush.flush(self.slot(slot_id).response());
            }
            None => self.slot_mut(slot_id).release(),
        }
    }

    fn dispatch(&mut self, slot_id: SlotId) {
        // Cloned rather than borrowed: handlers need `&mut self` while the match scrutinee would
        // otherwise hold an immutable borrow of the same slot for its whole body.
        let request = self.slot(slot_id).request().clone();

        let response = match request {
            Request::Leader => self.handle_leader(),
            Request::Client => self.handle_client(),
            Request::Heartbeat { timestamp } => self.handle_heartbeat(timestamp),
            Request::Open { name, flags } => self.handle_open(&name, flags),
            Request::Prepare { db_id, sql } => self.handle_prepare(db_id, &sql),
            Request::Exec {
                db_id,
                stmt_id,
                params,
            } => self.handle_exec(db_id, stmt_id, &params),
            Request::Query {
                db_id,
                stmt_id,
                params,
            } => self.handle_query(slot_id, db_id, stmt_id, &params),
            Request::Finalize { db_id, stmt_id } => self.handle_finalize(db_id, stmt_id),
            Request::ExecSql {
                db_id,
                sql,
                params,
            } => self.handle_exec_sql(db_id, &sql, &params),
            Request::QuerySql {
                db_id,
                sql,
                params,
            } => self.handle_query_sql(slot_id, db_id, &sql, &params),
            Request::Interrupt => self.handle_interrupt(),
            Request::Unknown(kind) => Error::UnknownRequestKind(kind).into(),
        };

        self.slot_mut(slot_id).set_response(response);
    }

    // -- control handlers (spec section 4.3) -------------------------------------------------

    fn handle_leader(&self) -> Response {
        match self.cluster.leader() {
            Some(address) => Response::Server { address },
            None => Error::NoLeader.into(),
        }
    }

    fn handle_client(&self) -> Response {
        Response::Welcome {
            heartbeat_timeout: self.options.heartbeat_timeout,
        }
    }

    fn handle_heartbeat(&mut self, timestamp: u64) -> Response {
        match self.cluster.servers() {
            Ok(servers) => {
                self.heartbeat = timestamp;
                Response::Servers { servers }
            }
            Err(err) => Error::Servers(err).into(),
        }
    }

    fn handle_interrupt(&mut self) -> Response {
        // Real interruption of a running engine step is delegated to the engine's own interrupt
        // primitive (spec section 5, "Cancellation"); there is nothing further for the core to
        // do here, in-flight or not.
        Response::Empty
    }

    // -- database lifecycle (spec section 4.4) -----------------------------------------------

    fn handle_open(&mut self, name: &str, flags: u32) -> Response {
        if self.db.is_some() {
            return Error::DatabaseAlreadyOpen.into();
        }

        let mut db = match D::open(name, flags, &self.options) {
            Ok(db) => db,
            Err(err) => return Response::failure(err.code, err.message),
        };

        db.install_checkpoint_hook(self.cluster.clone(), self.options.checkpoint_threshold);

        let id = db.id();
        self.cluster.register(&db);
        self.db = Some(db);

        Response::Db { id }
    }

    fn db_mut(&mut self, db_id: u32) -> Result<&mut D, Error> {
        match self.db.as_mut() {
            Some(db) if db.id() == db_id => Ok(db),
            _ => Err(Error::NoSuchDatabase(db_id)),
        }
    }

    fn barrier(&self) -> Result<(), Error> {
        self.cluster.barrier().map_err(Error::Barrier)
    }

    // -- statement handlers (spec section 4.5) -----------------------------------------------

    fn handle_prepare(&mut self, db_id: u32, sql: &str) -> Response {
        if let Err(err) = self.barrier() {
            return err.into();
        }
        let db = match self.db_mut(db_id) {
            Ok(db) => db,
            Err(err) => return err.into(),
        };
        match db.prepare(sql) {
            Ok(Some((stmt_id, params, _tail))) => Response::Stmt {
                db_id,
                stmt_id,
                params,
            },
            Ok(None) => Response::failure(
                CODE_GENERIC,
                "no statement to prepare (empty SQL text)",
            ),
            Err(err) => Response::failure(err.code, err.message),
        }
    }

    fn handle_exec(&mut self, db_id: u32, stmt_id: u32, params_bytes: &[u8]) -> Response {
        if let Err(err) = self.barrier() {
            return err.into();
        }
        let db = match self.db_mut(db_id) {
            Ok(db) => db,
            Err(err) => return err.into(),
        };
        let stmt = match db.statement_mut(stmt_id) {
            Some(stmt) => stmt,
            None => return Error::NoSuchStatement(stmt_id).into(),
        };
        let params = match decode_params(params_bytes) {
            Ok(params) => params,
            Err(err) => return Response::failure(CODE_GENERIC, err.to_string()),
        };
        if let Err(err) = stmt.bind(&params) {
            return Response::failure(err.code, err.message);
        }
        match stmt.exec() {
            Ok(result) => Response::Result {
                last_insert_id: result.last_insert_id,
                rows_affected: result.rows_affected,
            },
            Err(err) => Response::failure(err.code, err.message),
        }
    }

    fn handle_query(
        &mut self,
        slot_id: SlotId,
        db_id: u32,
        stmt_id: u32,
        params_bytes: &[u8],
    ) -> Response {
        if let Err(err) = self.barrier() {
            return err.into();
        }
        let db = match self.db_mut(db_id) {
            Ok(db) => db,
            Err(err) => return err.into(),
        };
        let stmt = match db.statement_mut(stmt_id) {
            Some(stmt) => stmt,
            None => return Error::NoSuchStatement(stmt_id).into(),
        };
        let params = match decode_params(params_bytes) {
            Ok(params) => params,
            Err(err) => return Response::failure(CODE_GENERIC, err.to_string()),
        };
        if let Err(err) = stmt.bind(&params) {
            return Response::failure(err.code, err.message);
        }
        self.query_batch(slot_id, db_id, stmt_id)
    }

    fn handle_finalize(&mut self, db_id: u32, stmt_id: u32) -> Response {
        if let Err(err) = self.barrier() {
            return err.into();
        }
        let db = match self.db_mut(db_id) {
            Ok(db) => db,
            Err(err) => return err.into(),
        };
        if db.statement_mut(stmt_id).is_none() {
            return Error::NoSuchStatement(stmt_id).into();
        }
        match db.finalize(stmt_id) {
            Ok(()) => Response::Empty,
            Err(err) => Response::failure(err.code, err.message),
        }
    }

    /// Bind parameters apply only to the first statement of a multi-statement batch: matches
    /// the source's literal behavior (see DESIGN.md's Open Question log) rather than re-applying
    /// them to every statement. Unlike the source, each intermediate statement is finalized as
    /// soon as it's done rather than only the last one - see DESIGN.md for why.
    fn handle_exec_sql(&mut self, db_id: u32, sql: &str, params_bytes: &[u8]) -> Response {
        if let Err(err) = self.barrier() {
            return err.into();
        }
        let db = match self.db_mut(db_id) {
            Ok(db) => db,
            Err(err) => return err.into(),
        };
        let params = match decode_params(params_bytes) {
            Ok(params) => params,
            Err(err) => return Response::failure(CODE_GENERIC, err.to_string()),
        };

        let mut response = Response::Empty;
        let mut remaining = Some(sql.to_string());
        let mut first = true;

        while let Some(text) = remaining.take() {
            let text = text.trim();
            if text.is_empty() {
                break;
            }

            let (stmt_id, _param_count, tail) = match db.prepare(text) {
                Ok(Some(value)) => value,
                // Whitespace/comment-only tail: matches the source's `stmt->stmt == NULL` case
                // in `dqlite__gateway_exec_sql`, which stops the batch and keeps whatever result
                // the last successfully executed statement produced, rather than failing.
                Ok(None) => break,
                Err(err) => return Response::failure(err.code, err.message),
            };

            if first {
                first = false;
                let stmt = db
                    .statement_mut(stmt_id)
                    .expect("statement was just prepared");
                if let Err(err) = stmt.bind(&params) {
                    let _ = db.finalize(stmt_id);
                    return Response::failure(err.code, err.message);
                }
            }

            let stmt = db
                .statement_mut(stmt_id)
                .expect("statement was just prepared");
            let result = stmt.exec();
            let _ = db.finalize(stmt_id);

            match result {
                Ok(result) => {
                    response = Response::Result {
                        last_insert_id: result.last_insert_id,
                        rows_affected: result.rows_affected,
                    };
                }
                Err(err) => return Response::failure(err.code, err.message),
            }

            remaining = tail;
        }

        response
    }

    /// Ownership of the prepared statement follows the same rules as `query`: it stays in the
    /// db's registry, addressable by the streaming resumption path, until the client explicitly
    /// finalizes it (spec section 4.5).
    fn handle_query_sql(
        &mut self,
        slot_id: SlotId,
        db_id: u32,
        sql: &str,
        params_bytes: &[u8],
    ) -> Response {
        if let Err(err) = self.barrier() {
            return err.into();
        }
        let db = match self.db_mut(db_id) {
            Ok(db) => db,
            Err(err) => return err.into(),
        };
        let (stmt_id, _param_count, _tail) = match db.prepare(sql) {
            Ok(Some(value)) => value,
            Ok(None) => {
                return Response::failure(
                    CODE_GENERIC,
                    "no statement to prepare (empty SQL text)",
                )
            }
            Err(err) => return Response::failure(err.code, err.message),
        };
        let params = match decode_params(params_bytes) {
            Ok(params) => params,
            Err(err) => return Response::failure(CODE_GENERIC, err.to_string()),
        };
        let stmt = db
            .statement_mut(stmt_id)
            .expect("statement was just prepared");
        if let Err(err) = stmt.bind(&params) {
            return Response::failure(err.code, err.message);
        }
        self.query_batch(slot_id, db_id, stmt_id)
    }

    // -- query-batch and streaming (spec section 4.6) ----------------------------------------

    fn query_batch(&mut self, slot_id: SlotId, db_id: u32, stmt_id: u32) -> Response {
        let max_batch_bytes = self.max_batch_bytes;
        let db = match self.db_mut(db_id) {
            Ok(db) => db,
            Err(err) => {
                self.slot_mut(slot_id).set_resumable_stmt(None);
                return err.into();
            }
        };
        let stmt = match db.statement_mut(stmt_id) {
            Some(stmt) => stmt,
            None => {
                self.slot_mut(slot_id).set_resumable_stmt(None);
                return Error::NoSuchStatement(stmt_id).into();
            }
        };

        match stmt.query_batch(max_batch_bytes) {
            Ok(BatchOutcome::RowAvailable(rows)) => {
                self.slot_mut(slot_id).set_resumable_stmt(Some(stmt_id));
                Response::Rows {
                    rows,
                    terminator: Terminator::Part,
                }
            }
            Ok(BatchOutcome::Done(rows)) => {
                self.slot_mut(slot_id).set_resumable_stmt(None);
                Response::Rows {
                    rows,
                    terminator: Terminator::Done,
                }
            }
            Err(err) => {
                self.slot_mut(slot_id).set_resumable_stmt(None);
                Response::failure(err.code, err.message)
            }
        }
    }
}

impl<D: OpenableDatabase> Drop for Gateway<D> {
    fn drop(&mut self) {
        tracing::trace!(client_id = self.client_id, "closing gateway connection");
    }
}
