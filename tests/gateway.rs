//! End-to-end exercises against `Gateway<RusqliteEngine>` backed by a real, temp-file SQLite
//! database, covering spec section 8's testable properties.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::tempdir;

use sqld_gateway::cluster::{Cluster, ServerInfo};
use sqld_gateway::engine::DbHandle;
use sqld_gateway::error::EngineError;
use sqld_gateway::request::{open_flags, Request};
use sqld_gateway::response::{Response, Terminator};
use sqld_gateway::value::{encode_params, Value};
use sqld_gateway::{FlushSink, Gateway, GatewayOptions, RusqliteEngine, SlotId};

/// A cluster stub with a fixed leader/membership and no real consensus, so tests can run without
/// a second node.
struct FakeCluster {
    leader: Mutex<Option<String>>,
    servers: Mutex<Vec<ServerInfo>>,
    barrier_ok: AtomicBool,
    registered: Mutex<Vec<u32>>,
    checkpoints: Mutex<Vec<u32>>,
}

impl FakeCluster {
    fn new() -> Self {
        Self {
            leader: Mutex::new(Some("node1:9000".to_string())),
            servers: Mutex::new(vec![ServerInfo {
                id: 1,
                address: "node1:9000".to_string(),
            }]),
            barrier_ok: AtomicBool::new(true),
            registered: Mutex::new(Vec::new()),
            checkpoints: Mutex::new(Vec::new()),
        }
    }
}

impl Cluster for FakeCluster {
    fn leader(&self) -> Option<String> {
        self.leader.lock().unwrap().clone()
    }

    fn servers(&self) -> Result<Vec<ServerInfo>, EngineError> {
        Ok(self.servers.lock().unwrap().clone())
    }

    fn register(&self, db: &dyn DbHandle) {
        self.registered.lock().unwrap().push(db.id());
    }

    fn barrier(&self) -> Result<(), EngineError> {
        if self.barrier_ok.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EngineError::new(1, "no quorum"))
        }
    }

    fn checkpoint(&self, db: &dyn DbHandle) -> Result<(), EngineError> {
        self.checkpoints.lock().unwrap().push(db.id());
        Ok(())
    }
}

/// Collects every response handed to it, in order, the way a real connection's write buffer
/// would - but without any actual I/O.
#[derive(Default)]
struct CollectingSink {
    responses: Vec<Response>,
}

impl FlushSink for CollectingSink {
    fn flush(&mut self, response: &Response) {
        self.responses.push(response.clone());
    }
}

impl CollectingSink {
    fn last(&self) -> &Response {
        self.responses.last().expect("at least one flush")
    }
}

fn new_gateway(cluster: Arc<FakeCluster>) -> Gateway<RusqliteEngine> {
    Gateway::new(1, cluster, GatewayOptions::default())
}

fn open_memory_db(gw: &mut Gateway<RusqliteEngine>, sink: &mut CollectingSink) -> u32 {
    gw.submit(
        Request::Open {
            name: ":memory:".to_string(),
            flags: open_flags::READ_WRITE | open_flags::CREATE,
        },
        sink,
    )
    .unwrap();
    match sink.last() {
        Response::Db { id } => *id,
        other => panic!("expected Db response, got {other:?}"),
    }
}

#[test]
fn leader_reflects_cluster_state() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    gw.submit(Request::Leader, &mut sink).unwrap();
    assert_eq!(
        *sink.last(),
        Response::Server {
            address: "node1:9000".to_string()
        }
    );
}

#[test]
fn client_echoes_configured_heartbeat_timeout() {
    let cluster = Arc::new(FakeCluster::new());
    let options = GatewayOptions {
        heartbeat_timeout: 42,
        ..GatewayOptions::default()
    };
    let mut gw = Gateway::new(1, cluster, options);
    let mut sink = CollectingSink::default();
    gw.submit(Request::Client, &mut sink).unwrap();
    assert_eq!(
        *sink.last(),
        Response::Welcome {
            heartbeat_timeout: 42
        }
    );
}

#[test]
fn heartbeat_updates_last_seen_and_lists_servers() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    gw.submit(Request::Heartbeat { timestamp: 123 }, &mut sink)
        .unwrap();
    assert_eq!(gw.last_heartbeat(), 123);
    match sink.last() {
        Response::Servers { servers } => assert_eq!(servers.len(), 1),
        other => panic!("expected Servers response, got {other:?}"),
    }
}

#[test]
fn a_second_open_on_the_same_connection_is_rejected() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    open_memory_db(&mut gw, &mut sink);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::Open {
            name: ":memory:".to_string(),
            flags: open_flags::READ_WRITE | open_flags::CREATE,
        },
        &mut sink,
    )
    .unwrap();
    match sink.last() {
        Response::Failure { .. } => {}
        other => panic!("expected Failure response, got {other:?}"),
    }
}

#[test]
fn prepare_exec_and_query_round_trip_through_a_real_table() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    let db_id = open_memory_db(&mut gw, &mut sink);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::ExecSql {
            db_id,
            sql: "create table t (id integer primary key, name text)".to_string(),
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    assert!(matches!(sink.last(), Response::Result { .. }));
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::Prepare {
            db_id,
            sql: "insert into t (name) values (?)".to_string(),
        },
        &mut sink,
    )
    .unwrap();
    let stmt_id = match sink.last() {
        Response::Stmt { stmt_id, params, .. } => {
            assert_eq!(*params, 1);
            *stmt_id
        }
        other => panic!("expected Stmt response, got {other:?}"),
    };
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::Exec {
            db_id,
            stmt_id,
            params: encode_params(&[Value::Text("alice".to_string())]),
        },
        &mut sink,
    )
    .unwrap();
    match sink.last() {
        Response::Result { rows_affected, .. } => assert_eq!(*rows_affected, 1),
        other => panic!("expected Result response, got {other:?}"),
    }
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::Prepare {
            db_id,
            sql: "select id, name from t".to_string(),
        },
        &mut sink,
    )
    .unwrap();
    let query_stmt_id = match sink.last() {
        Response::Stmt { stmt_id, .. } => *stmt_id,
        other => panic!("expected Stmt response, got {other:?}"),
    };
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::Query {
            db_id,
            stmt_id: query_stmt_id,
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    match sink.last() {
        Response::Rows { rows, terminator } => {
            assert_eq!(*terminator, Terminator::Done);
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].values[1], Value::Text("alice".to_string()));
        }
        other => panic!("expected Rows response, got {other:?}"),
    }
}

#[test]
fn a_large_result_set_streams_across_multiple_flushes_and_resumes() {
    let cluster = Arc::new(FakeCluster::new());
    // Force a tiny batch bound so a handful of rows already spans more than one batch.
    let mut gw =
        Gateway::with_max_batch_bytes(1, cluster, GatewayOptions::default(), 40);
    let mut sink = CollectingSink::default();
    let db_id = open_memory_db(&mut gw, &mut sink);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::ExecSql {
            db_id,
            sql: "create table t (n integer)".to_string(),
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    gw.flushed(SlotId::Data, &mut sink);
    for n in 0..20 {
        gw.submit(
            Request::ExecSql {
                db_id,
                sql: "insert into t (n) values (?)".to_string(),
                params: encode_params(&[Value::Integer(n)]),
            },
            &mut sink,
        )
        .unwrap();
        gw.flushed(SlotId::Data, &mut sink);
    }

    gw.submit(
        Request::QuerySql {
            db_id,
            sql: "select n from t order by n".to_string(),
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    assert!(matches!(
        sink.last(),
        Response::Rows {
            terminator: Terminator::Part,
            ..
        }
    ));

    // The data slot is occupied by the partial batch; a second query request must be refused.
    let result = gw.submit(
        Request::QuerySql {
            db_id,
            sql: "select n from t".to_string(),
            params: Vec::new(),
        },
        &mut sink,
    );
    assert!(result.is_err());

    let mut total_rows = 0;
    loop {
        let (row_count, terminator) = match sink.responses.last().unwrap() {
            Response::Rows { rows, terminator } => (rows.len(), *terminator),
            other => panic!("expected Rows response, got {other:?}"),
        };
        total_rows += row_count;
        gw.flushed(SlotId::Data, &mut sink);
        if terminator == Terminator::Done {
            break;
        }
    }
    assert_eq!(total_rows, 20);

    // Slot is idle again now that the stream is done and its final flush has been acknowledged.
    assert!(gw.accept(sqld_gateway::request::RequestKind::Query));
}

#[test]
fn finalize_forgets_a_statement() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    let db_id = open_memory_db(&mut gw, &mut sink);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::Prepare {
            db_id,
            sql: "select 1".to_string(),
        },
        &mut sink,
    )
    .unwrap();
    let stmt_id = match sink.last() {
        Response::Stmt { stmt_id, .. } => *stmt_id,
        other => panic!("expected Stmt response, got {other:?}"),
    };
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(Request::Finalize { db_id, stmt_id }, &mut sink)
        .unwrap();
    assert_eq!(*sink.last(), Response::Empty);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::Exec {
            db_id,
            stmt_id,
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    assert!(matches!(sink.last(), Response::Failure { .. }));
}

#[test]
fn a_consensus_barrier_failure_surfaces_as_a_failure_response_not_an_error() {
    let cluster = Arc::new(FakeCluster::new());
    cluster.barrier_ok.store(false, Ordering::SeqCst);
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    let db_id = open_memory_db(&mut gw, &mut sink);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::Prepare {
            db_id,
            sql: "select 1".to_string(),
        },
        &mut sink,
    )
    .unwrap();
    assert!(matches!(sink.last(), Response::Failure { .. }));
}

#[test]
fn exec_sql_runs_every_statement_in_a_batch_and_only_binds_the_first() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    let db_id = open_memory_db(&mut gw, &mut sink);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::ExecSql {
            db_id,
            sql: "create table t (n integer)".to_string(),
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::ExecSql {
            db_id,
            sql: "insert into t (n) values (?); insert into t (n) values (99)".to_string(),
            params: encode_params(&[Value::Integer(7)]),
        },
        &mut sink,
    )
    .unwrap();
    assert!(matches!(sink.last(), Response::Result { .. }));
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::QuerySql {
            db_id,
            sql: "select n from t order by n".to_string(),
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    match sink.last() {
        Response::Rows { rows, terminator } => {
            assert_eq!(*terminator, Terminator::Done);
            assert_eq!(rows.len(), 2);
            assert_eq!(rows[0].values[0], Value::Integer(7));
            assert_eq!(rows[1].values[0], Value::Integer(99));
        }
        other => panic!("expected Rows response, got {other:?}"),
    }
}

/// A trailing comment-only statement yields a null prepared statement from the engine, which
/// `exec_sql` must treat as the end of the batch rather than a failure (spec section 4.5;
/// `examples/original_source/src/gateway.c`'s `stmt->stmt == NULL` / `goto out` case).
#[test]
fn exec_sql_stops_cleanly_at_a_trailing_comment() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    let db_id = open_memory_db(&mut gw, &mut sink);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::ExecSql {
            db_id,
            sql: "create table t (x integer); -- done".to_string(),
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    match sink.last() {
        Response::Result { rows_affected, .. } => assert_eq!(*rows_affected, 0),
        other => panic!("expected Result response, got {other:?}"),
    }
}

#[test]
fn an_unrecognized_request_kind_is_reported_generically() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    gw.submit(Request::Unknown(255), &mut sink).unwrap();
    assert!(matches!(sink.last(), Response::Failure { .. }));
}

#[test]
fn open_registers_the_new_database_with_the_cluster() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster.clone());
    let mut sink = CollectingSink::default();
    let db_id = open_memory_db(&mut gw, &mut sink);
    assert_eq!(*cluster.registered.lock().unwrap(), vec![db_id]);
}

/// Spec section 8, round-trip property: "open then close then open again (after reinit)
/// reproduces the same db id (0) and the same initial state." A gateway's `db` only ever closes
/// by dropping the whole gateway (spec section 3, "Lifecycle"), so "close" here means dropping
/// and recreating the gateway against the same on-disk file.
#[test]
fn reopening_a_database_across_gateway_lifetimes_reproduces_the_same_db_id() {
    let _ = tracing_subscriber::fmt::try_init();

    let dir = tempdir().unwrap();
    let db_path = dir.path().join("reopen.db");
    let cluster = Arc::new(FakeCluster::new());

    let first_id = {
        let mut gw = new_gateway(cluster.clone());
        let mut sink = CollectingSink::default();
        gw.submit(
            Request::Open {
                name: db_path.to_str().unwrap().to_string(),
                flags: open_flags::READ_WRITE | open_flags::CREATE,
            },
            &mut sink,
        )
        .unwrap();
        let id = match sink.last() {
            Response::Db { id } => *id,
            other => panic!("expected Db response, got {other:?}"),
        };
        gw.flushed(SlotId::Data, &mut sink);
        gw.submit(
            Request::ExecSql {
                db_id: id,
                sql: "create table t (n integer)".to_string(),
                params: Vec::new(),
            },
            &mut sink,
        )
        .unwrap();
        assert!(matches!(sink.last(), Response::Result { .. }));
        id
        // `gw` is dropped here, closing the database.
    };

    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    gw.submit(
        Request::Open {
            name: db_path.to_str().unwrap().to_string(),
            flags: open_flags::READ_WRITE | open_flags::CREATE,
        },
        &mut sink,
    )
    .unwrap();
    let second_id = match sink.last() {
        Response::Db { id } => *id,
        other => panic!("expected Db response, got {other:?}"),
    };
    assert_eq!(first_id, second_id);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::QuerySql {
            db_id: second_id,
            sql: "select count(*) from t".to_string(),
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    match sink.last() {
        Response::Rows { rows, terminator } => {
            assert_eq!(*terminator, Terminator::Done);
            assert_eq!(rows[0].values[0], Value::Integer(0));
        }
        other => panic!("expected Rows response, got {other:?}"),
    }
}

/// Spec section 8, round-trip property: "exec_sql of \"\" is accepted and produces an empty
/// response with no engine interaction."
#[test]
fn exec_sql_of_empty_string_is_a_no_op() {
    let cluster = Arc::new(FakeCluster::new());
    let mut gw = new_gateway(cluster);
    let mut sink = CollectingSink::default();
    let db_id = open_memory_db(&mut gw, &mut sink);
    gw.flushed(SlotId::Data, &mut sink);

    gw.submit(
        Request::ExecSql {
            db_id,
            sql: String::new(),
            params: Vec::new(),
        },
        &mut sink,
    )
    .unwrap();
    assert_eq!(*sink.last(), Response::Empty);
}
