//! A concrete, `rusqlite`-backed implementation of the [`Database`]/[`Statement`] trait family.
//!
//! This is the one place in the crate that reaches past `rusqlite`'s safe wrapper into raw
//! `sqlite3_*` calls, the same way `sqld`'s `wal_logger.rs` drops into `rusqlite::ffi` for
//! WAL-frame-level work the safe API doesn't expose. Two things force that here:
//!
//! - A prepared statement must outlive the single call that created it (it is addressed by id
//!   across later `exec`/`query`/`finalize` requests, and a streamed query resumes it across
//!   several dispatcher invocations), which `rusqlite::Statement<'conn>`'s borrow of the
//!   `Connection` does not allow when both live in the same registry. Driving `sqlite3_stmt*`
//!   directly sidesteps the self-reference instead of fighting it.
//! - The checkpoint decision procedure (spec section 4.7) needs the WAL-index shared-memory
//!   region, which is only reachable through `sqlite3_file_control`/`xShmMap`/`xShmLock` - there
//!   is no safe `rusqlite` surface for it.

use std::collections::HashMap;
use std::ffi::{c_char, c_int, c_void, CStr, CString};
use std::marker::PhantomData;
use std::ptr;
use std::sync::Arc;

use rusqlite::ffi;
use rusqlite::{Connection, OpenFlags};

use crate::checkpoint;
use crate::cluster::Cluster;
use crate::engine::{
    BatchOutcome, Database, DbHandle, ExecResult, LockOutcome, OpenableDatabase,
    Statement as StatementTrait, WalSharedMemory,
};
use crate::error::EngineError;
use crate::options::GatewayOptions;
use crate::request::open_flags;
use crate::value::{Row, Value};

/// `WAL_NREADER` in SQLite's own `wal.c`: the number of reader-mark slots in the WAL-index
/// header. Slot 0 is never checked (spec section 4.7 iterates `1..N-1`).
const WAL_NREADER: usize = 5;

/// Offset of `WalIndexHdr.mxFrame` within the (duplicated) WAL-index header.
const MX_FRAME_OFFSET: usize = 16;

/// Offset of `WalCkptInfo.aReadMark[0]`: two 48-byte header copies followed by a 4-byte
/// `nBackfill` field.
const READ_MARKS_OFFSET: usize = 2 * 48 + 4;

/// Region 0 of the WAL-index is fixed at 32KiB by SQLite regardless of how much of it is
/// actually used by the header plus read-marks.
const WAL_INDEX_REGION_SIZE: c_int = 32 * 1024;

unsafe fn db_errmsg(db: *mut ffi::sqlite3) -> String {
    let ptr = ffi::sqlite3_errmsg(db);
    if ptr.is_null() {
        "unknown sqlite error".to_string()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// One statement prepared against a [`RusqliteEngine`]'s connection, addressed by id from the
/// database's statement registry.
pub struct RawStatement {
    ptr: *mut ffi::sqlite3_stmt,
}

unsafe impl Send for RawStatement {}

impl Drop for RawStatement {
    fn drop(&mut self) {
        unsafe {
            ffi::sqlite3_finalize(self.ptr);
        }
    }
}

impl RawStatement {
    unsafe fn read_row(&self) -> Row {
        let n = ffi::sqlite3_column_count(self.ptr);
        let mut values = Vec::with_capacity(n as usize);
        for i in 0..n {
            let value = match ffi::sqlite3_column_type(self.ptr, i) {
                ffi::SQLITE_NULL => Value::Null,
                ffi::SQLITE_INTEGER => Value::Integer(ffi::sqlite3_column_int64(self.ptr, i)),
                ffi::SQLITE_FLOAT => Value::Real(ffi::sqlite3_column_double(self.ptr, i)),
                ffi::SQLITE_TEXT => {
                    let text_ptr = ffi::sqlite3_column_text(self.ptr, i);
                    let len = ffi::sqlite3_column_bytes(self.ptr, i) as usize;
                    if text_ptr.is_null() || len == 0 {
                        Value::Text(String::new())
                    } else {
                        let slice = std::slice::from_raw_parts(text_ptr, len);
                        Value::Text(String::from_utf8_lossy(slice).into_owned())
                    }
                }
                ffi::SQLITE_BLOB => {
                    let blob_ptr = ffi::sqlite3_column_blob(self.ptr, i);
                    let len = ffi::sqlite3_column_bytes(self.ptr, i) as usize;
                    if blob_ptr.is_null() || len == 0 {
                        Value::Blob(Vec::new())
                    } else {
                        let slice = std::slice::from_raw_parts(blob_ptr as *const u8, len);
                        Value::Blob(slice.to_vec())
                    }
                }
                _ => Value::Null,
            };
            values.push(value);
        }
        Row { values }
    }
}

impl StatementTrait for RawStatement {
    fn param_count(&self) -> u32 {
        unsafe { ffi::sqlite3_bind_parameter_count(self.ptr) as u32 }
    }

    fn bind(&mut self, params: &[Value]) -> Result<(), EngineError> {
        unsafe {
            ffi::sqlite3_reset(self.ptr);
            ffi::sqlite3_clear_bindings(self.ptr);
            for (i, param) in params.iter().enumerate() {
                let idx = (i + 1) as c_int;
                let rc = match param {
                    Value::Null => ffi::sqlite3_bind_null(self.ptr, idx),
                    Value::Integer(v) => ffi::sqlite3_bind_int64(self.ptr, idx, *v),
                    Value::Real(v) => ffi::sqlite3_bind_double(self.ptr, idx, *v),
                    Value::Text(s) => ffi::sqlite3_bind_text(
                        self.ptr,
                        idx,
                        s.as_ptr() as *const c_char,
                        s.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                    Value::Blob(b) => ffi::sqlite3_bind_blob(
                        self.ptr,
                        idx,
                        b.as_ptr() as *const c_void,
                        b.len() as c_int,
                        ffi::SQLITE_TRANSIENT(),
                    ),
                };
                if rc != ffi::SQLITE_OK {
                    let db = ffi::sqlite3_db_handle(self.ptr);
                    return Err(EngineError::new(rc, db_errmsg(db)));
                }
            }
        }
        Ok(())
    }

    fn exec(&mut self) -> Result<ExecResult, EngineError> {
        unsafe {
            loop {
                match ffi::sqlite3_step(self.ptr) {
                    ffi::SQLITE_ROW => continue,
                    ffi::SQLITE_DONE => break,
                    rc => {
                        let db = ffi::sqlite3_db_handle(self.ptr);
                        return Err(EngineError::new(rc, db_errmsg(db)));
                    }
                }
            }
            let db = ffi::sqlite3_db_handle(self.ptr);
            Ok(ExecResult {
                last_insert_id: ffi::sqlite3_last_insert_rowid(db),
                rows_affected: ffi::sqlite3_changes(db) as u64,
            })
        }
    }

    fn query_batch(&mut self, max_batch_bytes: usize) -> Result<BatchOutcome, EngineError> {
        let mut rows = Vec::new();
        let mut size = 0usize;
        loop {
            let rc = unsafe { ffi::sqlite3_step(self.ptr) };
            match rc {
                ffi::SQLITE_ROW => {
                    let row = unsafe { self.read_row() };
                    size += row.encoded_len();
                    rows.push(row);
                    if size >= max_batch_bytes {
                        return Ok(BatchOutcome::RowAvailable(rows));
                    }
                }
                ffi::SQLITE_DONE => return Ok(BatchOutcome::Done(rows)),
                rc => {
                    let db = unsafe { ffi::sqlite3_db_handle(self.ptr) };
                    return Err(EngineError::new(rc, unsafe { db_errmsg(db) }));
                }
            }
        }
    }
}

/// Ctx passed across the C ABI to the WAL hook trampoline (spec section 9's "trampoline ...
/// recovers a typed gateway reference from an opaque context" - here it recovers just the
/// pieces the hook actually needs, not the whole gateway, see `engine/mod.rs`'s module doc).
struct HookCtx {
    cluster: Arc<dyn Cluster>,
    checkpoint_threshold: u32,
    db_id: u32,
}

struct SimpleDbHandle(u32);

impl DbHandle for SimpleDbHandle {
    fn id(&self) -> u32 {
        self.0
    }
}

unsafe extern "C" fn wal_hook_trampoline(
    ctx: *mut c_void,
    db: *mut ffi::sqlite3,
    _schema: *const c_char,
    pages: c_int,
) -> c_int {
    let hook = &*(ctx as *const HookCtx);
    let pages = pages as u32;
    if pages >= hook.checkpoint_threshold {
        match Sqlite3Wal::new(db) {
            Ok(wal) => {
                let handle = SimpleDbHandle(hook.db_id);
                checkpoint::maybe_checkpoint(
                    pages,
                    hook.checkpoint_threshold,
                    &wal,
                    hook.cluster.as_ref(),
                    &handle,
                );
            }
            Err(err) => {
                tracing::debug!(%err, "failed to map WAL shared memory, skipping checkpoint");
            }
        }
    }
    ffi::SQLITE_OK
}

/// A read-only view over `main`'s WAL-index shared memory, constructed fresh for each
/// checkpoint-hook invocation (spec section 4.7).
pub struct Sqlite3Wal<'a> {
    file: *mut ffi::sqlite3_file,
    region: *const u8,
    _marker: PhantomData<&'a ()>,
}

impl<'a> Sqlite3Wal<'a> {
    unsafe fn new(db: *mut ffi::sqlite3) -> Result<Self, EngineError> {
        let mut file: *mut ffi::sqlite3_file = ptr::null_mut();
        let dbname = CString::new("main").expect("no interior nul");
        let rc = ffi::sqlite3_file_control(
            db,
            dbname.as_ptr(),
            ffi::SQLITE_FCNTL_FILE_POINTER,
            &mut file as *mut _ as *mut c_void,
        );
        if rc != ffi::SQLITE_OK || file.is_null() {
            return Err(EngineError::new(rc, "failed to get main db file handle"));
        }

        let methods = (*file).pMethods;
        if methods.is_null() {
            return Err(EngineError::new(
                ffi::SQLITE_ERROR,
                "database file has no io methods",
            ));
        }
        let x_shm_map = (*methods)
            .xShmMap
            .ok_or_else(|| EngineError::new(ffi::SQLITE_ERROR, "vfs does not support shm"))?;

        let mut region: *mut c_void = ptr::null_mut();
        let rc = x_shm_map(file, 0, WAL_INDEX_REGION_SIZE, 0, &mut region);
        if rc != ffi::SQLITE_OK || region.is_null() {
            return Err(EngineError::new(rc, "failed to map WAL-index shared memory"));
        }

        Ok(Self {
            file,
            region: region as *const u8,
            _marker: PhantomData,
        })
    }

    unsafe fn read_u32(&self, offset: usize) -> u32 {
        let ptr = self.region.add(offset) as *const u32;
        u32::from_ne_bytes(ptr.read_unaligned().to_ne_bytes())
    }
}

impl<'a> WalSharedMemory for Sqlite3Wal<'a> {
    fn reader_slots(&self) -> usize {
        WAL_NREADER
    }

    fn mx_frame(&self) -> u32 {
        unsafe { self.read_u32(MX_FRAME_OFFSET) }
    }

    fn read_mark(&self, slot: usize) -> u32 {
        unsafe { self.read_u32(READ_MARKS_OFFSET + slot * 4) }
    }

    fn try_lock_reader(&self, slot: usize) -> Result<LockOutcome, EngineError> {
        unsafe {
            let methods = (*self.file).pMethods;
            let x_shm_lock = (*methods)
                .xShmLock
                .ok_or_else(|| EngineError::new(ffi::SQLITE_ERROR, "vfs does not support shm locks"))?;
            let flags = ffi::SQLITE_SHM_LOCK | ffi::SQLITE_SHM_EXCLUSIVE;
            match x_shm_lock(self.file, slot as c_int, 1, flags) {
                ffi::SQLITE_BUSY => Ok(LockOutcome::Busy),
                ffi::SQLITE_OK => Ok(LockOutcome::Acquired),
                rc => Err(EngineError::new(rc, "xShmLock failed")),
            }
        }
    }

    fn unlock_reader(&self, slot: usize) {
        unsafe {
            let methods = (*self.file).pMethods;
            if let Some(x_shm_lock) = (*methods).xShmLock {
                let flags = ffi::SQLITE_SHM_UNLOCK | ffi::SQLITE_SHM_EXCLUSIVE;
                x_shm_lock(self.file, slot as c_int, 1, flags);
            }
        }
    }
}

/// The per-gateway open database (spec section 3), backed by a single `rusqlite::Connection`.
///
/// Field order matters: `statements` (and `hook_ctx`) must drop before `conn` so that finalizing
/// outstanding prepared statements never touches an already-closed connection.
pub struct RusqliteEngine {
    id: u32,
    next_stmt_id: u32,
    statements: HashMap<u32, RawStatement>,
    hook_ctx: Option<Box<HookCtx>>,
    conn: Connection,
}

impl RusqliteEngine {
    fn open_with(name: &str, flags: u32, page_size: u16, vfs: &str) -> Result<Self, EngineError> {
        let mut sqlite_flags = OpenFlags::empty();
        if flags & open_flags::READ_ONLY != 0 {
            sqlite_flags |= OpenFlags::SQLITE_OPEN_READ_ONLY;
        }
        if flags & open_flags::READ_WRITE != 0 {
            sqlite_flags |= OpenFlags::SQLITE_OPEN_READ_WRITE;
        }
        if flags & open_flags::CREATE != 0 {
            sqlite_flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        if sqlite_flags.is_empty() {
            sqlite_flags = OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE;
        }
        sqlite_flags |= OpenFlags::SQLITE_OPEN_NO_MUTEX;

        let conn = if vfs.is_empty() {
            Connection::open_with_flags(name, sqlite_flags)
        } else {
            Connection::open_with_flags_and_vfs(name, sqlite_flags, vfs)
        }
        .map_err(EngineError::from)?;

        conn.pragma_update(None, "page_size", page_size)
            .map_err(EngineError::from)?;
        conn.pragma_update(None, "journal_mode", "wal")
            .map_err(EngineError::from)?;

        Ok(Self {
            id: 0,
            next_stmt_id: 0,
            statements: HashMap::new(),
            hook_ctx: None,
            conn,
        })
    }

}

impl DbHandle for RusqliteEngine {
    fn id(&self) -> u32 {
        self.id
    }
}

impl OpenableDatabase for RusqliteEngine {
    fn open(name: &str, flags: u32, options: &GatewayOptions) -> Result<Self, EngineError> {
        Self::open_with(name, flags, options.page_size, &options.vfs)
    }

    /// Install the checkpoint decision procedure as the engine's WAL hook (spec section 4.4,
    /// "installs a WAL hook"). Must be called once, right after `open`.
    fn install_checkpoint_hook(&mut self, cluster: Arc<dyn Cluster>, checkpoint_threshold: u32) {
        let ctx = Box::new(HookCtx {
            cluster,
            checkpoint_threshold,
            db_id: self.id,
        });
        let ptr = ctx.as_ref() as *const HookCtx as *mut c_void;
        unsafe {
            let handle = self.conn.handle();
            ffi::sqlite3_wal_hook(handle, Some(wal_hook_trampoline), ptr);
        }
        self.hook_ctx = Some(ctx);
    }
}

impl Database for RusqliteEngine {
    type Statement = RawStatement;
    type Wal<'a> = Sqlite3Wal<'a>;

    fn prepare(&mut self, sql: &str) -> Result<Option<(u32, u32, Option<String>)>, EngineError> {
        let bytes = sql.as_bytes();
        let mut stmt_ptr: *mut ffi::sqlite3_stmt = ptr::null_mut();
        let mut tail_ptr: *const c_char = ptr::null();

        let rc = unsafe {
            let handle = self.conn.handle();
            ffi::sqlite3_prepare_v2(
                handle,
                bytes.as_ptr() as *const c_char,
                bytes.len() as c_int,
                &mut stmt_ptr,
                &mut tail_ptr,
            )
        };
        if rc != ffi::SQLITE_OK {
            let message = unsafe { db_errmsg(self.conn.handle()) };
            return Err(EngineError::new(rc, message));
        }
        if stmt_ptr.is_null() {
            // Whitespace/comment-only text: `sqlite3_prepare_v2` itself returns `SQLITE_OK` with
            // a null statement rather than failing.
            return Ok(None);
        }

        let tail = if tail_ptr.is_null() {
            None
        } else {
            let offset = (tail_ptr as usize).saturating_sub(bytes.as_ptr() as usize);
            if offset >= bytes.len() {
                None
            } else {
                let text = sql[offset..].trim();
                (!text.is_empty()).then(|| text.to_string())
            }
        };

        let param_count = unsafe { ffi::sqlite3_bind_parameter_count(stmt_ptr) as u32 };
        let id = self.next_stmt_id;
        self.next_stmt_id += 1;
        self.statements.insert(id, RawStatement { ptr: stmt_ptr });

        Ok(Some((id, param_count, tail)))
    }

    fn statement_mut(&mut self, stmt_id: u32) -> Option<&mut RawStatement> {
        self.statements.get_mut(&stmt_id)
    }

    fn finalize(&mut self, stmt_id: u32) -> Result<(), EngineError> {
        match self.statements.remove(&stmt_id) {
            Some(_) => Ok(()),
            None => Err(EngineError::new(
                ffi::SQLITE_NOTFOUND,
                format!("no stmt with id {stmt_id}"),
            )),
        }
    }

    fn wal_shared_memory(&self) -> Result<Sqlite3Wal<'_>, EngineError> {
        unsafe { Sqlite3Wal::new(self.conn.handle()) }
    }
}
