use serde::Deserialize;

/// The options collaborator referenced by spec section 2/6.
///
/// Populated by the surrounding process's configuration layer (out of scope for this crate, see
/// spec section 1) the way `sqld`'s `DbConfig`/`HeartbeatConfig` are plain data structs filled in
/// by `clap` in `sqld/src/main.rs` - this crate owns only the data shape, never the loading.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayOptions {
    /// Number of new WAL frames that must accumulate since the last checkpoint before the
    /// checkpoint hook (section 4.7) even inspects shared memory.
    pub checkpoint_threshold: u32,

    /// Seconds a connection may go without sending a heartbeat before the I/O layer closes it.
    /// The gateway itself never enforces this; it only echoes the value in the `client` response
    /// (section 4.3) and tracks the last-seen heartbeat timestamp.
    pub heartbeat_timeout: u32,

    /// Name of the VFS implementation the engine should open databases against.
    pub vfs: String,

    /// Page size in bytes passed to the engine on `open`.
    pub page_size: u16,

    /// Name of the WAL replication implementation (the engine-level collaborator that actually
    /// ships WAL frames to the cluster) passed to the engine on `open`.
    pub wal_replication: String,
}

impl Default for GatewayOptions {
    fn default() -> Self {
        Self {
            checkpoint_threshold: 1000,
            heartbeat_timeout: 15,
            vfs: String::new(),
            page_size: 4096,
            wal_replication: String::new(),
        }
    }
}
