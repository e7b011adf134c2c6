//! Shared protocol constants for the HomeCloud sync endpoint
//!
//! The wire format is fixed by existing clients: big-endian integers and
//! Java `writeUTF` strings, one request sequence per connection.

// Default listener settings
pub const DEFAULT_PORT: u16 = 3999;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_STORAGE_DIR: &str = "sync";

// Chunk size advertised to clients and used for file body reads
pub const DEFAULT_BUFFER_SIZE: u32 = 1024;

// Upper bound on a negotiated buffer; keeps a misconfigured daemon from
// allocating absurd per-session buffers (the wire field is an i32)
pub const MAX_BUFFER_SIZE: u32 = 64 * 1024 * 1024;

// Concurrent sessions served by one listener
pub const DEFAULT_MAX_SESSIONS: usize = 16;

// Largest encoded string `writeUTF` can frame (u16 length prefix)
pub const MAX_UTF_LEN: usize = u16::MAX as usize;

// Per-client metadata
pub mod metadata {
    /// Name of the key=value record kept in every client directory
    pub const FILE_NAME: &str = ".properties";
    /// Scratch name used while persisting; renamed over FILE_NAME
    pub const TEMP_FILE_NAME: &str = ".properties.tmp";
    /// Key suffix; the full key is `<clientId>.lastSync`
    pub const LAST_SYNC_SUFFIX: &str = "lastSync";
    /// Timestamp reported for clients that never completed a batch
    pub const DEFAULT_LAST_SYNC: &str = "1970-01-01 00:00:00";
    /// chrono format of the persisted timestamp (local time)
    pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

    pub fn last_sync_key(client_id: &str) -> String {
        format!("{}.{}", client_id, LAST_SYNC_SUFFIX)
    }
}

// Centralized timeout constants
pub mod timeouts {
    // Default per-operation socket deadline (seconds); 0 disables
    pub const IO_TIMEOUT_SECS: u64 = 300;

    // Connection establishment timeout for the push client (ms)
    pub const CONNECT_MS: u64 = 5_000;
}
