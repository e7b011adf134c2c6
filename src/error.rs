//! Error types for the sync endpoint.
//!
//! Session-scoped failures carry the protocol [`Stage`] they happened in so
//! the listener can log client, file and stage without extra bookkeeping.

use std::fmt;
use std::path::PathBuf;

/// Protocol state a session was in when something went wrong.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    AwaitClientId,
    SendHandshake,
    AwaitFileCount,
    ReceiveFile,
    UpdateMetadata,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::AwaitClientId => "await-client-id",
            Stage::SendHandshake => "send-handshake",
            Stage::AwaitFileCount => "await-file-count",
            Stage::ReceiveFile => "receive-file",
            Stage::UpdateMetadata => "update-metadata",
        };
        f.write_str(s)
    }
}

/// Framing and socket errors from the wire codec.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// Underlying socket error (reset, unexpected EOF inside a frame, ...).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A read or write exceeded the configured deadline.
    #[error("{op} timed out after {ms} ms")]
    Timeout { op: &'static str, ms: u128 },

    /// Bytes that are not valid modified UTF-8.
    #[error("malformed modified UTF-8: {reason}")]
    MalformedUtf { reason: String },

    /// String does not fit behind a u16 length prefix.
    #[error("encoded string is {len} bytes, limit is 65535")]
    StringTooLong { len: usize },
}

/// Failures of the per-client metadata store.
#[derive(Debug, thiserror::Error)]
pub enum MetadataError {
    #[error("cannot create client directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot read metadata file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot persist metadata file {path}: {source}")]
    Persist {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Everything that can abort a single transfer session.
///
/// None of these stop the listener; checksum mismatches are not errors at
/// all and are reported through the session outcome instead.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Connection reset, malformed string, timeout.
    #[error("transport error during {stage}: {source}")]
    Transport {
        stage: Stage,
        #[source]
        source: WireError,
    },

    /// Frame decoded but carries a value the protocol forbids.
    #[error("malformed frame during {stage}: {reason}")]
    Malformed { stage: Stage, reason: String },

    /// The stream ended before a file body was complete.
    #[error("stream ended after {received} of {declared} bytes of {file}")]
    PrematureEof {
        file: String,
        received: u64,
        declared: u64,
    },

    /// A client id or file name that cannot be used as a path.
    #[error("rejected {kind} {name:?}: {reason}")]
    InvalidPath {
        kind: &'static str,
        name: String,
        reason: String,
    },

    /// Opening or writing a destination file failed.
    #[error("cannot write {path}: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("metadata error during {stage}: {source}")]
    Metadata {
        stage: Stage,
        #[source]
        source: MetadataError,
    },
}

impl SyncError {
    pub fn transport(stage: Stage, source: impl Into<WireError>) -> Self {
        SyncError::Transport {
            stage,
            source: source.into(),
        }
    }

    /// Stage the error is attributed to.
    pub fn stage(&self) -> Stage {
        match self {
            SyncError::Transport { stage, .. }
            | SyncError::Malformed { stage, .. }
            | SyncError::Metadata { stage, .. } => *stage,
            SyncError::PrematureEof { .. } | SyncError::Destination { .. } => Stage::ReceiveFile,
            SyncError::InvalidPath { kind, .. } => {
                if *kind == "client id" {
                    Stage::AwaitClientId
                } else {
                    Stage::ReceiveFile
                }
            }
        }
    }

    /// True for failures caused by the peer or the connection itself.
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            SyncError::Transport { .. } | SyncError::Malformed { .. } | SyncError::PrematureEof { .. }
        )
    }
}

/// Invalid daemon configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Fatal errors raised before the accept loop starts.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("cannot bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("storage root {path} is not usable: {source}")]
    StorageRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type SyncResult<T> = std::result::Result<T, SyncError>;
pub type WireResult<T> = std::result::Result<T, WireError>;
pub type MetadataResult<T> = std::result::Result<T, MetadataError>;
