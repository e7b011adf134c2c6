//! Shared CLI helpers and small reusable Clap fragments

use crate::config::ConfigLayer;
use crate::protocol::DEFAULT_PORT;
use clap::{ArgAction, Parser};
use std::path::PathBuf;

/// Options for homecloudd. Unset flags fall through to `--config`, then to
/// built-in defaults.
#[derive(Clone, Debug, Parser)]
#[command(name = "homecloudd", version, about = "HomeCloud sync endpoint")]
pub struct DaemonOpts {
    /// TCP port to listen on [default: 3999]
    #[arg(short = 'p', long)]
    pub port: Option<u16>,

    /// Storage root; one subdirectory per client [default: sync]
    #[arg(short = 'd', long)]
    pub directory: Option<PathBuf>,

    /// Chunk size advertised to clients [default: 1024]
    #[arg(short = 'b', long = "buffer-size", alias = "bufferSize")]
    pub buffer_size: Option<u32>,

    /// Address to bind [default: 0.0.0.0]
    #[arg(long)]
    pub host: Option<String>,

    /// Per read/write deadline in seconds, 0 disables [default: 300]
    #[arg(long = "io-timeout-secs")]
    pub io_timeout_secs: Option<u64>,

    /// Upper bound on a whole session in seconds, 0 disables [default: 0]
    #[arg(long = "session-timeout-secs")]
    pub session_timeout_secs: Option<u64>,

    /// Sessions served at once [default: 16]
    #[arg(long = "max-sessions")]
    pub max_sessions: Option<usize>,

    /// Also append session events to this file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// TOML file with the same settings as the flags
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,
}

impl DaemonOpts {
    /// Flags as a configuration layer to merge over the file layer.
    pub fn to_layer(&self) -> ConfigLayer {
        ConfigLayer {
            host: self.host.clone(),
            port: self.port,
            directory: self.directory.clone(),
            buffer_size: self.buffer_size,
            io_timeout_secs: self.io_timeout_secs,
            session_timeout_secs: self.session_timeout_secs,
            max_sessions: self.max_sessions,
            log_file: self.log_file.clone(),
        }
    }
}

/// Options for homecloud-push
#[derive(Clone, Debug, Parser)]
#[command(name = "homecloud-push", version, about = "Push files to a HomeCloud endpoint")]
pub struct PushOpts {
    /// Server host
    #[arg(long, default_value = "127.0.0.1")]
    pub host: String,

    /// Server port
    #[arg(short = 'p', long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Identifier the server files this batch under
    #[arg(short = 'c', long = "client-id")]
    pub client_id: String,

    /// Per read/write deadline in seconds, 0 disables
    #[arg(long = "io-timeout-secs", default_value_t = 300)]
    pub io_timeout_secs: u64,

    /// Increase verbosity (-v, -vv)
    #[arg(short = 'v', long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Files to send; each is named on the server by its file name
    #[arg(required = false)]
    pub files: Vec<PathBuf>,
}

impl PushOpts {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
