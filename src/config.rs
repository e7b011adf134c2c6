//! Daemon configuration.
//!
//! Values come from three layers, highest first: command-line flags, an
//! optional TOML file, built-in defaults. The result is a [`SessionConfig`]
//! built once at startup and shared read-only by the listener and every
//! session.

use crate::error::ConfigError;
use crate::protocol::{
    timeouts, DEFAULT_BUFFER_SIZE, DEFAULT_HOST, DEFAULT_MAX_SESSIONS, DEFAULT_PORT,
    DEFAULT_STORAGE_DIR, MAX_BUFFER_SIZE,
};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::Semaphore;

/// Immutable settings consumed by the listener and sessions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    pub host: String,
    pub port: u16,
    pub storage_root: PathBuf,
    /// Advertised to clients; upper bound on each file-body read.
    pub buffer_size: u32,
    /// Deadline for each socket read/write; `None` waits forever.
    pub io_timeout: Option<Duration>,
    /// Wall-clock limit on a whole session, slow trickles included.
    pub session_timeout: Option<Duration>,
    /// Sessions served concurrently; 1 serves connections strictly in turn.
    pub max_sessions: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            storage_root: PathBuf::from(DEFAULT_STORAGE_DIR),
            buffer_size: DEFAULT_BUFFER_SIZE,
            io_timeout: Some(Duration::from_secs(timeouts::IO_TIMEOUT_SECS)),
            session_timeout: None,
            max_sessions: DEFAULT_MAX_SESSIONS,
        }
    }
}

impl SessionConfig {
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_size == 0 {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                reason: "must be greater than zero".into(),
            });
        }
        if self.buffer_size > MAX_BUFFER_SIZE {
            return Err(ConfigError::Invalid {
                field: "buffer_size",
                reason: format!("must be at most {}", MAX_BUFFER_SIZE),
            });
        }
        if self.max_sessions == 0 {
            return Err(ConfigError::Invalid {
                field: "max_sessions",
                reason: "must be at least 1".into(),
            });
        }
        if self.max_sessions > Semaphore::MAX_PERMITS {
            return Err(ConfigError::Invalid {
                field: "max_sessions",
                reason: format!("must be at most {}", Semaphore::MAX_PERMITS),
            });
        }
        if self.storage_root.as_os_str().is_empty() {
            return Err(ConfigError::Invalid {
                field: "directory",
                reason: "storage directory is empty".into(),
            });
        }
        Ok(())
    }
}

/// One configuration layer. Every field is optional so layers can be merged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigLayer {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub directory: Option<PathBuf>,
    pub buffer_size: Option<u32>,
    /// Seconds; 0 disables the deadline.
    pub io_timeout_secs: Option<u64>,
    /// Seconds; 0 means no limit.
    pub session_timeout_secs: Option<u64>,
    pub max_sessions: Option<usize>,
    pub log_file: Option<PathBuf>,
}

impl ConfigLayer {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let data = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&data, path)
    }

    fn parse(data: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(data).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Values set in `over` win; unset ones fall through to `self`.
    pub fn merge(self, over: ConfigLayer) -> ConfigLayer {
        ConfigLayer {
            host: over.host.or(self.host),
            port: over.port.or(self.port),
            directory: over.directory.or(self.directory),
            buffer_size: over.buffer_size.or(self.buffer_size),
            io_timeout_secs: over.io_timeout_secs.or(self.io_timeout_secs),
            session_timeout_secs: over.session_timeout_secs.or(self.session_timeout_secs),
            max_sessions: over.max_sessions.or(self.max_sessions),
            log_file: over.log_file.or(self.log_file),
        }
    }

    /// Fill gaps with defaults and validate.
    pub fn resolve(&self) -> Result<SessionConfig, ConfigError> {
        let d = SessionConfig::default();
        let io_timeout = match self.io_timeout_secs {
            None => d.io_timeout,
            Some(0) => None,
            Some(s) => Some(Duration::from_secs(s)),
        };
        let session_timeout = match self.session_timeout_secs {
            None | Some(0) => d.session_timeout,
            Some(s) => Some(Duration::from_secs(s)),
        };
        let cfg = SessionConfig {
            host: self.host.clone().unwrap_or(d.host),
            port: self.port.unwrap_or(d.port),
            storage_root: self.directory.clone().unwrap_or(d.storage_root),
            buffer_size: self.buffer_size.unwrap_or(d.buffer_size),
            io_timeout,
            session_timeout,
            max_sessions: self.max_sessions.unwrap_or(d.max_sessions),
        };
        cfg.validate()?;
        Ok(cfg)
    }
}
