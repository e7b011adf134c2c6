//! Session event sinks
//!
//! The listener and sessions report what happens through [`SessionLogger`];
//! rendering (tracing, a plain text file, nothing) is the sink's business.

use crate::error::SyncError;
use crate::session::{FileOutcome, SessionReport};
use anyhow::Result;
use chrono::Local;
use parking_lot::Mutex;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

pub trait SessionLogger: Send + Sync {
    fn listening(&self, _addr: &SocketAddr, _root: &Path) {}
    fn accept_error(&self, _msg: &str) {}
    fn connected(&self, _peer: &str) {}
    fn handshake(&self, _peer: &str, _client: &str, _last_sync: &str, _buffer_size: u32) {}
    fn batch_started(&self, _client: &str, _files: u32) {}
    fn file_progress(&self, _client: &str, _file: &str, _received: u64, _declared: u64) {}
    fn file_received(&self, _client: &str, _outcome: &FileOutcome) {}
    fn checksum_mismatch(&self, _client: &str, _file: &str, _declared: &str, _computed: &str) {}
    fn last_sync_updated(&self, _client: &str, _timestamp: &str) {}
    fn session_done(&self, _peer: &str, _report: &SessionReport) {}
    fn session_failed(
        &self,
        _peer: &str,
        _client: Option<&str>,
        _file: Option<&str>,
        _err: &SyncError,
    ) {
    }
}

pub struct NoopLogger;
impl SessionLogger for NoopLogger {}

/// Renders events through `tracing` with structured fields.
pub struct TracingLogger;

impl SessionLogger for TracingLogger {
    fn listening(&self, addr: &SocketAddr, root: &Path) {
        tracing::info!(%addr, root = %root.display(), "awaiting connections");
    }
    fn accept_error(&self, msg: &str) {
        tracing::warn!(error = msg, "accept failed");
    }
    fn connected(&self, peer: &str) {
        tracing::info!(peer, "connection established");
    }
    fn handshake(&self, peer: &str, client: &str, last_sync: &str, buffer_size: u32) {
        tracing::info!(peer, client, last_sync, buffer_size, "handshake sent");
    }
    fn batch_started(&self, client: &str, files: u32) {
        tracing::info!(client, files, "ready to receive files");
    }
    fn file_progress(&self, client: &str, file: &str, received: u64, declared: u64) {
        tracing::trace!(client, file, remaining = declared - received, "receiving");
    }
    fn file_received(&self, client: &str, outcome: &FileOutcome) {
        tracing::info!(
            client,
            file = %outcome.name,
            bytes = outcome.bytes,
            verified = outcome.verified,
            "file received"
        );
    }
    fn checksum_mismatch(&self, client: &str, file: &str, declared: &str, computed: &str) {
        tracing::warn!(client, file, declared, computed, "checksum mismatch");
    }
    fn last_sync_updated(&self, client: &str, timestamp: &str) {
        tracing::info!(client, timestamp, "last sync updated");
    }
    fn session_done(&self, peer: &str, report: &SessionReport) {
        tracing::info!(
            peer,
            client = %report.client_id,
            files = report.files.len(),
            failed_checks = report.checksum_failures(),
            "session closed"
        );
    }
    fn session_failed(&self, peer: &str, client: Option<&str>, file: Option<&str>, err: &SyncError) {
        tracing::error!(
            peer,
            client = client.unwrap_or("-"),
            file = file.unwrap_or("-"),
            stage = %err.stage(),
            error = %err,
            "session aborted"
        );
    }
}

/// Appends one line per event to a text file.
pub struct TextLogger {
    file: Mutex<File>,
}

impl TextLogger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let f = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            file: Mutex::new(f),
        })
    }

    fn line(&self, s: &str) {
        let mut f = self.file.lock();
        let _ = writeln!(f, "[{}] {}", Local::now().to_rfc3339(), s);
    }
}

impl SessionLogger for TextLogger {
    fn listening(&self, addr: &SocketAddr, root: &Path) {
        self.line(&format!("LISTEN addr={} root={}", addr, root.display()));
    }
    fn accept_error(&self, msg: &str) {
        self.line(&format!("ACCEPT_ERROR msg={}", msg));
    }
    fn connected(&self, peer: &str) {
        self.line(&format!("CONNECT peer={}", peer));
    }
    fn handshake(&self, peer: &str, client: &str, last_sync: &str, buffer_size: u32) {
        self.line(&format!(
            "HANDSHAKE peer={} client={} last_sync={} buffer={}",
            peer, client, last_sync, buffer_size
        ));
    }
    fn batch_started(&self, client: &str, files: u32) {
        self.line(&format!("BATCH client={} files={}", client, files));
    }
    fn file_received(&self, client: &str, outcome: &FileOutcome) {
        self.line(&format!(
            "FILE client={} name={} bytes={} verified={}",
            client, outcome.name, outcome.bytes, outcome.verified
        ));
    }
    fn checksum_mismatch(&self, client: &str, file: &str, declared: &str, computed: &str) {
        self.line(&format!(
            "MISMATCH client={} name={} declared={} computed={}",
            client, file, declared, computed
        ));
    }
    fn last_sync_updated(&self, client: &str, timestamp: &str) {
        self.line(&format!("LAST_SYNC client={} at={}", client, timestamp));
    }
    fn session_done(&self, peer: &str, report: &SessionReport) {
        self.line(&format!(
            "DONE peer={} client={} files={} failed_checks={}",
            peer,
            report.client_id,
            report.files.len(),
            report.checksum_failures()
        ));
    }
    fn session_failed(&self, peer: &str, client: Option<&str>, file: Option<&str>, err: &SyncError) {
        self.line(&format!(
            "ERROR peer={} client={} file={} stage={} msg={}",
            peer,
            client.unwrap_or("-"),
            file.unwrap_or("-"),
            err.stage(),
            err
        ));
    }
}

/// Forwards every event to each inner sink in order.
pub struct FanoutLogger {
    sinks: Vec<Arc<dyn SessionLogger>>,
}

impl FanoutLogger {
    pub fn new(sinks: Vec<Arc<dyn SessionLogger>>) -> Self {
        Self { sinks }
    }
}

impl SessionLogger for FanoutLogger {
    fn listening(&self, addr: &SocketAddr, root: &Path) {
        self.sinks.iter().for_each(|s| s.listening(addr, root));
    }
    fn accept_error(&self, msg: &str) {
        self.sinks.iter().for_each(|s| s.accept_error(msg));
    }
    fn connected(&self, peer: &str) {
        self.sinks.iter().for_each(|s| s.connected(peer));
    }
    fn handshake(&self, peer: &str, client: &str, last_sync: &str, buffer_size: u32) {
        self.sinks
            .iter()
            .for_each(|s| s.handshake(peer, client, last_sync, buffer_size));
    }
    fn batch_started(&self, client: &str, files: u32) {
        self.sinks.iter().for_each(|s| s.batch_started(client, files));
    }
    fn file_progress(&self, client: &str, file: &str, received: u64, declared: u64) {
        self.sinks
            .iter()
            .for_each(|s| s.file_progress(client, file, received, declared));
    }
    fn file_received(&self, client: &str, outcome: &FileOutcome) {
        self.sinks.iter().for_each(|s| s.file_received(client, outcome));
    }
    fn checksum_mismatch(&self, client: &str, file: &str, declared: &str, computed: &str) {
        self.sinks
            .iter()
            .for_each(|s| s.checksum_mismatch(client, file, declared, computed));
    }
    fn last_sync_updated(&self, client: &str, timestamp: &str) {
        self.sinks.iter().for_each(|s| s.last_sync_updated(client, timestamp));
    }
    fn session_done(&self, peer: &str, report: &SessionReport) {
        self.sinks.iter().for_each(|s| s.session_done(peer, report));
    }
    fn session_failed(&self, peer: &str, client: Option<&str>, file: Option<&str>, err: &SyncError) {
        self.sinks
            .iter()
            .for_each(|s| s.session_failed(peer, client, file, err));
    }
}
