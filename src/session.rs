//! One connection's transfer session.
//!
//! The protocol is a fixed sequence with no branching other than the empty
//! batch:
//!
//! ```text
//! client -> server   utf   client id
//! server -> client   i32   buffer size
//! server -> client   utf   last sync timestamp
//! client -> server   i32   file count
//! per file:
//! client -> server   utf   file name
//! client -> server   i64   declared size
//! client -> server   raw   declared size bytes
//! client -> server   utf   hex MD5 of the bytes
//! ```
//!
//! A checksum mismatch is recorded and the session moves on. Any other
//! failure aborts this session only. When the file count is positive the
//! client's last sync time is advanced after the loop, whatever the
//! per-file verification results were.

use crate::checksum::{digests_match, ChecksumVerifier};
use crate::config::SessionConfig;
use crate::error::{Stage, SyncError, SyncResult, WireError};
use crate::logger::SessionLogger;
use crate::metadata::{ClientMetadata, MetadataStore};
use crate::paths;
use crate::wire::Wire;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

/// Result of receiving one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOutcome {
    pub name: String,
    pub path: PathBuf,
    pub bytes: u64,
    pub declared_checksum: String,
    pub computed_checksum: String,
    pub verified: bool,
}

/// What a completed session did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionReport {
    pub client_id: String,
    /// Timestamp sent in the handshake.
    pub previous_sync: String,
    pub files: Vec<FileOutcome>,
    /// New timestamp, if the batch advanced it.
    pub last_sync_updated: Option<String>,
}

impl SessionReport {
    pub fn checksum_failures(&self) -> usize {
        self.files.iter().filter(|f| !f.verified).count()
    }
}

/// Per-file receive state; dropped once the file is verified.
struct FileTransfer {
    name: String,
    path: PathBuf,
    declared_size: u64,
    received: u64,
    verifier: ChecksumVerifier,
}

pub struct Session<S> {
    wire: Wire<S>,
    peer: String,
    config: Arc<SessionConfig>,
    store: Arc<MetadataStore>,
    logger: Arc<dyn SessionLogger>,
    client_id: Option<String>,
    current_file: Option<String>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        peer: impl Into<String>,
        config: Arc<SessionConfig>,
        store: Arc<MetadataStore>,
        logger: Arc<dyn SessionLogger>,
    ) -> Self {
        let deadline = config.io_timeout;
        Self {
            wire: Wire::new(stream, deadline),
            peer: peer.into(),
            config,
            store,
            logger,
            client_id: None,
            current_file: None,
        }
    }

    /// Drive the session to completion. The stream and any open destination
    /// file are released before this returns, on success or failure.
    pub async fn run(mut self) -> SyncResult<SessionReport> {
        let result = match self.config.session_timeout {
            None => self.drive().await,
            Some(limit) => {
                let outcome = timeout(limit, self.drive()).await;
                outcome.unwrap_or_else(|_| {
                    Err(SyncError::transport(
                        self.stage_reached(),
                        WireError::Timeout {
                            op: "session",
                            ms: limit.as_millis(),
                        },
                    ))
                })
            }
        };
        match &result {
            Ok(report) => self.logger.session_done(&self.peer, report),
            Err(e) => self.logger.session_failed(
                &self.peer,
                self.client_id.as_deref(),
                self.current_file.as_deref(),
                e,
            ),
        }
        result
    }

    /// Best guess at where an interrupted session stopped.
    fn stage_reached(&self) -> Stage {
        match (&self.client_id, &self.current_file) {
            (None, _) => Stage::AwaitClientId,
            (Some(_), Some(_)) => Stage::ReceiveFile,
            (Some(_), None) => Stage::AwaitFileCount,
        }
    }

    async fn drive(&mut self) -> SyncResult<SessionReport> {
        let client_id = self
            .wire
            .read_utf()
            .await
            .map_err(|e| SyncError::transport(Stage::AwaitClientId, e))?;
        self.client_id = Some(client_id.clone());
        paths::validate_client_id(&client_id)?;

        let ClientMetadata {
            last_sync: previous_sync,
            directory: dir,
            ..
        } = self.handshake(&client_id).await?;
        let mut report = SessionReport {
            client_id: client_id.clone(),
            previous_sync,
            files: Vec::new(),
            last_sync_updated: None,
        };

        let count = self
            .wire
            .read_i32()
            .await
            .map_err(|e| SyncError::transport(Stage::AwaitFileCount, e))?;
        if count < 0 {
            return Err(SyncError::Malformed {
                stage: Stage::AwaitFileCount,
                reason: format!("negative file count {}", count),
            });
        }
        if count == 0 {
            return Ok(report);
        }
        let count = count as u32;
        self.logger.batch_started(&client_id, count);

        let mut buf = vec![0u8; self.config.buffer_size as usize];
        for _ in 0..count {
            let outcome = self.receive_file(&client_id, &dir, &mut buf).await?;
            report.files.push(outcome);
        }

        let stamp = self
            .store
            .set_last_sync(&client_id)
            .await
            .map_err(|source| SyncError::Metadata {
                stage: Stage::UpdateMetadata,
                source,
            })?;
        self.logger.last_sync_updated(&client_id, &stamp);
        report.last_sync_updated = Some(stamp);
        Ok(report)
    }

    async fn handshake(&mut self, client_id: &str) -> SyncResult<ClientMetadata> {
        let record = self
            .store
            .get(client_id)
            .await
            .map_err(|source| SyncError::Metadata {
                stage: Stage::SendHandshake,
                source,
            })?;
        let last_sync = &record.last_sync;
        let send = |e: WireError| SyncError::transport(Stage::SendHandshake, e);
        self.wire
            .write_i32(self.config.buffer_size as i32)
            .await
            .map_err(send)?;
        self.wire.write_utf(last_sync).await.map_err(send)?;
        self.wire.flush().await.map_err(send)?;
        self.logger
            .handshake(&self.peer, client_id, last_sync, self.config.buffer_size);
        Ok(record)
    }

    async fn receive_file(
        &mut self,
        client_id: &str,
        dir: &Path,
        buf: &mut [u8],
    ) -> SyncResult<FileOutcome> {
        let recv = |e: WireError| SyncError::transport(Stage::ReceiveFile, e);

        let name = self.wire.read_utf().await.map_err(recv)?;
        self.current_file = Some(name.clone());
        let path = paths::resolve_file(dir, &name)?;

        let destination = |source: std::io::Error| SyncError::Destination {
            path: path.clone(),
            source,
        };
        paths::ensure_parent_exists(&path)
            .await
            .map_err(destination)?;
        let mut file = tokio::fs::File::create(&path)
            .await
            .map_err(destination)?;

        let declared = self.wire.read_i64().await.map_err(recv)?;
        if declared < 0 {
            return Err(SyncError::Malformed {
                stage: Stage::ReceiveFile,
                reason: format!("negative size {} for {}", declared, name),
            });
        }

        let mut transfer = FileTransfer {
            name,
            path: path.clone(),
            declared_size: declared as u64,
            received: 0,
            verifier: ChecksumVerifier::new(),
        };
        let body = self
            .receive_body(client_id, &mut transfer, &mut file, buf)
            .await;
        // Flush what did arrive even when the body was cut short; the
        // partial file stays on disk.
        let flushed = file.flush().await;
        drop(file);
        body?;
        flushed.map_err(destination)?;

        let declared_checksum = self.wire.read_utf().await.map_err(recv)?;
        let FileTransfer {
            name,
            path,
            received,
            verifier,
            ..
        } = transfer;
        let computed_checksum = verifier.finalize_hex();
        let verified = digests_match(&computed_checksum, &declared_checksum);
        if !verified {
            self.logger
                .checksum_mismatch(client_id, &name, &declared_checksum, &computed_checksum);
        }

        let outcome = FileOutcome {
            name,
            path,
            bytes: received,
            declared_checksum,
            computed_checksum,
            verified,
        };
        self.logger.file_received(client_id, &outcome);
        self.current_file = None;
        Ok(outcome)
    }

    async fn receive_body(
        &mut self,
        client_id: &str,
        transfer: &mut FileTransfer,
        file: &mut tokio::fs::File,
        buf: &mut [u8],
    ) -> SyncResult<()> {
        while transfer.received < transfer.declared_size {
            let want = (transfer.declared_size - transfer.received).min(buf.len() as u64) as usize;
            let n = self
                .wire
                .read_chunk(&mut buf[..want])
                .await
                .map_err(|e| SyncError::transport(Stage::ReceiveFile, e))?;
            if n == 0 {
                return Err(SyncError::PrematureEof {
                    file: transfer.name.clone(),
                    received: transfer.received,
                    declared: transfer.declared_size,
                });
            }
            file.write_all(&buf[..n])
                .await
                .map_err(|source| SyncError::Destination {
                    path: transfer.path.clone(),
                    source,
                })?;
            transfer.verifier.update(&buf[..n]);
            transfer.received += n as u64;
            self.logger.file_progress(
                client_id,
                &transfer.name,
                transfer.received,
                transfer.declared_size,
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::md5_hex;
    use crate::logger::NoopLogger;
    use crate::protocol::metadata::DEFAULT_LAST_SYNC;
    use tempfile::TempDir;
    use tokio::io::{duplex, AsyncReadExt, DuplexStream};

    fn utf(s: &str) -> Vec<u8> {
        let mut v = (s.len() as u16).to_be_bytes().to_vec();
        v.extend_from_slice(s.as_bytes());
        v
    }

    fn file_frame(name: &str, body: &[u8], checksum: &str) -> Vec<u8> {
        let mut v = utf(name);
        v.extend_from_slice(&(body.len() as i64).to_be_bytes());
        v.extend_from_slice(body);
        v.extend_from_slice(&utf(checksum));
        v
    }

    fn setup(tmp: &TempDir, buffer_size: u32) -> (Arc<SessionConfig>, Arc<MetadataStore>) {
        let config = Arc::new(SessionConfig {
            storage_root: tmp.path().to_path_buf(),
            buffer_size,
            io_timeout: Some(std::time::Duration::from_secs(5)),
            ..SessionConfig::default()
        });
        let store = Arc::new(MetadataStore::new(tmp.path()));
        (config, store)
    }

    /// Feed `input` as the client and run a session; returns the report and
    /// the bytes the server wrote back.
    async fn run_with(
        config: Arc<SessionConfig>,
        store: Arc<MetadataStore>,
        input: Vec<u8>,
    ) -> (SyncResult<SessionReport>, Vec<u8>) {
        let (server, mut client): (DuplexStream, DuplexStream) = duplex(1 << 20);
        client.write_all(&input).await.unwrap();
        client.shutdown().await.unwrap();
        let session = Session::new(server, "test", config, store, Arc::new(NoopLogger));
        let result = session.run().await;
        let mut out = Vec::new();
        client.read_to_end(&mut out).await.unwrap();
        (result, out)
    }

    #[tokio::test]
    async fn empty_batch_only_handshakes() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 1024);
        let mut input = utf("alice");
        input.extend_from_slice(&0i32.to_be_bytes());

        let (result, out) = run_with(config, store.clone(), input).await;
        let report = result.unwrap();
        assert!(report.files.is_empty());
        assert_eq!(report.last_sync_updated, None);
        assert_eq!(report.previous_sync, DEFAULT_LAST_SYNC);

        let mut expected = 1024i32.to_be_bytes().to_vec();
        expected.extend_from_slice(&utf(DEFAULT_LAST_SYNC));
        assert_eq!(out, expected);
        assert_eq!(store.last_sync("alice").await.unwrap(), DEFAULT_LAST_SYNC);
    }

    #[tokio::test]
    async fn body_is_read_in_buffer_sized_chunks() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 3);
        let body: Vec<u8> = (0..100u8).collect();
        let mut input = utf("bob");
        input.extend_from_slice(&1i32.to_be_bytes());
        input.extend_from_slice(&file_frame("data.bin", &body, &md5_hex(&body)));

        let (result, out) = run_with(config, store, input).await;
        let report = result.unwrap();
        assert_eq!(&out[..4], &3i32.to_be_bytes());
        assert_eq!(report.files.len(), 1);
        assert!(report.files[0].verified);
        assert_eq!(report.files[0].bytes, 100);
        assert_eq!(std::fs::read(tmp.path().join("bob/data.bin")).unwrap(), body);
    }

    #[tokio::test]
    async fn empty_file_is_created() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 1024);
        let mut input = utf("bob");
        input.extend_from_slice(&1i32.to_be_bytes());
        input.extend_from_slice(&file_frame("empty", b"", &md5_hex(b"")));

        let (result, _) = run_with(config, store, input).await;
        assert!(result.unwrap().files[0].verified);
        assert_eq!(std::fs::read(tmp.path().join("bob/empty")).unwrap(), b"");
    }

    #[tokio::test]
    async fn mismatch_continues_and_still_advances_clock() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 1024);
        let mut input = utf("carol");
        input.extend_from_slice(&2i32.to_be_bytes());
        input.extend_from_slice(&file_frame("bad.txt", b"hello", "00000000000000000000000000000000"));
        input.extend_from_slice(&file_frame("good.txt", b"world", &md5_hex(b"world").to_lowercase()));

        let (result, _) = run_with(config, store.clone(), input).await;
        let report = result.unwrap();
        assert_eq!(report.files.len(), 2);
        assert!(!report.files[0].verified);
        assert!(report.files[1].verified);
        assert_eq!(report.checksum_failures(), 1);
        assert!(report.last_sync_updated.is_some());
        assert_eq!(std::fs::read(tmp.path().join("carol/bad.txt")).unwrap(), b"hello");
        assert_ne!(store.last_sync("carol").await.unwrap(), DEFAULT_LAST_SYNC);
    }

    #[tokio::test]
    async fn truncated_body_aborts_and_keeps_partial_file() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 16);
        let mut input = utf("dave");
        input.extend_from_slice(&1i32.to_be_bytes());
        input.extend_from_slice(&utf("big.bin"));
        input.extend_from_slice(&100i64.to_be_bytes());
        input.extend_from_slice(&[7u8; 40]);

        let (result, _) = run_with(config, store.clone(), input).await;
        match result {
            Err(SyncError::PrematureEof {
                received, declared, ..
            }) => {
                assert_eq!(received, 40);
                assert_eq!(declared, 100);
            }
            other => panic!("expected premature EOF, got {:?}", other),
        }
        assert_eq!(std::fs::read(tmp.path().join("dave/big.bin")).unwrap().len(), 40);
        assert_eq!(store.last_sync("dave").await.unwrap(), DEFAULT_LAST_SYNC);
    }

    #[tokio::test]
    async fn negative_counts_and_sizes_are_malformed() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 1024);

        let mut input = utf("erin");
        input.extend_from_slice(&(-1i32).to_be_bytes());
        let (result, _) = run_with(config.clone(), store.clone(), input).await;
        assert!(matches!(
            result,
            Err(SyncError::Malformed { stage: Stage::AwaitFileCount, .. })
        ));

        let mut input = utf("erin");
        input.extend_from_slice(&1i32.to_be_bytes());
        input.extend_from_slice(&utf("x"));
        input.extend_from_slice(&(-5i64).to_be_bytes());
        let (result, _) = run_with(config, store.clone(), input).await;
        assert!(matches!(
            result,
            Err(SyncError::Malformed { stage: Stage::ReceiveFile, .. })
        ));
        assert_eq!(store.last_sync("erin").await.unwrap(), DEFAULT_LAST_SYNC);
    }

    #[tokio::test]
    async fn traversal_names_are_rejected_before_writing() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 1024);

        let (result, out) = run_with(config.clone(), store.clone(), utf("../evil")).await;
        assert!(matches!(result, Err(SyncError::InvalidPath { kind: "client id", .. })));
        assert!(out.is_empty());

        let mut input = utf("frank");
        input.extend_from_slice(&1i32.to_be_bytes());
        input.extend_from_slice(&file_frame("../../escape.txt", b"x", &md5_hex(b"x")));
        let (result, _) = run_with(config, store, input).await;
        assert!(matches!(result, Err(SyncError::InvalidPath { kind: "file name", .. })));
        assert!(!tmp.path().join("escape.txt").exists());
    }

    #[tokio::test]
    async fn disconnect_before_id_is_transport_error() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 1024);
        let (result, _) = run_with(config, store, Vec::new()).await;
        let err = result.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(err.stage(), Stage::AwaitClientId);
    }

    #[tokio::test]
    async fn returning_client_gets_stored_timestamp() {
        let tmp = TempDir::new().unwrap();
        let (config, store) = setup(&tmp, 1024);
        std::fs::create_dir_all(tmp.path().join("greg")).unwrap();
        std::fs::write(
            tmp.path().join("greg/.properties"),
            "greg.lastSync=2023-11-05 18:30:00\n",
        )
        .unwrap();
        let mut input = utf("greg");
        input.extend_from_slice(&0i32.to_be_bytes());

        let (result, out) = run_with(config, store, input).await;
        assert_eq!(result.unwrap().previous_sync, "2023-11-05 18:30:00");
        assert_eq!(&out[4..], &utf("2023-11-05 18:30:00")[..]);
    }

    #[tokio::test]
    async fn trickling_client_hits_session_deadline() {
        let tmp = TempDir::new().unwrap();
        let config = Arc::new(SessionConfig {
            storage_root: tmp.path().to_path_buf(),
            io_timeout: Some(std::time::Duration::from_secs(5)),
            session_timeout: Some(std::time::Duration::from_millis(150)),
            ..SessionConfig::default()
        });
        let store = Arc::new(MetadataStore::new(tmp.path()));
        let (server, mut client) = duplex(1 << 16);
        let session = Session::new(server, "test", config, store.clone(), Arc::new(NoopLogger));
        let running = tokio::spawn(session.run());

        let mut head = utf("hank");
        head.extend_from_slice(&1i32.to_be_bytes());
        head.extend_from_slice(&utf("slow.bin"));
        head.extend_from_slice(&100i64.to_be_bytes());
        client.write_all(&head).await.unwrap();
        // One byte at a time, each well inside the per-read deadline
        for _ in 0..20 {
            if client.write_all(&[1]).await.is_err() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(25)).await;
        }

        let result = tokio::time::timeout(std::time::Duration::from_secs(2), running)
            .await
            .expect("session outlived its deadline")
            .unwrap();
        match result {
            Err(SyncError::Transport {
                stage: Stage::ReceiveFile,
                source: WireError::Timeout { op: "session", ms: 150 },
            }) => {}
            other => panic!("expected session timeout, got {:?}", other),
        }
        assert_eq!(store.last_sync("hank").await.unwrap(), DEFAULT_LAST_SYNC);
    }
}
