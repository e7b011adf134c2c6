//! Push client speaking the sync protocol.
//!
//! Used by `homecloud-push` and by the integration tests. Files are
//! streamed in chunks of the size the server advertises; the MD5 is computed
//! on the fly and sent after the body.

use crate::checksum::ChecksumVerifier;
use crate::protocol::timeouts::CONNECT_MS;
use crate::wire::Wire;
use anyhow::{bail, Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

/// Server's reply to the client id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    pub buffer_size: u32,
    pub last_sync: String,
}

/// Where a pushed file's bytes come from.
#[derive(Debug, Clone)]
pub enum Source {
    Bytes(Vec<u8>),
    Path(PathBuf),
}

#[derive(Debug, Clone)]
pub struct PushItem {
    /// Name relative to the client's directory on the server
    pub name: String,
    pub source: Source,
    /// Sent instead of the computed digest when set.
    pub checksum: Option<String>,
}

impl PushItem {
    pub fn bytes(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            name: name.into(),
            source: Source::Bytes(data.into()),
            checksum: None,
        }
    }

    pub fn file(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            source: Source::Path(path.into()),
            checksum: None,
        }
    }

    pub fn with_checksum(mut self, checksum: impl Into<String>) -> Self {
        self.checksum = Some(checksum.into());
        self
    }
}

pub async fn connect(addr: &str) -> Result<TcpStream> {
    let stream = match timeout(Duration::from_millis(CONNECT_MS), TcpStream::connect(addr)).await {
        Ok(res) => res.with_context(|| format!("connect {}", addr))?,
        Err(_) => bail!("connect {} timed out ({} ms)", addr, CONNECT_MS),
    };
    let _ = stream.set_nodelay(true);
    Ok(stream)
}

pub struct PushClient<S> {
    wire: Wire<S>,
    handshake: Handshake,
}

impl PushClient<TcpStream> {
    pub async fn connect(addr: &str, client_id: &str, deadline: Option<Duration>) -> Result<Self> {
        let stream = connect(addr).await?;
        Self::start(stream, client_id, deadline).await
    }
}

impl<S> PushClient<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    /// Send the client id and read the server's handshake.
    pub async fn start(stream: S, client_id: &str, deadline: Option<Duration>) -> Result<Self> {
        let mut wire = Wire::new(stream, deadline);
        wire.write_utf(client_id).await.context("send client id")?;
        wire.flush().await?;
        let buffer_size = wire.read_i32().await.context("read buffer size")?;
        if buffer_size <= 0 {
            bail!("server advertised invalid buffer size {}", buffer_size);
        }
        let last_sync = wire.read_utf().await.context("read last sync")?;
        Ok(Self {
            wire,
            handshake: Handshake {
                buffer_size: buffer_size as u32,
                last_sync,
            },
        })
    }

    pub fn handshake(&self) -> &Handshake {
        &self.handshake
    }

    /// Send the whole batch, then wait for the server to close the
    /// connection, which it does once the batch is processed.
    pub async fn push(mut self, items: &[PushItem]) -> Result<()> {
        let count = i32::try_from(items.len()).context("too many files for one batch")?;
        self.wire.write_i32(count).await.context("send file count")?;
        for item in items {
            self.send_item(item)
                .await
                .with_context(|| format!("send {}", item.name))?;
        }
        self.wire.flush().await?;
        self.finish().await
    }

    async fn send_item(&mut self, item: &PushItem) -> Result<()> {
        self.wire.write_utf(&item.name).await?;
        let mut verifier = ChecksumVerifier::new();
        match &item.source {
            Source::Bytes(data) => {
                self.wire.write_i64(data.len() as i64).await?;
                for chunk in data.chunks(self.handshake.buffer_size as usize) {
                    self.wire.write_all(chunk).await?;
                    verifier.update(chunk);
                }
            }
            Source::Path(path) => {
                let mut f = tokio::fs::File::open(path)
                    .await
                    .with_context(|| format!("open {}", path.display()))?;
                let size = f.metadata().await?.len();
                self.wire.write_i64(size as i64).await?;
                let mut buf = vec![0u8; self.handshake.buffer_size as usize];
                let mut remaining = size;
                while remaining > 0 {
                    let want = remaining.min(buf.len() as u64) as usize;
                    let n = f.read(&mut buf[..want]).await?;
                    if n == 0 {
                        bail!("{} shrank while sending", path.display());
                    }
                    self.wire.write_all(&buf[..n]).await?;
                    verifier.update(&buf[..n]);
                    remaining -= n as u64;
                }
            }
        }
        let checksum = match &item.checksum {
            Some(c) => c.clone(),
            None => verifier.finalize_hex(),
        };
        self.wire.write_utf(&checksum).await?;
        Ok(())
    }

    async fn finish(self) -> Result<()> {
        let mut stream = self.wire.into_inner();
        stream.shutdown().await.ok();
        let mut sink = Vec::new();
        stream.read_to_end(&mut sink).await.ok();
        Ok(())
    }
}
