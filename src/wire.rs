//! Big-endian framing over an async byte stream with per-operation deadlines
//!
//! Mirrors `java.io.DataInputStream`/`DataOutputStream`: `readInt`,
//! `readLong`, `readUTF`, `writeInt`, `writeLong`, `writeUTF`.

use crate::error::{WireError, WireResult};
use crate::mutf8;
use std::future::Future;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

#[inline]
async fn timed<T, F>(deadline: Option<Duration>, op: &'static str, fut: F) -> WireResult<T>
where
    F: Future<Output = std::io::Result<T>>,
{
    match deadline {
        None => Ok(fut.await?),
        Some(d) => match timeout(d, fut).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Err(WireError::Timeout {
                op,
                ms: d.as_millis(),
            }),
        },
    }
}

/// A connection plus the deadline applied to each individual read or write.
pub struct Wire<S> {
    stream: S,
    deadline: Option<Duration>,
}

impl<S> Wire<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, deadline: Option<Duration>) -> Self {
        Self { stream, deadline }
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    pub async fn read_i32(&mut self) -> WireResult<i32> {
        timed(self.deadline, "read int", self.stream.read_i32()).await
    }

    pub async fn read_i64(&mut self) -> WireResult<i64> {
        timed(self.deadline, "read long", self.stream.read_i64()).await
    }

    pub async fn read_utf(&mut self) -> WireResult<String> {
        let deadline = self.deadline;
        let len = timed(deadline, "read string length", self.stream.read_u16()).await? as usize;
        let mut buf = vec![0u8; len];
        if len > 0 {
            timed(deadline, "read string", self.stream.read_exact(&mut buf)).await?;
        }
        mutf8::decode(&buf)
    }

    /// Read at most `buf.len()` raw bytes; `Ok(0)` means the peer closed.
    pub async fn read_chunk(&mut self, buf: &mut [u8]) -> WireResult<usize> {
        timed(self.deadline, "read file data", self.stream.read(buf)).await
    }

    pub async fn write_i32(&mut self, v: i32) -> WireResult<()> {
        timed(self.deadline, "write int", self.stream.write_i32(v)).await
    }

    pub async fn write_i64(&mut self, v: i64) -> WireResult<()> {
        timed(self.deadline, "write long", self.stream.write_i64(v)).await
    }

    pub async fn write_utf(&mut self, s: &str) -> WireResult<()> {
        let body = mutf8::encode(s)?;
        let mut frame = Vec::with_capacity(2 + body.len());
        frame.extend_from_slice(&(body.len() as u16).to_be_bytes());
        frame.extend_from_slice(&body);
        timed(self.deadline, "write string", self.stream.write_all(&frame)).await
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> WireResult<()> {
        timed(self.deadline, "write file data", self.stream.write_all(buf)).await
    }

    pub async fn flush(&mut self) -> WireResult<()> {
        timed(self.deadline, "flush", self.stream.flush()).await
    }
}
