//! Newline-delimited JSON over TCP.
//!
//! The host side listens on a local port handed to the engine through the
//! environment; each frame is one JSON document followed by `\n`. Frames are
//! forwarded as raw bytes: a frame that is not valid JSON is the decoder's
//! problem, not the socket's.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::{INBOUND_BUFFER, InboundFrames, Transport};
use crate::error::NetError;

/// Default host for the bridge socket.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Longest frame accepted from the host, newline excluded. Longer lines are
/// skipped.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Outcome of reading one line from the socket.
#[derive(Debug, PartialEq, Eq)]
enum FrameRead {
    Frame,
    Oversized,
    Eof,
}

/// Read the next newline-terminated frame into `buf`, without the line
/// terminator. Lines over [`MAX_FRAME_LEN`] are consumed and discarded.
async fn read_frame<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<FrameRead>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    let limit = MAX_FRAME_LEN as u64 + 1;
    let read = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if read == 0 {
        return Ok(FrameRead::Eof);
    }
    if buf.last() == Some(&b'\n') {
        buf.pop();
        if buf.last() == Some(&b'\r') {
            buf.pop();
        }
        return Ok(FrameRead::Frame);
    }
    if (buf.len() as u64) < limit {
        // Final frame without a trailing newline.
        return Ok(FrameRead::Frame);
    }

    buf.clear();
    loop {
        let (found, used) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(FrameRead::Eof);
            }
            match available.iter().position(|b| *b == b'\n') {
                Some(i) => (true, i + 1),
                None => (false, available.len()),
            }
        };
        reader.consume(used);
        if found {
            return Ok(FrameRead::Oversized);
        }
    }
}

/// A TCP connection to the host's bridge socket.
#[derive(Debug)]
pub struct TcpTransport {
    writer: Mutex<OwnedWriteHalf>,
    connected: Arc<AtomicBool>,
    reader: JoinHandle<()>,
}

impl TcpTransport {
    /// Connect to the host at `host:port`.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Io`] if the connection cannot be established.
    pub async fn connect(host: &str, port: u16) -> Result<(Self, InboundFrames), NetError> {
        info!(host, port, "connecting to host bridge socket");
        let stream = TcpStream::connect((host, port)).await?;
        stream.set_nodelay(true)?;
        let (read_half, write_half) = stream.into_split();

        let connected = Arc::new(AtomicBool::new(true));
        let (tx, rx) = mpsc::channel(INBOUND_BUFFER);

        let reader_connected = Arc::clone(&connected);
        let reader = tokio::spawn(async move {
            let mut reader = BufReader::new(read_half);
            let mut buf = Vec::new();
            loop {
                match read_frame(&mut reader, &mut buf).await {
                    Ok(FrameRead::Frame) => {
                        if buf.iter().all(u8::is_ascii_whitespace) {
                            continue;
                        }
                        if tx.send(std::mem::take(&mut buf)).await.is_err() {
                            break;
                        }
                    }
                    Ok(FrameRead::Oversized) => {
                        warn!(limit = MAX_FRAME_LEN, "dropping oversized frame from host");
                    }
                    Ok(FrameRead::Eof) => {
                        debug!("host closed the bridge socket");
                        break;
                    }
                    Err(e) => {
                        warn!(error = %e, "bridge socket read failed");
                        break;
                    }
                }
            }
            reader_connected.store(false, Ordering::SeqCst);
        });

        info!(host, port, "host bridge socket connected");
        Ok((
            Self {
                writer: Mutex::new(write_half),
                connected,
                reader,
            },
            rx,
        ))
    }
}

#[async_trait]
impl Transport for TcpTransport {
    async fn send(&self, frame: Vec<u8>) -> Result<(), NetError> {
        if !self.is_connected() {
            return Err(NetError::Disconnected);
        }
        let mut writer = self.writer.lock().await;
        let result = async {
            writer.write_all(&frame).await?;
            writer.write_all(b"\n").await?;
            writer.flush().await
        }
        .await;
        if let Err(e) = result {
            self.connected.store(false, Ordering::SeqCst);
            return Err(NetError::Io(e));
        }
        Ok(())
    }

    async fn close(&self) {
        self.connected.store(false, Ordering::SeqCst);
        if let Err(e) = self.writer.lock().await.shutdown().await {
            debug!(error = %e, "bridge socket shutdown failed");
        }
        self.reader.abort();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        self.reader.abort();
    }
}
