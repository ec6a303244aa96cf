//! Raw tuner client: connect, handshake, send, timed receive and drain.
//!
//! Everything here is policy-free. Request serialization, state discovery and
//! reconnects live in [`crate::connection`].

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::time::{timeout, Instant};
use tracing::{debug, trace};

use super::frame::{self, Frame, IDENTITY_PREFIX, STATE_LIST_PREFIX};
use crate::error::{GameError, Result};

/// Buffered frame reader.
///
/// Bytes are accumulated in an internal buffer and frames are cut from it, so
/// a receive that times out halfway through a frame leaves the partial bytes
/// in place for the next call.
pub struct FrameReader<R> {
    reader: R,
    buf: Vec<u8>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            reader,
            buf: Vec::with_capacity(8 * 1024),
            max_frame_bytes,
        }
    }

    /// Read the next frame, waiting as long as it takes.
    pub async fn read_frame(&mut self) -> Result<Frame> {
        loop {
            if let Some((frame, used)) = Frame::decode(&self.buf, self.max_frame_bytes)? {
                self.buf.drain(..used);
                return Ok(frame);
            }
            let n = self.reader.read_buf(&mut self.buf).await?;
            if n == 0 {
                return Err(match self.buf.len() {
                    0 => GameError::Disconnected("server closed the connection".to_string()),
                    len if len < frame::FRAME_HEADER_LEN => GameError::Truncated("header"),
                    _ => GameError::Truncated("payload"),
                });
            }
        }
    }

    /// Bytes received but not yet returned as frames.
    pub fn buffered(&self) -> usize {
        self.buf.len()
    }
}

pub type TunerReader = FrameReader<OwnedReadHalf>;
pub type TunerWriter = OwnedWriteHalf;

/// Open a TCP connection to the tuner server.
pub async fn connect(
    host: &str,
    port: u16,
    connect_timeout: Duration,
    max_frame_bytes: usize,
) -> Result<(TunerReader, TunerWriter)> {
    let addr = format!("{}:{}", host, port);
    let stream = match timeout(connect_timeout, TcpStream::connect(&addr)).await {
        Ok(Ok(stream)) => stream,
        Ok(Err(e)) => {
            return Err(GameError::Unreachable {
                addr,
                reason: e.to_string(),
            })
        }
        Err(_) => {
            return Err(GameError::Unreachable {
                addr,
                reason: format!("connect timed out after {:?}", connect_timeout),
            })
        }
    };
    stream.set_nodelay(true).ok();
    debug!(%addr, "Connected to tuner socket");

    let (read_half, write_half) = stream.into_split();
    Ok((FrameReader::new(read_half, max_frame_bytes), write_half))
}

/// Identity and raw state list announced by the server right after accept.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handshake {
    /// Full `APP:` payload, prefix included.
    pub identity: String,
    /// Tokens after `LSQ:`, split on `:`.
    pub raw_states: Vec<String>,
}

/// Wait for the `APP:` and `LSQ:` frames. Other frames are skipped.
pub async fn handshake<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    within: Duration,
) -> Result<Handshake> {
    let deadline = Instant::now() + within;
    let mut identity = None;
    let mut raw_states = None;

    while identity.is_none() || raw_states.is_none() {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(GameError::DeadlineExceeded(within));
        }
        let Some(frame) = recv_frame(reader, remaining).await? else {
            return Err(GameError::DeadlineExceeded(within));
        };
        let text = frame.text();
        if text.starts_with(IDENTITY_PREFIX) {
            identity = Some(text);
        } else if let Some(list) = text.strip_prefix(STATE_LIST_PREFIX) {
            raw_states = Some(
                list.split(':')
                    .filter(|token| !token.is_empty())
                    .map(str::to_string)
                    .collect(),
            );
        } else {
            trace!(tag = frame.tag, "Skipping pre-handshake frame");
        }
    }

    Ok(Handshake {
        identity: identity.unwrap_or_default(),
        raw_states: raw_states.unwrap_or_default(),
    })
}

pub async fn send_frame<W: AsyncWrite + Unpin>(writer: &mut W, tag: u8, payload: &[u8]) -> Result<()> {
    let bytes = frame::encode_frame(tag, payload);
    writer
        .write_all(&bytes)
        .await
        .map_err(|e| GameError::Disconnected(format!("write failed: {}", e)))?;
    writer
        .flush()
        .await
        .map_err(|e| GameError::Disconnected(format!("flush failed: {}", e)))?;
    Ok(())
}

/// Receive one frame, or `None` if nothing complete arrives within `wait`.
pub async fn recv_frame<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    wait: Duration,
) -> Result<Option<Frame>> {
    match timeout(wait, reader.read_frame()).await {
        Ok(Ok(frame)) => Ok(Some(frame)),
        Ok(Err(e)) => Err(e),
        Err(_) => Ok(None),
    }
}

/// Read frames until the line goes quiet for `quiet`.
pub async fn drain<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    quiet: Duration,
) -> Result<Vec<Frame>> {
    let mut frames = Vec::new();
    while let Some(frame) = recv_frame(reader, quiet).await? {
        frames.push(frame);
    }
    Ok(frames)
}
