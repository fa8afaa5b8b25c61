//! Bounded line reader and typed frame reader/writer.

use serde::Serialize;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader, BufWriter};
use toolbridge_domain::{ClientFrame, ErrorKind, FrameError, ServerFrame};
use tracing::trace;

/// Errors on the NDJSON transport.
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Frame exceeds maximum size of {0} bytes")]
    FrameTooLarge(usize),

    #[error("Malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Connection closed")]
    Closed,
}

impl ProtocolError {
    /// Whether the transport is unusable after this error.
    ///
    /// A malformed or oversized line is skipped; the stream stays aligned on
    /// the next newline.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ProtocolError::Io(_) | ProtocolError::Closed)
    }

    pub fn kind(&self) -> ErrorKind {
        ErrorKind::Protocol
    }
}

/// A frame type that can be parsed from one wire line.
pub trait WireFrame: Sized {
    fn parse_line(line: &str) -> Result<Self, FrameError>;
}

impl WireFrame for ClientFrame {
    fn parse_line(line: &str) -> Result<Self, FrameError> {
        ClientFrame::parse(line)
    }
}

impl WireFrame for ServerFrame {
    fn parse_line(line: &str) -> Result<Self, FrameError> {
        ServerFrame::parse(line)
    }
}

/// Reads newline-delimited frames from an async byte stream.
///
/// Lines longer than `max_frame_bytes` are discarded up to their newline and
/// reported as [`ProtocolError::FrameTooLarge`]; the next line reads normally.
pub struct FrameReader<R> {
    inner: BufReader<R>,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(reader: R, max_frame_bytes: usize) -> Self {
        Self {
            inner: BufReader::new(reader),
            max_frame_bytes,
        }
    }

    /// Read bytes up to the next `\n`. Returns `(line, oversized)`.
    async fn read_raw_line(&mut self) -> Result<(Vec<u8>, bool), ProtocolError> {
        let mut line = Vec::new();
        let mut oversized = false;
        loop {
            let available = self.inner.fill_buf().await?;
            if available.is_empty() {
                if line.is_empty() && !oversized {
                    return Err(ProtocolError::Closed);
                }
                // Unterminated final line.
                return Ok((line, oversized));
            }

            let (chunk, found) = match available.iter().position(|&b| b == b'\n') {
                Some(i) => (&available[..i], Some(i)),
                None => (available, None),
            };
            if !oversized {
                if line.len() + chunk.len() > self.max_frame_bytes {
                    oversized = true;
                    line.clear();
                } else {
                    line.extend_from_slice(chunk);
                }
            }

            let consumed = found.map(|i| i + 1).unwrap_or(available.len());
            self.inner.consume(consumed);
            if found.is_some() {
                return Ok((line, oversized));
            }
        }
    }

    /// Next non-blank line, or `Closed` at end of stream.
    pub async fn next_line(&mut self) -> Result<String, ProtocolError> {
        loop {
            let (bytes, oversized) = self.read_raw_line().await?;
            if oversized {
                return Err(ProtocolError::FrameTooLarge(self.max_frame_bytes));
            }
            let text = String::from_utf8_lossy(&bytes);
            let line = text.trim_end_matches('\r');
            if line.trim().is_empty() {
                continue;
            }
            trace!("wire <- {}", line);
            return Ok(line.to_string());
        }
    }

    /// Next typed frame. Non-fatal errors leave the reader usable.
    pub async fn next_frame<F: WireFrame>(&mut self) -> Result<F, ProtocolError> {
        let line = self.next_line().await?;
        Ok(F::parse_line(&line)?)
    }
}

/// Writes frames as single JSON lines.
pub struct FrameWriter<W: AsyncWrite + Unpin> {
    inner: BufWriter<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(writer: W) -> Self {
        Self {
            inner: BufWriter::new(writer),
        }
    }

    pub async fn send<F: Serialize>(&mut self, frame: &F) -> Result<(), ProtocolError> {
        let json = serde_json::to_string(frame)?;
        trace!("wire -> {}", json);
        self.inner.write_all(json.as_bytes()).await?;
        self.inner.write_all(b"\n").await?;
        self.inner.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> Result<(), ProtocolError> {
        self.inner.flush().await?;
        self.inner.shutdown().await?;
        Ok(())
    }
}
