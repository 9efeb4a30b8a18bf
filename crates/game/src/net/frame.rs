//! Length-prefixed framing over a reliable byte stream.
//!
//! Frame format: `[length: u32 LE][payload: length bytes]` with
//! `1 <= length <= MAX_FRAME_LEN`.

use std::io;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

use super::cancel::CancelToken;

pub const MAX_FRAME_LEN: usize = 1024 * 1024;
pub const FRAME_HEADER_LEN: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame length {0} outside the accepted range")]
    InvalidLength(usize),
    #[error("stream write failed: {0}")]
    Io(#[from] io::Error),
}

/// Write half of a framed stream. Concurrent senders are serialized so frames
/// never interleave.
#[derive(Debug)]
pub struct FrameWriter<W> {
    inner: Mutex<W>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner: Mutex::new(inner),
        }
    }

    pub async fn send(&self, payload: &[u8]) -> Result<(), FrameError> {
        if payload.is_empty() || payload.len() > MAX_FRAME_LEN {
            return Err(FrameError::InvalidLength(payload.len()));
        }

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
        frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        frame.extend_from_slice(payload);

        let mut writer = self.inner.lock().await;
        writer.write_all(&frame).await?;
        writer.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&self) {
        let mut writer = self.inner.lock().await;
        if let Err(e) = writer.shutdown().await {
            log::debug!("Stream shutdown failed: {}", e);
        }
    }
}

/// Read half of a framed stream. Owned by exactly one receive task.
#[derive(Debug)]
pub struct FrameReader<R> {
    inner: R,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Returns the next payload, or `None` once the stream can no longer be
    /// trusted: end of stream, I/O failure, an out-of-range length, or
    /// cancellation.
    pub async fn receive(&mut self, cancel: &mut CancelToken) -> Option<Vec<u8>> {
        if cancel.is_cancelled() {
            return None;
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => None,
            frame = read_frame(&mut self.inner) => frame,
        }
    }
}

async fn read_frame<R: AsyncRead + Unpin>(reader: &mut R) -> Option<Vec<u8>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    if let Err(e) = reader.read_exact(&mut header).await {
        log::debug!("Frame header read ended: {}", e);
        return None;
    }

    let length = u32::from_le_bytes(header) as usize;
    if length == 0 || length > MAX_FRAME_LEN {
        log::warn!("Rejecting frame with length {}", length);
        return None;
    }

    let mut payload = vec![0u8; length];
    if let Err(e) = reader.read_exact(&mut payload).await {
        log::debug!("Frame body read ended: {}", e);
        return None;
    }

    Some(payload)
}
