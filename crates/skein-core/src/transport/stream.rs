use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex as AsyncMutex;

use crate::{DecodeError, Frame, TransportError};

use super::TransportBackend;

/// Fixed frame header: span (u64) + type (u32).
const HEADER_SIZE: usize = 12;

/// Upper bound on a single frame, to keep a corrupt length prefix from
/// allocating unboundedly.
const MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

#[derive(Clone)]
pub struct StreamTransport {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for StreamTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamTransport").finish_non_exhaustive()
    }
}

struct StreamInner {
    reader: AsyncMutex<Box<dyn AsyncRead + Unpin + Send + Sync>>,
    writer: AsyncMutex<Box<dyn AsyncWrite + Unpin + Send + Sync>>,
    closed: AtomicBool,
}

impl StreamTransport {
    pub fn new<S>(stream: S) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + Sync + 'static,
    {
        let (reader, writer) = tokio::io::split(stream);
        Self {
            inner: Arc::new(StreamInner {
                reader: AsyncMutex::new(Box::new(reader)),
                writer: AsyncMutex::new(Box::new(writer)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn pair() -> (Self, Self) {
        let (a, b) = tokio::io::duplex(65536);
        (Self::new(a), Self::new(b))
    }

    fn is_closed_inner(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

impl TransportBackend for StreamTransport {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let frame_len = HEADER_SIZE + frame.payload.len();

        let mut writer = self.inner.writer.lock().await;
        writer.write_all(&(frame_len as u32).to_le_bytes()).await?;
        writer.write_all(&frame.span.to_le_bytes()).await?;
        writer.write_all(&frame.ty.to_le_bytes()).await?;
        if !frame.payload.is_empty() {
            writer.write_all(&frame.payload).await?;
        }
        writer.flush().await?;
        Ok(())
    }

    async fn recv_frame(&self) -> Result<Frame, TransportError> {
        if self.is_closed_inner() {
            return Err(TransportError::Closed);
        }

        let mut reader = self.inner.reader.lock().await;

        let mut len_buf = [0u8; 4];
        reader.read_exact(&mut len_buf).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::UnexpectedEof {
                TransportError::Closed
            } else {
                TransportError::Io(e)
            }
        })?;
        let frame_len = u32::from_le_bytes(len_buf) as usize;
        if frame_len < HEADER_SIZE {
            return Err(TransportError::Decode(DecodeError::FrameTooShort {
                len: frame_len,
                min: HEADER_SIZE,
            }));
        }
        if frame_len > MAX_FRAME_SIZE {
            return Err(TransportError::Decode(DecodeError::InvalidPayload(
                format!("frame of {frame_len} bytes exceeds limit"),
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        reader.read_exact(&mut header).await?;
        let span = u64::from_le_bytes(header[0..8].try_into().expect("fixed slice"));
        let ty = u32::from_le_bytes(header[8..12].try_into().expect("fixed slice"));

        let payload_len = frame_len - HEADER_SIZE;
        let payload = if payload_len > 0 {
            let mut buf = vec![0u8; payload_len];
            reader.read_exact(&mut buf).await?;
            Bytes::from(buf)
        } else {
            Bytes::new()
        };

        Ok(Frame::new(span, ty, payload))
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }

    fn is_closed(&self) -> bool {
        self.is_closed_inner()
    }
}
