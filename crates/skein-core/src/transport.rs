//! Transport enum and internal backend trait.
//!
//! The public API is the [`Transport`] enum. Each backend lives in its
//! own module under `transport/` and implements the internal
//! [`TransportBackend`] trait.

use crate::{Frame, TransportError};

pub(crate) trait TransportBackend: Send + Sync + Clone + 'static {
    async fn send_frame(&self, frame: Frame) -> Result<(), TransportError>;
    async fn recv_frame(&self) -> Result<Frame, TransportError>;
    fn close(&self);
    fn is_closed(&self) -> bool;
}

#[derive(Clone, Debug)]
pub enum Transport {
    Mem(mem::MemTransport),
    Stream(stream::StreamTransport),
}

impl Transport {
    pub async fn send_frame(&self, frame: Frame) -> Result<(), TransportError> {
        match self {
            Transport::Mem(t) => t.send_frame(frame).await,
            Transport::Stream(t) => t.send_frame(frame).await,
        }
    }

    pub async fn recv_frame(&self) -> Result<Frame, TransportError> {
        match self {
            Transport::Mem(t) => t.recv_frame().await,
            Transport::Stream(t) => t.recv_frame().await,
        }
    }

    pub fn close(&self) {
        match self {
            Transport::Mem(t) => t.close(),
            Transport::Stream(t) => t.close(),
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Transport::Mem(t) => t.is_closed(),
            Transport::Stream(t) => t.is_closed(),
        }
    }

    /// In-memory connected pair, for tests and local wiring.
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = mem::MemTransport::pair();
        (Transport::Mem(a), Transport::Mem(b))
    }

    pub fn stream<S>(stream: S) -> Self
    where
        S: tokio::io::AsyncRead + tokio::io::AsyncWrite + Send + Sync + Unpin + 'static,
    {
        Transport::Stream(stream::StreamTransport::new(stream))
    }
}

pub mod mem;
pub mod stream;
