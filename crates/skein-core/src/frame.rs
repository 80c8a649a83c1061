//! Wire frames and their decoded kinds.

use bytes::{BufMut, Bytes, BytesMut};

use crate::DecodeError;

/// Frame type ids, as assigned by the runtime protocol.
pub mod frame_type {
    pub const HANDSHAKE: u32 = 0;
    pub const HEARTBEAT: u32 = 1;
    pub const TERMINATE: u32 = 2;
    pub const INVOKE: u32 = 3;
    pub const CHUNK: u32 = 4;
    pub const ERROR: u32 = 5;
    pub const CHOKE: u32 = 6;
}

/// One unit of wire transfer. Immutable once constructed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Logical exchange this frame belongs to; 0 for control frames.
    pub span: u64,
    /// Numeric frame type, see [`frame_type`].
    pub ty: u32,
    /// Opaque argument bytes.
    pub payload: Bytes,
}

/// A frame's type decoded into an exhaustive sum.
///
/// Every dispatch site matches on this instead of raw numeric ids, so a
/// forgotten case is a compile error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    Handshake,
    Heartbeat,
    Terminate,
    Invoke,
    Chunk,
    Error,
    Choke,
    Unknown(u32),
}

impl Frame {
    pub fn new(span: u64, ty: u32, payload: Bytes) -> Self {
        Self { span, ty, payload }
    }

    pub fn kind(&self) -> FrameKind {
        match self.ty {
            frame_type::HANDSHAKE => FrameKind::Handshake,
            frame_type::HEARTBEAT => FrameKind::Heartbeat,
            frame_type::TERMINATE => FrameKind::Terminate,
            frame_type::INVOKE => FrameKind::Invoke,
            frame_type::CHUNK => FrameKind::Chunk,
            frame_type::ERROR => FrameKind::Error,
            frame_type::CHOKE => FrameKind::Choke,
            other => FrameKind::Unknown(other),
        }
    }

    /// Handshake carrying the worker's assigned uuid. Always the first
    /// frame a worker emits.
    pub fn handshake(uuid: &str) -> Self {
        Self::new(
            0,
            frame_type::HANDSHAKE,
            Bytes::copy_from_slice(uuid.as_bytes()),
        )
    }

    pub fn heartbeat() -> Self {
        Self::new(0, frame_type::HEARTBEAT, Bytes::new())
    }

    pub fn terminate() -> Self {
        Self::new(0, frame_type::TERMINATE, Bytes::new())
    }

    /// Invocation frame opening a new span. The payload carries the event
    /// name length-prefixed, followed by the raw argument bytes.
    pub fn invoke(span: u64, event: &str, args: &[u8]) -> Self {
        let mut buf = BytesMut::with_capacity(4 + event.len() + args.len());
        buf.put_u32_le(event.len() as u32);
        buf.put_slice(event.as_bytes());
        buf.put_slice(args);
        Self::new(span, frame_type::INVOKE, buf.freeze())
    }

    pub fn chunk(span: u64, payload: Bytes) -> Self {
        Self::new(span, frame_type::CHUNK, payload)
    }

    /// Application error frame: category, code and a UTF-8 message.
    pub fn error(span: u64, category: u32, code: u32, message: &str) -> Self {
        let mut buf = BytesMut::with_capacity(12 + message.len());
        buf.put_u32_le(category);
        buf.put_u32_le(code);
        buf.put_u32_le(message.len() as u32);
        buf.put_slice(message.as_bytes());
        Self::new(span, frame_type::ERROR, buf.freeze())
    }

    pub fn choke(span: u64) -> Self {
        Self::new(span, frame_type::CHOKE, Bytes::new())
    }

    /// Decode the event name and argument bytes of an invoke payload.
    pub fn invoke_event(&self) -> Result<(String, Bytes), DecodeError> {
        let p = &self.payload;
        if p.len() < 4 {
            return Err(DecodeError::InvalidPayload("invoke payload truncated".into()));
        }
        let name_len = u32::from_le_bytes([p[0], p[1], p[2], p[3]]) as usize;
        if p.len() < 4 + name_len {
            return Err(DecodeError::InvalidPayload(
                "invoke event name truncated".into(),
            ));
        }
        let name = std::str::from_utf8(&p[4..4 + name_len])
            .map_err(|_| DecodeError::InvalidPayload("event name is not UTF-8".into()))?
            .to_owned();
        Ok((name, self.payload.slice(4 + name_len..)))
    }

    /// Decode the `(category, code, message)` of an error payload.
    ///
    /// A malformed payload degrades to `(0, 0, "malformed error frame")`
    /// rather than failing: the frame already means "this span is dead".
    pub fn remote_error(&self) -> (u32, u32, String) {
        let p = &self.payload;
        if p.len() < 12 {
            return (0, 0, "malformed error frame".into());
        }
        let category = u32::from_le_bytes([p[0], p[1], p[2], p[3]]);
        let code = u32::from_le_bytes([p[4], p[5], p[6], p[7]]);
        let msg_len = u32::from_le_bytes([p[8], p[9], p[10], p[11]]) as usize;
        if p.len() < 12 + msg_len {
            return (category, code, "malformed error frame".into());
        }
        let message = String::from_utf8_lossy(&p[12..12 + msg_len]).into_owned();
        (category, code, message)
    }
}
