//! Error types.

use core::fmt;

/// Errors surfaced through a span's mailbox and write futures.
///
/// These are cloned into every waiter of a broken mailbox, so the type is
/// `Clone` and carries no live OS resources. Transport failures are folded
/// into [`ChannelError::Disconnected`] at teardown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// The peer finished the stream with a choke frame.
    Choked,
    /// The peer reported an application error on this span.
    Remote {
        category: u32,
        code: u32,
        message: String,
    },
    /// The connection broke underneath this span.
    Disconnected(String),
    /// The session is dead; no further writes are accepted.
    NotConnected,
    /// Attempt to send on a span with no registered channel.
    NotRegistered(u64),
}

impl fmt::Display for ChannelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Choked => write!(f, "end of stream"),
            Self::Remote {
                category,
                code,
                message,
            } => {
                write!(f, "remote error [{category}/{code}]: {message}")
            }
            Self::Disconnected(msg) => write!(f, "connection lost: {msg}"),
            Self::NotConnected => write!(f, "not connected"),
            Self::NotRegistered(span) => {
                write!(f, "span {span} has no registered channel")
            }
        }
    }
}

impl std::error::Error for ChannelError {}

impl From<&TransportError> for ChannelError {
    fn from(e: &TransportError) -> Self {
        match e {
            TransportError::Closed => Self::Disconnected("transport closed".into()),
            other => Self::Disconnected(other.to_string()),
        }
    }
}

/// Transport-level errors.
#[derive(Debug)]
pub enum TransportError {
    Closed,
    Io(std::io::Error),
    Decode(DecodeError),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Closed => write!(f, "transport closed"),
            Self::Io(e) => write!(f, "I/O error: {e}"),
            Self::Decode(e) => write!(f, "decode error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Decode(e) => Some(e),
            Self::Closed => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

impl From<DecodeError> for TransportError {
    fn from(e: DecodeError) -> Self {
        Self::Decode(e)
    }
}

/// Frame decoding errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    FrameTooShort { len: usize, min: usize },
    InvalidPayload(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::FrameTooShort { len, min } => {
                write!(f, "frame too short: {len} < {min}")
            }
            Self::InvalidPayload(msg) => write!(f, "invalid payload: {msg}"),
        }
    }
}

impl std::error::Error for DecodeError {}
