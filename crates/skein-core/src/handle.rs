//! Per-span write/read handles exposed to application code.

use std::sync::Arc;

use bytes::Bytes;

use crate::{Frame, Mailbox, PromiseFuture, Session};

/// Write half of a span. Cheap to clone; every submission goes through
/// the session's single-flight write queue.
#[derive(Clone)]
pub struct Sender {
    span: u64,
    session: Arc<Session>,
}

impl Sender {
    pub(crate) fn new(span: u64, session: Arc<Session>) -> Self {
        Self { span, session }
    }

    pub fn span(&self) -> u64 {
        self.span
    }

    /// Send one chunk of payload on this span.
    ///
    /// Resolves when the physical write completes. Fails fast with
    /// [`crate::ChannelError::NotRegistered`] if the span was revoked.
    pub fn send(&self, payload: Bytes) -> PromiseFuture<()> {
        self.session
            .push_on(self.span, Frame::chunk(self.span, payload))
    }

    /// Report an application error and end the stream on the peer side.
    pub fn error(&self, category: u32, code: u32, message: &str) -> PromiseFuture<()> {
        self.session
            .push_on(self.span, Frame::error(self.span, category, code, message))
    }

    /// Finish the stream with a choke frame.
    pub fn close(&self) -> PromiseFuture<()> {
        self.session.push_on(self.span, Frame::choke(self.span))
    }
}

impl std::fmt::Debug for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sender").field("span", &self.span).finish()
    }
}

/// Read half of a span.
///
/// Holds the span's mailbox; dropping the receiver revokes the span so
/// the dispatch path stops delivering to state nobody will read.
pub struct Receiver {
    span: u64,
    session: Arc<Session>,
    mailbox: Arc<Mailbox>,
}

impl Receiver {
    pub(crate) fn new(span: u64, session: Arc<Session>, mailbox: Arc<Mailbox>) -> Self {
        Self {
            span,
            session,
            mailbox,
        }
    }

    pub fn span(&self) -> u64 {
        self.span
    }

    /// Fetch the next inbound frame for this span.
    ///
    /// Resolves immediately if a frame is queued or the span is already
    /// broken; otherwise when the read loop delivers one.
    pub fn recv(&self) -> PromiseFuture<Frame> {
        self.mailbox.get()
    }
}

impl Drop for Receiver {
    fn drop(&mut self) {
        self.session.revoke(self.span);
    }
}

impl std::fmt::Debug for Receiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Receiver")
            .field("span", &self.span)
            .finish()
    }
}
