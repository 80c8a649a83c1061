//! Per-span mailbox reconciling frame delivery and retrieval.
//!
//! The read loop `put`s frames as they arrive; a [`crate::Receiver`]
//! `get`s them, possibly before they exist. Whichever side arrives first
//! waits for the other through a [`Promise`]. Exactly one `get` caller
//! observes each frame, in arrival order.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::{promise, ChannelError, Frame, Promise, PromiseFuture};

/// Shared per-span state. Jointly owned by the dispatching read loop and
/// the consuming receiver.
#[derive(Debug, Default)]
pub struct Mailbox {
    inner: Mutex<MailboxInner>,
}

#[derive(Debug, Default)]
struct MailboxInner {
    /// Frames delivered but not yet claimed. Empty whenever `pending` is
    /// non-empty.
    queue: VecDeque<Frame>,
    /// Waiters that arrived before their frame, oldest first.
    pending: VecDeque<Promise<Frame>>,
    /// Sticky terminal error; never cleared once set.
    broken: Option<ChannelError>,
}

impl Mailbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a frame: hand it to the oldest waiter if one exists,
    /// otherwise queue it.
    ///
    /// # Panics
    ///
    /// Panics if the mailbox is already broken. The dispatch path must
    /// never push past a terminal error.
    pub fn put(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        assert!(
            inner.broken.is_none(),
            "frame delivered to a broken mailbox"
        );
        match inner.pending.pop_front() {
            Some(mut waiter) => waiter.set_value(frame),
            None => inner.queue.push_back(frame),
        }
    }

    /// Set the sticky terminal error and break every pending waiter in
    /// FIFO order. Frames still queued are discarded.
    ///
    /// Idempotent: a second failure (e.g. connection teardown after an
    /// error frame already broke this span) keeps the first error.
    pub fn fail(&self, error: ChannelError) {
        let mut inner = self.inner.lock();
        if inner.broken.is_some() {
            return;
        }
        inner.broken = Some(error.clone());
        inner.queue.clear();
        while let Some(mut waiter) = inner.pending.pop_front() {
            waiter.set_error(error.clone());
        }
    }

    /// Fetch the next frame: already-resolved if one is queued or the
    /// mailbox is broken, otherwise a future resolved by a later `put`.
    pub fn get(&self) -> PromiseFuture<Frame> {
        let mut inner = self.inner.lock();
        if let Some(error) = &inner.broken {
            return PromiseFuture::broken(error.clone());
        }
        if let Some(frame) = inner.queue.pop_front() {
            return PromiseFuture::ready(frame);
        }
        let (p, f) = promise();
        inner.pending.push_back(p);
        f
    }

    pub fn is_broken(&self) -> bool {
        self.inner.lock().broken.is_some()
    }
}
