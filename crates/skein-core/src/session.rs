//! Session: multiplexes many logical spans over one transport.
//!
//! # Key invariants
//!
//! Only [`Session::run`] calls `transport.recv_frame()`; all inbound
//! routing happens there, one frame at a time. Only the writer task calls
//! `transport.send_frame()`; outbound frames go through a strict FIFO
//! queue with a single frame in flight, so wire order equals submission
//! order.
//!
//! Continuation frames (`chunk`/`error`/`choke`) are routed into the
//! matching span's [`Mailbox`]. Everything else is forwarded over the
//! control route to whoever owns the session (the worker state machine),
//! keeping protocol decisions out of the read loop.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use crate::{
    promise, ChannelError, Frame, FrameKind, Mailbox, Promise, PromiseFuture, Receiver, Sender,
    Transport, TransportError,
};

/// One queued outbound write. `done` resolves when the frame hits the
/// transport, or breaks with the write error.
struct WriteJob {
    frame: Frame,
    done: Promise<()>,
}

/// State shared between the session handle, the writer task and the read
/// loop. Split out so the writer task does not keep the session itself
/// alive.
struct Shared {
    spans: Mutex<HashMap<u64, Arc<Mailbox>>>,
    control_tx: Mutex<Option<mpsc::UnboundedSender<Frame>>>,
    closed: AtomicBool,
}

impl Shared {
    /// Mark the session dead and break every live mailbox with `error`.
    /// Idempotent; the first error wins.
    fn teardown(&self, error: &ChannelError) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let drained: Vec<_> = self.spans.lock().drain().collect();
        tracing::debug!(
            live_spans = drained.len(),
            %error,
            "session teardown: breaking live spans"
        );
        for (_, mailbox) in drained {
            mailbox.fail(error.clone());
        }
        // Dropping the control route tells the owner the session is gone.
        self.control_tx.lock().take();
    }
}

pub struct Session {
    transport: Transport,
    shared: Arc<Shared>,
    next_span: AtomicU64,
    write_tx: mpsc::UnboundedSender<WriteJob>,
}

impl Session {
    /// Wrap an established transport. Spawns the writer task; must be
    /// called within a tokio runtime.
    pub fn new(transport: Transport) -> Arc<Self> {
        let shared = Arc::new(Shared {
            spans: Mutex::new(HashMap::new()),
            control_tx: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        let (write_tx, write_rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(transport.clone(), shared.clone(), write_rx));

        Arc::new(Self {
            transport,
            shared,
            next_span: AtomicU64::new(1),
            write_tx,
        })
    }

    /// Connect to the first reachable endpoint, in list order.
    ///
    /// On exhaustion the error of the last attempt is returned.
    pub async fn connect(endpoints: &[SocketAddr]) -> Result<Arc<Self>, TransportError> {
        let mut last_error: Option<std::io::Error> = None;
        for endpoint in endpoints {
            match TcpStream::connect(endpoint).await {
                Ok(stream) => {
                    tracing::debug!(%endpoint, "connected");
                    return Ok(Self::new(Transport::stream(stream)));
                }
                Err(e) => {
                    tracing::warn!(%endpoint, error = %e, "connect attempt failed");
                    last_error = Some(e);
                }
            }
        }
        Err(TransportError::Io(last_error.unwrap_or_else(|| {
            std::io::Error::new(std::io::ErrorKind::InvalidInput, "no endpoints given")
        })))
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::Acquire)
    }

    /// Tear the session down from the owning side: every live mailbox is
    /// broken with a connection-closed error, further writes are
    /// rejected, and the transport is closed. Idempotent.
    pub fn shutdown(&self) {
        self.shared
            .teardown(&ChannelError::Disconnected("session shut down".into()));
        self.transport.close();
    }

    /// Open a new span for `event`: registers its mailbox, submits the
    /// invoke frame, and resolves to the handle pair once the write
    /// completes. A failed write removes the span again.
    pub async fn invoke(
        self: &Arc<Self>,
        event: &str,
        args: &[u8],
    ) -> Result<(Sender, Receiver), ChannelError> {
        let span = self.next_span.fetch_add(1, Ordering::Relaxed);
        let mailbox = Arc::new(Mailbox::new());
        self.shared.spans.lock().insert(span, mailbox.clone());
        tracing::debug!(span, event, "invoke: span registered");

        match self.submit(Frame::invoke(span, event, args)).await {
            Ok(()) => Ok((
                Sender::new(span, self.clone()),
                Receiver::new(span, self.clone(), mailbox),
            )),
            Err(e) => {
                self.revoke(span);
                Err(e)
            }
        }
    }

    /// Register a mailbox for a peer-opened span (an inbound `invoke`)
    /// and return its handle pair.
    ///
    /// # Panics
    ///
    /// Panics if the span is already registered: the peer reusing a live
    /// span id violates the multiplexing invariants.
    pub fn accept(self: &Arc<Self>, span: u64) -> (Sender, Receiver) {
        let mailbox = Arc::new(Mailbox::new());
        let prev = self.shared.spans.lock().insert(span, mailbox.clone());
        assert!(prev.is_none(), "span {span} already registered");
        tracing::debug!(span, "inbound span registered");
        (
            Sender::new(span, self.clone()),
            Receiver::new(span, self.clone(), mailbox),
        )
    }

    /// Remove a span's mailbox. A no-op if already absent.
    pub fn revoke(&self, span: u64) {
        if self.shared.spans.lock().remove(&span).is_some() {
            tracing::debug!(span, "span revoked");
        }
    }

    pub fn has_span(&self, span: u64) -> bool {
        self.shared.spans.lock().contains_key(&span)
    }

    /// Queue a frame without any span bookkeeping (control frames).
    pub fn submit(&self, frame: Frame) -> PromiseFuture<()> {
        if self.is_closed() {
            return PromiseFuture::broken(ChannelError::NotConnected);
        }
        let (done, fut) = promise();
        if let Err(rejected) = self.write_tx.send(WriteJob { frame, done }) {
            let mut job = rejected.0;
            job.done.set_error(ChannelError::NotConnected);
        }
        fut
    }

    /// Queue a frame on a registered span; fails fast if the span has no
    /// channel (misuse, surfaced to the caller rather than a crash).
    pub(crate) fn push_on(&self, span: u64, frame: Frame) -> PromiseFuture<()> {
        if !self.has_span(span) {
            return PromiseFuture::broken(ChannelError::NotRegistered(span));
        }
        self.submit(frame)
    }

    /// Open the control route: non-continuation frames read off the wire
    /// are forwarded to the returned receiver. The route closes when the
    /// session tears down.
    pub fn control_route(&self) -> mpsc::UnboundedReceiver<Frame> {
        let (tx, rx) = mpsc::unbounded_channel();
        *self.shared.control_tx.lock() = Some(tx);
        rx
    }

    /// Run the read loop: decode one frame at a time and dispatch it.
    ///
    /// Returns when the transport closes (`Ok`) or fails (`Err`); either
    /// way every live mailbox has been broken first.
    pub async fn run(self: Arc<Self>) -> Result<(), TransportError> {
        tracing::debug!("session: read loop started");
        loop {
            let frame = match self.transport.recv_frame().await {
                Ok(frame) => frame,
                Err(TransportError::Closed) => {
                    self.shared
                        .teardown(&ChannelError::Disconnected("transport closed".into()));
                    tracing::debug!("session: transport closed");
                    return Ok(());
                }
                Err(e) => {
                    self.shared.teardown(&ChannelError::from(&e));
                    tracing::error!(error = %e, "session: transport error");
                    return Err(e);
                }
            };
            self.dispatch(frame);
        }
    }

    fn dispatch(&self, frame: Frame) {
        match frame.kind() {
            FrameKind::Chunk => match self.lookup(frame.span) {
                Some(mailbox) => mailbox.put(frame),
                None => {
                    tracing::debug!(span = frame.span, "chunk for unknown span, dropping");
                }
            },
            FrameKind::Error => {
                // Terminal for the span: break the mailbox and drop the
                // entry so later strays are ignored.
                let (category, code, message) = frame.remote_error();
                match self.take(frame.span) {
                    Some(mailbox) => mailbox.fail(ChannelError::Remote {
                        category,
                        code,
                        message,
                    }),
                    None => {
                        tracing::debug!(span = frame.span, "error for unknown span, dropping");
                    }
                }
            }
            FrameKind::Choke => match self.take(frame.span) {
                Some(mailbox) => mailbox.fail(ChannelError::Choked),
                None => {
                    tracing::debug!(span = frame.span, "choke for unknown span, dropping");
                }
            },
            FrameKind::Handshake
            | FrameKind::Heartbeat
            | FrameKind::Terminate
            | FrameKind::Invoke => {
                let control = self.shared.control_tx.lock().clone();
                match control {
                    Some(tx) => {
                        if tx.send(frame).is_err() {
                            tracing::debug!("control route receiver gone, dropping frame");
                        }
                    }
                    None => {
                        tracing::warn!(
                            ty = frame.ty,
                            "control frame with no control route, dropping"
                        );
                    }
                }
            }
            FrameKind::Unknown(ty) => {
                tracing::warn!(ty, span = frame.span, "unknown frame type, dropping");
            }
        }
    }

    fn lookup(&self, span: u64) -> Option<Arc<Mailbox>> {
        self.shared.spans.lock().get(&span).cloned()
    }

    fn take(&self, span: u64) -> Option<Arc<Mailbox>> {
        self.shared.spans.lock().remove(&span)
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

/// Writer task: drains the FIFO queue with a single frame in flight.
///
/// The first write failure breaks the in-flight promise, tears the
/// session down, and fails everything still queued; later submissions
/// are rejected at `submit` already.
async fn write_loop(
    transport: Transport,
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<WriteJob>,
) {
    while let Some(mut job) = rx.recv().await {
        if shared.closed.load(Ordering::Acquire) {
            job.done.set_error(ChannelError::NotConnected);
            continue;
        }
        match transport.send_frame(job.frame).await {
            Ok(()) => job.done.set_value(()),
            Err(e) => {
                tracing::warn!(error = %e, "write failed, session is dead");
                let error = ChannelError::from(&e);
                job.done.set_error(error.clone());
                shared.teardown(&error);
                while let Ok(mut stale) = rx.try_recv() {
                    stale.done.set_error(ChannelError::NotConnected);
                }
            }
        }
    }
}
