//! Worker protocol state machine.
//!
//! Drives handshake, heartbeat emission and the disown dead-man's-switch,
//! and demultiplexes inbound invocations to registered handlers. One loop
//! task owns all protocol decisions; the session's read loop only feeds
//! it control frames.

use std::fmt;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tokio::time::{self, Instant, MissedTickBehavior};

use skein_core::{
    ChannelError, Frame, FrameKind, Receiver, Sender, Session, Transport, TransportError,
};

use crate::{HandlerRegistry, WorkerConfig};

/// Worker lifecycle. Transitions are logged; there is no way back from
/// `Terminated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Disconnected,
    Connecting,
    Handshaking,
    Active,
    Terminated,
}

/// Fatal worker outcomes.
#[derive(Debug)]
pub enum WorkerError {
    /// No endpoint accepted the connection, or the transport failed.
    Connect(TransportError),
    /// A protocol write failed terminally.
    Channel(ChannelError),
    /// The session tore down underneath the worker.
    ConnectionLost,
    /// The disown timer fired: the runtime has been silent for too long
    /// and the worker is presumed abandoned. Intentional self-termination.
    Disowned,
}

impl fmt::Display for WorkerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Channel(e) => write!(f, "channel error: {e}"),
            Self::ConnectionLost => write!(f, "connection to the runtime lost"),
            Self::Disowned => write!(f, "disowned: no heartbeat from the runtime"),
        }
    }
}

impl std::error::Error for WorkerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) => Some(e),
            Self::Channel(e) => Some(e),
            _ => None,
        }
    }
}

/// Requests loop shutdown from outside the worker task.
#[derive(Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        let _ = self.tx.send(true);
    }
}

/// The worker-side runtime: owns the handler registry and the liveness
/// protocol. Build it, register handlers, then `run()` (or `serve()` an
/// established transport).
pub struct Worker {
    config: WorkerConfig,
    handlers: HandlerRegistry,
    stop_tx: Arc<watch::Sender<bool>>,
    stop_rx: watch::Receiver<bool>,
}

impl Worker {
    pub fn new(config: WorkerConfig) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        Self {
            config,
            handlers: HandlerRegistry::new(),
            stop_tx: Arc::new(stop_tx),
            stop_rx,
        }
    }

    /// Register a handler for `event`. Must happen before the worker
    /// starts; the registry is immutable afterwards.
    pub fn on<F>(&mut self, event: impl Into<String>, handler: F)
    where
        F: Fn(Sender, Receiver) + Send + Sync + 'static,
    {
        self.handlers.register(event, handler);
    }

    /// A clonable handle that makes `run`/`serve` return cleanly.
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle {
            tx: self.stop_tx.clone(),
        }
    }

    /// Connect to the runtime and serve until terminated.
    ///
    /// Blocks the calling task; a clean `terminate` from the runtime or a
    /// [`StopHandle::stop`] yields `Ok(())`, everything else is fatal.
    pub async fn run(self) -> Result<(), WorkerError> {
        let mut state = WorkerState::Disconnected;
        transition(&mut state, WorkerState::Connecting);
        let session = Session::connect(&self.config.endpoints)
            .await
            .map_err(WorkerError::Connect)?;
        self.serve_session(session, state).await
    }

    /// Serve over an already-established transport. Entry point for
    /// in-process wiring and tests.
    pub async fn serve(self, transport: Transport) -> Result<(), WorkerError> {
        self.serve_session(Session::new(transport), WorkerState::Connecting)
            .await
    }

    async fn serve_session(
        self,
        session: Arc<Session>,
        mut state: WorkerState,
    ) -> Result<(), WorkerError> {
        tracing::info!(
            app = %self.config.app,
            uuid = %self.config.uuid,
            handlers = self.handlers.len(),
            "worker starting"
        );
        if self.handlers.is_empty() {
            tracing::warn!("no handlers registered, every invoke will be dropped");
        }

        let mut control = session.control_route();
        let reader = tokio::spawn(session.clone().run());
        let mut stop_rx = self.stop_rx.clone();

        // The handshake must reach the wire before anything else; it and
        // the heartbeats share the session's FIFO write queue, so
        // submission order here is wire order.
        transition(&mut state, WorkerState::Handshaking);
        session
            .submit(Frame::handshake(&self.config.uuid))
            .await
            .map_err(WorkerError::Channel)?;

        // Optimistic: no acknowledgment is awaited before going active.
        transition(&mut state, WorkerState::Active);

        let mut heartbeat = time::interval(self.config.heartbeat_interval);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        // Heartbeat write outcomes are observed off-loop; failures only
        // reach this channel in strict mode.
        let (beat_err_tx, mut beat_errs) = mpsc::unbounded_channel::<ChannelError>();

        let disown = time::sleep(self.config.disown_timeout);
        tokio::pin!(disown);

        let result = loop {
            tokio::select! {
                () = &mut disown => {
                    tracing::error!(
                        timeout = ?self.config.disown_timeout,
                        "no heartbeat from the runtime, disowned"
                    );
                    break Err(WorkerError::Disowned);
                }
                _ = heartbeat.tick() => {
                    tracing::trace!("heartbeat out");
                    // Never await the physical write here: a stalled peer
                    // must not stop the disown timer or frame handling.
                    let sent = session.submit(Frame::heartbeat());
                    let strict = !self.config.heartbeat_despite_errors;
                    let errs = beat_err_tx.clone();
                    tokio::spawn(async move {
                        if let Err(e) = sent.await {
                            tracing::warn!(error = %e, "heartbeat send failed");
                            if strict {
                                let _ = errs.send(e);
                            }
                        }
                    });
                }
                Some(e) = beat_errs.recv() => {
                    break Err(WorkerError::Channel(e));
                }
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        tracing::info!("stop requested");
                        break Ok(());
                    }
                }
                frame = control.recv() => match frame {
                    None => {
                        tracing::error!("session closed underneath the worker");
                        break Err(WorkerError::ConnectionLost);
                    }
                    Some(frame) => match frame.kind() {
                        FrameKind::Heartbeat => {
                            tracing::trace!("heartbeat in");
                            disown
                                .as_mut()
                                .reset(Instant::now() + self.config.disown_timeout);
                        }
                        FrameKind::Terminate => {
                            tracing::info!("terminate received");
                            break Ok(());
                        }
                        FrameKind::Invoke => self.dispatch_invoke(&session, frame),
                        // The worker never expects to receive a handshake.
                        FrameKind::Handshake => {
                            panic!("protocol violation: handshake received while active")
                        }
                        other => {
                            tracing::warn!(kind = ?other, "unexpected frame on control route");
                        }
                    }
                }
            }
        };

        transition(&mut state, WorkerState::Terminated);
        // Break every live span so handlers blocked in recv() observe
        // the shutdown instead of waiting forever.
        session.shutdown();
        reader.abort();
        result
    }

    fn dispatch_invoke(&self, session: &Arc<Session>, frame: Frame) {
        let span = frame.span;
        let event = match frame.invoke_event() {
            Ok((event, _args)) => event,
            Err(e) => {
                tracing::warn!(span, error = %e, "undecodable invoke payload, dropping");
                return;
            }
        };
        match self.handlers.get(&event) {
            None => {
                tracing::warn!(span, event, "no handler for event, dropping");
            }
            Some(handler) => {
                tracing::debug!(span, event, "dispatching invocation");
                let (tx, rx) = session.accept(span);
                handler(tx, rx);
            }
        }
    }
}

fn transition(state: &mut WorkerState, to: WorkerState) {
    tracing::debug!(from = ?state, ?to, "worker state transition");
    *state = to;
}
