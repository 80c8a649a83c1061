//! Worker protocol conformance over an in-memory transport pair, with
//! the tokio clock paused so the liveness timers can be probed exactly.

use std::sync::Once;
use std::time::Duration;

use bytes::Bytes;
use skein_core::{ChannelError, Frame, FrameKind, Transport};
use skein_worker::{Worker, WorkerConfig, WorkerError};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .init();
    });
}

fn config() -> WorkerConfig {
    init_tracing();
    WorkerConfig::new("testapp", "worker-uuid-1")
        .heartbeat_interval(Duration::from_secs(10))
        .disown_timeout(Duration::from_secs(60))
}

/// Let the worker, session and writer tasks make progress without
/// moving the clock.
async fn settle() {
    for _ in 0..32 {
        tokio::task::yield_now().await;
    }
}

#[tokio::test(start_paused = true)]
async fn handshake_is_first_on_the_wire_then_a_heartbeat() {
    let (local, peer) = Transport::mem_pair();
    let worker = Worker::new(config());
    let handle = tokio::spawn(worker.serve(local));

    let first = peer.recv_frame().await.unwrap();
    assert_eq!(first.kind(), FrameKind::Handshake);
    assert_eq!(&first.payload[..], b"worker-uuid-1");

    // The interval's first tick fires immediately after the handshake.
    let second = peer.recv_frame().await.unwrap();
    assert_eq!(second.kind(), FrameKind::Heartbeat);

    peer.send_frame(Frame::terminate()).await.unwrap();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn heartbeats_are_periodic() {
    let (local, peer) = Transport::mem_pair();
    let handle = tokio::spawn(Worker::new(config()).serve(local));

    assert_eq!(peer.recv_frame().await.unwrap().kind(), FrameKind::Handshake);

    // Three beats, ten virtual seconds apart; blocking on recv lets the
    // paused clock auto-advance to the next tick.
    for _ in 0..3 {
        assert_eq!(peer.recv_frame().await.unwrap().kind(), FrameKind::Heartbeat);
    }

    peer.send_frame(Frame::terminate()).await.unwrap();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn silence_for_the_disown_timeout_is_fatal() {
    let (local, peer) = Transport::mem_pair();
    let handle = tokio::spawn(Worker::new(config()).serve(local));

    // Drain outbound frames so the worker's writes never back up.
    tokio::spawn(async move { while peer.recv_frame().await.is_ok() {} });

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Err(WorkerError::Disowned)));
}

#[tokio::test(start_paused = true)]
async fn inbound_heartbeat_resets_the_disown_deadline() {
    let (local, peer) = Transport::mem_pair();
    let handle = tokio::spawn(Worker::new(config()).serve(local));
    let drain = peer.clone();
    tokio::spawn(async move { while drain.recv_frame().await.is_ok() {} });
    settle().await;

    // 59s of silence: still alive.
    tokio::time::advance(Duration::from_secs(59)).await;
    settle().await;
    assert!(!handle.is_finished());

    // A heartbeat from the runtime re-arms the full 60s window.
    peer.send_frame(Frame::heartbeat()).await.unwrap();
    settle().await;

    tokio::time::advance(Duration::from_secs(59)).await;
    settle().await;
    assert!(!handle.is_finished());

    // 61s after the reset: disowned.
    tokio::time::advance(Duration::from_secs(2)).await;
    settle().await;
    assert!(handle.is_finished());
    assert!(matches!(handle.await.unwrap(), Err(WorkerError::Disowned)));
}

#[tokio::test(start_paused = true)]
async fn invoke_dispatches_to_the_registered_handler() {
    let (local, peer) = Transport::mem_pair();
    let mut worker = Worker::new(config());
    worker.on("echo", |tx, rx| {
        tokio::spawn(async move {
            let frame = rx.recv().await.unwrap();
            tx.send(frame.payload).await.unwrap();
            tx.close().await.unwrap();
        });
    });
    let handle = tokio::spawn(worker.serve(local));
    settle().await;

    peer.send_frame(Frame::invoke(5, "echo", b"")).await.unwrap();
    // Let the worker register the span before feeding it input.
    settle().await;
    peer.send_frame(Frame::chunk(5, Bytes::from_static(b"hi")))
        .await
        .unwrap();

    // Skip the worker's own handshake and heartbeats.
    let mut replies = Vec::new();
    while replies.len() < 2 {
        let frame = peer.recv_frame().await.unwrap();
        if frame.span == 5 {
            replies.push(frame);
        }
    }
    assert_eq!(replies[0].kind(), FrameKind::Chunk);
    assert_eq!(&replies[0].payload[..], b"hi");
    assert_eq!(replies[1].kind(), FrameKind::Choke);

    peer.send_frame(Frame::terminate()).await.unwrap();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn clean_terminate_breaks_a_pending_handler_recv() {
    let (local, peer) = Transport::mem_pair();
    let mut worker = Worker::new(config());
    let (done_tx, mut done_rx) = tokio::sync::mpsc::unbounded_channel();
    worker.on("wait", move |_tx, rx| {
        let done = done_tx.clone();
        tokio::spawn(async move {
            let _ = done.send(rx.recv().await);
        });
    });
    let handle = tokio::spawn(worker.serve(local));
    let drain = peer.clone();
    tokio::spawn(async move { while drain.recv_frame().await.is_ok() {} });
    settle().await;

    peer.send_frame(Frame::invoke(4, "wait", b"")).await.unwrap();
    settle().await;

    peer.send_frame(Frame::terminate()).await.unwrap();
    assert!(handle.await.unwrap().is_ok());

    // The handler's blocked read resolves instead of hanging forever.
    let outcome = done_rx.recv().await.unwrap();
    assert!(matches!(outcome, Err(ChannelError::Disconnected(_))));
}

#[tokio::test(start_paused = true)]
async fn disown_fires_even_with_a_stalled_outbound_path() {
    let (local, peer) = Transport::mem_pair();
    // Fill the outbound buffer so only the handshake still fits; the
    // first heartbeat write then stalls behind a peer that never reads.
    for _ in 0..63 {
        local.send_frame(Frame::heartbeat()).await.unwrap();
    }
    let handle = tokio::spawn(Worker::new(config()).serve(local));

    let outcome = handle.await.unwrap();
    assert!(matches!(outcome, Err(WorkerError::Disowned)));

    // Only dropped now: a closed peer would look like a lost connection
    // instead of runtime silence.
    drop(peer);
}

#[tokio::test(start_paused = true)]
async fn unknown_event_is_dropped_not_fatal() {
    let (local, peer) = Transport::mem_pair();
    let handle = tokio::spawn(Worker::new(config()).serve(local));
    let drain = peer.clone();
    tokio::spawn(async move { while drain.recv_frame().await.is_ok() {} });
    settle().await;

    peer.send_frame(Frame::invoke(7, "no-such-event", b""))
        .await
        .unwrap();
    settle().await;
    assert!(!handle.is_finished());

    peer.send_frame(Frame::terminate()).await.unwrap();
    assert!(handle.await.unwrap().is_ok());
}

#[tokio::test(start_paused = true)]
async fn handshake_from_the_runtime_is_a_protocol_violation() {
    let (local, peer) = Transport::mem_pair();
    let handle = tokio::spawn(Worker::new(config()).serve(local));
    let drain = peer.clone();
    tokio::spawn(async move { while drain.recv_frame().await.is_ok() {} });
    settle().await;

    peer.send_frame(Frame::handshake("intruder")).await.unwrap();

    let joined = handle.await;
    assert!(joined.unwrap_err().is_panic());
}

#[tokio::test(start_paused = true)]
async fn losing_the_transport_is_fatal() {
    let (local, peer) = Transport::mem_pair();
    let handle = tokio::spawn(Worker::new(config()).serve(local));
    assert_eq!(peer.recv_frame().await.unwrap().kind(), FrameKind::Handshake);

    drop(peer);

    let outcome = handle.await.unwrap();
    assert!(matches!(
        outcome,
        Err(WorkerError::ConnectionLost | WorkerError::Channel(_))
    ));
}

#[tokio::test(start_paused = true)]
async fn stop_handle_shuts_the_worker_down_cleanly() {
    let (local, peer) = Transport::mem_pair();
    let worker = Worker::new(config());
    let stop = worker.stop_handle();
    let handle = tokio::spawn(worker.serve(local));
    let drain = peer.clone();
    tokio::spawn(async move { while drain.recv_frame().await.is_ok() {} });
    settle().await;

    stop.stop();
    assert!(handle.await.unwrap().is_ok());
}
