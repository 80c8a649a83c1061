//! One-shot promise/future pair.
//!
//! Bridges the I/O side (which resolves) with application call sites
//! (which await). Resolution never runs user code inline: fulfilling a
//! promise only wakes the awaiting task, so continuations execute on
//! their own scheduler and never re-enter the resolver's stack.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::sync::oneshot;

use crate::ChannelError;

/// The producing half. Resolves the paired future exactly once.
#[derive(Debug)]
pub struct Promise<T> {
    tx: Option<oneshot::Sender<Result<T, ChannelError>>>,
}

/// The consuming half.
///
/// May be constructed already resolved ([`PromiseFuture::ready`],
/// [`PromiseFuture::broken`]) so callers that hit a non-empty mailbox
/// never suspend.
#[derive(Debug)]
pub struct PromiseFuture<T> {
    inner: Inner<T>,
}

#[derive(Debug)]
enum Inner<T> {
    Ready(Option<Result<T, ChannelError>>),
    Pending(oneshot::Receiver<Result<T, ChannelError>>),
}

/// Create a linked promise/future pair.
pub fn promise<T>() -> (Promise<T>, PromiseFuture<T>) {
    let (tx, rx) = oneshot::channel();
    (
        Promise { tx: Some(tx) },
        PromiseFuture {
            inner: Inner::Pending(rx),
        },
    )
}

impl<T> Promise<T> {
    /// Fulfill with a value.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already resolved. Double resolution is a
    /// protocol violation, not a recoverable condition.
    pub fn set_value(&mut self, value: T) {
        self.resolve(Ok(value));
    }

    /// Break with an error.
    ///
    /// # Panics
    ///
    /// Panics if the promise was already resolved.
    pub fn set_error(&mut self, error: ChannelError) {
        self.resolve(Err(error));
    }

    pub fn is_resolved(&self) -> bool {
        self.tx.is_none()
    }

    fn resolve(&mut self, result: Result<T, ChannelError>) {
        let tx = self.tx.take().expect("promise already resolved");
        // The future may have been dropped; resolution is then a no-op.
        let _ = tx.send(result);
    }
}

impl<T> PromiseFuture<T> {
    /// An already-fulfilled future.
    pub fn ready(value: T) -> Self {
        Self {
            inner: Inner::Ready(Some(Ok(value))),
        }
    }

    /// An already-failed future.
    pub fn broken(error: ChannelError) -> Self {
        Self {
            inner: Inner::Ready(Some(Err(error))),
        }
    }
}

// `poll` moves the resolved value out through `get_mut`, so the payload
// must be `Unpin`. Every payload in this crate (frames, unit) is.
impl<T: Unpin> Future for PromiseFuture<T> {
    type Output = Result<T, ChannelError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().inner {
            Inner::Ready(slot) => {
                Poll::Ready(slot.take().expect("promise future polled after completion"))
            }
            Inner::Pending(rx) => Pin::new(rx).poll(cx).map(|recv| {
                recv.unwrap_or_else(|_| {
                    Err(ChannelError::Disconnected("promise abandoned".into()))
                })
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_with_value() {
        let (mut p, f) = promise::<u32>();
        p.set_value(7);
        assert_eq!(f.await.unwrap(), 7);
    }

    #[tokio::test]
    async fn resolves_with_error() {
        let (mut p, f) = promise::<u32>();
        p.set_error(ChannelError::Choked);
        assert_eq!(f.await.unwrap_err(), ChannelError::Choked);
    }

    #[tokio::test]
    async fn resolution_wakes_a_waiting_task() {
        let (mut p, f) = promise::<&'static str>();
        let waiter = tokio::spawn(f);
        p.set_value("later");
        assert_eq!(waiter.await.unwrap().unwrap(), "later");
    }

    #[tokio::test]
    async fn can_be_polled_through_a_mut_reference() {
        // `&mut PromiseFuture<_>` is only a future because the type is
        // unconditionally `Unpin` for the payloads this crate uses.
        let (mut p, mut f) = promise::<u32>();
        p.set_value(9);
        assert_eq!((&mut f).await.unwrap(), 9);
    }

    #[tokio::test]
    async fn ready_future_completes_immediately() {
        assert_eq!(PromiseFuture::ready(1u8).await.unwrap(), 1);
        assert_eq!(
            PromiseFuture::<u8>::broken(ChannelError::NotConnected)
                .await
                .unwrap_err(),
            ChannelError::NotConnected
        );
    }

    #[test]
    #[should_panic(expected = "promise already resolved")]
    fn double_set_value_panics() {
        let (mut p, _f) = promise::<u32>();
        p.set_value(1);
        p.set_value(2);
    }

    #[test]
    #[should_panic(expected = "promise already resolved")]
    fn set_error_after_value_panics() {
        let (mut p, _f) = promise::<u32>();
        p.set_value(1);
        p.set_error(ChannelError::Choked);
    }

    #[tokio::test]
    async fn abandoned_promise_breaks_the_future() {
        let (p, f) = promise::<u32>();
        drop(p);
        assert!(matches!(
            f.await.unwrap_err(),
            ChannelError::Disconnected(_)
        ));
    }
}
