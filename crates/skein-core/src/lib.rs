//! skein-core: connection multiplexing for the skein RPC client.
//!
//! This crate defines:
//! - The wire frame and its decoded kind ([`Frame`], [`FrameKind`])
//! - The one-shot promise/future pair ([`Promise`], [`PromiseFuture`])
//! - The per-span mailbox bridging producer and consumer ([`Mailbox`])
//! - Per-span write/read handles ([`Sender`], [`Receiver`])
//! - The session multiplexer ([`Session`])
//! - Transports ([`Transport`])

mod error;
mod frame;
mod handle;
mod mailbox;
mod promise;
mod session;
mod transport;

pub use error::*;
pub use frame::*;
pub use handle::*;
pub use mailbox::*;
pub use promise::*;
pub use session::*;
pub use transport::*;
