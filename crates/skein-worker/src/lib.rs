//! skein-worker: worker-side runtime of the skein RPC framework.
//!
//! A worker process connects to the cluster runtime over one persistent
//! stream, announces itself with a handshake, keeps itself alive with
//! periodic heartbeats, and serves inbound invocations through a
//! registered handler table. Silence from the runtime for too long trips
//! the disown dead-man's-switch and the worker stops for good.

mod config;
mod registry;
mod worker;

pub use config::*;
pub use registry::*;
pub use worker::*;

// Re-exported so handler signatures don't need a skein-core import.
pub use skein_core::{Receiver, Sender};
