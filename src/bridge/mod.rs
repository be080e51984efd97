//! Cross-context bridge to the privileged store.
//!
//! Unprivileged code cannot touch the store, but it shares a [`Channel`]
//! with code that can. [`BridgeClient`] turns store calls into request
//! signals and waits for the matching response; [`BridgeHost`] performs
//! the operation and answers. Requests queue with backpressure and every
//! response reaches every client, so nothing is dropped under load.

mod client;
mod host;
mod protocol;

pub use client::BridgeClient;
pub use host::BridgeHost;
pub use protocol::Channel;
