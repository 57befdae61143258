//! tether: duplex request/response calls over a fire-and-forget message channel.
//!
//! Two isolated execution contexts, a host and a guest that share no memory
//! and can only exchange serializable values, each hold a [`Bridge`] wired to
//! their side of an ordered message channel. Either side binds handlers by
//! operation name and invokes operations on the other, awaiting the result as
//! an ordinary future.
//!
//! # Architecture
//!
//! - **protocol**: the `Frame` wire shape (request vs. response, correlation id)
//! - **codec**: length-delimited JSON framing for byte-stream transports
//! - **transport**: the channel value the bridge consumes, with in-process,
//!   raw-channel, and byte-stream constructions
//! - **bridge**: the correlation engine (pending-call table, handler
//!   dispatch, timeout racing, pre-attachment buffering)

pub mod bridge;
pub mod codec;
pub mod protocol;
pub mod transport;

pub use bridge::{Bridge, BridgeConfig, CallError};
pub use codec::JsonCodec;
pub use protocol::Frame;
pub use transport::Transport;
