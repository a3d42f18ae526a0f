//! MCP-Flow: a transport binding that carries bidirectional JSON-RPC 2.0
//! (Model Context Protocol) traffic over a single WebTransport session.
//!
//! A WebTransport session multiplexes three planes over one QUIC
//! connection: a reliable bidirectional **Control Stream** carrying
//! length-prefixed JSON-RPC frames, any number of unidirectional
//! **Execution Streams** carrying large or incremental tool output, and an
//! unreliable **Datagram** plane for best-effort signals. [`crate::session`]
//! is the per-session engine that ties these three planes, the
//! [`request_table`], and the [`state`] machine together; [`transport`] is
//! the WebTransport/QUIC surface it runs on top of.
//!
//! # Layout
//!
//! - [`transport`]: QUIC/WebTransport session establishment (not
//!   MCP-Flow-specific; this is the collaborator the engine is built on).
//! - [`message`]: JSON-RPC 2.0 values (`Request`/`Notification`/`Response`).
//! - [`codec`]: the length-prefixed JSON-or-CBOR Frame Codec.
//! - [`capabilities`]: the `transport` capabilities object and encoding
//!   negotiation exchanged during `initialize`.
//! - [`request_table`]: the session-local table of in-flight requests.

pub mod capabilities;
pub mod codec;
pub mod config;
pub mod datagram;
pub mod dispatcher;
pub mod error;
pub mod lifecycle;
pub mod message;
pub mod request_table;
pub mod session;
pub mod state;
pub mod stream_mux;
pub mod tools;
pub mod transport;

#[cfg(test)]
mod engine_tests;

/// Re-export the http crate because it's in the public API via [`transport`].
pub use http;
/// Re-export iroh.
pub use iroh;
