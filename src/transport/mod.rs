//! The WebTransport/QUIC surface this engine is built on.
//!
//! Everything in this module is an external collaborator the protocol
//! engine treats as out of scope: QUIC/WebTransport session establishment,
//! the HTTP/3 CONNECT/SETTINGS handshake, and the raw stream/datagram
//! primitives. The protocol engine (`crate::session::Session` and friends)
//! consumes this surface; it does not reimplement it.

mod client;
mod connect;
mod error;
mod origin;
mod recv;
mod send;
mod server;
mod session;
mod settings;
#[cfg(test)]
mod tests;

pub use client::*;
pub use connect::*;
pub use error::*;
pub use origin::*;
pub use recv::*;
pub use send::*;
pub use server::*;
pub use session::*;
pub use settings::*;

/// The HTTP/3 ALPN required when negotiating the underlying QUIC connection.
pub const ALPN_H3: &str = "h3";

/// The recommended WebTransport upgrade path for MCP-Flow sessions
pub const MCP_FLOW_PATH: &str = "/mcp-flow";

pub use web_transport_trait as generic;
