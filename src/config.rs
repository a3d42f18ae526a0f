//! Engine configuration: the implementation-defined constants threaded into
//! `Session::new`, the same way `QuicTransportConfig` is threaded into
//! `Client::with_transport_config`.

use std::time::Duration;

use crate::capabilities::Encoding;
use crate::codec::DEFAULT_MAX_FRAME_SIZE;
use crate::datagram::MAX_DATAGRAM_PAYLOAD_SIZE;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum Control Stream frame body size
    pub max_frame_size: u32,
    /// Cap on concurrently open Execution Streams per session
    pub max_concurrent_streams: u32,
    /// Maximum total datagram size, header included
    pub max_datagram_payload: usize,
    /// How long to wait for `initialize` before closing the session
    pub handshake_timeout: Duration,
    /// Hard cap on time spent in DRAINING before forcing closure
    pub drain_timeout: Duration,
    /// Encodings the server is willing to negotiate, independent of preference order.
    pub supported_encodings: Vec<Encoding>,
    /// Whether this server advertises datagram support
    pub datagrams_supported: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_concurrent_streams: 64,
            max_datagram_payload: MAX_DATAGRAM_PAYLOAD_SIZE,
            handshake_timeout: Duration::from_secs(10),
            drain_timeout: Duration::from_secs(30),
            supported_encodings: vec![Encoding::Json, Encoding::Cbor],
            datagrams_supported: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_recommendations() {
        let config = EngineConfig::default();
        assert_eq!(config.max_frame_size, 16 * 1024 * 1024);
        assert_eq!(config.max_datagram_payload, 1200);
        assert_eq!(config.handshake_timeout, Duration::from_secs(10));
        assert_eq!(config.drain_timeout, Duration::from_secs(30));
        assert!(config.supported_encodings.contains(&Encoding::Json));
        assert!(config.supported_encodings.contains(&Encoding::Cbor));
        assert!(config.datagrams_supported);
    }
}
