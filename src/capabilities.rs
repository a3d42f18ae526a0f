//! Transport Capabilities: the `transport` object exchanged
//! inside `initialize`'s request and response, and the encoding it
//! negotiates.

use serde::{Deserialize, Serialize};

/// The Control Stream body encoding negotiated at `initialize`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    Json,
    Cbor,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Json => "json",
            Encoding::Cbor => "cbor",
        }
    }

    /// The other of the two encodings, used to tell a mis-encoded frame
    /// apart from a genuinely malformed one.
    pub fn other(self) -> Encoding {
        match self {
            Encoding::Json => Encoding::Cbor,
            Encoding::Cbor => Encoding::Json,
        }
    }
}

impl std::fmt::Display for Encoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// MCP-Flow protocol version this crate speaks.
pub const PROTOCOL_VERSION: &str = "0.1";

/// The `transport` object a client sends inside `initialize` params.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientTransportCapabilities {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    /// Ordered by preference, most preferred first. Absent means "default to JSON".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encodings: Option<Vec<Encoding>>,
}

impl ClientTransportCapabilities {
    /// The server picks the first client-preferred encoding it supports;
    /// `json` if the client didn't list any
    pub fn negotiate(&self, supported: &[Encoding]) -> Option<Encoding> {
        match &self.encodings {
            None => Some(Encoding::Json).filter(|e| supported.contains(e)),
            Some(prefs) => prefs.iter().find(|e| supported.contains(e)).copied(),
        }
    }
}

/// The `transport` object the server replies with inside `initialize`'s result.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerTransportCapabilities {
    #[serde(rename = "type")]
    pub kind: String,
    pub version: String,
    pub encoding: Encoding,
    pub max_concurrent_streams: u32,
    pub datagrams_supported: bool,
}

impl ServerTransportCapabilities {
    pub fn new(encoding: Encoding, max_concurrent_streams: u32, datagrams_supported: bool) -> Self {
        Self {
            kind: "mcp-flow".to_string(),
            version: PROTOCOL_VERSION.to_string(),
            encoding,
            max_concurrent_streams,
            datagrams_supported,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negotiate_picks_first_supported_preference() {
        let caps = ClientTransportCapabilities {
            kind: "mcp-flow".into(),
            version: "0.1".into(),
            encodings: Some(vec![Encoding::Cbor, Encoding::Json]),
        };
        assert_eq!(
            caps.negotiate(&[Encoding::Json, Encoding::Cbor]),
            Some(Encoding::Cbor)
        );
    }

    #[test]
    fn negotiate_defaults_to_json_when_absent() {
        let caps = ClientTransportCapabilities {
            kind: "mcp-flow".into(),
            version: "0.1".into(),
            encodings: None,
        };
        assert_eq!(
            caps.negotiate(&[Encoding::Json, Encoding::Cbor]),
            Some(Encoding::Json)
        );
    }

    #[test]
    fn negotiate_fails_when_no_overlap() {
        let caps = ClientTransportCapabilities {
            kind: "mcp-flow".into(),
            version: "0.1".into(),
            encodings: Some(vec![Encoding::Cbor]),
        };
        assert_eq!(caps.negotiate(&[Encoding::Json]), None);
    }
}
