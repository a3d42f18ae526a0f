//! JSON-RPC 2.0 request/response/notification values and the handful of
//! MCP-Flow transport envelopes layered on top of them
//!
//! This module is pure data plus variant discrimination on `method`; it has
//! no I/O and no behavior beyond telling a [`Request`] apart from a
//! [`Notification`] apart from a [`Response`]. Encoding to/from bytes is the
//! Frame Codec's job (`crate::codec`).

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// The only JSON-RPC version MCP-Flow speaks.
pub const JSONRPC_VERSION: &str = "2.0";

/// Standard method names recognized by the dispatcher
pub mod methods {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "notifications/initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const PING: &str = "ping";
    pub const CANCEL: &str = "$/cancel";
    pub const SHUTDOWN: &str = "$/shutdown";
    pub const STREAM_ERROR: &str = "$/streamError";
}

/// JSON-RPC error codes used throughout the engine
pub mod error_codes {
    pub const PARSE_ERROR: i64 = -32700;
    pub const INVALID_REQUEST: i64 = -32600;
    pub const METHOD_NOT_FOUND: i64 = -32601;
    pub const INVALID_PARAMS: i64 = -32602;
    pub const INTERNAL_ERROR: i64 = -32603;
    /// Also used for "cancelled".
    pub const STREAM_LIMIT_EXCEEDED: i64 = -32000;
    pub const CANCELLED: i64 = -32000;
    pub const INVALID_STREAM_REFERENCE: i64 = -32001;
    pub const STREAM_INJECTION: i64 = -32002;
    pub const ENCODING_MISMATCH: i64 = -32003;
    pub const DATAGRAMS_NOT_SUPPORTED: i64 = -32004;
}

/// A JSON-RPC request id: either a string or an integer
///
/// Unlike the wire value, this is `Hash + Eq` so it can key the Request
/// Table directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
    /// Used only for an outgoing error response whose request `id` could not
    /// be recovered, e.g. a frame that failed to parse at all. Never a real
    /// request's id, so never accepted as one by the Request Table.
    Null,
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<String> for RequestId {
    fn from(s: String) -> Self {
        RequestId::String(s)
    }
}

/// A JSON-RPC error object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorObject {
    pub code: i64,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: i64, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn parse_error() -> Self {
        Self::new(error_codes::PARSE_ERROR, "parse error")
    }

    pub fn invalid_request(why: impl Into<String>) -> Self {
        Self::new(error_codes::INVALID_REQUEST, why)
    }

    pub fn method_not_found(method: &str) -> Self {
        Self::new(
            error_codes::METHOD_NOT_FOUND,
            format!("method not found: {method}"),
        )
    }

    pub fn cancelled() -> Self {
        Self::new(error_codes::CANCELLED, "Cancelled")
    }
}

/// A JSON-RPC request: expects exactly one matching [`Response`].
#[derive(Debug, Clone, Serialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Request {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }
}

/// A JSON-RPC notification: no `id`, never replied to.
#[derive(Debug, Clone, Serialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

impl Notification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

/// The body of a [`Response`]: exactly one of `result`/`error`.
#[derive(Debug, Clone)]
pub enum ResponseBody {
    Result(Value),
    Error(ErrorObject),
}

/// A JSON-RPC response, matched to its request by `id`.
#[derive(Debug, Clone)]
pub struct Response {
    pub id: RequestId,
    pub body: ResponseBody,
}

impl Response {
    pub fn result(id: RequestId, result: Value) -> Self {
        Self {
            id,
            body: ResponseBody::Result(result),
        }
    }

    pub fn error(id: RequestId, error: ErrorObject) -> Self {
        Self {
            id,
            body: ResponseBody::Error(error),
        }
    }
}

impl Serialize for Response {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;
        let mut map = serializer.serialize_map(Some(3))?;
        map.serialize_entry("jsonrpc", JSONRPC_VERSION)?;
        map.serialize_entry("id", &self.id)?;
        match &self.body {
            ResponseBody::Result(value) => map.serialize_entry("result", value)?,
            ResponseBody::Error(error) => map.serialize_entry("error", error)?,
        }
        map.end()
    }
}

/// One decoded Control Stream frame
#[derive(Debug, Clone)]
pub enum Message {
    Request(Request),
    Notification(Notification),
    Response(Response),
}

impl Message {
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Message::Request(r) => Some(&r.id),
            Message::Notification(_) => None,
            Message::Response(r) => Some(&r.id),
        }
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            Message::Request(r) => Some(&r.method),
            Message::Notification(n) => Some(&n.method),
            Message::Response(_) => None,
        }
    }
}

impl Serialize for Message {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Message::Request(r) => r.serialize(serializer),
            Message::Notification(n) => n.serialize(serializer),
            Message::Response(r) => r.serialize(serializer),
        }
    }
}

/// Intermediate shape used only to discriminate a decoded message; never
/// constructed by hand. All four JSON-RPC member sets are optional here so
/// a single `Deserialize` derive can accept any of the three shapes, and
/// `Message::try_from` tells them apart and validates the rest.
#[derive(Debug, Deserialize)]
struct RawMessage {
    #[serde(default)]
    jsonrpc: Option<String>,
    #[serde(default)]
    id: Option<RequestId>,
    #[serde(default)]
    method: Option<String>,
    #[serde(default)]
    params: Option<Value>,
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ErrorObject>,
}

/// The message body was not a well-formed JSON-RPC 2.0 envelope.
#[derive(Debug, Clone, thiserror::Error)]
pub enum MessageError {
    #[error("missing or wrong \"jsonrpc\" field")]
    WrongVersion,
    #[error("response must carry exactly one of \"result\"/\"error\"")]
    AmbiguousResponseBody,
    #[error("message has neither \"method\" nor \"result\"/\"error\"")]
    UnrecognizedShape,
}

impl<'de> Deserialize<'de> for Message {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = RawMessage::deserialize(deserializer)?;
        Message::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<RawMessage> for Message {
    type Error = MessageError;

    fn try_from(raw: RawMessage) -> Result<Self, Self::Error> {
        if raw.jsonrpc.as_deref() != Some(JSONRPC_VERSION) {
            return Err(MessageError::WrongVersion);
        }

        match (raw.id, raw.method, raw.result, raw.error) {
            (Some(id), Some(method), None, None) => Ok(Message::Request(Request {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id,
                method,
                params: raw.params,
            })),
            (None, Some(method), None, None) => Ok(Message::Notification(Notification {
                jsonrpc: JSONRPC_VERSION.to_string(),
                method,
                params: raw.params,
            })),
            (Some(id), None, Some(result), None) => {
                Ok(Message::Response(Response::result(id, result)))
            }
            (Some(id), None, None, Some(error)) => Ok(Message::Response(Response::error(id, error))),
            (Some(_), None, Some(_), Some(_)) => Err(MessageError::AmbiguousResponseBody),
            _ => Err(MessageError::UnrecognizedShape),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_through_json() {
        let msg = Message::Request(Request::new(
            RequestId::Number(1),
            methods::PING,
            None,
        ));
        let bytes = serde_json::to_vec(&msg).unwrap();
        let decoded: Message = serde_json::from_slice(&bytes).unwrap();
        assert!(matches!(decoded, Message::Request(r) if r.id == RequestId::Number(1) && r.method == methods::PING));
    }

    #[test]
    fn notification_has_no_id() {
        let json = serde_json::json!({"jsonrpc":"2.0","method":"notifications/initialized"});
        let msg: Message = serde_json::from_value(json).unwrap();
        assert!(matches!(msg, Message::Notification(n) if n.method == methods::INITIALIZED));
    }

    #[test]
    fn response_with_both_result_and_error_is_rejected() {
        let json = serde_json::json!({"jsonrpc":"2.0","id":1,"result":{},"error":{"code":-1,"message":"x"}});
        let err = serde_json::from_value::<Message>(json).unwrap_err();
        assert!(err.to_string().contains("exactly one"));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let json = serde_json::json!({"jsonrpc":"1.0","id":1,"method":"ping"});
        assert!(serde_json::from_value::<Message>(json).is_err());
    }

    #[test]
    fn request_id_display_matches_json_value() {
        assert_eq!(RequestId::Number(42).to_string(), "42");
        assert_eq!(RequestId::String("abc".into()).to_string(), "abc");
    }
}
