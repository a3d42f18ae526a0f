//! Frame Codec: a length-prefixed JSON-or-CBOR envelope over
//! a reliable ordered byte-stream.
//!
//! Built on [`tokio_util::codec`] so the carry-over buffering a partial
//! frame needs (QUIC reads are often larger or smaller than one frame) is
//! handled by the same machinery real Tokio-based framers use, rather than
//! hand-rolled.

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::capabilities::Encoding;
use crate::message::{Message, RequestId};

/// Recommended maximum frame body size: 16 MiB.
pub const DEFAULT_MAX_FRAME_SIZE: u32 = 16 * 1024 * 1024;

const LENGTH_PREFIX_SIZE: usize = 4;

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("frame too large: {0} bytes exceeds configured maximum")]
    TooLarge(u32),
    /// The frame body didn't decode as a well-formed message under either
    /// encoding. `request_id` carries an `id` recovered from the body on a
    /// best-effort basis, so a reply can still be addressed to the request
    /// that caused it rather than going out anonymous.
    #[error("parse error")]
    Parse { request_id: Option<RequestId> },
    #[error("stream ended mid-frame")]
    ShortRead,
    #[error("io error")]
    Io(#[from] std::io::Error),
    /// The body parses under the encoding that was NOT negotiated at
    /// `initialize`, rather than the one currently in force. Only ever
    /// produced once `mismatch_detection` is enabled, i.e. after the
    /// Control Stream has reached READY.
    #[error("frame encoded in the non-negotiated encoding")]
    EncodingMismatch { request_id: Option<RequestId> },
}

impl FrameError {
    /// JSON-RPC error code to report for this failure
    pub fn error_code(&self) -> i64 {
        match self {
            FrameError::TooLarge(_) | FrameError::Parse { .. } | FrameError::ShortRead => {
                crate::message::error_codes::PARSE_ERROR
            }
            FrameError::Io(_) => crate::message::error_codes::INTERNAL_ERROR,
            FrameError::EncodingMismatch { .. } => crate::message::error_codes::ENCODING_MISMATCH,
        }
    }
}

/// A length-prefixed, JSON-or-CBOR framer/deframer for one direction of one
/// Control Stream.
///
/// The encoding is read fresh on every call, so switching `encoding` after
/// `initialize`'s response is written takes effect on the very next frame.
pub struct FrameCodec {
    max_frame_size: u32,
    pub encoding: Encoding,
    // Set once a length prefix has been read but the full body hasn't
    // arrived yet, so repeated `decode` calls don't re-parse the prefix.
    pending_len: Option<u32>,
    /// Once true, a body that fails to parse under `encoding` is retried
    /// under the other encoding before giving up; a successful retry turns
    /// the failure into a recoverable `EncodingMismatch` instead of a fatal
    /// `Parse`. Left off during the handshake, where `initialize`'s own
    /// request/response are always JSON regardless of what the session goes
    /// on to negotiate.
    pub mismatch_detection: bool,
}

impl FrameCodec {
    pub fn new(encoding: Encoding, max_frame_size: u32) -> Self {
        Self {
            max_frame_size,
            encoding,
            pending_len: None,
            mismatch_detection: false,
        }
    }

    fn decode_as(encoding: Encoding, body: &[u8]) -> Result<Message, ()> {
        match encoding {
            Encoding::Json => serde_json::from_slice(body).map_err(|_| ()),
            Encoding::Cbor => ciborium::de::from_reader(body).map_err(|_| ()),
        }
    }

    fn decode_body(&self, body: &[u8]) -> Result<Message, FrameError> {
        if let Ok(message) = Self::decode_as(self.encoding, body) {
            return Ok(message);
        }
        if self.mismatch_detection {
            if let Ok(message) = Self::decode_as(self.encoding.other(), body) {
                return Err(FrameError::EncodingMismatch {
                    request_id: message.request_id().cloned(),
                });
            }
        }
        Err(FrameError::Parse {
            request_id: Self::recover_request_id(self.encoding, body),
        })
    }

    /// Pulls an `id` out of a body that otherwise failed to decode as a full
    /// [`Message`] -- e.g. a request with an unrecognized `params` shape --
    /// so the caller can still reply to it instead of closing anonymously.
    fn recover_request_id(encoding: Encoding, body: &[u8]) -> Option<RequestId> {
        #[derive(serde::Deserialize)]
        struct JustId {
            id: Option<RequestId>,
        }
        match encoding {
            Encoding::Json => serde_json::from_slice::<JustId>(body).ok()?.id,
            Encoding::Cbor => ciborium::de::from_reader::<JustId, _>(body).ok()?.id,
        }
    }

    fn encode_body(&self, message: &Message) -> Result<Vec<u8>, FrameError> {
        match self.encoding {
            Encoding::Json => {
                serde_json::to_vec(message).map_err(|_| FrameError::Parse { request_id: None })
            }
            Encoding::Cbor => {
                let mut buf = Vec::new();
                ciborium::ser::into_writer(message, &mut buf)
                    .map_err(|_| FrameError::Parse { request_id: None })?;
                Ok(buf)
            }
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Message;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        let len = match self.pending_len {
            Some(len) => len,
            None => {
                if src.len() < LENGTH_PREFIX_SIZE {
                    return Ok(None);
                }
                let len = u32::from_be_bytes(src[..LENGTH_PREFIX_SIZE].try_into().unwrap());
                if len > self.max_frame_size {
                    return Err(FrameError::TooLarge(len));
                }
                src.advance(LENGTH_PREFIX_SIZE);
                self.pending_len = Some(len);
                len
            }
        };

        if src.len() < len as usize {
            src.reserve(len as usize - src.len());
            return Ok(None);
        }

        let body = src.split_to(len as usize);
        self.pending_len = None;
        self.decode_body(&body).map(Some)
    }

    fn decode_eof(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, FrameError> {
        match self.decode(buf)? {
            Some(message) => Ok(Some(message)),
            None if buf.is_empty() && self.pending_len.is_none() => Ok(None),
            None => Err(FrameError::ShortRead),
        }
    }
}

impl Encoder<&Message> for FrameCodec {
    type Error = FrameError;

    fn encode(&mut self, message: &Message, dst: &mut BytesMut) -> Result<(), FrameError> {
        let body = self.encode_body(message)?;
        if body.len() > self.max_frame_size as usize {
            return Err(FrameError::TooLarge(body.len() as u32));
        }
        dst.reserve(LENGTH_PREFIX_SIZE + body.len());
        dst.extend_from_slice(&(body.len() as u32).to_be_bytes());
        dst.extend_from_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{methods, Request, RequestId};

    fn sample_request() -> Message {
        Message::Request(Request::new(RequestId::Number(1), methods::PING, None))
    }

    #[test]
    fn encode_then_decode_json_round_trips() {
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        let msg = sample_request();
        let mut buf = BytesMut::new();
        codec.encode(&msg, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, Message::Request(r) if r.id == RequestId::Number(1)));
        assert!(buf.is_empty());
    }

    #[test]
    fn encode_then_decode_cbor_round_trips() {
        let mut codec = FrameCodec::new(Encoding::Cbor, DEFAULT_MAX_FRAME_SIZE);
        let msg = sample_request();
        let mut buf = BytesMut::new();
        codec.encode(&msg, &mut buf).unwrap();

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert!(matches!(decoded, Message::Request(r) if r.id == RequestId::Number(1)));
    }

    #[test]
    fn partial_frame_returns_none_until_complete() {
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        let msg = sample_request();
        let mut full = BytesMut::new();
        codec.encode(&msg, &mut full).unwrap();

        let mut partial = BytesMut::from(&full[..full.len() - 2]);
        assert!(codec.decode(&mut partial).unwrap().is_none());

        partial.extend_from_slice(&full[full.len() - 2..]);
        assert!(codec.decode(&mut partial).unwrap().is_some());
    }

    #[test]
    fn oversize_length_prefix_is_rejected() {
        let mut codec = FrameCodec::new(Encoding::Json, 16);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&100u32.to_be_bytes());
        let err = codec.decode(&mut buf).unwrap_err();
        assert!(matches!(err, FrameError::TooLarge(100)));
    }

    #[test]
    fn clean_eof_with_no_pending_bytes_is_end_of_stream() {
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        let mut buf = BytesMut::new();
        assert!(codec.decode_eof(&mut buf).unwrap().is_none());
    }

    #[test]
    fn eof_mid_frame_is_a_short_read_error() {
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        let mut buf = BytesMut::new();
        buf.extend_from_slice(&10u32.to_be_bytes());
        buf.extend_from_slice(b"{\"a\":1}"); // fewer than 10 bytes promised
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(FrameError::ShortRead)
        ));
    }

    #[test]
    fn invalid_json_body_is_a_parse_error() {
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        let mut buf = BytesMut::new();
        let body = b"not json";
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);
        assert!(matches!(codec.decode(&mut buf), Err(FrameError::Parse { .. })));
    }

    #[test]
    fn cbor_frame_under_json_encoding_is_a_parse_error_without_mismatch_detection() {
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        let mut cbor_codec = FrameCodec::new(Encoding::Cbor, DEFAULT_MAX_FRAME_SIZE);
        let mut buf = BytesMut::new();
        cbor_codec.encode(&sample_request(), &mut buf).unwrap();

        assert!(matches!(codec.decode(&mut buf), Err(FrameError::Parse { .. })));
    }

    #[test]
    fn parse_error_recovers_a_malformed_requests_id() {
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        let mut buf = BytesMut::new();
        // Valid JSON-RPC 2.0 envelope with an `id`, but `method` is the
        // wrong type, so `Message`'s deserialize still rejects it.
        let body = br#"{"jsonrpc":"2.0","id":7,"method":123}"#;
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(body);
        match codec.decode(&mut buf) {
            Err(FrameError::Parse { request_id }) => {
                assert_eq!(request_id, Some(RequestId::Number(7)));
            }
            other => panic!("expected Parse, got {other:?}"),
        }
    }

    #[test]
    fn cbor_frame_under_json_encoding_is_reported_as_encoding_mismatch() {
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        codec.mismatch_detection = true;
        let mut cbor_codec = FrameCodec::new(Encoding::Cbor, DEFAULT_MAX_FRAME_SIZE);
        let mut buf = BytesMut::new();
        cbor_codec.encode(&sample_request(), &mut buf).unwrap();

        match codec.decode(&mut buf) {
            Err(FrameError::EncodingMismatch { request_id }) => {
                assert_eq!(request_id, Some(RequestId::Number(1)));
            }
            other => panic!("expected EncodingMismatch, got {other:?}"),
        }
        assert_eq!(FrameError::EncodingMismatch { request_id: None }.error_code(), crate::message::error_codes::ENCODING_MISMATCH);
    }
}
