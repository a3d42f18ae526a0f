//! Execution Stream Mux: unidirectional QUIC streams carrying
//! large or incremental tool output, each tagged to the request that opened
//! it by an 8-byte header written before any application byte.

use crate::message::RequestId;
use crate::request_table::{RequestTableError, StreamDirection};

/// `(requestId, streamTag)`, written as the first 8 bytes of every Execution
/// Stream: `be32(requestId as u32) ‖ be32(streamTag)`.
///
/// `requestId` is carried as a `u32` on the wire; MCP-Flow's JSON-RPC ids
/// are either strings or signed 64-bit
/// numbers, so the Dispatcher maps a [`RequestId`] to its numeric header
/// form via [`RequestTable`]'s allocation order rather than the id itself
/// for string ids — see [`StreamHeader::encode_for`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub request_ordinal: u32,
    pub stream_tag: u32,
}

pub const STREAM_HEADER_SIZE: usize = 8;

impl StreamHeader {
    pub fn new(request_ordinal: u32, stream_tag: u32) -> Self {
        Self {
            request_ordinal,
            stream_tag,
        }
    }

    pub fn encode(&self) -> [u8; STREAM_HEADER_SIZE] {
        let mut buf = [0u8; STREAM_HEADER_SIZE];
        buf[..4].copy_from_slice(&self.request_ordinal.to_be_bytes());
        buf[4..].copy_from_slice(&self.stream_tag.to_be_bytes());
        buf
    }

    pub fn decode(bytes: &[u8; STREAM_HEADER_SIZE]) -> Self {
        Self {
            request_ordinal: u32::from_be_bytes(bytes[..4].try_into().unwrap()),
            stream_tag: u32::from_be_bytes(bytes[4..].try_into().unwrap()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorCause {
    /// Header names a `requestId` the Request Table has never seen.
    Injection,
    /// `requestId` is in flight but `streamTag` wasn't declared.
    InvalidReference,
    /// `maxConcurrentStreams` reached.
    LimitExceeded,
    /// Underlying session torn down while a stream was open.
    TransportReset,
}

impl StreamErrorCause {
    pub fn error_code(self) -> i64 {
        use crate::message::error_codes::*;
        match self {
            StreamErrorCause::Injection => STREAM_INJECTION,
            StreamErrorCause::InvalidReference => INVALID_STREAM_REFERENCE,
            StreamErrorCause::LimitExceeded => STREAM_LIMIT_EXCEEDED,
            StreamErrorCause::TransportReset => crate::message::error_codes::INTERNAL_ERROR,
        }
    }
}

/// A `$/streamError` observation to report back to the affected request's
/// handler, or to emit as a notification if no such handler is listening
///
#[derive(Debug, Clone)]
pub struct StreamError {
    pub request_id: Option<RequestId>,
    pub stream_tag: Option<u32>,
    pub cause: StreamErrorCause,
}

/// Tracks how many Execution Streams are open in this session, counting
/// both server-opened and peer-opened streams against the single
/// `maxConcurrentStreams` cap Does not own the stream
/// objects themselves; those live with the Tokio task reading/writing each
/// one. Validation against the Request Table (step 1/2 of the accept path)
/// is delegated to the [`crate::request_table::RequestTable`] passed in.
pub struct StreamMux {
    max_concurrent_streams: u32,
    open_count: std::sync::atomic::AtomicU32,
}

impl StreamMux {
    pub fn new(max_concurrent_streams: u32) -> Self {
        Self {
            max_concurrent_streams,
            open_count: std::sync::atomic::AtomicU32::new(0),
        }
    }

    /// Reserves a slot for a new stream (either direction). Fails with
    /// [`StreamErrorCause::LimitExceeded`] once `maxConcurrentStreams` is
    /// reached.
    pub fn try_reserve(&self) -> Result<StreamSlot<'_>, StreamErrorCause> {
        use std::sync::atomic::Ordering;
        let mut current = self.open_count.load(Ordering::Acquire);
        loop {
            if current >= self.max_concurrent_streams {
                return Err(StreamErrorCause::LimitExceeded);
            }
            match self.open_count.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(StreamSlot { mux: self }),
                Err(observed) => current = observed,
            }
        }
    }

    pub fn open_count(&self) -> u32 {
        self.open_count.load(std::sync::atomic::Ordering::Acquire)
    }

    /// Reserves a slot without an RAII guard, for an Execution Stream whose
    /// owning object outlives the caller's stack frame (e.g. one boxed
    /// behind `Arc` and handed across tasks). Pair 1:1 with [`Self::release`].
    pub fn reserve(&self) -> Result<(), StreamErrorCause> {
        self.try_reserve().map(std::mem::forget)
    }

    /// Releases a slot reserved via [`Self::reserve`].
    pub fn release(&self) {
        self.open_count
            .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    }
}

/// RAII guard for one reserved stream slot; releases it on drop (stream
/// close, either side) so the cap reflects live streams only.
pub struct StreamSlot<'a> {
    mux: &'a StreamMux,
}

impl Drop for StreamSlot<'_> {
    fn drop(&mut self) {
        self.mux
            .open_count
            .fetch_sub(1, std::sync::atomic::Ordering::AcqRel);
    }
}

/// The outcome of accepting a peer-opened unidirectional stream, after
/// reading its 8-byte header.
pub enum AcceptOutcome {
    /// Header validated; hand the residual reader to the request's handler.
    Deliver {
        request_id: RequestId,
        stream_tag: u32,
    },
    Reject(StreamErrorCause),
}

/// Validates an incoming stream's header against the Request Table,
/// without touching the stream itself. The caller
/// looks up `request_id` from `header.request_ordinal` via whatever mapping
/// the Dispatcher keeps (ordinal -> RequestId); passing `None` here models
/// "ordinal unknown", which is itself an injection.
pub async fn validate_accept(
    table: &crate::request_table::RequestTable,
    request_id: Option<RequestId>,
    stream_tag: u32,
) -> AcceptOutcome {
    let Some(request_id) = request_id else {
        return AcceptOutcome::Reject(StreamErrorCause::Injection);
    };
    if !table.contains(&request_id).await {
        return AcceptOutcome::Reject(StreamErrorCause::Injection);
    }
    if !table.is_declared(&request_id, stream_tag).await {
        return AcceptOutcome::Reject(StreamErrorCause::InvalidReference);
    }
    match table
        .bind_stream(&request_id, stream_tag, StreamDirection::Accepted)
        .await
    {
        Ok(()) => AcceptOutcome::Deliver {
            request_id,
            stream_tag,
        },
        Err(RequestTableError::NotFound) => AcceptOutcome::Reject(StreamErrorCause::Injection),
        Err(RequestTableError::DuplicateId) => unreachable!("bind_stream never returns this"),
    }
}
