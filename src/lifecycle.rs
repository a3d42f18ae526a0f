//! Lifecycle Orchestrator: `$/cancel`, `$/shutdown`, and
//! peer stream-level errors, each translated into the signal the affected
//! component needs to act on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde_json::Value;

use crate::message::{error_codes, methods, Notification, RequestId};
use crate::request_table::RequestTable;
use crate::stream_mux::{StreamError, StreamErrorCause};

/// Coordinates the DRAINING phase and turns stream/cancellation events into
/// the required JSON-RPC notifications. Holds no reference to the Control
/// Stream writer; the Session feeds its output there.
pub struct LifecycleOrchestrator {
    draining: AtomicBool,
    pub drain_timeout: Duration,
}

impl LifecycleOrchestrator {
    pub fn new(drain_timeout: Duration) -> Self {
        Self {
            draining: AtomicBool::new(false),
            drain_timeout,
        }
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::Acquire)
    }

    /// Enters DRAINING. Returns `true` the first time this is called, so
    /// the caller only transitions the state machine once: READY -> DRAINING
    /// happens on send OR receive of `$/shutdown`, either side may trigger it.
    pub fn request_shutdown(&self) -> bool {
        self.draining
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// `$/cancel`: signals the Request Table's cancellation token for
    /// `request_id`. Idempotent and tolerant of unknown/completed ids
    ///
    pub async fn cancel(&self, table: &RequestTable, request_id: RequestId) {
        table.cancel(&request_id).await;
    }

    /// Builds the `$/streamError` notification for one observation
    /// Best-effort: the caller may be unable to send
    /// it if the Control Stream is already down.
    pub fn stream_error_notification(&self, error: &StreamError) -> Notification {
        let mut params = serde_json::Map::new();
        if let Some(id) = &error.request_id {
            params.insert("requestId".to_string(), serde_json::to_value(id).unwrap());
        }
        if let Some(tag) = error.stream_tag {
            params.insert("streamTag".to_string(), Value::from(tag));
        }
        params.insert("code".to_string(), Value::from(error.cause.error_code()));
        params.insert(
            "message".to_string(),
            Value::String(stream_error_message(error.cause).to_string()),
        );
        Notification::new(methods::STREAM_ERROR, Some(Value::Object(params)))
    }

    /// Cancelled-by-user response body: code -32000,
    /// message "Cancelled".
    pub fn cancelled_error() -> (i64, &'static str) {
        (error_codes::CANCELLED, "Cancelled")
    }
}

fn stream_error_message(cause: StreamErrorCause) -> &'static str {
    match cause {
        StreamErrorCause::Injection => "stream injection",
        StreamErrorCause::InvalidReference => "invalid stream reference",
        StreamErrorCause::LimitExceeded => "stream limit exceeded",
        StreamErrorCause::TransportReset => "transport reset",
    }
}
