//! The per-session protocol engine: wires the Control Stream,
//! Execution Stream Mux, Datagram Plane, Request Table, Session State
//! Machine, RPC Dispatcher, and Lifecycle Orchestrator onto one
//! [`crate::transport::Session`].
//!
//! Unlike [`crate::transport`], which is the generic WebTransport
//! collaborator, everything here is specific to MCP-Flow's own wire
//! semantics: only the Control Stream's length-prefixed framing, the
//! Execution Stream header, and the Datagram header are this module's
//! concern.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, Mutex as AsyncMutex};
use tokio_util::codec::{Decoder, Encoder};

use crate::capabilities::Encoding;
use crate::codec::{FrameCodec, FrameError};
use crate::config::EngineConfig;
use crate::datagram::{DatagramHeader, DatagramPlane, RecvOutcome, SendOutcome};
use crate::dispatcher::{DispatchAction, Dispatcher};
use crate::error::ProtocolError;
use crate::lifecycle::LifecycleOrchestrator;
use crate::message::{error_codes, ErrorObject, Message, RequestId, Response};
use crate::request_table::{RequestTable, StreamDirection};
use crate::state::{bootstrap_encoding, Phase, StateMachine};
use crate::stream_mux::{
    validate_accept, AcceptOutcome, StreamError, StreamErrorCause, StreamHeader, StreamMux,
    STREAM_HEADER_SIZE,
};
use crate::tools::{Registry, StreamOpener};
use crate::transport;

#[derive(Debug, thiserror::Error)]
pub enum SessionRunError {
    #[error("transport session error")]
    Transport(#[from] transport::SessionError),
    #[error("`initialize` was not received within the handshake timeout")]
    HandshakeTimeout,
    #[error("fatal protocol violation: {0}")]
    Fatal(String),
}

/// Maps JSON-RPC [`RequestId`]s (string or number) to the `u32` ordinals the
/// Execution Stream header actually carries on the wire The
/// mapping is assigned lazily, the first time a request opens or is referred
/// to by a stream, and is session-local: it is never sent over the wire.
#[derive(Default)]
struct OrdinalMap {
    next: u32,
    forward: HashMap<u32, RequestId>,
    backward: HashMap<RequestId, u32>,
}

impl OrdinalMap {
    fn ordinal_for(&mut self, id: &RequestId) -> u32 {
        if let Some(ordinal) = self.backward.get(id) {
            return *ordinal;
        }
        self.next += 1;
        let ordinal = self.next;
        self.forward.insert(ordinal, id.clone());
        self.backward.insert(id.clone(), ordinal);
        ordinal
    }

    fn id_for(&self, ordinal: u32) -> Option<RequestId> {
        self.forward.get(&ordinal).cloned()
    }
}

/// One event queued for the Control Stream writer task. Frames and encoding
/// switches share a queue so a `SetEncoding` is never applied out of order
/// with respect to the frame it follows: a mid-session encoding switch takes
/// effect on the next frame written after `initialize`'s response.
enum OutgoingEvent {
    Frame(Message),
    SetEncoding(Encoding),
}

/// The engine's own session: one per accepted WebTransport connection.
pub struct Session {
    transport: transport::Session,
    config: EngineConfig,
    table: RequestTable,
    mux: StreamMux,
    datagrams: DatagramPlane,
    tools: Arc<Registry>,
    lifecycle: Arc<LifecycleOrchestrator>,
    dispatcher: Dispatcher,
    state: AsyncMutex<StateMachine>,
    /// The negotiated Control Stream encoding, read fresh by the reader
    /// before every frame and updated once, from `handle_frame`, the moment
    /// `initialize`'s response is queued. Tracked separately from the
    /// reader's own [`FrameCodec`] so a spawned request handler can update
    /// it without needing `&mut` access to the codec the reader owns.
    encoding: StdMutex<Encoding>,
    ordinals: StdMutex<OrdinalMap>,
    control_tx: AsyncMutex<Option<mpsc::Sender<OutgoingEvent>>>,
    draining_watcher_spawned: AtomicBool,
}

impl Session {
    pub fn new(transport: transport::Session, config: EngineConfig, tools: Arc<Registry>) -> Arc<Self> {
        let lifecycle = Arc::new(LifecycleOrchestrator::new(config.drain_timeout));
        let dispatcher = Dispatcher::new(
            config.supported_encodings.clone(),
            config.max_concurrent_streams,
            config.datagrams_supported,
            tools.clone(),
            lifecycle.clone(),
        );
        let mux = StreamMux::new(config.max_concurrent_streams);
        let datagrams = DatagramPlane::new(config.datagrams_supported);
        Arc::new(Self {
            transport,
            table: RequestTable::new(),
            mux,
            datagrams,
            tools,
            lifecycle,
            dispatcher,
            state: AsyncMutex::new(StateMachine::new()),
            encoding: StdMutex::new(bootstrap_encoding()),
            ordinals: StdMutex::new(OrdinalMap::default()),
            control_tx: AsyncMutex::new(None),
            draining_watcher_spawned: AtomicBool::new(false),
            config,
        })
    }

    pub fn tools(&self) -> &Arc<Registry> {
        &self.tools
    }

    pub async fn phase(&self) -> Phase {
        self.state.lock().await.phase()
    }

    /// Runs the session to completion: accepts the Control Stream, then
    /// drives the Control Stream reader/writer, the Execution Stream
    /// acceptor, and the Datagram loop concurrently until the transport
    /// closes or a fatal protocol violation occurs
    pub async fn run(self: Arc<Self>) -> Result<(), SessionRunError> {
        self.state
            .lock()
            .await
            .on_transport_established()
            .map_err(|e| SessionRunError::Fatal(e.to_string()))?;

        let (send, recv) = self.transport.accept_bi().await?;
        self.state
            .lock()
            .await
            .on_control_stream_opened()
            .map_err(|e| SessionRunError::Fatal(e.to_string()))?;

        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);
        *self.control_tx.lock().await = Some(outgoing_tx.clone());

        let max_frame_size = self.config.max_frame_size;
        let writer_task = tokio::spawn(Self::run_control_writer(send, outgoing_rx, max_frame_size));
        let stream_task = tokio::spawn(self.clone().run_execution_stream_acceptor());
        let datagram_task = tokio::spawn(self.clone().run_datagram_loop());

        let result = self.run_control_reader(recv, outgoing_tx).await;

        stream_task.abort();
        datagram_task.abort();
        self.control_tx.lock().await.take();
        let _ = writer_task.await;
        self.state.lock().await.force_close();

        result
    }

    async fn run_control_writer(
        mut send: transport::SendStream,
        mut rx: mpsc::Receiver<OutgoingEvent>,
        max_frame_size: u32,
    ) {
        let mut codec = FrameCodec::new(bootstrap_encoding(), max_frame_size);
        let mut buf = BytesMut::new();
        while let Some(event) = rx.recv().await {
            match event {
                OutgoingEvent::Frame(message) => {
                    buf.clear();
                    if codec.encode(&message, &mut buf).is_err() {
                        break;
                    }
                    if send.write_all(&buf).await.is_err() {
                        break;
                    }
                }
                OutgoingEvent::SetEncoding(encoding) => codec.encoding = encoding,
            }
        }
    }

    async fn run_control_reader(
        self: &Arc<Self>,
        mut recv: transport::RecvStream,
        outgoing: mpsc::Sender<OutgoingEvent>,
    ) -> Result<(), SessionRunError> {
        let mut codec = FrameCodec::new(bootstrap_encoding(), self.config.max_frame_size);
        let mut buf = BytesMut::new();

        let first = match tokio::time::timeout(
            self.config.handshake_timeout,
            read_frame(&mut recv, &mut codec, &mut buf),
        )
        .await
        .map_err(|_| SessionRunError::HandshakeTimeout)??
        {
            FrameReadOutcome::Message(message) => message,
            FrameReadOutcome::EncodingMismatch { .. } => {
                return Err(SessionRunError::Fatal(
                    "initialize must be sent in the bootstrap encoding".into(),
                ));
            }
            FrameReadOutcome::Fatal { request_id, code, message } => {
                self.send_fatal_response(&outgoing, request_id, code, &message).await;
                return Err(SessionRunError::Fatal(message));
            }
            FrameReadOutcome::EndOfStream => {
                return Err(SessionRunError::Fatal("control stream closed before initialize".into()));
            }
        };

        let (has_id, method) = match &first {
            Message::Request(r) => (true, r.method.clone()),
            Message::Notification(n) => (false, n.method.clone()),
            Message::Response(_) => (false, String::new()),
        };
        self.state
            .lock()
            .await
            .on_first_frame(&method, has_id)
            .map_err(|e| SessionRunError::Fatal(e.to_string()))?;

        // `initialize` is handled inline, not spawned: nothing else may
        // legally arrive until the Session State Machine has left
        // INITIALIZING, and the reader's own `codec` needs to pick up the
        // negotiated encoding before it reads another byte.
        self.handle_frame(first, &outgoing).await?;
        if self.state.lock().await.phase() == Phase::Ready {
            codec.encoding = *self.encoding.lock().unwrap();
            codec.mismatch_detection = true;
        }

        loop {
            let phase = self.state.lock().await.phase();
            if phase == Phase::Closed {
                return Ok(());
            }
            match read_frame(&mut recv, &mut codec, &mut buf).await? {
                FrameReadOutcome::Message(message) => {
                    // Every other request/notification is handled on its own
                    // spawned task so a slow handler (a blocked `tools/call`,
                    // say) never stalls this loop from reading the next
                    // frame -- in particular, the `$/cancel` meant to
                    // interrupt it. Response ordering stays safe regardless,
                    // since every write funnels through the serialized
                    // `outgoing` queue.
                    let session = self.clone();
                    let outgoing = outgoing.clone();
                    tokio::spawn(async move {
                        if let Err(err) = session.handle_frame(message, &outgoing).await {
                            tracing::error!(%err, "fatal error handling control stream frame");
                            session.state.lock().await.force_close();
                        }
                    });
                }
                FrameReadOutcome::EncodingMismatch { request_id } => {
                    if let Some(id) = request_id {
                        let error = Message::Response(Response::error(
                            id,
                            ErrorObject::new(
                                error_codes::ENCODING_MISMATCH,
                                "frame encoded in the non-negotiated encoding",
                            ),
                        ));
                        outgoing.send(OutgoingEvent::Frame(error)).await.ok();
                    } else {
                        tracing::warn!("dropping encoding-mismatched notification (no id to reply to)");
                    }
                }
                FrameReadOutcome::Fatal { request_id, code, message } => {
                    self.send_fatal_response(&outgoing, request_id, code, &message).await;
                    return Err(SessionRunError::Fatal(message));
                }
                FrameReadOutcome::EndOfStream => return Ok(()),
            }
        }
    }

    /// Sends one `Response::error` for a fatal decode failure before the
    /// Control Stream closes, addressed to `request_id` if it could be
    /// recovered from the offending frame, or to `RequestId::Null` otherwise.
    async fn send_fatal_response(
        &self,
        outgoing: &mpsc::Sender<OutgoingEvent>,
        request_id: Option<RequestId>,
        code: i64,
        message: &str,
    ) {
        let response = Message::Response(Response::error(
            request_id.unwrap_or(RequestId::Null),
            ErrorObject::new(code, message),
        ));
        outgoing.send(OutgoingEvent::Frame(response)).await.ok();
    }

    async fn handle_frame(
        self: &Arc<Self>,
        message: Message,
        outgoing: &mpsc::Sender<OutgoingEvent>,
    ) -> Result<(), SessionRunError> {
        let phase = self.state.lock().await.phase();
        let streams = self.make_stream_opener(message.request_id().cloned());
        let outcome = self
            .dispatcher
            .dispatch(message, phase, &self.table, streams)
            .await;

        if let Some(reply) = outcome.reply {
            outgoing.send(OutgoingEvent::Frame(reply)).await.ok();
        }

        match outcome.action {
            DispatchAction::None => {}
            DispatchAction::InitializeReady { encoding } => {
                *self.encoding.lock().unwrap() = encoding;
                outgoing.send(OutgoingEvent::SetEncoding(encoding)).await.ok();
                self.state
                    .lock()
                    .await
                    .on_initialize_responded()
                    .map_err(|e| SessionRunError::Fatal(e.to_string()))?;
            }
        }

        // `$/shutdown` is handled by the Dispatcher by flipping the Lifecycle
        // Orchestrator's flag directly (it's a notification, so there's no
        // reply to key off)
        if self.lifecycle.is_draining() && self.state.lock().await.phase() == Phase::Ready {
            self.state.lock().await.on_shutdown().ok();
            self.spawn_drain_watcher();
        }
        Ok(())
    }

    /// Watches for the last in-flight request to complete, then transitions
    /// DRAINING -> CLOSED and tears down the transport Runs
    /// at most once per session; `drain_timeout` bounds how long a slow tool
    /// call can hold the session open.
    fn spawn_drain_watcher(self: &Arc<Self>) {
        if self
            .draining_watcher_spawned
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return;
        }
        let session = self.clone();
        tokio::spawn(async move {
            let wait_for_drain = async {
                loop {
                    if session.table.is_empty().await {
                        break;
                    }
                    tokio::time::sleep(Duration::from_millis(50)).await;
                }
            };
            tokio::time::timeout(session.lifecycle.drain_timeout, wait_for_drain)
                .await
                .ok();
            session.state.lock().await.on_drain_complete().ok();
            session.transport.close(0, b"session drained");
        });
    }

    fn make_stream_opener(self: &Arc<Self>, request_id: Option<RequestId>) -> Arc<dyn StreamOpener> {
        match request_id {
            Some(request_id) => Arc::new(RequestStreamOpener {
                session: self.clone(),
                request_id,
            }),
            None => Arc::new(NullStreamOpener),
        }
    }

    /// Opens a fresh Execution Stream tagged to `request_id`, writes its
    /// 8-byte header, and returns the tag plus a writer that releases the
    /// Stream Mux's reservation and unbinds the Request Table entry when
    /// dropped
    async fn open_execution_stream(
        self: &Arc<Self>,
        request_id: &RequestId,
    ) -> std::io::Result<crate::tools::OpenedStream> {
        self.mux
            .reserve()
            .map_err(|cause| std::io::Error::other(format!("{cause:?}")))?;

        let tag = match self.table.allocate_stream_tag(request_id).await {
            Ok(tag) => tag,
            Err(err) => {
                self.mux.release();
                return Err(std::io::Error::other(err));
            }
        };
        if let Err(err) = self
            .table
            .bind_stream(request_id, tag, StreamDirection::Opened)
            .await
        {
            self.mux.release();
            return Err(std::io::Error::other(err));
        }

        let mut send = match self.transport.open_uni().await {
            Ok(send) => send,
            Err(err) => {
                self.mux.release();
                return Err(std::io::Error::other(err));
            }
        };

        let ordinal = self.ordinals.lock().unwrap().ordinal_for(request_id);
        let header = StreamHeader::new(ordinal, tag).encode();
        if let Err(err) = send.write_all(&header).await {
            self.mux.release();
            return Err(std::io::Error::other(err));
        }

        Ok(crate::tools::OpenedStream {
            ordinal,
            stream_tag: tag,
            writer: Box::new(ExecutionStreamWriter {
                send,
                session: self.clone(),
                request_id: request_id.clone(),
                tag,
            }),
        })
    }

    async fn run_execution_stream_acceptor(self: Arc<Self>) {
        loop {
            match self.transport.accept_uni().await {
                Ok(recv) => {
                    let session = self.clone();
                    tokio::spawn(async move {
                        session.accept_execution_stream(recv).await;
                    });
                }
                Err(_) => return,
            }
        }
    }

    /// Validates and drains one peer-opened Execution Stream. What the
    /// stream carries is left to whoever built on top of this engine; this
    /// reads it to completion so the QUIC stream closes cleanly, then
    /// unbinds the Request Table entry.
    async fn accept_execution_stream(self: Arc<Self>, mut recv: transport::RecvStream) {
        let mut header_bytes = [0u8; STREAM_HEADER_SIZE];
        if recv.read_exact(&mut header_bytes).await.is_err() {
            return;
        }
        let header = StreamHeader::decode(&header_bytes);
        let request_id = self.ordinals.lock().unwrap().id_for(header.request_ordinal);

        if self.mux.reserve().is_err() {
            self.emit_stream_error(request_id, header.stream_tag, StreamErrorCause::LimitExceeded)
                .await;
            recv.stop(stream_stop_code(StreamErrorCause::LimitExceeded)).ok();
            return;
        }

        match validate_accept(&self.table, request_id.clone(), header.stream_tag).await {
            AcceptOutcome::Deliver {
                request_id,
                stream_tag,
            } => {
                recv.read_to_end(self.config.max_frame_size as usize).await.ok();
                self.mux.release();
                self.table.unbind_stream(&request_id, stream_tag).await;
            }
            AcceptOutcome::Reject(cause) => {
                self.mux.release();
                self.emit_stream_error(request_id, header.stream_tag, cause).await;
                recv.stop(stream_stop_code(cause)).ok();
            }
        }
    }

    async fn emit_stream_error(&self, request_id: Option<RequestId>, stream_tag: u32, cause: StreamErrorCause) {
        let notification = self.lifecycle.stream_error_notification(&StreamError {
            request_id,
            stream_tag: Some(stream_tag),
            cause,
        });
        if let Some(tx) = self.control_tx.lock().await.as_ref() {
            tx.send(OutgoingEvent::Frame(Message::Notification(notification)))
                .await
                .ok();
        }
    }

    async fn run_datagram_loop(self: Arc<Self>) {
        loop {
            match self.transport.read_datagram().await {
                Ok(bytes) => match self.datagrams.recv(&bytes) {
                    RecvOutcome::Deliver { header, payload } => {
                        tracing::debug!(
                            channel = header.channel_id,
                            len = payload.len(),
                            "datagram received"
                        );
                    }
                    RecvOutcome::Malformed => tracing::warn!("malformed datagram dropped"),
                    RecvOutcome::Unsupported => {
                        tracing::debug!("datagram received but datagrams are unsupported")
                    }
                },
                Err(_) => return,
            }
        }
    }

    /// Sends one best-effort datagram on `channel_id`, tagged to
    /// `request_id` if it belongs to an in-flight request
    pub fn send_datagram(
        &self,
        channel_id: u8,
        request_id: Option<&RequestId>,
        payload: &[u8],
    ) -> Result<(), SessionRunError> {
        let ordinal = request_id
            .map(|id| self.ordinals.lock().unwrap().ordinal_for(id))
            .unwrap_or(0);
        let header = DatagramHeader::new(channel_id, ordinal);
        match self.datagrams.send(header, payload) {
            SendOutcome::Sent(bytes) => {
                self.transport.send_datagram(bytes.into())?;
                Ok(())
            }
            SendOutcome::DroppedOversize => Ok(()),
        }
    }
}

/// The application-level QUIC stop/reset code sent back for a rejected
/// Execution Stream; the unsigned magnitude of its JSON-RPC error code
///, not the code itself, since stream-level error codes share
/// a different, WebTransport-session-scoped space
fn stream_stop_code(cause: StreamErrorCause) -> u32 {
    cause.error_code().unsigned_abs() as u32
}

/// What `read_frame` pulled off the wire: a decoded message, a frame that
/// parsed but under the wrong (non-negotiated) encoding, or a clean
/// end-of-stream. Kept separate from [`FrameError`] because an encoding
/// mismatch is recoverable -- the session stays open -- while every other
/// decode error is fatal to the Control Stream.
enum FrameReadOutcome {
    Message(Message),
    EncodingMismatch { request_id: Option<RequestId> },
    /// The frame didn't decode at all, or violated the frame-size limit.
    /// The Control Stream closes right after this is handled, but gets one
    /// chance to tell the peer why, addressed to `request_id` if the
    /// offending frame's `id` could be recovered despite the rest of it
    /// failing to parse.
    Fatal {
        request_id: Option<RequestId>,
        code: i64,
        message: String,
    },
    EndOfStream,
}

fn frame_error_outcome(err: FrameError) -> FrameReadOutcome {
    match err {
        FrameError::EncodingMismatch { request_id } => FrameReadOutcome::EncodingMismatch { request_id },
        FrameError::Parse { request_id } => {
            let code = ProtocolError::Frame(FrameError::Parse {
                request_id: request_id.clone(),
            })
            .error_code();
            FrameReadOutcome::Fatal {
                request_id,
                code,
                message: "parse error".to_string(),
            }
        }
        other => {
            let message = other.to_string();
            let code = ProtocolError::Frame(other).error_code();
            FrameReadOutcome::Fatal {
                request_id: None,
                code,
                message,
            }
        }
    }
}

async fn read_frame(
    recv: &mut transport::RecvStream,
    codec: &mut FrameCodec,
    buf: &mut BytesMut,
) -> Result<FrameReadOutcome, SessionRunError> {
    loop {
        match codec.decode(buf) {
            Ok(Some(message)) => return Ok(FrameReadOutcome::Message(message)),
            Ok(None) => {}
            Err(err) => return Ok(frame_error_outcome(err)),
        }
        let mut chunk = [0u8; 4096];
        match recv
            .read(&mut chunk)
            .await
            .map_err(|e| SessionRunError::Fatal(e.to_string()))?
        {
            Some(0) | None => {
                return Ok(match codec.decode_eof(buf) {
                    Ok(Some(message)) => FrameReadOutcome::Message(message),
                    Ok(None) => FrameReadOutcome::EndOfStream,
                    Err(err) => frame_error_outcome(err),
                });
            }
            Some(n) => buf.extend_from_slice(&chunk[..n]),
        }
    }
}

struct RequestStreamOpener {
    session: Arc<Session>,
    request_id: RequestId,
}

#[async_trait::async_trait]
impl StreamOpener for RequestStreamOpener {
    async fn open_stream(&self) -> std::io::Result<crate::tools::OpenedStream> {
        self.session.open_execution_stream(&self.request_id).await
    }
}

/// Used for notifications and responses, which never open Execution Streams
/// (only `tools/call` is granted that ability).
struct NullStreamOpener;

#[async_trait::async_trait]
impl StreamOpener for NullStreamOpener {
    async fn open_stream(&self) -> std::io::Result<crate::tools::OpenedStream> {
        Err(std::io::Error::other("this message cannot open Execution Streams"))
    }
}

/// Wraps the Execution Stream's [`transport::SendStream`] so closing it
/// (including an implicit drop, as `StreamTool` does once it has written its
/// payload) releases the Stream Mux reservation and unbinds the Request
/// Table entry without the caller having to remember to do either.
struct ExecutionStreamWriter {
    send: transport::SendStream,
    session: Arc<Session>,
    request_id: RequestId,
    tag: u32,
}

impl AsyncWrite for ExecutionStreamWriter {
    fn poll_write(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &[u8],
    ) -> std::task::Poll<std::io::Result<usize>> {
        std::pin::Pin::new(&mut self.send).poll_write(cx, buf)
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.send).poll_flush(cx)
    }

    fn poll_shutdown(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.send).poll_shutdown(cx)
    }
}

impl Drop for ExecutionStreamWriter {
    fn drop(&mut self) {
        self.send.finish().ok();
        self.session.mux.release();
        let session = self.session.clone();
        let request_id = self.request_id.clone();
        let tag = self.tag;
        tokio::spawn(async move {
            session.table.unbind_stream(&request_id, tag).await;
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordinal_map_is_stable_and_bidirectional() {
        let mut map = OrdinalMap::default();
        let id = RequestId::Number(42);
        let ordinal = map.ordinal_for(&id);
        assert_eq!(map.ordinal_for(&id), ordinal, "same id maps to same ordinal");
        assert_eq!(map.id_for(ordinal), Some(id));
        assert_eq!(map.id_for(ordinal + 1), None);
    }

    #[test]
    fn ordinal_map_assigns_distinct_ordinals() {
        let mut map = OrdinalMap::default();
        let a = map.ordinal_for(&RequestId::Number(1));
        let b = map.ordinal_for(&RequestId::String("x".into()));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn null_stream_opener_refuses_to_open() {
        let opener = NullStreamOpener;
        assert!(opener.open_stream().await.is_err());
    }

    #[test]
    fn frame_error_outcome_carries_a_recovered_id_and_error_code() {
        let id = RequestId::Number(7);
        match frame_error_outcome(FrameError::Parse {
            request_id: Some(id.clone()),
        }) {
            FrameReadOutcome::Fatal { request_id, code, .. } => {
                assert_eq!(request_id, Some(id));
                assert_eq!(code, crate::message::error_codes::PARSE_ERROR);
            }
            _ => panic!("expected a fatal outcome"),
        }
    }

    #[test]
    fn frame_error_outcome_too_large_is_fatal_without_a_recoverable_id() {
        match frame_error_outcome(FrameError::TooLarge(1024)) {
            FrameReadOutcome::Fatal { request_id, code, .. } => {
                assert_eq!(request_id, None);
                assert_eq!(code, crate::message::error_codes::PARSE_ERROR);
            }
            _ => panic!("expected a fatal outcome"),
        }
    }

    #[test]
    fn frame_error_outcome_still_treats_encoding_mismatch_as_recoverable() {
        let id = RequestId::String("abc".into());
        match frame_error_outcome(FrameError::EncodingMismatch {
            request_id: Some(id.clone()),
        }) {
            FrameReadOutcome::EncodingMismatch { request_id } => assert_eq!(request_id, Some(id)),
            _ => panic!("expected an encoding mismatch outcome"),
        }
    }
}
