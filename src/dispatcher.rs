//! RPC Dispatcher: routes decoded Control Stream messages to
//! their handlers, and tells the caller which of `initialize`/`$/shutdown`
//! requires a Session State Machine transition.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::capabilities::{ClientTransportCapabilities, Encoding, ServerTransportCapabilities, PROTOCOL_VERSION};
use crate::lifecycle::LifecycleOrchestrator;
use crate::message::{error_codes, methods, ErrorObject, Message, Notification, Request, RequestId, Response};
use crate::request_table::RequestTable;
use crate::state::Phase;
use crate::tools::{Registry, ToolContext, ToolOutcome};

#[derive(Debug, Deserialize)]
struct InitializeParams {
    #[serde(rename = "protocolVersion", default)]
    protocol_version: Option<String>,
    #[serde(default)]
    #[allow(dead_code)]
    capabilities: Value,
    #[serde(rename = "clientInfo", default)]
    #[allow(dead_code)]
    client_info: Value,
    transport: ClientTransportCapabilities,
}

#[derive(Debug, Deserialize)]
struct ToolsCallParams {
    name: String,
    #[serde(default)]
    arguments: Value,
}

#[derive(Debug, Deserialize)]
struct CancelParams {
    #[serde(rename = "requestId")]
    request_id: RequestId,
    #[serde(default)]
    reason: Option<String>,
}

/// A side effect the Dispatcher observed that the Session must apply to
/// its [`crate::state::StateMachine`]; separated out so the Dispatcher
/// itself stays state-machine-agnostic and unit-testable.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchAction {
    None,
    /// `initialize`'s response has been built; the caller should write it,
    /// then transition INITIALIZING -> READY with this encoding in force.
    InitializeReady { encoding: Encoding },
}

pub struct DispatchOutcome {
    pub reply: Option<Message>,
    pub action: DispatchAction,
}

impl DispatchOutcome {
    fn reply(message: Message) -> Self {
        Self {
            reply: Some(message),
            action: DispatchAction::None,
        }
    }

    fn none() -> Self {
        Self {
            reply: None,
            action: DispatchAction::None,
        }
    }
}

pub struct Dispatcher {
    supported_encodings: Vec<Encoding>,
    max_concurrent_streams: u32,
    datagrams_supported: bool,
    tools: Arc<Registry>,
    lifecycle: Arc<LifecycleOrchestrator>,
}

impl Dispatcher {
    pub fn new(
        supported_encodings: Vec<Encoding>,
        max_concurrent_streams: u32,
        datagrams_supported: bool,
        tools: Arc<Registry>,
        lifecycle: Arc<LifecycleOrchestrator>,
    ) -> Self {
        Self {
            supported_encodings,
            max_concurrent_streams,
            datagrams_supported,
            tools,
            lifecycle,
        }
    }

    /// Dispatches one decoded message. `phase` gates whether new requests
    /// are accepted at all (DRAINING refuses new requests with -32600);
    /// phase-specific framing (e.g. "first frame must be initialize") is
    /// the Session's job, upstream of this call.
    pub async fn dispatch(
        &self,
        message: Message,
        phase: Phase,
        table: &RequestTable,
        streams: Arc<dyn crate::tools::StreamOpener>,
    ) -> DispatchOutcome {
        match message {
            Message::Request(request) => self.dispatch_request(request, phase, table, streams).await,
            Message::Notification(notification) => {
                self.dispatch_notification(notification, table).await;
                DispatchOutcome::none()
            }
            Message::Response(_) => DispatchOutcome::none(),
        }
    }

    async fn dispatch_request(
        &self,
        request: Request,
        phase: Phase,
        table: &RequestTable,
        streams: Arc<dyn crate::tools::StreamOpener>,
    ) -> DispatchOutcome {
        if phase == Phase::Draining && request.method != methods::INITIALIZE {
            return DispatchOutcome::reply(Message::Response(Response::error(
                request.id,
                ErrorObject::invalid_request("session is draining, no new requests accepted"),
            )));
        }

        let id = request.id.clone();
        let method = request.method.clone();
        let cancel = match table.register(id.clone(), method.clone()).await {
            Ok(cancel) => cancel,
            Err(_) => {
                return DispatchOutcome::reply(Message::Response(Response::error(
                    id,
                    ErrorObject::invalid_request("duplicate request id"),
                )));
            }
        };

        let outcome = match method.as_str() {
            methods::INITIALIZE => self.handle_initialize(request),
            methods::TOOLS_LIST => self.handle_tools_list(request).await,
            methods::TOOLS_CALL => self.handle_tools_call(request, table, streams, cancel).await,
            methods::PING => DispatchOutcome::reply(Message::Response(Response::result(
                request.id,
                Value::Object(Default::default()),
            ))),
            other => DispatchOutcome::reply(Message::Response(Response::error(
                request.id,
                ErrorObject::method_not_found(other),
            ))),
        };

        // `tools/call` completes on its own, once it knows whether it opened
        // any Execution Streams that must drain first; every other handler
        // here is synchronous, so its response table entry is immediately
        // complete.
        if method != methods::TOOLS_CALL {
            table.mark_response_sent(&id).await;
        }

        outcome
    }

    async fn dispatch_notification(&self, notification: Notification, table: &RequestTable) {
        match notification.method.as_str() {
            methods::INITIALIZED => {
                tracing::debug!("client observed initialized");
            }
            methods::CANCEL => {
                if let Some(params) = notification.params {
                    match serde_json::from_value::<CancelParams>(params) {
                        Ok(params) => {
                            tracing::debug!(
                                request_id = %params.request_id,
                                reason = params.reason.as_deref().unwrap_or("<none>"),
                                "received $/cancel"
                            );
                            self.lifecycle.cancel(table, params.request_id).await;
                        }
                        Err(err) => tracing::warn!(%err, "malformed $/cancel params"),
                    }
                }
            }
            methods::SHUTDOWN => {
                self.lifecycle.request_shutdown();
            }
            methods::STREAM_ERROR => {
                tracing::debug!("ignoring peer-sent $/streamError (server-only notification)");
            }
            other => {
                tracing::debug!(method = other, "ignoring unknown notification");
            }
        }
    }

    fn handle_initialize(&self, request: Request) -> DispatchOutcome {
        let params: InitializeParams = match request.params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            _ => {
                return DispatchOutcome::reply(Message::Response(Response::error(
                    request.id,
                    ErrorObject::invalid_request("missing or malformed initialize params"),
                )));
            }
        };

        let Some(encoding) = params.transport.negotiate(&self.supported_encodings) else {
            return DispatchOutcome::reply(Message::Response(Response::error(
                request.id,
                ErrorObject::new(
                    error_codes::ENCODING_MISMATCH,
                    "no encoding overlap between client and server",
                ),
            )));
        };

        let server_transport = ServerTransportCapabilities::new(
            encoding,
            self.max_concurrent_streams,
            self.datagrams_supported,
        );
        let result = serde_json::json!({
            "protocolVersion": params.protocol_version.unwrap_or_else(|| PROTOCOL_VERSION.to_string()),
            "capabilities": { "tools": {} },
            "serverInfo": { "name": "mcp-flow", "version": env!("CARGO_PKG_VERSION") },
            "transport": server_transport,
        });

        DispatchOutcome {
            reply: Some(Message::Response(Response::result(request.id, result))),
            action: DispatchAction::InitializeReady { encoding },
        }
    }

    async fn handle_tools_list(&self, request: Request) -> DispatchOutcome {
        let tools = self.tools.list().await;
        let result = serde_json::json!({ "tools": tools.into_iter().map(|t| serde_json::json!({
            "name": t.name,
            "description": t.description,
            "inputSchema": t.input_schema,
        })).collect::<Vec<_>>() });
        DispatchOutcome::reply(Message::Response(Response::result(request.id, result)))
    }

    async fn handle_tools_call(
        &self,
        request: Request,
        table: &RequestTable,
        streams: Arc<dyn crate::tools::StreamOpener>,
        cancel: CancellationToken,
    ) -> DispatchOutcome {
        let params: ToolsCallParams = match request.params.map(serde_json::from_value) {
            Some(Ok(params)) => params,
            _ => {
                table.mark_response_sent(&request.id).await;
                return DispatchOutcome::reply(Message::Response(Response::error(
                    request.id,
                    ErrorObject::invalid_request("missing or malformed tools/call params"),
                )));
            }
        };

        let Some(tool) = self.tools.get(&params.name).await else {
            table.mark_response_sent(&request.id).await;
            let result = tool_error_result(format!("unknown tool: {}", params.name));
            return DispatchOutcome::reply(Message::Response(Response::result(request.id, result)));
        };

        let ctx = ToolContext { cancel: cancel.clone(), streams };

        let outcome = tokio::select! {
            outcome = tool.call(params.arguments, ctx) => outcome,
            _ = cancel.cancelled() => {
                let (code, message) = LifecycleOrchestrator::cancelled_error();
                table.mark_response_sent(&request.id).await;
                return DispatchOutcome::reply(Message::Response(Response::error(
                    request.id,
                    ErrorObject::new(code, message),
                )));
            }
        };

        let result = match outcome {
            ToolOutcome::Result(value) => {
                serde_json::json!({ "content": [{ "type": "text", "value": value }], "isError": false })
            }
            ToolOutcome::StreamRef { stream_tag, ordinal, content_type } => {
                table
                    .declare_stream_tags(&request.id, [stream_tag])
                    .await
                    .ok();
                serde_json::json!({
                    "content": [{
                        "type": "ref/stream",
                        "requestId": ordinal,
                        "streamTag": stream_tag,
                        "contentType": content_type,
                    }],
                    "isError": false,
                })
            }
            ToolOutcome::Error(value) => {
                serde_json::json!({ "content": [{ "type": "text", "value": value }], "isError": true })
            }
        };

        table.mark_response_sent(&request.id).await;
        DispatchOutcome::reply(Message::Response(Response::result(request.id, result)))
    }
}

fn tool_error_result(message: impl Into<String>) -> Value {
    serde_json::json!({
        "content": [{ "type": "text", "value": { "message": message.into() } }],
        "isError": true,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Message;
    use std::time::Duration;

    struct NullStreamOpener;

    #[async_trait::async_trait]
    impl crate::tools::StreamOpener for NullStreamOpener {
        async fn open_stream(&self) -> std::io::Result<crate::tools::OpenedStream> {
            Err(std::io::Error::other("no streams in this test"))
        }
    }

    fn dispatcher() -> Dispatcher {
        let tools = Arc::new(Registry::new());
        Dispatcher::new(
            vec![Encoding::Json, Encoding::Cbor],
            64,
            true,
            tools,
            Arc::new(LifecycleOrchestrator::new(Duration::from_secs(30))),
        )
    }

    fn streams() -> Arc<dyn crate::tools::StreamOpener> {
        Arc::new(NullStreamOpener)
    }

    #[tokio::test]
    async fn initialize_negotiates_preferred_encoding() {
        let d = dispatcher();
        let table = RequestTable::new();
        let request = Message::Request(Request::new(
            RequestId::Number(1),
            methods::INITIALIZE,
            Some(serde_json::json!({
                "protocolVersion": "2024-11-05",
                "transport": { "type": "mcp-flow", "version": "0.1", "encodings": ["cbor", "json"] },
            })),
        ));
        let outcome = d
            .dispatch(request, Phase::ControlStreamOpened, &table, streams())
            .await;
        assert_eq!(
            outcome.action,
            DispatchAction::InitializeReady { encoding: Encoding::Cbor }
        );
        match outcome.reply {
            Some(Message::Response(response)) => match response.body {
                crate::message::ResponseBody::Result(value) => {
                    assert_eq!(value["transport"]["encoding"], "cbor");
                }
                _ => panic!("expected result"),
            },
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn ping_returns_empty_object() {
        let d = dispatcher();
        let table = RequestTable::new();
        let request = Message::Request(Request::new(RequestId::Number(2), methods::PING, None));
        let outcome = d.dispatch(request, Phase::Ready, &table, streams()).await;
        match outcome.reply {
            Some(Message::Response(response)) => match response.body {
                crate::message::ResponseBody::Result(value) => assert_eq!(value, serde_json::json!({})),
                _ => panic!("expected result"),
            },
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn unknown_method_is_method_not_found() {
        let d = dispatcher();
        let table = RequestTable::new();
        let request = Message::Request(Request::new(RequestId::Number(7), "nope", None));
        let outcome = d.dispatch(request, Phase::Ready, &table, streams()).await;
        match outcome.reply {
            Some(Message::Response(response)) => match response.body {
                crate::message::ResponseBody::Error(err) => {
                    assert_eq!(err.code, error_codes::METHOD_NOT_FOUND);
                    assert!(err.message.contains("nope"));
                }
                _ => panic!("expected error"),
            },
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn draining_rejects_new_requests() {
        let d = dispatcher();
        let table = RequestTable::new();
        let request = Message::Request(Request::new(RequestId::Number(3), methods::PING, None));
        let outcome = d.dispatch(request, Phase::Draining, &table, streams()).await;
        match outcome.reply {
            Some(Message::Response(response)) => match response.body {
                crate::message::ResponseBody::Error(err) => {
                    assert_eq!(err.code, error_codes::INVALID_REQUEST);
                }
                _ => panic!("expected error"),
            },
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn tools_call_unknown_tool_is_an_iserror_result_not_rpc_error() {
        let d = dispatcher();
        let table = RequestTable::new();
        let request = Message::Request(Request::new(
            RequestId::Number(4),
            methods::TOOLS_CALL,
            Some(serde_json::json!({ "name": "nonexistent", "arguments": {} })),
        ));
        let outcome = d.dispatch(request, Phase::Ready, &table, streams()).await;
        match outcome.reply {
            Some(Message::Response(response)) => match response.body {
                crate::message::ResponseBody::Result(value) => {
                    assert_eq!(value["isError"], true);
                }
                _ => panic!("expected result, not rpc error, for unknown tool"),
            },
            _ => panic!("expected a response"),
        }
    }

    #[tokio::test]
    async fn tools_call_invokes_registered_tool() {
        let tools = Arc::new(Registry::new());
        tools.register(Arc::new(crate::tools::EchoTool)).await;
        let d = Dispatcher::new(
            vec![Encoding::Json],
            64,
            true,
            tools,
            Arc::new(LifecycleOrchestrator::new(Duration::from_secs(30))),
        );
        let table = RequestTable::new();
        let request = Message::Request(Request::new(
            RequestId::Number(5),
            methods::TOOLS_CALL,
            Some(serde_json::json!({ "name": "echo", "arguments": { "a": 1 } })),
        ));
        let outcome = d.dispatch(request, Phase::Ready, &table, streams()).await;
        match outcome.reply {
            Some(Message::Response(response)) => match response.body {
                crate::message::ResponseBody::Result(value) => {
                    assert_eq!(value["isError"], false);
                }
                _ => panic!("expected result"),
            },
            _ => panic!("expected a response"),
        }
        assert!(!table.contains(&RequestId::Number(5)).await);
    }

    #[tokio::test]
    async fn shutdown_notification_is_idempotent_and_has_no_reply() {
        let d = dispatcher();
        let table = RequestTable::new();
        let shutdown = Message::Notification(crate::message::Notification::new(methods::SHUTDOWN, None));
        let outcome = d.dispatch(shutdown, Phase::Ready, &table, streams()).await;
        assert!(outcome.reply.is_none());
        assert!(d.lifecycle.is_draining());
    }

    #[tokio::test]
    async fn cancel_notification_signals_the_request_table() {
        let d = dispatcher();
        let table = RequestTable::new();
        let cancel_token = table.register(RequestId::Number(9), "tools/call").await.unwrap();
        let cancel = Message::Notification(crate::message::Notification::new(
            methods::CANCEL,
            Some(serde_json::json!({ "requestId": 9 })),
        ));
        d.dispatch(cancel, Phase::Ready, &table, streams()).await;
        assert!(cancel_token.is_cancelled());
    }
}
