//! Tool registry: the extension point for an opaque computation identified
//! by name, consuming JSON arguments and producing either an inline result,
//! a reference to an Execution Stream, or an error. No concrete tools ship;
//! `EchoTool` and `StreamTool` below exist only to exercise `tools/call`'s
//! two result
//! shapes in tests.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWrite;
use tokio_util::sync::CancellationToken;

/// A freshly opened Execution Stream: the wire ordinal written into its
/// header (what the client needs to tell this stream apart from another
/// request's, since `stream_tag` alone is only unique within one request),
/// the stream tag itself, and a writer for the payload.
pub struct OpenedStream {
    pub ordinal: u32,
    pub stream_tag: u32,
    pub writer: Box<dyn AsyncWrite + Unpin + Send>,
}

/// Opens a new Execution Stream tagged to the request currently being
/// handled. Implemented by the engine's `Session`; a trait here so tool
/// code stays decoupled from the transport layer.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open_stream(&self) -> std::io::Result<OpenedStream>;
}

/// Everything a running tool call needs besides its arguments: a
/// cancellation signal to observe promptly, and the ability
/// to open Execution Streams for large/incremental output
#[derive(Clone)]
pub struct ToolContext {
    pub cancel: CancellationToken,
    pub streams: Arc<dyn StreamOpener>,
}

/// The result of one `tools/call` invocation Tool-level
/// failures are `Error`, not an RPC error: the Dispatcher wraps this as
/// `{ "content": [...], "isError": true }` rather than a JSON-RPC error
/// object, per MCP convention.
pub enum ToolOutcome {
    Result(Value),
    /// The tool's output lives on an Execution Stream already opened via
    /// `ToolContext::streams`; `stream_tag` must be one this call actually
    /// opened, so the Request Table can validate the peer's read. `ordinal`
    /// is the same value written into that stream's wire header, so the
    /// Dispatcher can hand it back to the client alongside `stream_tag`.
    StreamRef {
        stream_tag: u32,
        ordinal: u32,
        content_type: Option<String>,
    },
    Error(Value),
}

#[derive(Debug, Clone)]
pub struct ToolMetadata {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

#[async_trait]
pub trait Tool: Send + Sync + 'static {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn call(&self, arguments: Value, ctx: ToolContext) -> ToolOutcome;

    fn metadata(&self) -> ToolMetadata {
        ToolMetadata {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// Tools registered for this session, keyed by name. `tools/list` returns
/// this metadata, `tools/call` invokes by name. Guarded by a single mutex,
/// the same serialization discipline as the Request Table.
#[derive(Default)]
pub struct Registry {
    tools: tokio::sync::Mutex<HashMap<String, Arc<dyn Tool>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, tool: Arc<dyn Tool>) {
        self.tools
            .lock()
            .await
            .insert(tool.name().to_string(), tool);
    }

    pub async fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.lock().await.get(name).cloned()
    }

    pub async fn list(&self) -> Vec<ToolMetadata> {
        self.tools.lock().await.values().map(|t| t.metadata()).collect()
    }
}

/// Echoes its `arguments` back as the result. Exercises the inline-result
/// and `isError` paths of `tools/call`.
pub struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echoes the given arguments back as the result."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    async fn call(&self, arguments: Value, _ctx: ToolContext) -> ToolOutcome {
        if arguments.get("fail").and_then(Value::as_bool) == Some(true) {
            ToolOutcome::Error(serde_json::json!({ "message": "echo asked to fail" }))
        } else {
            ToolOutcome::Result(arguments)
        }
    }
}

/// Writes its `text` argument to a fresh Execution Stream and returns a
/// reference to it. Exercises the Execution Stream path end to end.
pub struct StreamTool;

#[async_trait]
impl Tool for StreamTool {
    fn name(&self) -> &str {
        "stream"
    }

    fn description(&self) -> &str {
        "Streams the given text back over an Execution Stream."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"],
        })
    }

    async fn call(&self, arguments: Value, ctx: ToolContext) -> ToolOutcome {
        use tokio::io::AsyncWriteExt;

        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();

        let OpenedStream { ordinal, stream_tag, mut writer } = match ctx.streams.open_stream().await {
            Ok(opened) => opened,
            Err(err) => {
                return ToolOutcome::Error(serde_json::json!({ "message": err.to_string() }));
            }
        };

        if let Err(err) = writer.write_all(text.as_bytes()).await {
            return ToolOutcome::Error(serde_json::json!({ "message": err.to_string() }));
        }

        ToolOutcome::StreamRef {
            stream_tag,
            ordinal,
            content_type: Some("text/plain".to_string()),
        }
    }
}
