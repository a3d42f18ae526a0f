//! One full-stack round trip through the protocol engine: `initialize` ->
//! `tools/call` (inline result) -> `tools/call` (Execution Stream) ->
//! `ping` -> `$/shutdown`, driven over a real loopback iroh endpoint pair.
//! Extends `transport::tests`'s loopback-pair pattern to the engine built
//! on top of it, rather than the bare transport surface.

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use iroh::Endpoint;
use n0_tracing_test::traced_test;
use tokio_util::codec::{Decoder, Encoder};
use tracing::Instrument;
use url::Url;

use crate::capabilities::Encoding;
use crate::codec::{FrameCodec, DEFAULT_MAX_FRAME_SIZE};
use crate::config::EngineConfig;
use crate::message::{methods, Message, Notification, Request, RequestId, Response, ResponseBody};
use crate::session::Session as EngineSession;
use crate::stream_mux::StreamHeader;
use crate::tools::{EchoTool, Registry, StreamTool};
use crate::transport::{Client, H3Request, RecvStream, SendStream, ALPN_H3};

async fn send_frame(send: &mut SendStream, codec: &mut FrameCodec, message: Message) {
    let mut buf = BytesMut::new();
    codec.encode(&message, &mut buf).unwrap();
    send.write_all(&buf).await.unwrap();
}

async fn recv_frame(recv: &mut RecvStream, codec: &mut FrameCodec, buf: &mut BytesMut) -> Message {
    loop {
        if let Some(message) = codec.decode(buf).unwrap() {
            return message;
        }
        let mut chunk = [0u8; 4096];
        match recv.read(&mut chunk).await.unwrap() {
            Some(n) => buf.extend_from_slice(&chunk[..n]),
            None => panic!("control stream closed before a reply arrived"),
        }
    }
}

fn expect_result(message: Message, id: RequestId) -> serde_json::Value {
    match message {
        Message::Response(Response { id: got_id, body: ResponseBody::Result(value) }) => {
            assert_eq!(got_id, id);
            value
        }
        other => panic!("expected a result response for {id}, got {other:?}"),
    }
}

#[tokio::test]
#[traced_test]
async fn initialize_tools_call_stream_round_trip() -> n0_error::Result<()> {
    let client_ep = Endpoint::bind()
        .instrument(tracing::error_span!("client-ep"))
        .await
        .unwrap();
    let client = Client::new(client_ep);

    let server_ep = Endpoint::builder()
        .alpns(vec![ALPN_H3.as_bytes().to_vec()])
        .bind()
        .instrument(tracing::error_span!("server-ep"))
        .await
        .unwrap();
    let server_id = server_ep.id();
    let server_addr = server_ep.addr();

    let url: Url = format!("https://{server_id}/mcp-flow").parse().unwrap();

    let server_task = tokio::spawn(
        async move {
            let conn = server_ep.accept().await.unwrap().await.unwrap();
            let request = H3Request::accept(conn).await.unwrap();
            let transport_session = request.ok().await.unwrap();

            let tools = Arc::new(Registry::new());
            tools.register(Arc::new(EchoTool)).await;
            tools.register(Arc::new(StreamTool)).await;

            let engine = EngineSession::new(transport_session, EngineConfig::default(), tools);
            engine.run().await.ok();
            server_ep.close().await;
        }
        .instrument(tracing::error_span!("server")),
    );

    let client_task = tokio::spawn(
        async move {
            let transport_session = client.connect_h3(server_addr, url).await.unwrap();
            let (mut send, mut recv) = transport_session.open_bi().await.unwrap();

            let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
            let mut buf = BytesMut::new();

            send_frame(
                &mut send,
                &mut codec,
                Message::Request(Request::new(
                    RequestId::Number(1),
                    methods::INITIALIZE,
                    Some(serde_json::json!({
                        "protocolVersion": "2024-11-05",
                        "capabilities": {},
                        "clientInfo": {"name": "test-client", "version": "1"},
                        "transport": {"type": "mcp-flow", "version": "0.1", "encodings": ["json"]},
                    })),
                )),
            )
            .await;
            let reply = recv_frame(&mut recv, &mut codec, &mut buf).await;
            let result = expect_result(reply, RequestId::Number(1));
            assert_eq!(result["transport"]["encoding"], "json");
            assert_eq!(result["transport"]["version"], "0.1");

            send_frame(
                &mut send,
                &mut codec,
                Message::Notification(Notification::new(methods::INITIALIZED, None)),
            )
            .await;

            send_frame(
                &mut send,
                &mut codec,
                Message::Request(Request::new(
                    RequestId::Number(2),
                    methods::TOOLS_CALL,
                    Some(serde_json::json!({"name": "echo", "arguments": {"hi": "there"}})),
                )),
            )
            .await;
            let reply = recv_frame(&mut recv, &mut codec, &mut buf).await;
            let result = expect_result(reply, RequestId::Number(2));
            assert_eq!(result["isError"], false);
            assert_eq!(result["content"][0]["value"]["hi"], "there");

            send_frame(
                &mut send,
                &mut codec,
                Message::Request(Request::new(
                    RequestId::Number(3),
                    methods::TOOLS_CALL,
                    Some(serde_json::json!({"name": "stream", "arguments": {"text": "hello over a stream"}})),
                )),
            )
            .await;
            let reply = recv_frame(&mut recv, &mut codec, &mut buf).await;
            let result = expect_result(reply, RequestId::Number(3));
            assert_eq!(result["isError"], false);
            assert_eq!(result["content"][0]["type"], "ref/stream");
            let stream_tag = result["content"][0]["streamTag"].as_u64().unwrap() as u32;
            let ordinal = result["content"][0]["requestId"].as_u64().unwrap() as u32;

            let mut exec_recv = transport_session.accept_uni().await.unwrap();
            let mut header_bytes = [0u8; 8];
            exec_recv.read_exact(&mut header_bytes).await.unwrap();
            let header = StreamHeader::decode(&header_bytes);
            assert_eq!(header.stream_tag, stream_tag);
            assert_eq!(header.request_ordinal, ordinal);
            let payload = exec_recv.read_to_end(1024).await.unwrap();
            assert_eq!(payload, b"hello over a stream");

            send_frame(
                &mut send,
                &mut codec,
                Message::Request(Request::new(RequestId::Number(4), methods::PING, None)),
            )
            .await;
            let reply = recv_frame(&mut recv, &mut codec, &mut buf).await;
            assert_eq!(expect_result(reply, RequestId::Number(4)), serde_json::json!({}));

            send_frame(
                &mut send,
                &mut codec,
                Message::Notification(Notification::new(methods::SHUTDOWN, None)),
            )
            .await;
            send.finish().ok();

            tokio::time::sleep(Duration::from_millis(200)).await;
            client.close().await;
        }
        .instrument(tracing::error_span!("client")),
    );

    client_task.await.unwrap();
    server_task.await.unwrap();

    Ok(())
}

#[tokio::test]
#[traced_test]
async fn unknown_tool_call_is_iserror_not_rpc_error_over_the_wire() -> n0_error::Result<()> {
    let client_ep = Endpoint::bind().await.unwrap();
    let client = Client::new(client_ep);

    let server_ep = Endpoint::builder()
        .alpns(vec![ALPN_H3.as_bytes().to_vec()])
        .bind()
        .await
        .unwrap();
    let server_id = server_ep.id();
    let server_addr = server_ep.addr();
    let url: Url = format!("https://{server_id}/mcp-flow").parse().unwrap();

    let server_task = tokio::spawn(async move {
        let conn = server_ep.accept().await.unwrap().await.unwrap();
        let request = H3Request::accept(conn).await.unwrap();
        let transport_session = request.ok().await.unwrap();
        let engine = EngineSession::new(transport_session, EngineConfig::default(), Arc::new(Registry::new()));
        engine.run().await.ok();
        server_ep.close().await;
    });

    let client_task = tokio::spawn(async move {
        let transport_session = client.connect_h3(server_addr, url).await.unwrap();
        let (mut send, mut recv) = transport_session.open_bi().await.unwrap();
        let mut codec = FrameCodec::new(Encoding::Json, DEFAULT_MAX_FRAME_SIZE);
        let mut buf = BytesMut::new();

        send_frame(
            &mut send,
            &mut codec,
            Message::Request(Request::new(
                RequestId::Number(1),
                methods::INITIALIZE,
                Some(serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "transport": {"type": "mcp-flow", "version": "0.1"},
                })),
            )),
        )
        .await;
        recv_frame(&mut recv, &mut codec, &mut buf).await;

        send_frame(
            &mut send,
            &mut codec,
            Message::Request(Request::new(
                RequestId::Number(2),
                methods::TOOLS_CALL,
                Some(serde_json::json!({"name": "does-not-exist", "arguments": {}})),
            )),
        )
        .await;
        let reply = recv_frame(&mut recv, &mut codec, &mut buf).await;
        let result = expect_result(reply, RequestId::Number(2));
        assert_eq!(result["isError"], true);

        send_frame(&mut send, &mut codec, Message::Notification(Notification::new(methods::SHUTDOWN, None))).await;
        send.finish().ok();
        tokio::time::sleep(Duration::from_millis(200)).await;
        client.close().await;
    });

    client_task.await.unwrap();
    server_task.await.unwrap();
    Ok(())
}
