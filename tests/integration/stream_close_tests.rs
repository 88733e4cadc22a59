//! End-of-input coordination between the input stream and the
//! first-result latch.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};

use agent_conduit::control::{ControlProtocol, ProtocolOptions};
use agent_conduit::{tool_server, McpServerConfig, SdkTool, ToolHandler, ToolResult};

use super::support::MockTransport;

fn noop_servers() -> HashMap<String, Arc<agent_conduit::ToolServer>> {
    let handler: ToolHandler =
        Arc::new(|_args| Box::pin(async move { Ok(ToolResult::text("ok")) }));
    let tool = SdkTool::new("noop", "Do nothing", None, handler);
    let McpServerConfig::Sdk { instance, .. } = tool_server("srv", "0.0.1", vec![tool]) else {
        panic!("tool_server must build an sdk config");
    };
    let mut servers = HashMap::new();
    servers.insert("srv".to_owned(), instance);
    servers
}

fn protocol_with(transport: &Arc<MockTransport>, options: ProtocolOptions) -> ControlProtocol {
    let protocol = ControlProtocol::new(
        Arc::clone(transport) as Arc<dyn agent_conduit::transport::Transport>,
        options,
    );
    protocol.start().expect("start");
    protocol
}

/// Streamed messages are written through in order before any end-of-input
/// handling.
#[tokio::test]
async fn stream_input_forwards_messages_in_order() {
    let transport = MockTransport::new();
    let protocol = protocol_with(&transport, ProtocolOptions::default());

    let (input_tx, input_rx) = tokio::sync::mpsc::channel::<Value>(8);
    let task = protocol.stream_input(input_rx);

    input_tx
        .send(json!({"type": "user", "session_id": "s", "message": {"role": "user", "content": "one"}}))
        .await
        .expect("send");
    input_tx
        .send(json!({"type": "user", "session_id": "s", "message": {"role": "user", "content": "two"}}))
        .await
        .expect("send");

    let written = transport.wait_for_written(2).await;
    assert_eq!(written[0]["message"]["content"], "one");
    assert_eq!(written[1]["message"]["content"], "two");

    drop(input_tx);
    task.await.expect("stream task");
    assert!(transport.input_ended(), "stdin must close after the input ends");

    protocol.close().await;
}

/// Without callbacks registered, the input stream closing ends input
/// immediately.
#[tokio::test]
async fn input_end_is_immediate_without_callbacks() {
    let transport = MockTransport::new();
    let protocol = protocol_with(&transport, ProtocolOptions::default());

    let (input_tx, input_rx) = tokio::sync::mpsc::channel::<Value>(1);
    protocol.stream_input(input_rx);
    drop(input_tx);

    transport.wait_for_input_end().await;
    protocol.close().await;
}

/// With an in-process tool server registered, stdin stays open after the
/// input ends until the first result message arrives.
#[tokio::test]
async fn input_end_waits_for_first_result_with_tool_server() {
    let transport = MockTransport::new();
    let protocol = protocol_with(
        &transport,
        ProtocolOptions {
            tool_servers: noop_servers(),
            ..ProtocolOptions::default()
        },
    );
    let mut messages = protocol.take_messages().expect("message stream");

    let (input_tx, input_rx) = tokio::sync::mpsc::channel::<Value>(1);
    protocol.stream_input(input_rx);
    drop(input_tx);

    // The latch has not fired: stdin must stay open.
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(
        !transport.input_ended(),
        "stdin must stay open until the first result"
    );

    transport
        .inject(json!({
            "type": "result", "subtype": "success", "is_error": false,
            "duration_ms": 1, "duration_api_ms": 1, "num_turns": 1, "session_id": "s",
        }))
        .await;
    let result = messages.recv().await.expect("result message");
    assert_eq!(result["type"], "result");

    transport.wait_for_input_end().await;
    protocol.close().await;
}

/// Handler shutdown releases a stream task blocked on the latch.
#[tokio::test]
async fn close_releases_latch_waiters() {
    let transport = MockTransport::new();
    let protocol = protocol_with(
        &transport,
        ProtocolOptions {
            tool_servers: noop_servers(),
            ..ProtocolOptions::default()
        },
    );

    let (input_tx, input_rx) = tokio::sync::mpsc::channel::<Value>(1);
    let task = protocol.stream_input(input_rx);
    drop(input_tx);

    tokio::time::sleep(Duration::from_millis(50)).await;
    protocol.close().await;

    tokio::time::timeout(Duration::from_secs(2), task)
        .await
        .expect("stream task must not hang after close")
        .expect("stream task");
}
