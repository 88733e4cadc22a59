//! Inbound control-request dispatch: permissions, hooks, and tool calls.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{json, Value};

use agent_conduit::control::{ControlProtocol, ProtocolOptions};
use agent_conduit::{
    tool_server, CanUseTool, HookCallback, HookEvent, HookMatcher, HookOutput, McpServerConfig,
    PermissionResult, SdkTool, ToolHandler, ToolResult,
};

use super::support::MockTransport;

fn protocol_with(transport: &Arc<MockTransport>, options: ProtocolOptions) -> ControlProtocol {
    let protocol = ControlProtocol::new(
        Arc::clone(transport) as Arc<dyn agent_conduit::transport::Transport>,
        options,
    );
    protocol.start().expect("start");
    protocol
}

fn deny_rm_callback() -> CanUseTool {
    Arc::new(|tool_name, input, _context| {
        Box::pin(async move {
            let command = input
                .get("command")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if tool_name == "Bash" && command.starts_with("rm") {
                Ok(PermissionResult::Deny {
                    message: "rm commands are not allowed".into(),
                    interrupt: true,
                })
            } else {
                Ok(PermissionResult::allow())
            }
        })
    })
}

fn calc_servers() -> HashMap<String, Arc<agent_conduit::ToolServer>> {
    let handler: ToolHandler = Arc::new(|args| {
        Box::pin(async move {
            let a = args.get("a").and_then(Value::as_f64).unwrap_or_default();
            let b = args.get("b").and_then(Value::as_f64).unwrap_or_default();
            Ok(ToolResult::text(format!("{}", a + b)))
        })
    });
    let add = SdkTool::new("add", "Add two numbers", None, handler);
    let McpServerConfig::Sdk { instance, .. } = tool_server("calc", "1.0.0", vec![add]) else {
        panic!("tool_server must build an sdk config");
    };
    let mut servers = HashMap::new();
    servers.insert("calc".to_owned(), instance);
    servers
}

/// A denying permission callback produces a success response whose body
/// carries the deny decision.
#[tokio::test]
async fn can_use_tool_deny() {
    let transport = MockTransport::new();
    let protocol = protocol_with(
        &transport,
        ProtocolOptions {
            can_use_tool: Some(deny_rm_callback()),
            ..ProtocolOptions::default()
        },
    );

    transport
        .inject(json!({
            "type": "control_request",
            "request_id": "p1",
            "request": {
                "subtype": "can_use_tool",
                "tool_name": "Bash",
                "input": {"command": "rm -rf /"},
            },
        }))
        .await;

    let written = transport.wait_for_written(1).await;
    assert_eq!(written.len(), 1, "exactly one control response must be written");
    assert_eq!(written[0]["type"], "control_response");
    assert_eq!(written[0]["response"]["subtype"], "success");
    assert_eq!(written[0]["response"]["request_id"], "p1");
    assert_eq!(
        written[0]["response"]["response"],
        json!({"behavior": "deny", "message": "rm commands are not allowed", "interrupt": true})
    );

    protocol.close().await;
}

/// An allowing callback echoes the effective input: the replacement when
/// provided, the original otherwise.
#[tokio::test]
async fn can_use_tool_allow_rewrites_input() {
    let callback: CanUseTool = Arc::new(|_tool_name, _input, _context| {
        Box::pin(async move {
            Ok(PermissionResult::Allow {
                updated_input: Some(
                    json!({"command": "echo hello"})
                        .as_object()
                        .expect("object")
                        .clone(),
                ),
                updated_permissions: None,
            })
        })
    });
    let transport = MockTransport::new();
    let protocol = protocol_with(
        &transport,
        ProtocolOptions {
            can_use_tool: Some(callback),
            ..ProtocolOptions::default()
        },
    );

    transport
        .inject(json!({
            "type": "control_request",
            "request_id": "p2",
            "request": {
                "subtype": "can_use_tool",
                "tool_name": "Bash",
                "input": {"command": "ls"},
            },
        }))
        .await;

    let written = transport.wait_for_written(1).await;
    assert_eq!(
        written[0]["response"]["response"],
        json!({"behavior": "allow", "updatedInput": {"command": "echo hello"}})
    );

    protocol.close().await;
}

/// Without a registered callback, `can_use_tool` is answered with an error
/// response; the handler keeps running.
#[tokio::test]
async fn can_use_tool_without_callback_is_an_error_response() {
    let transport = MockTransport::new();
    let protocol = protocol_with(&transport, ProtocolOptions::default());

    transport
        .inject(json!({
            "type": "control_request",
            "request_id": "p3",
            "request": {"subtype": "can_use_tool", "tool_name": "Bash"},
        }))
        .await;

    let written = transport.wait_for_written(1).await;
    assert_eq!(written[0]["response"]["subtype"], "error");
    assert_eq!(
        written[0]["response"]["error"],
        "can_use_tool callback is not provided"
    );
    assert!(protocol.last_error().is_none(), "callback errors are not terminal");

    protocol.close().await;
}

/// Initialize ships hook matchers under synthetic callback ids, and the
/// registered callback answers later `hook_callback` requests.
#[tokio::test]
async fn initialize_registers_hooks_and_dispatches_callbacks() {
    let callback: HookCallback = Arc::new(|input, tool_use_id, _context| {
        Box::pin(async move {
            assert_eq!(input.hook_event_name, "PreToolUse");
            assert_eq!(tool_use_id.as_deref(), Some("tu-1"));
            Ok(Some(HookOutput {
                decision: Some("block".into()),
                reason: Some("not during business hours".into()),
                ..HookOutput::default()
            }))
        })
    });
    let mut hooks = HashMap::new();
    hooks.insert(
        HookEvent::PreToolUse,
        vec![HookMatcher::new("Bash", callback)],
    );

    let transport = MockTransport::new();
    let protocol = protocol_with(
        &transport,
        ProtocolOptions {
            hooks,
            ..ProtocolOptions::default()
        },
    );

    let initialize = protocol.initialize();
    let responder = async {
        let written = transport.wait_for_written(1).await;
        let request = &written[0]["request"];
        assert_eq!(request["subtype"], "initialize");
        assert_eq!(
            request["hooks"]["PreToolUse"],
            json!([{"matcher": "Bash", "hookCallbackIds": ["hook_0"]}])
        );
        let request_id = written[0]["request_id"].as_str().expect("request_id");
        transport
            .inject(json!({
                "type": "control_response",
                "response": {
                    "subtype": "success",
                    "request_id": request_id,
                    "response": {"commands": []},
                },
            }))
            .await;
    };
    let (outcome, ()) = tokio::join!(initialize, responder);
    assert_eq!(outcome.expect("initialize"), json!({"commands": []}));

    transport
        .inject(json!({
            "type": "control_request",
            "request_id": "h1",
            "request": {
                "subtype": "hook_callback",
                "callback_id": "hook_0",
                "tool_use_id": "tu-1",
                "input": {"hook_event_name": "PreToolUse", "session_id": "s", "tool_name": "Bash"},
            },
        }))
        .await;

    let written = transport.wait_for_written(2).await;
    assert_eq!(written[1]["response"]["subtype"], "success");
    assert_eq!(
        written[1]["response"]["response"],
        json!({"decision": "block", "reason": "not during business hours"})
    );

    protocol.close().await;
}

/// An unknown callback id is answered with an error response.
#[tokio::test]
async fn unknown_hook_callback_id_is_an_error_response() {
    let transport = MockTransport::new();
    let protocol = protocol_with(&transport, ProtocolOptions::default());

    // Populate the (empty) registry.
    let initialize = protocol.initialize();
    let responder = async {
        let written = transport.wait_for_written(1).await;
        let request_id = written[0]["request_id"].as_str().expect("request_id");
        transport
            .inject(json!({
                "type": "control_response",
                "response": {"subtype": "success", "request_id": request_id, "response": {}},
            }))
            .await;
    };
    let (outcome, ()) = tokio::join!(initialize, responder);
    outcome.expect("initialize");

    transport
        .inject(json!({
            "type": "control_request",
            "request_id": "h2",
            "request": {"subtype": "hook_callback", "callback_id": "hook_9"},
        }))
        .await;

    let written = transport.wait_for_written(2).await;
    assert_eq!(written[1]["response"]["subtype"], "error");
    assert_eq!(
        written[1]["response"]["error"],
        "no hook callback found for ID: hook_9"
    );

    protocol.close().await;
}

/// An `mcp_message` tool call reaches the in-process server and wraps its
/// JSON-RPC response.
#[tokio::test]
async fn mcp_message_calls_in_process_tool() {
    let transport = MockTransport::new();
    let protocol = protocol_with(
        &transport,
        ProtocolOptions {
            tool_servers: calc_servers(),
            ..ProtocolOptions::default()
        },
    );

    transport
        .inject(json!({
            "type": "control_request",
            "request_id": "m1",
            "request": {
                "subtype": "mcp_message",
                "server_name": "calc",
                "message": {
                    "jsonrpc": "2.0",
                    "id": 1,
                    "method": "tools/call",
                    "params": {"name": "add", "arguments": {"a": 17, "b": 25}},
                },
            },
        }))
        .await;

    let written = transport.wait_for_written(1).await;
    let mcp_response = &written[0]["response"]["response"]["mcp_response"];
    assert_eq!(mcp_response["id"], 1);
    assert_eq!(
        mcp_response["result"]["content"][0],
        json!({"type": "text", "text": "42"})
    );

    protocol.close().await;
}

/// A message for an unregistered server wraps a JSON-RPC error naming it.
#[tokio::test]
async fn mcp_message_unknown_server() {
    let transport = MockTransport::new();
    let protocol = protocol_with(
        &transport,
        ProtocolOptions {
            tool_servers: calc_servers(),
            ..ProtocolOptions::default()
        },
    );

    transport
        .inject(json!({
            "type": "control_request",
            "request_id": "m2",
            "request": {
                "subtype": "mcp_message",
                "server_name": "nonexistent",
                "message": {"jsonrpc": "2.0", "id": 2, "method": "tools/list"},
            },
        }))
        .await;

    let written = transport.wait_for_written(1).await;
    assert_eq!(written[0]["response"]["subtype"], "success");
    let mcp_response = &written[0]["response"]["response"]["mcp_response"];
    assert_eq!(mcp_response["error"]["code"], -32601);
    assert!(
        mcp_response["error"]["message"]
            .as_str()
            .expect("message")
            .contains("nonexistent"),
        "error must name the missing server"
    );

    protocol.close().await;
}

/// Unsupported inbound subtypes are answered with an error response.
#[tokio::test]
async fn unsupported_subtype_is_an_error_response() {
    let transport = MockTransport::new();
    let protocol = protocol_with(&transport, ProtocolOptions::default());

    transport
        .inject(json!({
            "type": "control_request",
            "request_id": "u1",
            "request": {"subtype": "time_travel"},
        }))
        .await;

    let written = transport.wait_for_written(1).await;
    assert_eq!(written[0]["response"]["subtype"], "error");
    assert_eq!(
        written[0]["response"]["error"],
        "unsupported control request subtype: time_travel"
    );

    protocol.close().await;
}
