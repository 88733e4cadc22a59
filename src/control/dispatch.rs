//! Dispatch of inbound control requests to host callbacks.
//!
//! Each inbound `control_request` runs on its own task so a slow callback
//! never blocks the reader. The outcome is written back as exactly one
//! `control_response` envelope: `success` with the dispatcher's output, or
//! `error` with the failure rendered as a string. Callback failures are
//! relayed to the agent and logged; they never terminate the handler.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::{debug, warn};

use crate::errors::{Result, SdkError};
use crate::hooks::{HookContext, HookInput};
use crate::permission::{PermissionResult, PermissionUpdate, ToolPermissionContext};

use super::Shared;

/// JSON-RPC error code embedded when a named tool server is not registered.
const CODE_SERVER_NOT_FOUND: i64 = -32601;

pub(super) async fn handle_control_request(shared: Arc<Shared>, message: Value) {
    let Some(request_id) = message.get("request_id").and_then(Value::as_str) else {
        return;
    };
    let Some(request) = message.get("request").and_then(Value::as_object) else {
        return;
    };
    let subtype = request
        .get("subtype")
        .and_then(Value::as_str)
        .unwrap_or_default();
    debug!(request_id, subtype, "dispatching inbound control request");

    let outcome = match subtype {
        "can_use_tool" => handle_can_use_tool(&shared, request).await,
        "hook_callback" => handle_hook_callback(&shared, request).await,
        "mcp_message" => handle_mcp_message(&shared, request).await,
        other => Err(SdkError::Protocol(format!(
            "unsupported control request subtype: {other}"
        ))),
    };

    let response = match outcome {
        Ok(body) => json!({
            "type": "control_response",
            "response": {
                "subtype": "success",
                "request_id": request_id,
                "response": body,
            },
        }),
        Err(err) => {
            warn!(request_id, subtype, error = %err, "control request handler failed");
            json!({
                "type": "control_response",
                "response": {
                    "subtype": "error",
                    "request_id": request_id,
                    "error": err.to_string(),
                },
            })
        }
    };

    if let Err(err) = shared.write_line(&response).await {
        warn!(request_id, error = %err, "failed to write control response");
    }
}

/// `can_use_tool`: ask the host's permission callback for a decision.
async fn handle_can_use_tool(shared: &Shared, request: &Map<String, Value>) -> Result<Value> {
    let Some(callback) = &shared.can_use_tool else {
        return Err(SdkError::Callback(
            "can_use_tool callback is not provided".into(),
        ));
    };

    let tool_name = request
        .get("tool_name")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_owned();
    let input = request
        .get("input")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();
    let suggestions = request
        .get("permission_suggestions")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(Value::as_object)
                .map(PermissionUpdate::from_value)
                .collect()
        })
        .unwrap_or_default();

    let context = ToolPermissionContext { suggestions };
    match callback(tool_name, input.clone(), context).await? {
        PermissionResult::Allow {
            updated_input,
            updated_permissions,
        } => {
            let mut body = Map::new();
            body.insert("behavior".into(), Value::String("allow".into()));
            // Echo the effective input: the replacement when given, the
            // original otherwise.
            body.insert(
                "updatedInput".into(),
                Value::Object(updated_input.unwrap_or(input)),
            );
            if let Some(updates) = updated_permissions {
                body.insert(
                    "updatedPermissions".into(),
                    Value::Array(updates.iter().map(PermissionUpdate::to_value).collect()),
                );
            }
            Ok(Value::Object(body))
        }
        PermissionResult::Deny { message, interrupt } => {
            let mut body = Map::new();
            body.insert("behavior".into(), Value::String("deny".into()));
            body.insert("message".into(), Value::String(message));
            if interrupt {
                body.insert("interrupt".into(), Value::Bool(true));
            }
            Ok(Value::Object(body))
        }
    }
}

/// `hook_callback`: invoke the registered hook by synthetic id.
async fn handle_hook_callback(shared: &Shared, request: &Map<String, Value>) -> Result<Value> {
    let callback_id = request
        .get("callback_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let callback = shared
        .hook_callbacks
        .get()
        .and_then(|registry| registry.get(callback_id))
        .ok_or_else(|| {
            SdkError::Callback(format!("no hook callback found for ID: {callback_id}"))
        })?;

    let input: HookInput = match request.get("input") {
        Some(raw) => serde_json::from_value(raw.clone())
            .map_err(|err| SdkError::Callback(format!("invalid hook input: {err}")))?,
        None => HookInput::default(),
    };
    let tool_use_id = request
        .get("tool_use_id")
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    match callback(input, tool_use_id, HookContext::default()).await? {
        None => Ok(json!({})),
        Some(output) => serde_json::to_value(&output)
            .map_err(|err| SdkError::Callback(format!("failed to serialize hook output: {err}"))),
    }
}

/// `mcp_message`: relay an embedded JSON-RPC message to the named
/// in-process tool server.
async fn handle_mcp_message(shared: &Shared, request: &Map<String, Value>) -> Result<Value> {
    let server_name = request
        .get("server_name")
        .and_then(Value::as_str)
        .unwrap_or_default();
    let message = request.get("message").filter(|v| v.is_object());
    let (false, Some(message)) = (server_name.is_empty(), message) else {
        return Err(SdkError::Protocol(
            "missing server_name or message for MCP request".into(),
        ));
    };

    match shared.tool_servers.get(server_name) {
        None => Ok(json!({
            "mcp_response": {
                "jsonrpc": "2.0",
                "id": message.get("id").cloned().unwrap_or(Value::Null),
                "error": {
                    "code": CODE_SERVER_NOT_FOUND,
                    "message": format!("Server '{server_name}' not found"),
                },
            },
        })),
        Some(server) => Ok(json!({ "mcp_response": server.handle_request(message).await })),
    }
}
