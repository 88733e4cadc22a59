//! Conversion from raw conversation JSON into the typed [`Message`] surface.
//!
//! Parsing is deliberately tolerant where the wire is loose (string or
//! block-list user content, numeric fields in any JSON number shape,
//! unknown content-block types skipped) and strict where it is not:
//! missing discriminators or required fields produce a parse error
//! carrying the raw map.

use serde_json::{Map, Value};

use crate::errors::{Result, SdkError};
use crate::message::{
    AssistantError, AssistantMessage, ContentBlock, Message, RateLimitEvent, ResultMessage,
    StreamEvent, SystemMessage, UserContent, UserMessage,
};

/// Parse one raw conversation message into a typed [`Message`].
pub fn parse_message(data: &Value) -> Result<Message> {
    let Some(msg_type) = data.get("type").and_then(Value::as_str) else {
        return Err(parse_error("message missing 'type' field", data));
    };

    match msg_type {
        "user" => parse_user(data),
        "assistant" => parse_assistant(data),
        "system" => parse_system(data),
        "result" => parse_result(data),
        "stream_event" => parse_stream_event(data),
        "rate_limit_event" => Ok(Message::RateLimit(RateLimitEvent {
            data: data.as_object().cloned().unwrap_or_default(),
        })),
        other => Err(parse_error(
            format!("unknown message type: {other}"),
            data,
        )),
    }
}

fn parse_error(message: impl Into<String>, data: &Value) -> SdkError {
    SdkError::Parse {
        message: message.into(),
        data: data.clone(),
    }
}

fn opt_string(data: &Value, key: &str) -> Option<String> {
    data.get(key).and_then(Value::as_str).map(ToOwned::to_owned)
}

/// Coerce any JSON number shape to `i64`; non-numbers become 0.
#[allow(clippy::cast_possible_truncation)]
fn as_i64(value: &Value) -> i64 {
    value
        .as_i64()
        .or_else(|| value.as_f64().map(|f| f as i64))
        .unwrap_or(0)
}

fn parse_user(data: &Value) -> Result<Message> {
    let Some(msg) = data.get("message").and_then(Value::as_object) else {
        return Err(parse_error("missing 'message' field in user message", data));
    };
    let Some(content) = msg.get("content") else {
        return Err(parse_error(
            "missing required field in user message: content",
            data,
        ));
    };

    let content = match content {
        Value::Array(items) => UserContent::Blocks(parse_blocks(items)),
        other => UserContent::Text(other.as_str().unwrap_or_default().to_owned()),
    };

    Ok(Message::User(UserMessage {
        content,
        uuid: opt_string(data, "uuid"),
        parent_tool_use_id: opt_string(data, "parent_tool_use_id"),
        tool_use_result: data
            .get("tool_use_result")
            .and_then(Value::as_object)
            .cloned(),
    }))
}

fn parse_assistant(data: &Value) -> Result<Message> {
    let Some(msg) = data.get("message").and_then(Value::as_object) else {
        return Err(parse_error(
            "missing 'message' field in assistant message",
            data,
        ));
    };
    let Some(content) = msg.get("content").and_then(Value::as_array) else {
        return Err(parse_error(
            "missing 'content' field in assistant message",
            data,
        ));
    };
    let model = msg.get("model").and_then(Value::as_str).unwrap_or_default();
    if model.is_empty() {
        return Err(parse_error(
            "missing required field in assistant message: model",
            data,
        ));
    }

    Ok(Message::Assistant(AssistantMessage {
        content: parse_blocks(content),
        model: model.to_owned(),
        parent_tool_use_id: opt_string(data, "parent_tool_use_id"),
        error: data
            .get("error")
            .and_then(Value::as_str)
            .map(AssistantError::parse),
    }))
}

fn parse_system(data: &Value) -> Result<Message> {
    let Some(subtype) = data.get("subtype").and_then(Value::as_str) else {
        return Err(parse_error(
            "missing 'subtype' field in system message",
            data,
        ));
    };
    Ok(Message::System(SystemMessage {
        subtype: subtype.to_owned(),
        data: data.as_object().cloned().unwrap_or_default(),
    }))
}

fn parse_result(data: &Value) -> Result<Message> {
    let subtype = data
        .get("subtype")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if subtype.is_empty() {
        return Err(parse_error(
            "missing required field in result message: subtype",
            data,
        ));
    }
    for field in ["duration_ms", "duration_api_ms", "num_turns"] {
        if data.get(field).is_none() {
            return Err(parse_error(
                format!("missing required field in result message: {field}"),
                data,
            ));
        }
    }
    let Some(is_error) = data.get("is_error").and_then(Value::as_bool) else {
        return Err(parse_error(
            "missing required field in result message: is_error",
            data,
        ));
    };
    let session_id = data
        .get("session_id")
        .and_then(Value::as_str)
        .unwrap_or_default();
    if session_id.is_empty() {
        return Err(parse_error(
            "missing required field in result message: session_id",
            data,
        ));
    }

    Ok(Message::Result(ResultMessage {
        subtype: subtype.to_owned(),
        duration_ms: data.get("duration_ms").map(as_i64).unwrap_or_default(),
        duration_api_ms: data.get("duration_api_ms").map(as_i64).unwrap_or_default(),
        is_error,
        num_turns: data.get("num_turns").map(as_i64).unwrap_or_default(),
        session_id: session_id.to_owned(),
        total_cost_usd: data.get("total_cost_usd").and_then(Value::as_f64),
        usage: data.get("usage").and_then(Value::as_object).cloned(),
        result: opt_string(data, "result"),
        structured_output: data.get("structured_output").cloned().filter(|v| !v.is_null()),
    }))
}

fn parse_stream_event(data: &Value) -> Result<Message> {
    let uuid = opt_string(data, "uuid").unwrap_or_default();
    let session_id = opt_string(data, "session_id").unwrap_or_default();
    let event = data.get("event").and_then(Value::as_object).cloned();

    let (false, false, Some(event)) = (uuid.is_empty(), session_id.is_empty(), event) else {
        return Err(parse_error(
            "missing required field in stream_event message",
            data,
        ));
    };

    Ok(Message::StreamEvent(StreamEvent {
        uuid,
        session_id,
        event,
        parent_tool_use_id: opt_string(data, "parent_tool_use_id"),
    }))
}

/// Parse content blocks, skipping items with unknown or missing types.
fn parse_blocks(items: &[Value]) -> Vec<ContentBlock> {
    items
        .iter()
        .filter_map(Value::as_object)
        .filter_map(parse_block)
        .collect()
}

fn parse_block(block: &Map<String, Value>) -> Option<ContentBlock> {
    match block.get("type").and_then(Value::as_str)? {
        "text" => Some(ContentBlock::Text {
            text: block
                .get("text")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }),
        "thinking" => Some(ContentBlock::Thinking {
            thinking: block
                .get("thinking")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            signature: block
                .get("signature")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: block
                .get("id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            name: block
                .get("name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            input: block
                .get("input")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default(),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: block
                .get("tool_use_id")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_owned(),
            content: block.get("content").cloned().filter(|v| !v.is_null()),
            is_error: block.get("is_error").and_then(Value::as_bool),
        }),
        _ => None,
    }
}
