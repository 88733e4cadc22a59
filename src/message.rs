//! Typed conversation-message surface.
//!
//! The control protocol treats conversation messages as opaque JSON; the
//! session facade parses them into these types before handing them to the
//! caller. Handle a [`Message`] with an exhaustive `match` on its variant.

use serde_json::{Map, Value};

/// A message flowing from the agent to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum Message {
    /// A user turn echoed back by the agent.
    User(UserMessage),
    /// An assistant turn.
    Assistant(AssistantMessage),
    /// A system event with free-form metadata.
    System(SystemMessage),
    /// The terminal result of a turn, with timing and cost data.
    Result(ResultMessage),
    /// A partial-message stream event.
    StreamEvent(StreamEvent),
    /// Rate-limit metadata emitted by the agent.
    RateLimit(RateLimitEvent),
}

/// Content of a user message: a plain string or structured blocks.
#[derive(Debug, Clone, PartialEq)]
pub enum UserContent {
    /// Plain text content.
    Text(String),
    /// Structured content blocks.
    Blocks(Vec<ContentBlock>),
}

/// One content block inside a user or assistant message.
#[derive(Debug, Clone, PartialEq)]
pub enum ContentBlock {
    /// Plain text.
    Text {
        /// The text payload.
        text: String,
    },
    /// Extended-thinking content.
    Thinking {
        /// The thinking text.
        thinking: String,
        /// Integrity signature over the thinking text.
        signature: String,
    },
    /// A tool invocation requested by the assistant.
    ToolUse {
        /// Tool-use identifier.
        id: String,
        /// Tool name.
        name: String,
        /// Tool input.
        input: Map<String, Value>,
    },
    /// The result of a tool invocation.
    ToolResult {
        /// Identifier of the tool use this result answers.
        tool_use_id: String,
        /// Result content: string, block list, or absent.
        content: Option<Value>,
        /// Whether the tool reported an error.
        is_error: Option<bool>,
    },
}

/// A user message.
#[derive(Debug, Clone, PartialEq)]
pub struct UserMessage {
    /// Message content.
    pub content: UserContent,
    /// Message identifier, when assigned.
    pub uuid: Option<String>,
    /// Tool use this message responds to, when nested.
    pub parent_tool_use_id: Option<String>,
    /// Raw tool-use result payload, when attached.
    pub tool_use_result: Option<Map<String, Value>>,
}

/// Classification the agent attaches to failed assistant turns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AssistantError {
    /// Authentication failed.
    AuthenticationFailed,
    /// Billing problem.
    Billing,
    /// Rate limited.
    RateLimit,
    /// Invalid request.
    InvalidRequest,
    /// Upstream server error.
    Server,
    /// Anything else, preserved verbatim.
    Other(String),
}

impl AssistantError {
    pub(crate) fn parse(value: &str) -> Self {
        match value {
            "authentication_failed" => Self::AuthenticationFailed,
            "billing_error" => Self::Billing,
            "rate_limit" => Self::RateLimit,
            "invalid_request" => Self::InvalidRequest,
            "server_error" => Self::Server,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// An assistant message with content blocks.
#[derive(Debug, Clone, PartialEq)]
pub struct AssistantMessage {
    /// Content blocks, in order.
    pub content: Vec<ContentBlock>,
    /// Model that produced the message.
    pub model: String,
    /// Tool use this message responds to, when nested.
    pub parent_tool_use_id: Option<String>,
    /// Error classification, when the turn failed.
    pub error: Option<AssistantError>,
}

/// A system message.
#[derive(Debug, Clone, PartialEq)]
pub struct SystemMessage {
    /// Event subtype (e.g. `"init"`).
    pub subtype: String,
    /// The complete raw payload, subtype included.
    pub data: Map<String, Value>,
}

/// The result message terminating a turn.
#[derive(Debug, Clone, PartialEq)]
pub struct ResultMessage {
    /// Result subtype (e.g. `"success"`).
    pub subtype: String,
    /// Wall-clock duration in milliseconds.
    pub duration_ms: i64,
    /// API duration in milliseconds.
    pub duration_api_ms: i64,
    /// Whether the turn ended in error.
    pub is_error: bool,
    /// Number of conversation turns consumed.
    pub num_turns: i64,
    /// Session the result belongs to.
    pub session_id: String,
    /// Total cost in USD, when reported.
    pub total_cost_usd: Option<f64>,
    /// Token-usage breakdown, when reported.
    pub usage: Option<Map<String, Value>>,
    /// Final result text, when present.
    pub result: Option<String>,
    /// Structured output payload, when requested.
    pub structured_output: Option<Value>,
}

/// A partial-message stream event.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamEvent {
    /// Event identifier.
    pub uuid: String,
    /// Session the event belongs to.
    pub session_id: String,
    /// Raw event payload.
    pub event: Map<String, Value>,
    /// Tool use this event is nested under, when any.
    pub parent_tool_use_id: Option<String>,
}

/// Rate-limit metadata. The payload stays raw for forward compatibility.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitEvent {
    /// The complete raw payload.
    pub data: Map<String, Value>,
}
