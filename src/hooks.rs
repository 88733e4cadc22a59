//! Lifecycle hook surface: events, input/output records, and callbacks.
//!
//! Hooks are host callbacks the agent invokes at named lifecycle events.
//! They are registered through [`crate::AgentOptions::hooks`], shipped to
//! the agent at initialize time under synthetic callback identifiers, and
//! invoked via `hook_callback` control requests.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::Result;

/// Lifecycle event a hook can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HookEvent {
    /// Before a tool call executes.
    PreToolUse,
    /// After a tool call succeeds.
    PostToolUse,
    /// After a tool call fails.
    PostToolUseFailure,
    /// When the user submits a prompt.
    UserPromptSubmit,
    /// When the agent is about to stop.
    Stop,
    /// When a subagent is about to stop.
    SubagentStop,
    /// Before conversation compaction.
    PreCompact,
    /// When the agent emits a notification.
    Notification,
    /// When a subagent starts.
    SubagentStart,
    /// When the agent requests a permission decision.
    PermissionRequest,
}

impl HookEvent {
    /// Wire name of the event.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreToolUse => "PreToolUse",
            Self::PostToolUse => "PostToolUse",
            Self::PostToolUseFailure => "PostToolUseFailure",
            Self::UserPromptSubmit => "UserPromptSubmit",
            Self::Stop => "Stop",
            Self::SubagentStop => "SubagentStop",
            Self::PreCompact => "PreCompact",
            Self::Notification => "Notification",
            Self::SubagentStart => "SubagentStart",
            Self::PermissionRequest => "PermissionRequest",
        }
    }
}

/// Input payload delivered to a hook callback.
///
/// Common fields are always present; the rest depend on the event named by
/// `hook_event_name`. Unknown fields from newer agents are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct HookInput {
    /// Session the event belongs to.
    pub session_id: String,
    /// Path to the conversation transcript.
    pub transcript_path: String,
    /// Working directory of the agent.
    pub cwd: String,
    /// Active permission mode, when reported.
    pub permission_mode: Option<String>,
    /// Name of the event that fired.
    pub hook_event_name: String,

    /// Tool name (tool-related events).
    pub tool_name: Option<String>,
    /// Tool input (tool-related events).
    pub tool_input: Option<Map<String, Value>>,
    /// Tool-use identifier (tool-related events).
    pub tool_use_id: Option<String>,
    /// Tool response (`PostToolUse`).
    pub tool_response: Option<Value>,

    /// Error text (`PostToolUseFailure`).
    #[serde(rename = "error")]
    pub error_message: Option<String>,
    /// Whether the failure was an interrupt (`PostToolUseFailure`).
    pub is_interrupt: Option<bool>,

    /// Submitted prompt (`UserPromptSubmit`).
    pub prompt: Option<String>,

    /// Whether a stop hook is already active (`Stop` / `SubagentStop`).
    pub stop_hook_active: Option<bool>,

    /// Subagent identifier (`SubagentStop` / `SubagentStart`).
    pub agent_id: Option<String>,
    /// Subagent transcript path (`SubagentStop` / `SubagentStart`).
    pub agent_transcript_path: Option<String>,
    /// Subagent type (`SubagentStop` / `SubagentStart`).
    pub agent_type: Option<String>,

    /// What triggered compaction (`PreCompact`).
    pub trigger: Option<String>,
    /// Custom compaction instructions (`PreCompact`).
    pub custom_instructions: Option<String>,

    /// Notification body (`Notification`).
    #[serde(rename = "message")]
    pub notification_message: Option<String>,
    /// Notification title (`Notification`).
    pub title: Option<String>,
    /// Notification type (`Notification`).
    pub notification_type: Option<String>,

    /// Raw permission suggestions (`PermissionRequest`).
    pub permission_suggestions: Option<Vec<Value>>,
}

/// Event-specific portion of a hook's output.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookSpecificOutput {
    /// Event this output applies to. Required whenever the envelope is
    /// present.
    pub hook_event_name: String,
    /// Permission decision (`PreToolUse`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision: Option<String>,
    /// Reason for the permission decision (`PreToolUse`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub permission_decision_reason: Option<String>,
    /// Replacement tool input (`PreToolUse`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<Map<String, Value>>,
    /// Replacement tool output (`PostToolUse`).
    #[serde(rename = "updatedMCPToolOutput", skip_serializing_if = "Option::is_none")]
    pub updated_mcp_tool_output: Option<Value>,
    /// Extra context injected into the conversation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_context: Option<String>,
    /// Decision payload (`PermissionRequest`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<Map<String, Value>>,
}

/// Output returned by a hook callback.
///
/// Serialization writes only the fields that are set, so an empty output
/// serializes to `{}`.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HookOutput {
    /// Run the hook asynchronously.
    #[serde(rename = "async", skip_serializing_if = "Option::is_none")]
    pub run_async: Option<bool>,
    /// Timeout for async execution, in seconds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub async_timeout: Option<u64>,
    /// Whether the agent should continue after the hook.
    #[serde(rename = "continue", skip_serializing_if = "Option::is_none")]
    pub continue_: Option<bool>,
    /// Suppress the hook's output from the transcript.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub suppress_output: Option<bool>,
    /// Reason shown when `continue` is false.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_reason: Option<String>,
    /// Decision verdict (e.g. `"block"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decision: Option<String>,
    /// Message injected as a system message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_message: Option<String>,
    /// Reason accompanying the decision.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Event-specific output envelope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hook_specific_output: Option<HookSpecificOutput>,
}

/// Context handed to a hook callback. Currently empty; reserved for an
/// abort signal.
#[derive(Debug, Clone, Copy, Default)]
pub struct HookContext {}

/// Async hook callback.
///
/// Receives the parsed input, the tool-use identifier when the event has
/// one, and the hook context. A `None` output is sent to the agent as an
/// empty object; an `Err` becomes a control-response error.
pub type HookCallback = Arc<
    dyn Fn(HookInput, Option<String>, HookContext) -> BoxFuture<'static, Result<Option<HookOutput>>>
        + Send
        + Sync,
>;

/// A matcher binding hook callbacks to a tool-name pattern.
#[derive(Clone)]
pub struct HookMatcher {
    /// Tool-name pattern (e.g. `"Bash"`, `"Write|Edit"`). Empty matches all.
    pub matcher: String,
    /// Callbacks fired when the matcher applies.
    pub hooks: Vec<HookCallback>,
    /// Per-matcher timeout in seconds, when the agent should bound the call.
    pub timeout: Option<f64>,
}

impl HookMatcher {
    /// Matcher over `pattern` with a single callback.
    pub fn new(pattern: impl Into<String>, hook: HookCallback) -> Self {
        Self {
            matcher: pattern.into(),
            hooks: vec![hook],
            timeout: None,
        }
    }
}

impl std::fmt::Debug for HookMatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HookMatcher")
            .field("matcher", &self.matcher)
            .field("hooks", &self.hooks.len())
            .field("timeout", &self.timeout)
            .finish()
    }
}
