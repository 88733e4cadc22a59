//! Session configuration: everything the host can tune before connect.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::hooks::{HookEvent, HookMatcher};
use crate::mcp::McpServerConfig;
use crate::permission::{CanUseTool, PermissionMode};

/// Default ceiling for a single buffered stdout JSON object: 1 MiB.
pub const DEFAULT_MAX_BUFFER_SIZE: usize = 1_048_576;

/// Beta flag enabling the 1M-token context window.
pub const BETA_CONTEXT_1M: &str = "context-1m-2025-08-07";

/// Where the agent loads settings files from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingSource {
    /// User-level settings.
    User,
    /// Project-level settings.
    Project,
    /// Local (gitignored) settings.
    Local,
}

impl SettingSource {
    /// Wire name of the source.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Project => "project",
            Self::Local => "local",
        }
    }
}

/// Base tool set made available to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolSelection {
    /// The agent's default tool preset.
    Preset,
    /// An explicit list of tool names. Empty disables all tools.
    List(Vec<String>),
}

/// System prompt configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SystemPrompt {
    /// Replace the system prompt wholesale.
    Custom(String),
    /// Keep the agent's preset prompt, optionally appending to it.
    Preset {
        /// Text appended after the preset prompt.
        append: Option<String>,
    },
}

/// Extended-thinking configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThinkingConfig {
    /// Let the agent budget thinking adaptively.
    Adaptive,
    /// Enable thinking with an explicit token budget.
    Enabled {
        /// Thinking token budget.
        budget_tokens: u32,
    },
    /// Disable thinking.
    Disabled,
}

/// Effort level for thinking depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effort {
    /// Minimal effort.
    Low,
    /// Moderate effort.
    Medium,
    /// High effort.
    High,
    /// Maximum effort.
    Max,
}

impl Effort {
    /// Wire name of the effort level.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Max => "max",
        }
    }
}

/// A local plugin directory loaded by the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdkPluginConfig {
    /// Path to the plugin directory.
    pub path: PathBuf,
}

/// A subagent definition shipped at initialize time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AgentDefinition {
    /// What the subagent is for.
    pub description: String,
    /// The subagent's system prompt.
    pub prompt: String,
    /// Tools the subagent may use; empty inherits the session's tools.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<String>,
    /// Model override (`"sonnet"`, `"opus"`, `"haiku"`, `"inherit"`).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
}

/// Sandbox network configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxNetworkConfig {
    /// Unix sockets the sandboxed process may reach.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub allow_unix_sockets: Vec<String>,
    /// Allow every unix socket.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_all_unix_sockets: Option<bool>,
    /// Allow binding local ports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_local_binding: Option<bool>,
    /// HTTP proxy port inside the sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub http_proxy_port: Option<u16>,
    /// SOCKS proxy port inside the sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_proxy_port: Option<u16>,
}

/// Sandbox violations to ignore.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SandboxIgnoreViolations {
    /// File-access violation patterns to ignore.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub file: Vec<String>,
    /// Network violation patterns to ignore.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub network: Vec<String>,
}

/// Sandbox settings merged into the agent's `--settings` value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SandboxSettings {
    /// Master switch.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    /// Auto-allow bash commands when sandboxed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_allow_bash_if_sandboxed: Option<bool>,
    /// Commands excluded from sandboxing.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub excluded_commands: Vec<String>,
    /// Allow commands to run unsandboxed when sandboxing fails.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_unsandboxed_commands: Option<bool>,
    /// Network configuration.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<SandboxNetworkConfig>,
    /// Violations to ignore.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ignore_violations: Option<SandboxIgnoreViolations>,
    /// Permit a weaker sandbox when nested inside another sandbox.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_weaker_nested_sandbox: Option<bool>,
}

/// Callback receiving each stderr line from the agent process.
pub type StderrCallback = Arc<dyn Fn(&str) + Send + Sync>;

/// All configuration for a query or client session.
///
/// Plain struct with public fields; start from `AgentOptions::default()`
/// and set what you need. Unset options emit nothing on the agent's
/// command line.
#[derive(Clone, Default)]
pub struct AgentOptions {
    /// Base tool set (explicit list or preset). `None` leaves the agent's
    /// default in place.
    pub tools: Option<ToolSelection>,
    /// Additional allowed tools.
    pub allowed_tools: Vec<String>,
    /// Tools to disallow.
    pub disallowed_tools: Vec<String>,
    /// System prompt configuration. `None` clears the default prompt.
    pub system_prompt: Option<SystemPrompt>,
    /// MCP servers by logical name.
    pub mcp_servers: HashMap<String, McpServerConfig>,
    /// Alternative MCP config: a path or raw JSON string passed through.
    pub mcp_servers_path: Option<String>,
    /// Permission mode for tool execution.
    pub permission_mode: Option<PermissionMode>,
    /// Continue the most recent conversation.
    pub continue_conversation: bool,
    /// Resume a specific session by identifier.
    pub resume: Option<String>,
    /// Fork a resumed session to a new session identifier.
    pub fork_session: bool,
    /// Limit on conversation turns.
    pub max_turns: Option<u32>,
    /// Budget ceiling in USD.
    pub max_budget_usd: Option<f64>,
    /// Model to use.
    pub model: Option<String>,
    /// Fallback model when the primary is unavailable.
    pub fallback_model: Option<String>,
    /// Beta flags (see [`BETA_CONTEXT_1M`]).
    pub betas: Vec<String>,
    /// Name of the permission-prompt tool. Set automatically to `"stdio"`
    /// when a permission callback is registered.
    pub permission_prompt_tool_name: Option<String>,
    /// Working directory for the agent process.
    pub cwd: Option<PathBuf>,
    /// Explicit path to the agent CLI; discovered on disk when `None`.
    pub cli_path: Option<PathBuf>,
    /// Settings: a file path or an inline JSON string.
    pub settings: Option<String>,
    /// Sandbox settings merged into the settings value.
    pub sandbox: Option<SandboxSettings>,
    /// Additional directories the agent may access.
    pub add_dirs: Vec<PathBuf>,
    /// Extra environment variables for the agent process.
    pub env: HashMap<String, String>,
    /// Arbitrary extra CLI flags; `None` values are boolean flags.
    pub extra_args: HashMap<String, Option<String>>,
    /// Ceiling for a single buffered stdout JSON object.
    pub max_buffer_size: Option<usize>,
    /// Callback for agent stderr lines.
    pub stderr: Option<StderrCallback>,
    /// Tool-permission callback. Requires streaming input.
    pub can_use_tool: Option<CanUseTool>,
    /// Hook matchers by lifecycle event.
    pub hooks: HashMap<HookEvent, Vec<HookMatcher>>,
    /// Stream partial assistant messages.
    pub include_partial_messages: bool,
    /// Subagent definitions by name.
    pub agents: HashMap<String, AgentDefinition>,
    /// Settings sources to load. `None` loads none.
    pub setting_sources: Option<Vec<SettingSource>>,
    /// Local plugin directories.
    pub plugins: Vec<SdkPluginConfig>,
    /// Deprecated: explicit thinking-token ceiling. Prefer [`Self::thinking`].
    pub max_thinking_tokens: Option<u32>,
    /// Extended-thinking configuration.
    pub thinking: Option<ThinkingConfig>,
    /// Effort level for thinking depth.
    pub effort: Option<Effort>,
    /// Structured-output format (e.g. `{"type": "json_schema", "schema": …}`).
    pub output_format: Option<Value>,
    /// Enable file checkpointing in the agent.
    pub enable_file_checkpointing: bool,
}

impl std::fmt::Debug for AgentOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentOptions")
            .field("model", &self.model)
            .field("permission_mode", &self.permission_mode)
            .field("cwd", &self.cwd)
            .field("cli_path", &self.cli_path)
            .field("mcp_servers", &self.mcp_servers.keys().collect::<Vec<_>>())
            .field("has_can_use_tool", &self.can_use_tool.is_some())
            .field("hook_events", &self.hooks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}
