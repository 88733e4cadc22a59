#![forbid(unsafe_code)]

//! Typed, streaming client for driving the Claude Code CLI agent.
//!
//! The agent runs as a subprocess speaking newline-delimited JSON over
//! stdio. This crate hides the framing, the subprocess lifecycle, and the
//! bidirectional control protocol layered on the same stream: while
//! conversation messages flow from agent to host, the agent can call back
//! into host code — tool-permission decisions, lifecycle hooks, in-process
//! tool execution — and receive structured replies.
//!
//! Two entry points:
//!
//! - [`query`] / [`query_stream`] for one-shot conversations;
//! - [`Client`] for long-lived, interactive sessions with interrupts and
//!   mid-conversation control.
//!
//! ```rust,ignore
//! use agent_conduit::{query, AgentOptions, ContentBlock, Message};
//!
//! let (mut messages, mut errors) = query("What is 2+2?", AgentOptions::default());
//! while let Some(message) = messages.recv().await {
//!     if let Message::Assistant(assistant) = message {
//!         for block in assistant.content {
//!             if let ContentBlock::Text { text } = block {
//!                 println!("{text}");
//!             }
//!         }
//!     }
//! }
//! if let Some(err) = errors.recv().await {
//!     eprintln!("query failed: {err}");
//! }
//! ```

pub mod control;
pub mod errors;
pub mod hooks;
pub mod mcp;
pub mod message;
pub mod options;
pub mod parser;
pub mod permission;
pub mod session;
pub mod transport;

pub use errors::{Result, SdkError};
pub use hooks::{
    HookCallback, HookContext, HookEvent, HookInput, HookMatcher, HookOutput, HookSpecificOutput,
};
pub use mcp::{
    tool_server, McpServerConfig, SdkTool, ToolAnnotations, ToolContent, ToolHandler, ToolResult,
    ToolServer,
};
pub use message::{
    AssistantError, AssistantMessage, ContentBlock, Message, RateLimitEvent, ResultMessage,
    StreamEvent, SystemMessage, UserContent, UserMessage,
};
pub use options::{
    AgentDefinition, AgentOptions, Effort, SandboxSettings, SdkPluginConfig, SettingSource,
    SystemPrompt, ThinkingConfig, ToolSelection,
};
pub use parser::parse_message;
pub use permission::{
    CanUseTool, PermissionBehavior, PermissionMode, PermissionResult, PermissionRuleValue,
    PermissionUpdate, PermissionUpdateDestination, PermissionUpdateKind, ToolPermissionContext,
};
pub use session::{query, query_stream, Client};

/// Crate version, advertised to the agent process at spawn time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
