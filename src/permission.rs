//! Tool-permission surface: modes, rule updates, and the decision callback.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde_json::{Map, Value};

use crate::Result;

/// Permission mode governing tool execution in the agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionMode {
    /// Standard behavior: prompt for dangerous tools.
    Default,
    /// Automatically accept file edits.
    AcceptEdits,
    /// Plan mode: no execution.
    Plan,
    /// Skip all permission prompts.
    BypassPermissions,
}

impl PermissionMode {
    /// Wire representation of the mode.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::AcceptEdits => "acceptEdits",
            Self::Plan => "plan",
            Self::BypassPermissions => "bypassPermissions",
        }
    }

    /// Parse a wire string; unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "default" => Some(Self::Default),
            "acceptEdits" => Some(Self::AcceptEdits),
            "plan" => Some(Self::Plan),
            "bypassPermissions" => Some(Self::BypassPermissions),
            _ => None,
        }
    }
}

/// Behavior attached to a permission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionBehavior {
    /// Allow matching tool calls.
    Allow,
    /// Deny matching tool calls.
    Deny,
    /// Ask the operator for matching tool calls.
    Ask,
}

impl PermissionBehavior {
    /// Wire representation of the behavior.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
            Self::Ask => "ask",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            "ask" => Some(Self::Ask),
            _ => None,
        }
    }
}

/// Destination where a permission update is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionUpdateDestination {
    /// The user-level settings file.
    UserSettings,
    /// The project-level settings file.
    ProjectSettings,
    /// The local (gitignored) settings file.
    LocalSettings,
    /// The live session only.
    Session,
}

impl PermissionUpdateDestination {
    /// Wire representation of the destination.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UserSettings => "userSettings",
            Self::ProjectSettings => "projectSettings",
            Self::LocalSettings => "localSettings",
            Self::Session => "session",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "userSettings" => Some(Self::UserSettings),
            "projectSettings" => Some(Self::ProjectSettings),
            "localSettings" => Some(Self::LocalSettings),
            "session" => Some(Self::Session),
            _ => None,
        }
    }
}

/// Kind of a permission update.
///
/// The agent may ship suggestion kinds this crate does not know; those pass
/// through unaltered so a callback can echo them back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionUpdateKind {
    /// Add new rules.
    AddRules,
    /// Replace existing rules.
    ReplaceRules,
    /// Remove rules.
    RemoveRules,
    /// Change the permission mode.
    SetMode,
    /// Add allowed directories.
    AddDirectories,
    /// Remove allowed directories.
    RemoveDirectories,
    /// Unrecognized kind, preserved verbatim.
    Other(String),
}

impl PermissionUpdateKind {
    /// Wire representation of the kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::AddRules => "addRules",
            Self::ReplaceRules => "replaceRules",
            Self::RemoveRules => "removeRules",
            Self::SetMode => "setMode",
            Self::AddDirectories => "addDirectories",
            Self::RemoveDirectories => "removeDirectories",
            Self::Other(kind) => kind,
        }
    }

    fn parse(value: &str) -> Self {
        match value {
            "addRules" => Self::AddRules,
            "replaceRules" => Self::ReplaceRules,
            "removeRules" => Self::RemoveRules,
            "setMode" => Self::SetMode,
            "addDirectories" => Self::AddDirectories,
            "removeDirectories" => Self::RemoveDirectories,
            other => Self::Other(other.to_owned()),
        }
    }
}

/// A single permission rule: a tool name plus an optional content pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionRuleValue {
    /// Tool the rule applies to.
    pub tool_name: String,
    /// Rule content pattern, empty when the rule covers the whole tool.
    pub rule_content: String,
}

/// A permission update, either suggested by the agent or returned by a
/// permission callback.
#[derive(Debug, Clone, PartialEq)]
pub struct PermissionUpdate {
    /// What the update does.
    pub kind: PermissionUpdateKind,
    /// Rules payload for the rule-editing kinds.
    pub rules: Vec<PermissionRuleValue>,
    /// Behavior payload for the rule-editing kinds.
    pub behavior: Option<PermissionBehavior>,
    /// Mode payload for `SetMode`.
    pub mode: Option<PermissionMode>,
    /// Directory payload for the directory-editing kinds.
    pub directories: Vec<String>,
    /// Where the update is persisted.
    pub destination: Option<PermissionUpdateDestination>,
}

impl PermissionUpdate {
    /// Serialize to the wire dictionary.
    ///
    /// Only the payload relevant to the update kind is emitted, matching
    /// the control protocol's expectations.
    pub fn to_value(&self) -> Value {
        let mut out = Map::new();
        out.insert("type".into(), Value::String(self.kind.as_str().to_owned()));
        if let Some(destination) = self.destination {
            out.insert(
                "destination".into(),
                Value::String(destination.as_str().to_owned()),
            );
        }
        match self.kind {
            PermissionUpdateKind::AddRules
            | PermissionUpdateKind::ReplaceRules
            | PermissionUpdateKind::RemoveRules => {
                if !self.rules.is_empty() {
                    let rules = self
                        .rules
                        .iter()
                        .map(|rule| {
                            let mut entry = Map::new();
                            entry.insert("toolName".into(), Value::String(rule.tool_name.clone()));
                            entry.insert(
                                "ruleContent".into(),
                                Value::String(rule.rule_content.clone()),
                            );
                            Value::Object(entry)
                        })
                        .collect();
                    out.insert("rules".into(), Value::Array(rules));
                }
                if let Some(behavior) = self.behavior {
                    out.insert(
                        "behavior".into(),
                        Value::String(behavior.as_str().to_owned()),
                    );
                }
            }
            PermissionUpdateKind::SetMode => {
                if let Some(mode) = self.mode {
                    out.insert("mode".into(), Value::String(mode.as_str().to_owned()));
                }
            }
            PermissionUpdateKind::AddDirectories | PermissionUpdateKind::RemoveDirectories => {
                if !self.directories.is_empty() {
                    let dirs = self
                        .directories
                        .iter()
                        .map(|d| Value::String(d.clone()))
                        .collect();
                    out.insert("directories".into(), Value::Array(dirs));
                }
            }
            PermissionUpdateKind::Other(_) => {}
        }
        Value::Object(out)
    }

    /// Parse a raw suggestion dictionary shipped by the agent.
    ///
    /// Best-effort: absent or unrecognized fields are dropped rather than
    /// rejected, since suggestions are advisory.
    pub fn from_value(raw: &Map<String, Value>) -> Self {
        let kind = raw
            .get("type")
            .and_then(Value::as_str)
            .map_or(PermissionUpdateKind::Other(String::new()), |s| {
                PermissionUpdateKind::parse(s)
            });
        let behavior = raw
            .get("behavior")
            .and_then(Value::as_str)
            .and_then(PermissionBehavior::parse);
        let mode = raw
            .get("mode")
            .and_then(Value::as_str)
            .and_then(PermissionMode::parse);
        let destination = raw
            .get("destination")
            .and_then(Value::as_str)
            .and_then(PermissionUpdateDestination::parse);
        let directories = raw
            .get("directories")
            .and_then(Value::as_array)
            .map(|dirs| {
                dirs.iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();
        let rules = raw
            .get("rules")
            .and_then(Value::as_array)
            .map(|rules| {
                rules
                    .iter()
                    .filter_map(Value::as_object)
                    .map(|rule| PermissionRuleValue {
                        tool_name: rule
                            .get("toolName")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                        rule_content: rule
                            .get("ruleContent")
                            .and_then(Value::as_str)
                            .unwrap_or_default()
                            .to_owned(),
                    })
                    .collect()
            })
            .unwrap_or_default();

        Self {
            kind,
            rules,
            behavior,
            mode,
            directories,
            destination,
        }
    }
}

/// Context handed to a permission callback.
#[derive(Debug, Clone, Default)]
pub struct ToolPermissionContext {
    /// Permission updates suggested by the agent for this call.
    pub suggestions: Vec<PermissionUpdate>,
}

/// Outcome of a permission callback.
#[derive(Debug, Clone, PartialEq)]
pub enum PermissionResult {
    /// Let the tool call proceed.
    Allow {
        /// Replacement input; the original input is echoed when `None`.
        updated_input: Option<Map<String, Value>>,
        /// Permission updates to apply alongside the call.
        updated_permissions: Option<Vec<PermissionUpdate>>,
    },
    /// Block the tool call.
    Deny {
        /// Explanation relayed to the agent.
        message: String,
        /// Request that the agent also interrupt the current turn.
        interrupt: bool,
    },
}

impl PermissionResult {
    /// Plain allow with no input rewrite and no updates.
    pub fn allow() -> Self {
        Self::Allow {
            updated_input: None,
            updated_permissions: None,
        }
    }

    /// Plain deny with a message.
    pub fn deny(message: impl Into<String>) -> Self {
        Self::Deny {
            message: message.into(),
            interrupt: false,
        }
    }
}

/// Async callback deciding whether the agent may run a tool.
///
/// Receives the tool name, the proposed input, and the permission context;
/// resolves to a [`PermissionResult`]. An `Err` is relayed to the agent as
/// a control-response error.
pub type CanUseTool = Arc<
    dyn Fn(String, Map<String, Value>, ToolPermissionContext) -> BoxFuture<'static, Result<PermissionResult>>
        + Send
        + Sync,
>;
