//! Agent CLI discovery and argument construction.

use std::env;
use std::path::PathBuf;

use serde_json::{json, Map, Value};

use crate::options::{AgentOptions, SystemPrompt, ThinkingConfig, ToolSelection};

/// Name of the agent CLI binary.
const CLI_NAME: &str = "claude";

/// Adaptive thinking budget applied when no explicit ceiling is set.
const ADAPTIVE_THINKING_TOKENS: u32 = 32_000;

/// Locate the agent CLI on disk.
///
/// Searches `PATH` first, then well-known install locations under the home
/// directory. Falls back to the bare binary name so a missing install
/// fails at connect time with a clear not-found error.
pub fn find_cli() -> PathBuf {
    if let Some(paths) = env::var_os("PATH") {
        for dir in env::split_paths(&paths) {
            let candidate = dir.join(CLI_NAME);
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    let home = env::var_os("HOME")
        .or_else(|| env::var_os("USERPROFILE"))
        .map(PathBuf::from);
    if let Some(home) = home {
        let candidates = [
            home.join(".npm-global/bin").join(CLI_NAME),
            PathBuf::from("/usr/local/bin").join(CLI_NAME),
            home.join(".local/bin").join(CLI_NAME),
            home.join("node_modules/.bin").join(CLI_NAME),
            home.join(".yarn/bin").join(CLI_NAME),
            home.join(".claude/local").join(CLI_NAME),
        ];
        for candidate in candidates {
            if candidate.is_file() {
                return candidate;
            }
        }
    }

    PathBuf::from(CLI_NAME)
}

/// Assemble the agent's argument vector from the options record.
///
/// Streaming I/O flags frame the list: `--output-format stream-json
/// --verbose` first, `--input-format stream-json` last. Unset options emit
/// nothing.
pub fn build_command(options: &AgentOptions) -> Vec<String> {
    let mut cmd: Vec<String> = vec![
        "--output-format".into(),
        "stream-json".into(),
        "--verbose".into(),
    ];

    match &options.system_prompt {
        Some(SystemPrompt::Custom(prompt)) => {
            cmd.push("--system-prompt".into());
            cmd.push(prompt.clone());
        }
        Some(SystemPrompt::Preset { append }) => {
            if let Some(append) = append {
                cmd.push("--append-system-prompt".into());
                cmd.push(append.clone());
            }
        }
        None => {
            cmd.push("--system-prompt".into());
            cmd.push(String::new());
        }
    }

    match &options.tools {
        Some(ToolSelection::Preset) => {
            cmd.push("--tools".into());
            cmd.push("default".into());
        }
        Some(ToolSelection::List(tools)) => {
            cmd.push("--tools".into());
            cmd.push(tools.join(","));
        }
        None => {}
    }

    if !options.allowed_tools.is_empty() {
        cmd.push("--allowedTools".into());
        cmd.push(options.allowed_tools.join(","));
    }

    if let Some(max_turns) = options.max_turns {
        cmd.push("--max-turns".into());
        cmd.push(max_turns.to_string());
    }

    if let Some(budget) = options.max_budget_usd {
        cmd.push("--max-budget-usd".into());
        cmd.push(budget.to_string());
    }

    if !options.disallowed_tools.is_empty() {
        cmd.push("--disallowedTools".into());
        cmd.push(options.disallowed_tools.join(","));
    }

    if let Some(model) = &options.model {
        cmd.push("--model".into());
        cmd.push(model.clone());
    }

    if let Some(fallback) = &options.fallback_model {
        cmd.push("--fallback-model".into());
        cmd.push(fallback.clone());
    }

    if !options.betas.is_empty() {
        cmd.push("--betas".into());
        cmd.push(options.betas.join(","));
    }

    if let Some(tool_name) = &options.permission_prompt_tool_name {
        cmd.push("--permission-prompt-tool".into());
        cmd.push(tool_name.clone());
    }

    if let Some(mode) = options.permission_mode {
        cmd.push("--permission-mode".into());
        cmd.push(mode.as_str().into());
    }

    if options.continue_conversation {
        cmd.push("--continue".into());
    }

    if let Some(resume) = &options.resume {
        cmd.push("--resume".into());
        cmd.push(resume.clone());
    }

    if let Some(settings) = build_settings_value(options) {
        cmd.push("--settings".into());
        cmd.push(settings);
    }

    for dir in &options.add_dirs {
        cmd.push("--add-dir".into());
        cmd.push(dir.to_string_lossy().into_owned());
    }

    if options.mcp_servers.is_empty() {
        if let Some(path) = &options.mcp_servers_path {
            cmd.push("--mcp-config".into());
            cmd.push(path.clone());
        }
    } else {
        let servers: Map<String, Value> = options
            .mcp_servers
            .iter()
            .map(|(name, config)| (name.clone(), config.to_cli_value()))
            .collect();
        cmd.push("--mcp-config".into());
        cmd.push(json!({ "mcpServers": servers }).to_string());
    }

    if options.include_partial_messages {
        cmd.push("--include-partial-messages".into());
    }

    if options.fork_session {
        cmd.push("--fork-session".into());
    }

    cmd.push("--setting-sources".into());
    cmd.push(match &options.setting_sources {
        Some(sources) => sources
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(","),
        None => String::new(),
    });

    for plugin in &options.plugins {
        cmd.push("--plugin-dir".into());
        cmd.push(plugin.path.to_string_lossy().into_owned());
    }

    for (flag, value) in &options.extra_args {
        let normalized = if flag.starts_with("--") {
            flag.clone()
        } else {
            format!("--{flag}")
        };
        cmd.push(normalized);
        if let Some(value) = value {
            cmd.push(value.clone());
        }
    }

    let max_thinking_tokens = match options.thinking {
        Some(ThinkingConfig::Adaptive) => {
            Some(options.max_thinking_tokens.unwrap_or(ADAPTIVE_THINKING_TOKENS))
        }
        Some(ThinkingConfig::Enabled { budget_tokens }) => Some(budget_tokens),
        Some(ThinkingConfig::Disabled) => Some(0),
        None => options.max_thinking_tokens,
    };
    if let Some(tokens) = max_thinking_tokens {
        cmd.push("--max-thinking-tokens".into());
        cmd.push(tokens.to_string());
    }

    if let Some(effort) = options.effort {
        cmd.push("--effort".into());
        cmd.push(effort.as_str().into());
    }

    if let Some(format) = &options.output_format {
        if format.get("type").and_then(Value::as_str) == Some("json_schema") {
            if let Some(schema) = format.get("schema") {
                cmd.push("--json-schema".into());
                cmd.push(schema.to_string());
            }
        }
    }

    cmd.push("--input-format".into());
    cmd.push("stream-json".into());

    cmd
}

/// Resolve the `--settings` value, merging sandbox settings when present.
///
/// A plain settings string passes through untouched. When sandbox settings
/// exist they must be embedded in a JSON object, so an inline-JSON or
/// file-backed settings value is parsed (best effort) and the sandbox
/// object is merged in.
fn build_settings_value(options: &AgentOptions) -> Option<String> {
    let settings = options.settings.as_deref();
    let Some(sandbox) = &options.sandbox else {
        return settings.map(ToOwned::to_owned);
    };

    let mut merged = Map::new();
    if let Some(settings) = settings {
        let trimmed = settings.trim();
        let raw = if trimmed.starts_with('{') && trimmed.ends_with('}') {
            Some(trimmed.to_owned())
        } else {
            std::fs::read_to_string(trimmed).ok()
        };
        if let Some(parsed) = raw.and_then(|r| serde_json::from_str::<Map<String, Value>>(&r).ok())
        {
            merged = parsed;
        }
    }

    if let Ok(sandbox) = serde_json::to_value(sandbox) {
        merged.insert("sandbox".into(), sandbox);
    }

    Some(Value::Object(merged).to_string())
}
