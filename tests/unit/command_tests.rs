//! Unit tests for agent CLI argument construction.

use std::collections::HashMap;

use serde_json::{json, Value};

use agent_conduit::transport::cli::build_command;
use agent_conduit::{
    tool_server, AgentOptions, Effort, PermissionMode, SandboxSettings, SettingSource,
    SystemPrompt, ThinkingConfig, ToolSelection,
};

fn flag_value(cmd: &[String], flag: &str) -> Option<String> {
    cmd.iter()
        .position(|arg| arg == flag)
        .map(|index| cmd[index + 1].clone())
}

fn has_flag(cmd: &[String], flag: &str) -> bool {
    cmd.iter().any(|arg| arg == flag)
}

/// With no options set, the command still clears the system prompt and the
/// setting sources, and frames the streaming flags.
#[test]
fn default_options_clear_prompt_and_sources() {
    let cmd = build_command(&AgentOptions::default());

    assert_eq!(flag_value(&cmd, "--system-prompt").as_deref(), Some(""));
    assert_eq!(flag_value(&cmd, "--setting-sources").as_deref(), Some(""));
    assert_eq!(flag_value(&cmd, "--output-format").as_deref(), Some("stream-json"));
    assert_eq!(flag_value(&cmd, "--input-format").as_deref(), Some("stream-json"));
    assert!(has_flag(&cmd, "--verbose"));
}

/// Scalar options map one-to-one onto their flags.
#[test]
fn scalar_options_map_to_flags() {
    let options = AgentOptions {
        model: Some("claude-sonnet-4-5".into()),
        fallback_model: Some("claude-haiku-4".into()),
        max_turns: Some(5),
        permission_mode: Some(PermissionMode::AcceptEdits),
        resume: Some("sess-9".into()),
        continue_conversation: true,
        fork_session: true,
        include_partial_messages: true,
        effort: Some(Effort::High),
        ..AgentOptions::default()
    };
    let cmd = build_command(&options);

    assert_eq!(flag_value(&cmd, "--model").as_deref(), Some("claude-sonnet-4-5"));
    assert_eq!(flag_value(&cmd, "--fallback-model").as_deref(), Some("claude-haiku-4"));
    assert_eq!(flag_value(&cmd, "--max-turns").as_deref(), Some("5"));
    assert_eq!(flag_value(&cmd, "--permission-mode").as_deref(), Some("acceptEdits"));
    assert_eq!(flag_value(&cmd, "--resume").as_deref(), Some("sess-9"));
    assert!(has_flag(&cmd, "--continue"));
    assert!(has_flag(&cmd, "--fork-session"));
    assert!(has_flag(&cmd, "--include-partial-messages"));
    assert_eq!(flag_value(&cmd, "--effort").as_deref(), Some("high"));
}

/// Tool selections: preset, explicit list, and the allow/deny lists.
#[test]
fn tool_selection_flags() {
    let options = AgentOptions {
        tools: Some(ToolSelection::List(vec!["Bash".into(), "Read".into()])),
        allowed_tools: vec!["Bash".into()],
        disallowed_tools: vec!["WebSearch".into()],
        ..AgentOptions::default()
    };
    let cmd = build_command(&options);
    assert_eq!(flag_value(&cmd, "--tools").as_deref(), Some("Bash,Read"));
    assert_eq!(flag_value(&cmd, "--allowedTools").as_deref(), Some("Bash"));
    assert_eq!(flag_value(&cmd, "--disallowedTools").as_deref(), Some("WebSearch"));

    let preset = AgentOptions {
        tools: Some(ToolSelection::Preset),
        ..AgentOptions::default()
    };
    assert_eq!(
        flag_value(&build_command(&preset), "--tools").as_deref(),
        Some("default")
    );
}

/// System prompt shapes: custom replaces, preset appends.
#[test]
fn system_prompt_shapes() {
    let custom = AgentOptions {
        system_prompt: Some(SystemPrompt::Custom("be brief".into())),
        ..AgentOptions::default()
    };
    assert_eq!(
        flag_value(&build_command(&custom), "--system-prompt").as_deref(),
        Some("be brief")
    );

    let preset = AgentOptions {
        system_prompt: Some(SystemPrompt::Preset {
            append: Some("and cite sources".into()),
        }),
        ..AgentOptions::default()
    };
    let cmd = build_command(&preset);
    assert_eq!(
        flag_value(&cmd, "--append-system-prompt").as_deref(),
        Some("and cite sources")
    );
    assert!(!has_flag(&cmd, "--system-prompt"));
}

/// SDK-type MCP servers are stripped to their identity in `--mcp-config`;
/// the in-process instance never reaches the command line.
#[test]
fn sdk_mcp_servers_are_stripped() {
    let mut servers = HashMap::new();
    servers.insert("calc".to_owned(), tool_server("calc", "1.0.0", Vec::new()));
    let options = AgentOptions {
        mcp_servers: servers,
        ..AgentOptions::default()
    };

    let config = flag_value(&build_command(&options), "--mcp-config").expect("--mcp-config");
    let parsed: Value = serde_json::from_str(&config).expect("valid JSON");
    assert_eq!(
        parsed,
        json!({"mcpServers": {"calc": {"type": "sdk", "name": "calc"}}})
    );
}

/// Extra args are normalized to `--flag` / `--flag value`.
#[test]
fn extra_args_are_normalized() {
    let mut extra = HashMap::new();
    extra.insert("debug-to-stderr".to_owned(), None);
    extra.insert("--custom".to_owned(), Some("v".to_owned()));
    let options = AgentOptions {
        extra_args: extra,
        ..AgentOptions::default()
    };
    let cmd = build_command(&options);

    assert!(has_flag(&cmd, "--debug-to-stderr"));
    assert_eq!(flag_value(&cmd, "--custom").as_deref(), Some("v"));
}

/// Thinking configuration resolves to the thinking-token ceiling.
#[test]
fn thinking_config_resolves_token_ceiling() {
    let adaptive = AgentOptions {
        thinking: Some(ThinkingConfig::Adaptive),
        ..AgentOptions::default()
    };
    assert_eq!(
        flag_value(&build_command(&adaptive), "--max-thinking-tokens").as_deref(),
        Some("32000")
    );

    let enabled = AgentOptions {
        thinking: Some(ThinkingConfig::Enabled { budget_tokens: 9000 }),
        ..AgentOptions::default()
    };
    assert_eq!(
        flag_value(&build_command(&enabled), "--max-thinking-tokens").as_deref(),
        Some("9000")
    );

    let disabled = AgentOptions {
        thinking: Some(ThinkingConfig::Disabled),
        ..AgentOptions::default()
    };
    assert_eq!(
        flag_value(&build_command(&disabled), "--max-thinking-tokens").as_deref(),
        Some("0")
    );

    assert!(!has_flag(
        &build_command(&AgentOptions::default()),
        "--max-thinking-tokens"
    ));
}

/// A JSON-schema output format ships the schema alone.
#[test]
fn json_schema_output_format() {
    let options = AgentOptions {
        output_format: Some(json!({
            "type": "json_schema",
            "schema": {"type": "object", "required": ["answer"]},
        })),
        ..AgentOptions::default()
    };
    let schema = flag_value(&build_command(&options), "--json-schema").expect("--json-schema");
    let parsed: Value = serde_json::from_str(&schema).expect("valid JSON");
    assert_eq!(parsed, json!({"type": "object", "required": ["answer"]}));
}

/// Sandbox settings merge into an inline-JSON settings value.
#[test]
fn sandbox_merges_into_settings() {
    let options = AgentOptions {
        settings: Some(r#"{"theme": "dark"}"#.into()),
        sandbox: Some(SandboxSettings {
            enabled: Some(true),
            ..SandboxSettings::default()
        }),
        ..AgentOptions::default()
    };
    let settings = flag_value(&build_command(&options), "--settings").expect("--settings");
    let parsed: Value = serde_json::from_str(&settings).expect("valid JSON");
    assert_eq!(parsed["theme"], "dark");
    assert_eq!(parsed["sandbox"]["enabled"], true);
}

/// Plain settings pass through untouched when no sandbox is configured.
#[test]
fn settings_pass_through_without_sandbox() {
    let options = AgentOptions {
        settings: Some("/etc/agent/settings.json".into()),
        ..AgentOptions::default()
    };
    assert_eq!(
        flag_value(&build_command(&options), "--settings").as_deref(),
        Some("/etc/agent/settings.json")
    );
}

/// Setting sources join with commas when present.
#[test]
fn setting_sources_join() {
    let options = AgentOptions {
        setting_sources: Some(vec![SettingSource::User, SettingSource::Project]),
        ..AgentOptions::default()
    };
    assert_eq!(
        flag_value(&build_command(&options), "--setting-sources").as_deref(),
        Some("user,project")
    );
}
