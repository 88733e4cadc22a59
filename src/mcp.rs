//! In-process tool server and MCP server configuration.
//!
//! The agent reaches in-process tools through `mcp_message` control
//! requests carrying a small JSON-RPC 2.0 subset: `initialize`,
//! `tools/list`, `tools/call`, and the `notifications/initialized`
//! acknowledgement. [`ToolServer`] answers those four methods for a bag of
//! [`SdkTool`] definitions; everything else is a `-32601` method-not-found
//! reply.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::Result;

/// MCP protocol revision advertised by the in-process server.
const PROTOCOL_VERSION: &str = "2024-11-05";

/// JSON-RPC error code: method or tool not found.
const CODE_NOT_FOUND: i64 = -32601;
/// JSON-RPC error code: handler failure.
const CODE_INTERNAL: i64 = -32603;

/// One content item in a tool result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ToolContent {
    /// Plain text.
    Text {
        /// The text payload.
        text: String,
    },
    /// Base64-encoded image.
    Image {
        /// Base64 image data.
        data: String,
        /// MIME type of the image.
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
}

impl ToolContent {
    /// Text content item.
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }
}

/// Result of a tool invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolResult {
    /// Content items returned to the agent.
    pub content: Vec<ToolContent>,
    /// Marks the result as an error without failing the RPC itself.
    pub is_error: bool,
}

impl ToolResult {
    /// Successful result with a single text item.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ToolContent::text(text)],
            is_error: false,
        }
    }
}

/// Optional behavioral annotations advertised with a tool.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolAnnotations {
    /// Display title.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// The tool does not mutate state.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_only_hint: Option<bool>,
    /// The tool may destroy data.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destructive_hint: Option<bool>,
    /// Repeat calls with the same input are safe.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub idempotent_hint: Option<bool>,
    /// The tool reaches outside the local environment.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub open_world_hint: Option<bool>,
}

/// Async handler executing a tool call.
pub type ToolHandler =
    Arc<dyn Fn(Map<String, Value>) -> BoxFuture<'static, Result<ToolResult>> + Send + Sync>;

/// A tool definition served by an in-process [`ToolServer`].
#[derive(Clone)]
pub struct SdkTool {
    /// Tool name, unique within its server.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema of the tool input. `None` advertises an empty
    /// object-typed schema.
    pub input_schema: Option<Value>,
    /// Handler invoked on `tools/call`.
    pub handler: ToolHandler,
    /// Optional behavioral annotations.
    pub annotations: Option<ToolAnnotations>,
}

impl SdkTool {
    /// Build a tool definition.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Option<Value>,
        handler: ToolHandler,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            handler,
            annotations: None,
        }
    }
}

impl std::fmt::Debug for SdkTool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkTool")
            .field("name", &self.name)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// In-process tool server answering the JSON-RPC subset the agent relays.
#[derive(Debug)]
pub struct ToolServer {
    name: String,
    version: String,
    tools: Vec<SdkTool>,
}

impl ToolServer {
    /// Build a server from its identity and tool definitions.
    pub fn new(name: impl Into<String>, version: impl Into<String>, tools: Vec<SdkTool>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            tools,
        }
    }

    /// Logical server name, as referenced by `mcp_message` requests.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Dispatch one JSON-RPC request and produce the full response value.
    ///
    /// The request's `id` is echoed verbatim; an absent `id` is echoed as
    /// absent where the method allows it and as `null` otherwise.
    pub async fn handle_request(&self, message: &Value) -> Value {
        let method = message.get("method").and_then(Value::as_str).unwrap_or("");
        let id = message.get("id").cloned().unwrap_or(Value::Null);
        let params = message
            .get("params")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();

        match method {
            "initialize" => self.handle_initialize(id),
            "tools/list" => self.handle_list_tools(id),
            "tools/call" => {
                let name = params.get("name").and_then(Value::as_str).unwrap_or("");
                let arguments = params
                    .get("arguments")
                    .and_then(Value::as_object)
                    .cloned()
                    .unwrap_or_default();
                self.handle_call_tool(id, name, arguments).await
            }
            "notifications/initialized" => json!({"jsonrpc": "2.0", "result": {}}),
            other => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": CODE_NOT_FOUND,
                    "message": format!("Method '{other}' not found"),
                },
            }),
        }
    }

    /// Fixed capability advertisement plus the server identity.
    fn handle_initialize(&self, id: Value) -> Value {
        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": {
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": { "tools": {} },
                "serverInfo": {
                    "name": self.name,
                    "version": self.version,
                },
            },
        })
    }

    fn handle_list_tools(&self, id: Value) -> Value {
        let tools: Vec<Value> = self
            .tools
            .iter()
            .map(|tool| {
                let schema = tool.input_schema.clone().unwrap_or_else(|| {
                    json!({"type": "object", "properties": {}})
                });
                let mut entry = Map::new();
                entry.insert("name".into(), Value::String(tool.name.clone()));
                entry.insert("description".into(), Value::String(tool.description.clone()));
                entry.insert("inputSchema".into(), schema);
                if let Some(annotations) = &tool.annotations {
                    if let Ok(value) = serde_json::to_value(annotations) {
                        entry.insert("annotations".into(), value);
                    }
                }
                Value::Object(entry)
            })
            .collect();

        json!({
            "jsonrpc": "2.0",
            "id": id,
            "result": { "tools": tools },
        })
    }

    async fn handle_call_tool(&self, id: Value, name: &str, arguments: Map<String, Value>) -> Value {
        let Some(tool) = self.tools.iter().find(|t| t.name == name) else {
            return json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": CODE_NOT_FOUND,
                    "message": format!("Tool '{name}' not found"),
                },
            });
        };

        match (tool.handler)(arguments).await {
            Err(err) => json!({
                "jsonrpc": "2.0",
                "id": id,
                "error": {
                    "code": CODE_INTERNAL,
                    "message": err.to_string(),
                },
            }),
            Ok(result) => {
                let content: Vec<Value> = result
                    .content
                    .iter()
                    .filter_map(|item| serde_json::to_value(item).ok())
                    .collect();
                let mut body = Map::new();
                body.insert("content".into(), Value::Array(content));
                if result.is_error {
                    body.insert("is_error".into(), Value::Bool(true));
                }
                json!({
                    "jsonrpc": "2.0",
                    "id": id,
                    "result": Value::Object(body),
                })
            }
        }
    }
}

/// Configuration for one MCP server visible to the agent.
#[derive(Debug, Clone)]
pub enum McpServerConfig {
    /// External server spawned by the agent over stdio.
    Stdio {
        /// Command to launch.
        command: String,
        /// Arguments for the command.
        args: Vec<String>,
        /// Extra environment for the command.
        env: HashMap<String, String>,
    },
    /// External server reached over server-sent events.
    Sse {
        /// Server URL.
        url: String,
        /// Extra request headers.
        headers: HashMap<String, String>,
    },
    /// External server reached over HTTP.
    Http {
        /// Server URL.
        url: String,
        /// Extra request headers.
        headers: HashMap<String, String>,
    },
    /// In-process server hosted by this crate; calls are relayed through
    /// the control protocol.
    Sdk {
        /// Logical server name.
        name: String,
        /// The server instance. Never serialized.
        instance: Arc<ToolServer>,
    },
}

impl McpServerConfig {
    /// Serialize for the agent's `--mcp-config` flag.
    ///
    /// SDK-type servers are stripped to their `{type, name}` identity; the
    /// instance stays on this side of the pipe.
    pub(crate) fn to_cli_value(&self) -> Value {
        match self {
            Self::Stdio { command, args, env } => {
                let mut out = Map::new();
                out.insert("type".into(), Value::String("stdio".into()));
                out.insert("command".into(), Value::String(command.clone()));
                if !args.is_empty() {
                    out.insert(
                        "args".into(),
                        Value::Array(args.iter().map(|a| Value::String(a.clone())).collect()),
                    );
                }
                if !env.is_empty() {
                    out.insert(
                        "env".into(),
                        Value::Object(
                            env.iter()
                                .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                                .collect(),
                        ),
                    );
                }
                Value::Object(out)
            }
            Self::Sse { url, headers } => tagged_url_value("sse", url, headers),
            Self::Http { url, headers } => tagged_url_value("http", url, headers),
            Self::Sdk { name, .. } => json!({"type": "sdk", "name": name}),
        }
    }
}

fn tagged_url_value(kind: &str, url: &str, headers: &HashMap<String, String>) -> Value {
    let mut out = Map::new();
    out.insert("type".into(), Value::String(kind.to_owned()));
    out.insert("url".into(), Value::String(url.to_owned()));
    if !headers.is_empty() {
        out.insert(
            "headers".into(),
            Value::Object(
                headers
                    .iter()
                    .map(|(k, v)| (k.clone(), Value::String(v.clone())))
                    .collect(),
            ),
        );
    }
    Value::Object(out)
}

/// Build an in-process tool server configuration.
///
/// The returned config is registered under a name in
/// [`crate::AgentOptions::mcp_servers`]; tool calls never leave the host
/// process.
pub fn tool_server(
    name: impl Into<String>,
    version: impl Into<String>,
    tools: Vec<SdkTool>,
) -> McpServerConfig {
    let name = name.into();
    McpServerConfig::Sdk {
        name: name.clone(),
        instance: Arc::new(ToolServer::new(name, version, tools)),
    }
}
