//! Session facade: one-shot queries and the long-lived client.
//!
//! Both shapes are thin layers over [`ControlProtocol`]: they wire up the
//! subprocess transport, run the initialize exchange, stamp session
//! identifiers onto outbound user turns, and parse inbound conversation
//! JSON into the typed [`Message`] surface.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{mpsc, Mutex};

use crate::control::{ControlProtocol, ProtocolOptions};
use crate::errors::{Result, SdkError};
use crate::mcp::McpServerConfig;
use crate::message::Message;
use crate::options::AgentOptions;
use crate::parser::parse_message;
use crate::permission::PermissionMode;
use crate::transport::{SubprocessTransport, Transport};

/// Environment variable identifying the caller shape to the agent.
const ENV_ENTRYPOINT: &str = "CLAUDE_CODE_ENTRYPOINT";
/// Environment variable carrying the stream-close timeout in milliseconds.
const ENV_STREAM_CLOSE_TIMEOUT: &str = "CLAUDE_CODE_STREAM_CLOSE_TIMEOUT";

/// Floor for the initialize timeout, regardless of the environment value.
const MIN_INITIALIZE_TIMEOUT: Duration = Duration::from_secs(60);
/// Session identifier applied when the caller does not supply one.
const DEFAULT_SESSION_ID: &str = "default";
/// Capacity of the typed-message channels handed to callers.
const CHANNEL_CAPACITY: usize = 100;

/// One-shot query with a string prompt.
///
/// Returns a message channel and an error channel. Messages arrive as they
/// stream from the agent; after the message channel closes, the error
/// channel yields at most one terminal error. Drain messages first.
///
/// Must be called within a tokio runtime. A permission callback cannot be
/// used with a string prompt; use [`query_stream`] instead.
pub fn query(
    prompt: impl Into<String>,
    options: AgentOptions,
) -> (mpsc::Receiver<Message>, mpsc::Receiver<SdkError>) {
    run_query(Some(prompt.into()), None, options)
}

/// One-shot query fed by a caller-supplied stream of user-shaped objects.
///
/// The input channel closing triggers end-of-input coordination; see the
/// control protocol. Channel semantics match [`query`].
pub fn query_stream(
    input: mpsc::Receiver<Value>,
    options: AgentOptions,
) -> (mpsc::Receiver<Message>, mpsc::Receiver<SdkError>) {
    run_query(None, Some(input), options)
}

fn run_query(
    prompt: Option<String>,
    input: Option<mpsc::Receiver<Value>>,
    options: AgentOptions,
) -> (mpsc::Receiver<Message>, mpsc::Receiver<SdkError>) {
    let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let (error_tx, error_rx) = mpsc::channel(1);

    tokio::spawn(async move {
        if let Err(err) = drive_query(prompt, input, options, &message_tx).await {
            let _ = error_tx.send(err).await;
        }
    });

    (message_rx, error_rx)
}

/// Validate options, launch the subprocess transport, and run the session.
async fn drive_query(
    prompt: Option<String>,
    input: Option<mpsc::Receiver<Value>>,
    mut options: AgentOptions,
    messages: &mpsc::Sender<Message>,
) -> Result<()> {
    if options.can_use_tool.is_some() && prompt.is_some() {
        return Err(SdkError::sdk(
            "can_use_tool requires streaming input; use query_stream instead of query",
        ));
    }
    configure_permissions(&mut options)?;
    options
        .env
        .entry(ENV_ENTRYPOINT.into())
        .or_insert_with(|| "sdk-rust".into());

    let transport: Arc<dyn Transport> =
        Arc::new(SubprocessTransport::connect(options.clone()).await?);
    drive_session(transport, &options, prompt, input, messages).await
}

/// Run one query session over an already-connected transport.
async fn drive_session(
    transport: Arc<dyn Transport>,
    options: &AgentOptions,
    prompt: Option<String>,
    input: Option<mpsc::Receiver<Value>>,
    messages: &mpsc::Sender<Message>,
) -> Result<()> {
    let protocol = ControlProtocol::new(
        Arc::clone(&transport),
        protocol_options(options, MIN_INITIALIZE_TIMEOUT),
    );
    protocol.start()?;

    let outcome = drive_conversation(&protocol, &transport, prompt, input, messages).await;
    protocol.close().await;
    outcome
}

async fn drive_conversation(
    protocol: &ControlProtocol,
    transport: &Arc<dyn Transport>,
    prompt: Option<String>,
    input: Option<mpsc::Receiver<Value>>,
    messages: &mpsc::Sender<Message>,
) -> Result<()> {
    protocol.initialize().await?;

    if let Some(prompt) = prompt {
        let user = json!({
            "type": "user",
            "session_id": "",
            "message": {"role": "user", "content": prompt},
            "parent_tool_use_id": null,
        });
        protocol.send_message(&user).await?;
        let _ = transport.end_input().await;
    } else if let Some(input) = input {
        protocol.stream_input(input);
    }

    let Some(mut raw_messages) = protocol.take_messages() else {
        return Err(SdkError::Protocol("conversation stream already consumed".into()));
    };
    while let Some(raw) = raw_messages.recv().await {
        if raw.get("type").and_then(Value::as_str) == Some("error") {
            let text = raw
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown transport error");
            return Err(SdkError::sdk(text));
        }
        let message = parse_message(&raw)?;
        if messages.send(message).await.is_err() {
            return Ok(());
        }
    }
    protocol.last_error().map_or(Ok(()), Err)
}

/// Long-lived, bidirectional client for interactive conversations.
///
/// Connect once, then send user turns and read responses in any order.
/// Each user turn carries a session identifier (defaulting to
/// `"default"`); control operations like [`Self::interrupt`] and
/// [`Self::set_model`] work mid-conversation.
pub struct Client {
    options: AgentOptions,
    protocol: Option<Arc<ControlProtocol>>,
    messages: Option<Arc<Mutex<mpsc::Receiver<Value>>>>,
    closed: bool,
}

impl Client {
    /// Build an unconnected client.
    pub fn new(options: AgentOptions) -> Self {
        Self {
            options,
            protocol: None,
            messages: None,
            closed: false,
        }
    }

    /// Launch the agent process and run the initialize exchange.
    pub async fn connect(&mut self) -> Result<()> {
        let mut options = self.options.clone();
        configure_permissions(&mut options)?;
        options
            .env
            .entry(ENV_ENTRYPOINT.into())
            .or_insert_with(|| "sdk-rust-client".into());

        let transport: Arc<dyn Transport> =
            Arc::new(SubprocessTransport::connect(options.clone()).await?);
        self.connect_with_transport(transport, &options, resolve_initialize_timeout())
            .await
    }

    /// Attach to an already-connected transport and initialize.
    async fn connect_with_transport(
        &mut self,
        transport: Arc<dyn Transport>,
        options: &AgentOptions,
        initialize_timeout: Duration,
    ) -> Result<()> {
        let protocol = Arc::new(ControlProtocol::new(
            transport,
            protocol_options(options, initialize_timeout),
        ));
        protocol.start()?;
        if let Err(err) = protocol.initialize().await {
            protocol.close().await;
            return Err(err);
        }

        self.messages = protocol.take_messages().map(|rx| Arc::new(Mutex::new(rx)));
        self.protocol = Some(protocol);
        self.closed = false;
        Ok(())
    }

    fn connected(&self) -> Result<&Arc<ControlProtocol>> {
        self.protocol.as_ref().ok_or_else(not_connected)
    }

    /// Send a user turn on the default session.
    pub async fn send(&self, prompt: &str) -> Result<()> {
        self.send_with_session(prompt, DEFAULT_SESSION_ID).await
    }

    /// Send a user turn on an explicit session.
    pub async fn send_with_session(&self, prompt: &str, session_id: &str) -> Result<()> {
        let protocol = self.connected()?;
        let session_id = if session_id.is_empty() {
            DEFAULT_SESSION_ID
        } else {
            session_id
        };
        let message = json!({
            "type": "user",
            "message": {"role": "user", "content": prompt},
            "parent_tool_use_id": null,
            "session_id": session_id,
        });
        protocol.send_message(&message).await
    }

    /// Forward already-shaped user objects from a channel, stamping the
    /// default session id onto messages that lack one. Returns when the
    /// channel closes; does not end input.
    pub async fn send_stream(
        &self,
        mut input: mpsc::Receiver<Value>,
        default_session_id: &str,
    ) -> Result<()> {
        let protocol = self.connected()?;
        let default_session_id = if default_session_id.is_empty() {
            DEFAULT_SESSION_ID
        } else {
            default_session_id
        };
        while let Some(mut message) = input.recv().await {
            let Some(object) = message.as_object_mut() else {
                continue;
            };
            object
                .entry("session_id")
                .or_insert_with(|| Value::String(default_session_id.to_owned()));
            protocol.send_message(&message).await?;
        }
        Ok(())
    }

    /// Receive typed messages until the conversation channel closes.
    ///
    /// The error channel yields at most one terminal error after the
    /// message channel closes.
    pub fn receive_messages(&self) -> (mpsc::Receiver<Message>, mpsc::Receiver<SdkError>) {
        self.spawn_receiver(false)
    }

    /// Receive typed messages until (and including) the next result
    /// message, then stop. Call again for the next turn.
    pub fn receive_response(&self) -> (mpsc::Receiver<Message>, mpsc::Receiver<SdkError>) {
        self.spawn_receiver(true)
    }

    fn spawn_receiver(
        &self,
        stop_after_result: bool,
    ) -> (mpsc::Receiver<Message>, mpsc::Receiver<SdkError>) {
        let (message_tx, message_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(1);
        let source = self.messages.clone();
        let protocol = self.protocol.clone();

        tokio::spawn(async move {
            let (Some(source), Some(protocol)) = (source, protocol) else {
                let _ = error_tx.send(not_connected()).await;
                return;
            };
            let mut raw_messages = source.lock().await;
            while let Some(raw) = raw_messages.recv().await {
                if raw.get("type").and_then(Value::as_str) == Some("error") {
                    let text = raw
                        .get("error")
                        .and_then(Value::as_str)
                        .unwrap_or("unknown stream error");
                    let _ = error_tx.send(SdkError::sdk(text)).await;
                    return;
                }
                match parse_message(&raw) {
                    Err(err) => {
                        let _ = error_tx.send(err).await;
                        return;
                    }
                    Ok(message) => {
                        let is_result = matches!(message, Message::Result(_));
                        if message_tx.send(message).await.is_err() {
                            return;
                        }
                        if stop_after_result && is_result {
                            return;
                        }
                    }
                }
            }
            if let Some(err) = protocol.last_error() {
                let _ = error_tx.send(err).await;
            }
        });

        (message_rx, error_rx)
    }

    /// Interrupt the agent's current turn.
    pub async fn interrupt(&self) -> Result<()> {
        self.connected()?.interrupt().await
    }

    /// Switch the agent's permission mode.
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.connected()?.set_permission_mode(mode).await
    }

    /// Switch models; `None` resets to the agent's default.
    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.connected()?.set_model(model).await
    }

    /// Rewind tracked files to the state at a given user message.
    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        self.connected()?.rewind_files(user_message_id).await
    }

    /// Fetch the agent's MCP server connection status.
    pub async fn mcp_status(&self) -> Result<Value> {
        self.connected()?.mcp_status().await
    }

    /// Disconnect and release the subprocess. Idempotent.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        if let Some(protocol) = self.protocol.take() {
            protocol.close().await;
        }
        self.messages = None;
    }
}

fn not_connected() -> SdkError {
    SdkError::Connection("not connected: call connect() first".into())
}

/// Reject a permission callback combined with an explicit permission
/// prompt tool, and otherwise route permission prompts over stdio.
fn configure_permissions(options: &mut AgentOptions) -> Result<()> {
    if options.can_use_tool.is_some() {
        if options.permission_prompt_tool_name.is_some() {
            return Err(SdkError::sdk(
                "can_use_tool callback cannot be used with permission_prompt_tool_name",
            ));
        }
        options.permission_prompt_tool_name = Some("stdio".into());
    }
    Ok(())
}

fn protocol_options(options: &AgentOptions, initialize_timeout: Duration) -> ProtocolOptions {
    let tool_servers = options
        .mcp_servers
        .iter()
        .filter_map(|(name, config)| match config {
            McpServerConfig::Sdk { instance, .. } => Some((name.clone(), Arc::clone(instance))),
            _ => None,
        })
        .collect();
    ProtocolOptions {
        can_use_tool: options.can_use_tool.clone(),
        hooks: options.hooks.clone(),
        tool_servers,
        agents: options.agents.clone(),
        initialize_timeout: Some(initialize_timeout),
    }
}

/// Initialize timeout for the long-lived client:
/// `CLAUDE_CODE_STREAM_CLOSE_TIMEOUT` milliseconds, floor-clamped at the
/// 60-second minimum.
fn resolve_initialize_timeout() -> Duration {
    env::var(ENV_STREAM_CLOSE_TIMEOUT)
        .ok()
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map_or(MIN_INITIALIZE_TIMEOUT, |ms| {
            Duration::from_secs_f64(ms / 1000.0).max(MIN_INITIALIZE_TIMEOUT)
        })
}
