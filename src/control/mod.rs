//! Bidirectional control protocol layered over the line transport.
//!
//! One full-duplex NDJSON stream carries four logical channels: outbound
//! user input, outbound control replies, inbound conversation messages,
//! and inbound control requests. [`ControlProtocol`] demultiplexes them:
//! control responses complete pending host requests by identifier, control
//! requests dispatch to host callbacks on their own tasks, and everything
//! else flows to the conversation channel in arrival order.
//!
//! A single write-once terminal error governs shutdown: the first fatal
//! event fails every pending request, emits one synthetic
//! `{type: "error"}` envelope, and closes the conversation channel.

mod dispatch;

use std::collections::HashMap;
use std::env;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex, OnceLock, PoisonError};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{ErrorCell, Result, SdkError};
use crate::hooks::{HookCallback, HookEvent, HookMatcher};
use crate::mcp::ToolServer;
use crate::options::AgentDefinition;
use crate::permission::{CanUseTool, PermissionMode};
use crate::transport::Transport;

/// Environment variable carrying the stream-close timeout in milliseconds.
const ENV_STREAM_CLOSE_TIMEOUT: &str = "CLAUDE_CODE_STREAM_CLOSE_TIMEOUT";

/// Default timeout for control requests, including built-ins.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Capacity of the conversation-message channel.
const MESSAGE_CHANNEL_CAPACITY: usize = 100;

/// Host-side configuration for the control protocol.
#[derive(Default)]
pub struct ProtocolOptions {
    /// Tool-permission callback answering `can_use_tool` requests.
    pub can_use_tool: Option<CanUseTool>,
    /// Hook matchers by lifecycle event, registered at initialize time.
    pub hooks: HashMap<HookEvent, Vec<HookMatcher>>,
    /// In-process tool servers answering `mcp_message` requests.
    pub tool_servers: HashMap<String, Arc<ToolServer>>,
    /// Subagent definitions shipped with the initialize request.
    pub agents: HashMap<String, AgentDefinition>,
    /// Timeout for the initialize exchange. Defaults to 60 seconds.
    pub initialize_timeout: Option<Duration>,
}

/// The full-duplex control-protocol handler.
pub struct ControlProtocol {
    shared: Arc<Shared>,
    started: AtomicBool,
    reader: StdMutex<Option<JoinHandle<()>>>,
}

/// State shared between the handler, its reader task, and dispatcher tasks.
pub(crate) struct Shared {
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) can_use_tool: Option<CanUseTool>,
    pub(crate) hooks: HashMap<HookEvent, Vec<HookMatcher>>,
    pub(crate) tool_servers: HashMap<String, Arc<ToolServer>>,
    agents: HashMap<String, AgentDefinition>,

    /// Outbound requests awaiting their control response, by request id.
    pending: StdMutex<HashMap<String, oneshot::Sender<Result<Value>>>>,
    /// Hook callbacks by synthetic id. Populated once during initialize.
    pub(crate) hook_callbacks: OnceLock<HashMap<String, HookCallback>>,
    request_counter: AtomicU64,

    /// Sender half of the conversation channel; taken by the reader task
    /// at start so the channel closes exactly when the reader exits.
    messages_tx: StdMutex<Option<mpsc::Sender<Value>>>,
    messages_rx: StdMutex<Option<mpsc::Receiver<Value>>>,

    /// Fires once, on the first `result` conversation message.
    first_result: CancellationToken,
    terminal: ErrorCell,
    closed: AtomicBool,
    cancel: CancellationToken,

    stream_close_timeout: Duration,
    initialize_timeout: Duration,
}

impl ControlProtocol {
    /// Build a handler over a connected transport. The stream-close
    /// timeout is read from the environment once, here.
    pub fn new(transport: Arc<dyn Transport>, options: ProtocolOptions) -> Self {
        let (messages_tx, messages_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        Self {
            shared: Arc::new(Shared {
                transport,
                can_use_tool: options.can_use_tool,
                hooks: options.hooks,
                tool_servers: options.tool_servers,
                agents: options.agents,
                pending: StdMutex::new(HashMap::new()),
                hook_callbacks: OnceLock::new(),
                request_counter: AtomicU64::new(0),
                messages_tx: StdMutex::new(Some(messages_tx)),
                messages_rx: StdMutex::new(Some(messages_rx)),
                first_result: CancellationToken::new(),
                terminal: ErrorCell::default(),
                closed: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                stream_close_timeout: stream_close_timeout_from_env(),
                initialize_timeout: options
                    .initialize_timeout
                    .unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            }),
            started: AtomicBool::new(false),
            reader: StdMutex::new(None),
        }
    }

    /// Launch the reader task. Idempotent; returns synchronously.
    pub fn start(&self) -> Result<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let Some(messages) = self.shared.transport.take_message_stream() else {
            return Err(SdkError::Protocol(
                "transport message stream already consumed".into(),
            ));
        };
        let Some(errors) = self.shared.transport.take_error_stream() else {
            return Err(SdkError::Protocol(
                "transport error stream already consumed".into(),
            ));
        };
        let Some(out) = self
            .shared
            .messages_tx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        else {
            return Err(SdkError::Protocol("conversation channel already started".into()));
        };
        let handle = tokio::spawn(read_loop(Arc::clone(&self.shared), messages, errors, out));
        *self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(handle);
        Ok(())
    }

    /// Send the `initialize` control request: hook matchers with freshly
    /// assigned callback ids, plus subagent definitions when present.
    /// Returns the agent's response object.
    pub async fn initialize(&self) -> Result<Value> {
        let shared = &self.shared;

        let mut callbacks: HashMap<String, HookCallback> = HashMap::new();
        let mut next_callback_id = 0_usize;
        let mut hooks_config = Map::new();
        for (event, matchers) in &shared.hooks {
            if matchers.is_empty() {
                continue;
            }
            let mut matcher_configs = Vec::new();
            for matcher in matchers {
                let ids: Vec<Value> = matcher
                    .hooks
                    .iter()
                    .map(|callback| {
                        let id = format!("hook_{next_callback_id}");
                        next_callback_id += 1;
                        callbacks.insert(id.clone(), Arc::clone(callback));
                        Value::String(id)
                    })
                    .collect();
                let mut config = Map::new();
                config.insert("matcher".into(), Value::String(matcher.matcher.clone()));
                config.insert("hookCallbackIds".into(), Value::Array(ids));
                if let Some(timeout) = matcher.timeout {
                    config.insert("timeout".into(), json!(timeout));
                }
                matcher_configs.push(Value::Object(config));
            }
            hooks_config.insert(event.as_str().to_owned(), Value::Array(matcher_configs));
        }
        // Write-once: dispatchers read the registry lock-free after this.
        let _ = shared.hook_callbacks.set(callbacks);

        let mut request = Map::new();
        request.insert("subtype".into(), Value::String("initialize".into()));
        request.insert("hooks".into(), Value::Object(hooks_config));
        if !shared.agents.is_empty() {
            if let Ok(agents) = serde_json::to_value(&shared.agents) {
                request.insert("agents".into(), agents);
            }
        }

        self.send_control_request(Value::Object(request), shared.initialize_timeout)
            .await
    }

    /// Send one control request and wait for its correlated response.
    ///
    /// Completion, the timeout timer, and handler cancellation race; the
    /// first to fire wins, in that order. On every exit path the pending
    /// record is unregistered, so a late response drops silently.
    pub async fn send_control_request(&self, request: Value, timeout: Duration) -> Result<Value> {
        let shared = &self.shared;
        if let Some(err) = shared.terminal.get() {
            return Err(err);
        }

        let subtype = request
            .get("subtype")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_owned();
        let counter = shared.request_counter.fetch_add(1, Ordering::SeqCst) + 1;
        let request_id = format!("req_{counter}_{:08x}", rand::random::<u32>());

        let (sender, receiver) = oneshot::channel();
        shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id.clone(), sender);
        let _guard = PendingGuard {
            shared: Arc::clone(shared),
            request_id: request_id.clone(),
        };

        let envelope = json!({
            "type": "control_request",
            "request_id": request_id,
            "request": request,
        });
        shared.write_line(&envelope).await?;

        tokio::select! {
            biased;

            outcome = receiver => match outcome {
                Ok(Ok(response)) => Ok(response
                    .get("response")
                    .cloned()
                    .filter(Value::is_object)
                    .unwrap_or_else(|| json!({}))),
                Ok(Err(err)) => Err(err),
                Err(_) => Err(shared.terminal.get().unwrap_or_else(|| {
                    SdkError::Protocol("control request completion dropped".into())
                })),
            },

            () = tokio::time::sleep(timeout) => Err(SdkError::Timeout { subtype }),

            () = shared.cancel.cancelled() => {
                Err(SdkError::Cancelled("control protocol closed".into()))
            }
        }
    }

    /// Interrupt the agent's current turn.
    pub async fn interrupt(&self) -> Result<()> {
        self.send_control_request(json!({"subtype": "interrupt"}), DEFAULT_REQUEST_TIMEOUT)
            .await
            .map(|_| ())
    }

    /// Switch the agent's permission mode.
    pub async fn set_permission_mode(&self, mode: PermissionMode) -> Result<()> {
        self.send_control_request(
            json!({"subtype": "set_permission_mode", "mode": mode.as_str()}),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    /// Switch models mid-conversation. `None` asks the agent to reset to
    /// its default; the value is sent verbatim either way.
    pub async fn set_model(&self, model: Option<&str>) -> Result<()> {
        self.send_control_request(
            json!({"subtype": "set_model", "model": model}),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    /// Rewind tracked files to the state at a given user message.
    pub async fn rewind_files(&self, user_message_id: &str) -> Result<()> {
        self.send_control_request(
            json!({"subtype": "rewind_files", "user_message_id": user_message_id}),
            DEFAULT_REQUEST_TIMEOUT,
        )
        .await
        .map(|_| ())
    }

    /// Fetch the agent's MCP server connection status.
    pub async fn mcp_status(&self) -> Result<Value> {
        self.send_control_request(json!({"subtype": "mcp_status"}), DEFAULT_REQUEST_TIMEOUT)
            .await
    }

    /// Write one conversation message as an NDJSON line.
    pub async fn send_message(&self, message: &Value) -> Result<()> {
        if let Some(err) = self.shared.terminal.get() {
            return Err(err);
        }
        self.shared.write_line(message).await
    }

    /// Forward caller-supplied messages to the transport until the input
    /// channel closes, then coordinate end-of-input: with tool servers or
    /// hooks registered, stdin stays open until the first result arrives,
    /// the stream-close timeout elapses, or the handler shuts down.
    pub fn stream_input(&self, mut input: mpsc::Receiver<Value>) -> JoinHandle<()> {
        let shared = Arc::clone(&self.shared);
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;

                    () = shared.cancel.cancelled() => return,

                    message = input.recv() => match message {
                        None => {
                            shared.coordinate_end_of_input().await;
                            return;
                        }
                        Some(message) => {
                            if shared.closed.load(Ordering::SeqCst) {
                                return;
                            }
                            if let Err(err) = shared.write_line(&message).await {
                                warn!(error = %err, "input stream: write failed, stopping");
                                return;
                            }
                        }
                    }
                }
            }
        })
    }

    /// Take the conversation-message channel. `None` once taken.
    pub fn take_messages(&self) -> Option<mpsc::Receiver<Value>> {
        self.shared
            .messages_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// The stored terminal error, if any.
    pub fn last_error(&self) -> Option<SdkError> {
        self.shared.terminal.get()
    }

    /// Shut the handler down: fail pending requests, cancel and join the
    /// reader, close the transport. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let err = SdkError::Cancelled("control protocol closed".into());
        self.shared.terminal.set(err.clone());
        self.shared.fail_pending(&err);
        self.shared.cancel.cancel();
        let handle = self
            .reader
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.shared.transport.close().await;
    }
}

impl Shared {
    /// Serialize `value` and write it as one NDJSON line.
    pub(crate) async fn write_line(&self, value: &Value) -> Result<()> {
        self.transport.write(format!("{value}\n")).await
    }

    /// Complete the pending request named by a control response. Unknown
    /// or already-completed request ids drop silently.
    fn complete_pending(&self, message: &Value) {
        let Some(response) = message.get("response").and_then(Value::as_object) else {
            return;
        };
        let Some(request_id) = response.get("request_id").and_then(Value::as_str) else {
            return;
        };
        let Some(sender) = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(request_id)
        else {
            debug!(request_id, "control response for unknown request, dropping");
            return;
        };

        let outcome = if response.get("subtype").and_then(Value::as_str) == Some("error") {
            let text = response
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown control error");
            Err(SdkError::sdk(text))
        } else {
            Ok(Value::Object(response.clone()))
        };
        let _ = sender.send(outcome);
    }

    /// Record the terminal error, fail every pending request with it, and
    /// emit one synthetic error envelope on the conversation channel.
    ///
    /// The envelope send gives way to shutdown: a full channel with no
    /// consumer must not wedge `close`.
    async fn enter_terminal(&self, err: SdkError, out: &mpsc::Sender<Value>) {
        warn!(error = %err, "control protocol entering terminal state");
        self.terminal.set(err.clone());
        self.fail_pending(&err);
        let envelope = json!({"type": "error", "error": err.to_string()});
        tokio::select! {
            biased;
            _ = out.send(envelope) => {}
            () = self.cancel.cancelled() => {}
        }
    }

    fn fail_pending(&self, err: &SdkError) {
        let drained: Vec<_> = self
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .collect();
        for (_, sender) in drained {
            let _ = sender.send(Err(err.clone()));
        }
    }

    /// End-of-input coordination for callback-bearing sessions: closing
    /// stdin too early races with the agent's final callbacks.
    async fn coordinate_end_of_input(&self) {
        let has_hooks = !self.hooks.is_empty();
        if !self.tool_servers.is_empty() || has_hooks {
            debug!(
                tool_servers = self.tool_servers.len(),
                has_hooks, "input ended; waiting for first result before closing stdin"
            );
            tokio::select! {
                biased;
                () = self.first_result.cancelled() => {}
                () = tokio::time::sleep(self.stream_close_timeout) => {
                    debug!("stream-close timeout elapsed before first result");
                }
                () = self.cancel.cancelled() => {}
            }
        }
        let _ = self.transport.end_input().await;
    }
}

/// Classify one inbound object. Returns `false` when the reader loop
/// should stop (conversation channel gone or handler cancelled).
async fn route_inbound(shared: &Arc<Shared>, message: Value, out: &mpsc::Sender<Value>) -> bool {
    let message_type = message
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default();

    match message_type {
        "control_response" => {
            shared.complete_pending(&message);
            true
        }
        "control_request" => {
            tokio::spawn(dispatch::handle_control_request(
                Arc::clone(shared),
                message,
            ));
            true
        }
        "control_cancel_request" => {
            // Reserved envelope; recognized and dropped.
            debug!("control_cancel_request received, dropping");
            true
        }
        _ => {
            if message_type == "result" {
                shared.first_result.cancel();
            }
            tokio::select! {
                biased;
                sent = out.send(message) => sent.is_ok(),
                () = shared.cancel.cancelled() => false,
            }
        }
    }
}

/// Unregisters a pending record when its waiter exits by any path,
/// including the waiting future being dropped.
struct PendingGuard {
    shared: Arc<Shared>,
    request_id: String,
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        self.shared
            .pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.request_id);
    }
}

/// Reader loop: drains the transport's error and message streams until a
/// terminal event or shutdown. Owns the conversation channel's sender, so
/// the channel closes exactly when this task returns.
async fn read_loop(
    shared: Arc<Shared>,
    mut messages: mpsc::Receiver<Value>,
    mut errors: mpsc::Receiver<SdkError>,
    out: mpsc::Sender<Value>,
) {
    let cancel = shared.cancel.clone();
    let mut errors_open = true;

    loop {
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                if !shared.closed.load(Ordering::SeqCst) {
                    shared
                        .enter_terminal(
                            SdkError::Cancelled("control protocol context cancelled".into()),
                            &out,
                        )
                        .await;
                }
                return;
            }

            err = errors.recv(), if errors_open => match err {
                None => errors_open = false,
                Some(err) => {
                    shared.enter_terminal(err, &out).await;
                    return;
                }
            },

            message = messages.recv() => match message {
                None => {
                    if let Some(err) = shared.transport.last_error() {
                        shared.enter_terminal(err, &out).await;
                    }
                    return;
                }
                Some(message) => {
                    if shared.closed.load(Ordering::SeqCst) {
                        return;
                    }
                    if !route_inbound(&shared, message, &out).await {
                        return;
                    }
                }
            },
        }
    }
}

/// Stream-close timeout: `CLAUDE_CODE_STREAM_CLOSE_TIMEOUT` milliseconds,
/// defaulting to 60 seconds when absent or malformed.
fn stream_close_timeout_from_env() -> Duration {
    env::var(ENV_STREAM_CLOSE_TIMEOUT)
        .ok()
        .and_then(|raw| raw.parse::<f64>().ok())
        .filter(|ms| ms.is_finite() && *ms >= 0.0)
        .map_or(DEFAULT_REQUEST_TIMEOUT, |ms| {
            Duration::from_secs_f64(ms / 1000.0)
        })
}
