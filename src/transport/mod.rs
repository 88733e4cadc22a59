//! Line transport owning the agent subprocess.
//!
//! The transport launches the agent CLI, frames its stdout into JSON
//! objects, writes caller-supplied NDJSON lines to its stdin, and reports
//! a single terminal error. The control protocol consumes it through the
//! [`Transport`] trait so the protocol can be exercised against an
//! in-memory transport in tests.
//!
//! # Submodules
//!
//! - [`codec`]: [`tokio_util::codec::LinesCodec`]-based NDJSON framing
//!   with a configurable per-line cap (default 1 MiB).
//! - [`reader`]: [`reader::StreamDecoder`], which turns line fragments
//!   into complete JSON objects.
//! - [`cli`]: CLI discovery on disk and argument construction.

pub mod cli;
pub mod codec;
pub mod reader;

use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex as StdMutex, PoisonError};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::errors::{ErrorCell, Result, SdkError};
use crate::options::{AgentOptions, StderrCallback, DEFAULT_MAX_BUFFER_SIZE};
use crate::VERSION;

use reader::StreamDecoder;

/// Environment variable advertising the crate version to the agent.
const ENV_SDK_VERSION: &str = "CLAUDE_AGENT_SDK_VERSION";
/// Environment variable enabling file checkpointing in the agent.
const ENV_FILE_CHECKPOINTING: &str = "CLAUDE_CODE_ENABLE_SDK_FILE_CHECKPOINTING";

/// Capacity of the decoded-message channel.
const MESSAGE_CHANNEL_CAPACITY: usize = 100;
/// Stderr lines retained for process-error diagnostics.
const STDERR_TAIL_LINES: usize = 20;

/// Byte-stream adapter the control protocol drives.
///
/// One `write` call is one atomic NDJSON line; the implementation
/// serializes concurrent writers. The message and error streams are
/// single-consumer and can be taken exactly once.
pub trait Transport: Send + Sync {
    /// Write one raw line (trailing newline included) to the agent.
    fn write(&self, data: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Take the stream of decoded JSON objects. `None` once taken.
    fn take_message_stream(&self) -> Option<mpsc::Receiver<Value>>;

    /// Take the stream carrying at most one terminal error. `None` once
    /// taken.
    fn take_error_stream(&self) -> Option<mpsc::Receiver<SdkError>>;

    /// Synchronous accessor for the stored terminal error.
    fn last_error(&self) -> Option<SdkError>;

    /// Close the agent's stdin. Idempotent.
    fn end_input(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Tear down the transport: stop reading, close stdin, kill and reap
    /// the child. Idempotent.
    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// [`Transport`] over a spawned agent CLI subprocess.
pub struct SubprocessTransport {
    stdin: Mutex<Option<ChildStdin>>,
    ready: AtomicBool,
    child: Arc<StdMutex<Option<Child>>>,
    message_rx: StdMutex<Option<mpsc::Receiver<Value>>>,
    error_rx: StdMutex<Option<mpsc::Receiver<SdkError>>>,
    exit_error: Arc<ErrorCell>,
    cancel: CancellationToken,
}

impl SubprocessTransport {
    /// Launch the agent process and start the reader tasks.
    ///
    /// # Errors
    ///
    /// - [`SdkError::NotFound`] when the CLI binary does not exist.
    /// - [`SdkError::Connection`] when stdio piping or the spawn fails.
    pub async fn connect(options: AgentOptions) -> Result<Self> {
        let cli_path = options.cli_path.clone().unwrap_or_else(cli::find_cli);
        let max_buffer_size = options.max_buffer_size.unwrap_or(DEFAULT_MAX_BUFFER_SIZE);

        let mut command = Command::new(&cli_path);
        command.args(cli::build_command(&options));
        for (key, value) in &options.env {
            command.env(key, value);
        }
        command.env(ENV_SDK_VERSION, VERSION);
        if options.enable_file_checkpointing {
            command.env(ENV_FILE_CHECKPOINTING, "true");
        }
        if let Some(cwd) = &options.cwd {
            command.current_dir(cwd);
            command.env("PWD", cwd);
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                SdkError::NotFound {
                    message: "agent CLI not found".into(),
                    path: cli_path.clone(),
                }
            } else {
                SdkError::Connection(format!("failed to start agent process: {err}"))
            }
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| SdkError::Connection("failed to capture agent stdin".into()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| SdkError::Connection("failed to capture agent stdout".into()))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| SdkError::Connection("failed to capture agent stderr".into()))?;

        let (message_tx, message_rx) = mpsc::channel(MESSAGE_CHANNEL_CAPACITY);
        let (error_tx, error_rx) = mpsc::channel(1);
        let exit_error = Arc::new(ErrorCell::default());
        let cancel = CancellationToken::new();
        let child = Arc::new(StdMutex::new(Some(child)));
        let stderr_tail = Arc::new(StdMutex::new(VecDeque::new()));

        tokio::spawn(drain_stderr(
            stderr,
            options.stderr.clone(),
            Arc::clone(&stderr_tail),
        ));
        tokio::spawn(run_reader(ReaderTask {
            stdout,
            max_buffer_size,
            messages: message_tx,
            errors: error_tx,
            exit_error: Arc::clone(&exit_error),
            child: Arc::clone(&child),
            stderr_tail,
            cancel: cancel.clone(),
        }));

        debug!(cli = %cli_path.display(), "agent process started");

        Ok(Self {
            stdin: Mutex::new(Some(stdin)),
            ready: AtomicBool::new(true),
            child,
            message_rx: StdMutex::new(Some(message_rx)),
            error_rx: StdMutex::new(Some(error_rx)),
            exit_error,
            cancel,
        })
    }
}

impl Transport for SubprocessTransport {
    fn write(&self, data: String) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            if let Some(err) = self.exit_error.get() {
                return Err(SdkError::Connection(format!(
                    "cannot write to agent process that exited with error: {err}"
                )));
            }
            if !self.ready.load(Ordering::SeqCst) {
                return Err(SdkError::Connection("transport is not ready for writing".into()));
            }
            let mut stdin = self.stdin.lock().await;
            let Some(pipe) = stdin.as_mut() else {
                return Err(SdkError::Connection("agent stdin is closed".into()));
            };
            let outcome = async {
                pipe.write_all(data.as_bytes()).await?;
                pipe.flush().await
            }
            .await;
            if let Err(err) = outcome {
                self.ready.store(false, Ordering::SeqCst);
                return Err(SdkError::Connection(format!(
                    "failed to write to agent stdin: {err}"
                )));
            }
            Ok(())
        })
    }

    fn take_message_stream(&self) -> Option<mpsc::Receiver<Value>> {
        self.message_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn take_error_stream(&self) -> Option<mpsc::Receiver<SdkError>> {
        self.error_rx
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    fn last_error(&self) -> Option<SdkError> {
        self.exit_error.get()
    }

    fn end_input(&self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async move {
            let mut stdin = self.stdin.lock().await;
            if let Some(mut pipe) = stdin.take() {
                let _ = pipe.shutdown().await;
                debug!("agent stdin closed");
            }
            Ok(())
        })
    }

    fn close(&self) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(async move {
            self.ready.store(false, Ordering::SeqCst);
            {
                let mut stdin = self.stdin.lock().await;
                stdin.take();
            }
            self.cancel.cancel();
            let child = self
                .child
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            if let Some(mut child) = child {
                let _ = child.start_kill();
                let _ = child.wait().await;
            }
            debug!("transport closed");
        })
    }
}

/// State handed to the stdout reader task.
struct ReaderTask {
    stdout: ChildStdout,
    max_buffer_size: usize,
    messages: mpsc::Sender<Value>,
    errors: mpsc::Sender<SdkError>,
    exit_error: Arc<ErrorCell>,
    child: Arc<StdMutex<Option<Child>>>,
    stderr_tail: Arc<StdMutex<VecDeque<String>>>,
    cancel: CancellationToken,
}

/// Decode stdout until EOF, error, or cancellation.
///
/// On EOF the child is reaped so a non-zero exit becomes a process error
/// carrying the exit code and the stderr tail. On a decode or read error
/// the error is stored and signalled, and the task exits; both channels
/// close when the task's senders drop.
async fn run_reader(task: ReaderTask) {
    let mut decoder = StreamDecoder::new(task.stdout, task.max_buffer_size);

    loop {
        tokio::select! {
            biased;

            () = task.cancel.cancelled() => {
                debug!("transport reader: cancellation received, stopping");
                return;
            }

            next = decoder.next_object() => match next {
                Ok(Some(value)) => {
                    if task.messages.send(value).await.is_err() {
                        debug!("transport reader: message channel closed, stopping");
                        return;
                    }
                }
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "transport reader: stream error");
                    task.exit_error.set(err.clone());
                    let _ = task.errors.send(err).await;
                    return;
                }
            }
        }
    }

    // EOF. Reap the child to harvest its exit status.
    let child = task
        .child
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .take();
    if let Some(mut child) = child {
        match child.wait().await {
            Ok(status) if !status.success() => {
                let stderr = {
                    let tail = task
                        .stderr_tail
                        .lock()
                        .unwrap_or_else(PoisonError::into_inner);
                    if tail.is_empty() {
                        None
                    } else {
                        Some(tail.iter().cloned().collect::<Vec<_>>().join("\n"))
                    }
                };
                let exit_code = status.code();
                let message = if exit_code.is_some() {
                    "agent process failed".to_owned()
                } else {
                    "agent process terminated by signal".to_owned()
                };
                task.exit_error.set(SdkError::Process {
                    message,
                    exit_code,
                    stderr,
                });
            }
            Err(err) => {
                task.exit_error.set(SdkError::Process {
                    message: format!("error waiting for agent process: {err}"),
                    exit_code: None,
                    stderr: None,
                });
            }
            Ok(_) => {}
        }
    }

    if let Some(err) = task.exit_error.get() {
        let _ = task.errors.send(err).await;
    }
}

/// Drain the child's stderr: forward each line to the caller's callback
/// and retain a short tail for process-error diagnostics.
async fn drain_stderr(
    stderr: ChildStderr,
    callback: Option<StderrCallback>,
    tail: Arc<StdMutex<VecDeque<String>>>,
) {
    let mut lines = BufReader::new(stderr).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        if line.is_empty() {
            continue;
        }
        if let Some(callback) = &callback {
            callback(&line);
        }
        let mut tail = tail.lock().unwrap_or_else(PoisonError::into_inner);
        if tail.len() == STDERR_TAIL_LINES {
            tail.pop_front();
        }
        tail.push_back(line);
    }
}
