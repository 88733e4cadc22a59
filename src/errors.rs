//! Error types shared across the crate.

use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::sync::Mutex;

use serde_json::Value;

/// Shared crate result type.
pub type Result<T> = std::result::Result<T, SdkError>;

/// Error enumeration covering every failure mode the crate surfaces.
///
/// The first four kinds are terminal for a running session: once one is
/// observed the transport and the control protocol shut down and every
/// waiter receives a clone of the same error. The remaining kinds are
/// per-operation and leave the session running.
#[derive(Debug, Clone)]
pub enum SdkError {
    /// Unable to start or attach to the agent process.
    Connection(String),
    /// The agent CLI binary was not found on disk.
    NotFound {
        /// Human-readable description of the failure.
        message: String,
        /// The path that was searched or attempted.
        path: PathBuf,
    },
    /// The agent process exited abnormally or its stdio failed mid-session.
    Process {
        /// Human-readable description of the failure.
        message: String,
        /// Exit code of the child, when the OS reported one.
        exit_code: Option<i32>,
        /// Trailing stderr output captured from the child, when available.
        stderr: Option<String>,
    },
    /// Stdout could not be decoded as NDJSON, or the accumulation buffer
    /// overflowed its configured ceiling.
    Decode {
        /// Human-readable description of the failure.
        message: String,
        /// The offending line or accumulated buffer prefix.
        line: String,
    },
    /// A conversation envelope was valid JSON but failed typed parsing.
    Parse {
        /// Human-readable description of the failure.
        message: String,
        /// The raw message that failed to parse.
        data: Value,
    },
    /// Control-protocol violation: unsupported inbound subtype, malformed
    /// envelope, or a stream that was already consumed.
    Protocol(String),
    /// A host callback failed. Relayed to the agent as a control-response
    /// error; never surfaced to the host's message stream.
    Callback(String),
    /// A control request exceeded its deadline. Carries the request subtype.
    Timeout {
        /// Subtype of the control request that timed out.
        subtype: String,
    },
    /// The surrounding operation or session was cancelled.
    Cancelled(String),
    /// Catch-all with a message and an optional cause.
    Sdk {
        /// Human-readable description of the failure.
        message: String,
        /// Rendered underlying cause, when one exists.
        cause: Option<String>,
    },
}

impl SdkError {
    /// Build a generic error from a message alone.
    pub fn sdk(message: impl Into<String>) -> Self {
        Self::Sdk {
            message: message.into(),
            cause: None,
        }
    }

    /// Build a generic error with a rendered cause.
    pub fn with_cause(message: impl Into<String>, cause: impl Display) -> Self {
        Self::Sdk {
            message: message.into(),
            cause: Some(cause.to_string()),
        }
    }
}

impl Display for SdkError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Connection(msg)
            | Self::Protocol(msg)
            | Self::Callback(msg)
            | Self::Cancelled(msg) => write!(f, "{msg}"),
            Self::NotFound { message, path } => write!(f, "{message}: {}", path.display()),
            Self::Process {
                message,
                exit_code,
                stderr,
            } => {
                write!(f, "{message}")?;
                if let Some(code) = exit_code {
                    write!(f, " (exit code: {code})")?;
                }
                if let Some(stderr) = stderr {
                    write!(f, "\nerror output: {stderr}")?;
                }
                Ok(())
            }
            Self::Decode { message, .. } | Self::Parse { message, .. } => write!(f, "{message}"),
            Self::Timeout { subtype } => write!(f, "control request timeout: {subtype}"),
            Self::Sdk {
                message,
                cause: Some(cause),
            } => write!(f, "{message}: {cause}"),
            Self::Sdk { message, .. } => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for SdkError {}

impl From<std::io::Error> for SdkError {
    fn from(err: std::io::Error) -> Self {
        Self::Process {
            message: format!("failed reading JSON stream from agent: {err}"),
            exit_code: None,
            stderr: None,
        }
    }
}

/// Write-once error cell.
///
/// Stores the first error it is given and ignores every later write. Used
/// for the transport's exit error and the control protocol's terminal
/// error, both of which must remain observable from multiple tasks after
/// the originating task has exited.
#[derive(Debug, Default)]
pub(crate) struct ErrorCell(Mutex<Option<SdkError>>);

impl ErrorCell {
    /// Store `err` unless an error is already present.
    pub(crate) fn set(&self, err: SdkError) {
        let mut slot = self
            .0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if slot.is_none() {
            *slot = Some(err);
        }
    }

    /// Return a clone of the stored error, if any.
    pub(crate) fn get(&self) -> Option<SdkError> {
        self.0
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone()
    }
}
