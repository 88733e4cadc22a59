//! Unit tests for error rendering.

use std::path::PathBuf;

use agent_conduit::SdkError;

/// Process errors carry the exit code and stderr tail in their rendering.
#[test]
fn process_error_renders_exit_code_and_stderr() {
    let err = SdkError::Process {
        message: "agent process failed".into(),
        exit_code: Some(2),
        stderr: Some("fatal: bad flag".into()),
    };
    assert_eq!(
        err.to_string(),
        "agent process failed (exit code: 2)\nerror output: fatal: bad flag"
    );

    let signal = SdkError::Process {
        message: "agent process terminated by signal".into(),
        exit_code: None,
        stderr: None,
    };
    assert_eq!(signal.to_string(), "agent process terminated by signal");
}

/// Not-found errors name the path that was attempted.
#[test]
fn not_found_error_names_path() {
    let err = SdkError::NotFound {
        message: "agent CLI not found".into(),
        path: PathBuf::from("/usr/local/bin/claude"),
    };
    assert_eq!(err.to_string(), "agent CLI not found: /usr/local/bin/claude");
}

/// Generic errors chain their cause into the rendering.
#[test]
fn generic_error_chains_cause() {
    let err = SdkError::with_cause("failed to connect", "broken pipe");
    assert_eq!(err.to_string(), "failed to connect: broken pipe");

    let bare = SdkError::sdk("plain failure");
    assert_eq!(bare.to_string(), "plain failure");
}
