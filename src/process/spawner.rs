//! Child process launch.
//!
//! Spawns the child with:
//! - `kill_on_drop(true)` so an abandoned handle never leaks a process.
//! - `env_clear()` plus the environment resolved by the
//!   [`ConfigProvider`]: [`ALLOWED_ENV_VARS`], configured passthrough
//!   variables, and explicit entries.
//! - piped stdio; stderr is drained in the background and logged at `DEBUG`
//!   so the child never blocks on a full stderr pipe.

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{ChildStderr, Command};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::ProcessHandle;
use crate::config::ConfigProvider;
use crate::{AppError, Result};

/// Environment variables inherited by the child when present.
///
/// Everything else in the bridge's environment is stripped before launch.
pub const ALLOWED_ENV_VARS: &[&str] = &[
    "PATH",
    "HOME",
    "RUST_LOG",
    "LANG",
    "TERM",
    // Windows-specific variables.
    "USERPROFILE",
    "SystemRoot",
    "TEMP",
    "TMP",
    "USERNAME",
    "APPDATA",
    "LOCALAPPDATA",
    "COMSPEC",
];

/// Launch the child described by `provider`.
///
/// Must be called from within a tokio runtime.
///
/// # Errors
///
/// - `AppError::Start("failed to spawn …")`: OS spawn failure.
/// - `AppError::Start("failed to capture …")`: a stdio pipe was missing.
pub fn spawn_process(provider: &dyn ConfigProvider) -> Result<ProcessHandle> {
    let mut cmd = Command::new(provider.command());
    cmd.args(provider.args());

    cmd.env_clear();
    for (key, val) in provider.env() {
        cmd.env(key, val);
    }

    if let Some(dir) = provider.working_dir() {
        cmd.current_dir(dir);
    }

    cmd.stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|err| {
        AppError::Start(format!("failed to spawn '{}': {err}", provider.command()))
    })?;

    let stdin = child
        .stdin
        .take()
        .ok_or_else(|| AppError::Start("failed to capture child stdin".into()))?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| AppError::Start("failed to capture child stdout".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| AppError::Start("failed to capture child stderr".into()))?;

    let pid = child.id();
    info!(command = provider.command(), pid, "child process started");

    let stderr_task = drain_stderr(pid, stderr);

    Ok(ProcessHandle::from_child(
        child,
        Box::new(stdout),
        Box::new(stdin),
        stderr_task,
    ))
}

/// Log each stderr line at `DEBUG` until the pipe closes.
fn drain_stderr(pid: Option<u32>, stderr: ChildStderr) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut lines = BufReader::new(stderr).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => debug!(pid, line = %line, "child stderr"),
                Ok(None) => break,
                Err(e) => {
                    debug!(pid, error = %e, "child stderr read failed");
                    break;
                }
            }
        }
    })
}
