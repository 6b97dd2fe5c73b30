//! Child process ownership.
//!
//! A [`ProcessHandle`] owns the child (when there is one), its stdout stream
//! until the event pump takes it, and the [`FrameWriter`] over its stdin.
//! [`ProcessHandle::from_pipes`] builds a handle over in-memory pipes with
//! no child attached.

pub mod spawner;
pub mod writer;

use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use serde::Serialize;
use tokio::io::AsyncRead;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub use spawner::{spawn_process, ALLOWED_ENV_VARS};
pub use writer::{BoxedWriter, FrameWriter};

use crate::{AppError, Result};

/// Boxed child-output stream.
pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Owned child process plus its stdio.
pub struct ProcessHandle {
    writer: FrameWriter,
    stdout: Mutex<Option<BoxedReader>>,
    child: tokio::sync::Mutex<Option<Child>>,
    stderr_task: Mutex<Option<JoinHandle<()>>>,
    pid: Option<u32>,
    terminated: AtomicBool,
}

impl ProcessHandle {
    pub(crate) fn from_child(
        child: Child,
        stdout: BoxedReader,
        stdin: BoxedWriter,
        stderr_task: JoinHandle<()>,
    ) -> Self {
        let pid = child.id();
        Self {
            writer: FrameWriter::new(stdin),
            stdout: Mutex::new(Some(stdout)),
            child: tokio::sync::Mutex::new(Some(child)),
            stderr_task: Mutex::new(Some(stderr_task)),
            pid,
            terminated: AtomicBool::new(false),
        }
    }

    /// Build a handle over caller-supplied pipes with no child process.
    #[must_use]
    pub fn from_pipes(stdout: BoxedReader, stdin: BoxedWriter) -> Self {
        Self {
            writer: FrameWriter::new(stdin),
            stdout: Mutex::new(Some(stdout)),
            child: tokio::sync::Mutex::new(None),
            stderr_task: Mutex::new(None),
            pid: None,
            terminated: AtomicBool::new(false),
        }
    }

    /// OS process id, `None` for pipe-backed handles.
    #[must_use]
    pub fn id(&self) -> Option<u32> {
        self.pid
    }

    /// Take the child's output stream. Returns `None` after the first call.
    pub fn take_stdout(&self) -> Option<BoxedReader> {
        self.stdout.lock().ok().and_then(|mut slot| slot.take())
    }

    /// Write one outbound frame through the shared writer.
    ///
    /// # Errors
    ///
    /// See [`FrameWriter::write_frame`].
    pub async fn write_frame<T>(&self, frame: &T, cancel: &CancellationToken) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        self.writer.write_frame(frame, cancel).await
    }

    /// Close the child's input. Idempotent.
    pub async fn close_input(&self) {
        self.writer.close().await;
    }

    /// Stop the child and release its resources. Idempotent.
    ///
    /// Closes the input first, then kills the child and reaps it. Returns
    /// the exit status when a child was reaped by this call.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the kill or wait fails.
    pub async fn terminate(&self) -> Result<Option<ExitStatus>> {
        if self.terminated.swap(true, Ordering::SeqCst) {
            return Ok(None);
        }

        self.close_input().await;

        let status = {
            let mut guard = self.child.lock().await;
            match guard.take() {
                Some(mut child) => {
                    if let Ok(Some(status)) = child.try_wait() {
                        debug!(pid = self.pid, %status, "child already exited");
                        Some(status)
                    } else {
                        if let Err(e) = child.start_kill() {
                            warn!(pid = self.pid, error = %e, "failed to signal child");
                        }
                        let status = child
                            .wait()
                            .await
                            .map_err(|e| AppError::Io(format!("failed to reap child: {e}")))?;
                        info!(pid = self.pid, %status, "child process terminated");
                        Some(status)
                    }
                }
                None => None,
            }
        };

        if let Some(task) = self.stderr_task.lock().ok().and_then(|mut slot| slot.take()) {
            task.abort();
        }

        Ok(status)
    }

    /// `true` once [`ProcessHandle::terminate`] has been called.
    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("pid", &self.pid)
            .field("terminated", &self.is_terminated())
            .finish_non_exhaustive()
    }
}
