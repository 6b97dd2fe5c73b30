//! Serialised frame writes to the child's input.
//!
//! Every outbound frame (prompts and control responses alike) goes through
//! one [`FrameWriter`], whose async mutex makes it the single logical writer
//! of the child's stdin. Each frame is serialised to compact JSON, terminated
//! with `\n`, written and flushed while the lock is held.

use serde::Serialize;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{AppError, Result};

/// Boxed child-input sink.
pub type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Exclusive NDJSON writer over the child's input.
pub struct FrameWriter {
    sink: Mutex<Option<BoxedWriter>>,
}

impl FrameWriter {
    /// Wrap `sink`.
    #[must_use]
    pub fn new(sink: BoxedWriter) -> Self {
        Self {
            sink: Mutex::new(Some(sink)),
        }
    }

    /// Serialise `frame` as one NDJSON line and write it.
    ///
    /// Waiting for the lock and the write itself both race `cancel`.
    ///
    /// # Errors
    ///
    /// - [`AppError::Io`] when serialisation or the write fails.
    /// - [`AppError::Closed`] when the input has been closed.
    /// - [`AppError::Cancelled`] when `cancel` fires first.
    pub async fn write_frame<T>(&self, frame: &T, cancel: &CancellationToken) -> Result<()>
    where
        T: Serialize + ?Sized,
    {
        let mut bytes = serde_json::to_vec(frame)
            .map_err(|e| AppError::Io(format!("failed to serialise outbound frame: {e}")))?;
        // NDJSON: append the newline delimiter.
        bytes.push(b'\n');

        let mut guard = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                return Err(AppError::Cancelled("frame write cancelled".into()));
            }
            guard = self.sink.lock() => guard,
        };

        let Some(sink) = guard.as_mut() else {
            return Err(AppError::Closed("child input is closed".into()));
        };

        let write = async {
            sink.write_all(&bytes).await?;
            sink.flush().await
        };

        tokio::select! {
            biased;
            () = cancel.cancelled() => Err(AppError::Cancelled("frame write cancelled".into())),
            result = write => result.map_err(|e| {
                warn!(error = %e, "frame writer: write to child input failed");
                AppError::Io(format!("write failed: {e}"))
            }),
        }
    }

    /// Shut down and drop the sink. Idempotent.
    pub async fn close(&self) {
        if let Some(mut sink) = self.sink.lock().await.take() {
            if let Err(e) = sink.shutdown().await {
                debug!(error = %e, "frame writer: shutdown of child input failed");
            }
        }
    }

    /// `true` once [`FrameWriter::close`] has run.
    pub async fn is_closed(&self) -> bool {
        self.sink.lock().await.is_none()
    }
}

impl std::fmt::Debug for FrameWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameWriter").finish_non_exhaustive()
    }
}
