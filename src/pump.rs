//! Background event pump.
//!
//! Owns the [`FrameDecoder`] over the child's output and forwards each
//! decoded [`Event`] into a bounded queue. The queue is closed exactly once,
//! when the pump task returns (its sender is dropped). Reasons to return:
//!
//! - end of input
//! - a decode or read error, which is retained for [`EventPump::error`]
//! - [`EventPump::stop`] or the parent cancellation token
//! - the consumer dropping the receiver

use std::sync::{Arc, Mutex};

use tokio::io::AsyncRead;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::decoder::FrameDecoder;
use crate::protocol::event::Event;
use crate::AppError;

/// Handle to a running pump task.
pub struct EventPump {
    stop: CancellationToken,
    error: Arc<Mutex<Option<AppError>>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl EventPump {
    /// Spawn the pump over `decoder`.
    ///
    /// `capacity` bounds the queue; the pump blocks while it is full, which
    /// back-pressures the child's output pipe. `parent` stops the pump when
    /// cancelled.
    pub fn spawn<R>(
        decoder: FrameDecoder<R>,
        capacity: usize,
        parent: &CancellationToken,
    ) -> (Self, mpsc::Receiver<Event>)
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let stop = parent.child_token();
        let error = Arc::new(Mutex::new(None));

        let task = tokio::spawn(run_pump(decoder, tx, stop.clone(), Arc::clone(&error)));

        (
            Self {
                stop,
                error,
                task: Mutex::new(Some(task)),
            },
            rx,
        )
    }

    /// Ask the pump to stop. Idempotent.
    pub fn stop(&self) {
        self.stop.cancel();
    }

    /// Error that ended the pump, if any.
    #[must_use]
    pub fn error(&self) -> Option<AppError> {
        self.error.lock().ok().and_then(|slot| slot.clone())
    }

    /// `true` once the pump task has returned.
    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.task
            .lock()
            .ok()
            .and_then(|slot| slot.as_ref().map(JoinHandle::is_finished))
            .unwrap_or(true)
    }

    /// Wait for the pump task to return. Idempotent.
    pub async fn join(&self) {
        let task = self.task.lock().ok().and_then(|mut slot| slot.take());
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(error = %e, "event pump task failed");
            }
        }
    }
}

impl std::fmt::Debug for EventPump {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventPump")
            .field("stopped", &self.stop.is_cancelled())
            .field("finished", &self.is_finished())
            .finish_non_exhaustive()
    }
}

async fn run_pump<R>(
    mut decoder: FrameDecoder<R>,
    tx: mpsc::Sender<Event>,
    stop: CancellationToken,
    error: Arc<Mutex<Option<AppError>>>,
) where
    R: AsyncRead + Unpin,
{
    loop {
        let next = tokio::select! {
            biased;

            () = stop.cancelled() => {
                debug!("event pump: stop requested");
                break;
            }

            next = decoder.next() => next,
        };

        match next {
            Ok(Some(event)) => {
                tokio::select! {
                    biased;

                    () = stop.cancelled() => {
                        debug!("event pump: stop requested while queue full");
                        break;
                    }

                    sent = tx.send(event) => {
                        if sent.is_err() {
                            debug!("event pump: consumer gone, stopping");
                            break;
                        }
                    }
                }
            }
            Ok(None) => {
                debug!(
                    session_id = decoder.state().session_id(),
                    last_sequence = decoder.state().last_sequence(),
                    "event pump: end of input"
                );
                break;
            }
            Err(e) => {
                warn!(error = %e, "event pump: decode failed, stopping");
                if let Ok(mut slot) = error.lock() {
                    *slot = Some(e);
                }
                break;
            }
        }
    }
    // `tx` drops here, closing the queue.
}
