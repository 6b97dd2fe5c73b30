//! Non-blocking hand-off from the session to an [`AuditSink`].

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex};

use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::{AuditEventType, AuditSink};
use crate::policy::chain::panic_message;

struct Pending {
    session_id: String,
    event_type: AuditEventType,
    data: Value,
}

/// Queues audit records and drains them on a blocking background task.
///
/// [`AuditDispatcher::emit`] never waits on the sink. Sink errors are logged
/// at `WARN`; sink panics are caught and logged. A dispatcher built with
/// [`AuditDispatcher::disabled`] drops every record.
pub struct AuditDispatcher {
    tx: Mutex<Option<mpsc::UnboundedSender<Pending>>>,
    drain: Mutex<Option<JoinHandle<()>>>,
}

impl AuditDispatcher {
    /// Start draining into `sink`. Must be called from within a tokio runtime.
    #[must_use]
    pub fn new(sink: Arc<dyn AuditSink>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<Pending>();

        let drain = tokio::task::spawn_blocking(move || {
            while let Some(pending) = rx.blocking_recv() {
                let outcome = catch_unwind(AssertUnwindSafe(|| {
                    sink.emit(&pending.session_id, pending.event_type, pending.data)
                }));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        warn!(session_id = %pending.session_id, error = %e, "audit sink failed");
                    }
                    Err(payload) => {
                        warn!(
                            session_id = %pending.session_id,
                            error = %panic_message(payload.as_ref()),
                            "audit sink panicked"
                        );
                    }
                }
            }
            debug!("audit drain finished");
        });

        Self {
            tx: Mutex::new(Some(tx)),
            drain: Mutex::new(Some(drain)),
        }
    }

    /// A dispatcher that discards everything.
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            tx: Mutex::new(None),
            drain: Mutex::new(None),
        }
    }

    /// `true` when records are delivered to a sink.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.tx.lock().is_ok_and(|tx| tx.is_some())
    }

    /// Queue one record. Never blocks.
    pub fn emit(&self, session_id: &str, event_type: AuditEventType, data: Value) {
        let Ok(guard) = self.tx.lock() else {
            return;
        };
        if let Some(tx) = guard.as_ref() {
            let pending = Pending {
                session_id: session_id.to_owned(),
                event_type,
                data,
            };
            if tx.send(pending).is_err() {
                debug!(session_id, "audit drain gone, record dropped");
            }
        }
    }

    /// Stop accepting records and wait until queued ones reach the sink.
    /// Idempotent.
    pub async fn flush(&self) {
        drop(self.tx.lock().ok().and_then(|mut tx| tx.take()));
        let drain = self.drain.lock().ok().and_then(|mut slot| slot.take());
        if let Some(drain) = drain {
            if let Err(e) = drain.await {
                warn!(error = %e, "audit drain task failed");
            }
        }
    }
}

impl std::fmt::Debug for AuditDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditDispatcher")
            .field("enabled", &self.is_enabled())
            .finish()
    }
}
