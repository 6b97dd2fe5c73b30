//! Top-level session orchestration.
//!
//! A [`Session`] owns the child process, the background [`EventPump`] and
//! the [`ControlCoordinator`]. Each send writes one prompt frame and then
//! dispatches queued events until a turn result arrives:
//!
//! | Event                                   | Handling                         |
//! |-----------------------------------------|----------------------------------|
//! | `SessionInit`                           | absorbed; captures the session id |
//! | `ControlRequest`                        | answered by the coordinator      |
//! | `TurnResult`                            | ends the send                    |
//! | everything else                         | forwarded to the caller          |
//!
//! # Lifecycle
//!
//! `Started` → send → `AwaitingTurn` → turn result → `Started`. Close from
//! any phase moves to `Closed` exactly once; later sends fail without
//! touching the process.
//!
//! A send that ends by timeout or cancellation leaves its turn unfinished.
//! The next send first reads and discards the rest of that turn, answering
//! any control requests in it, before writing its own prompt.

pub mod builder;

use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::json;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub use builder::SessionBuilder;

use crate::audit::{AuditDispatcher, AuditEventType};
use crate::capability::CapabilityRegistry;
use crate::config::{ConfigProvider, SessionConfig};
use crate::control::ControlCoordinator;
use crate::errors::TurnLimitExceeded;
use crate::policy::PolicyChain;
use crate::process::ProcessHandle;
use crate::protocol::decoder::FrameDecoder;
use crate::protocol::event::{Event, EventBody, TurnResult};
use crate::protocol::frames::PromptFrame;
use crate::pump::EventPump;
use crate::{AppError, Result};

/// Session lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// Idle, ready for a send.
    Started,
    /// A send is waiting for its turn result.
    AwaitingTurn,
    /// Closed; every resource has been released.
    Closed,
}

/// Events and turn result collected by [`Session::send`].
#[derive(Debug, Clone)]
pub struct TurnReport {
    /// Caller-visible events in emission order.
    pub events: Vec<Event>,
    /// Result concluding the turn.
    pub result: TurnResult,
}

#[derive(Debug)]
struct SessionState {
    phase: Phase,
    session_id: String,
    turns: u32,
    /// Prompts written whose turn result has not been read yet.
    unanswered: u32,
    last_error: Option<AppError>,
}

/// Bridge to one child process.
pub struct Session {
    local_id: Uuid,
    config: SessionConfig,
    process: Arc<ProcessHandle>,
    pump: EventPump,
    events: tokio::sync::Mutex<mpsc::Receiver<Event>>,
    coordinator: ControlCoordinator,
    audit: Arc<AuditDispatcher>,
    state: Mutex<SessionState>,
    shutdown: CancellationToken,
}

impl Session {
    /// Start building a session from `config`.
    #[must_use]
    pub fn builder(config: SessionConfig) -> SessionBuilder {
        SessionBuilder::new(config)
    }

    pub(crate) fn assemble(
        config: SessionConfig,
        policies: Arc<PolicyChain>,
        capabilities: Arc<CapabilityRegistry>,
        process: ProcessHandle,
        audit: AuditDispatcher,
    ) -> Result<Self> {
        let stdout = process
            .take_stdout()
            .ok_or_else(|| AppError::Start("child output stream unavailable".into()))?;

        let local_id = Uuid::new_v4();
        let shutdown = CancellationToken::new();
        let (pump, rx) = EventPump::spawn(
            FrameDecoder::new(stdout),
            config.queue_capacity(),
            &shutdown,
        );

        let process = Arc::new(process);
        let audit = Arc::new(audit);
        let coordinator = ControlCoordinator::new(
            policies,
            capabilities,
            Arc::clone(&process),
            Arc::clone(&audit),
        );

        info!(
            local_id = %local_id,
            command = config.process().command(),
            pid = process.id(),
            "session started"
        );
        audit.emit(
            &local_id.to_string(),
            AuditEventType::SessionStart,
            json!({
                "command": config.process().command(),
                "args": config.process().args(),
                "pid": process.id(),
                "max_turns": config.max_turns(),
            }),
        );

        Ok(Self {
            local_id,
            config,
            process,
            pump,
            events: tokio::sync::Mutex::new(rx),
            coordinator,
            audit,
            state: Mutex::new(SessionState {
                phase: Phase::Started,
                session_id: String::new(),
                turns: 0,
                unanswered: 0,
                last_error: None,
            }),
            shutdown,
        })
    }

    // ── Accessors ────────────────────────────────────────────────────────────

    /// Bridge-local identifier, assigned at start.
    #[must_use]
    pub fn local_id(&self) -> Uuid {
        self.local_id
    }

    /// Configuration the session was started with.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Session id reported by the child; empty until known.
    #[must_use]
    pub fn session_id(&self) -> String {
        self.state
            .lock()
            .map(|s| s.session_id.clone())
            .unwrap_or_default()
    }

    /// Cumulative turns reported by the child.
    #[must_use]
    pub fn turns(&self) -> u32 {
        self.state.lock().map(|s| s.turns).unwrap_or_default()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> Phase {
        self.state.lock().map_or(Phase::Closed, |s| s.phase)
    }

    /// `true` once [`Session::close`] has run.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Most recent error returned by a send.
    #[must_use]
    pub fn last_error(&self) -> Option<AppError> {
        self.state.lock().ok().and_then(|s| s.last_error.clone())
    }

    // ── Sending ──────────────────────────────────────────────────────────────

    /// Send `prompt` and collect the caller-visible events of the turn.
    ///
    /// # Errors
    ///
    /// See [`Session::send_with_events`].
    pub async fn send(&self, prompt: &str, cancel: &CancellationToken) -> Result<TurnReport> {
        let (tx, mut rx) = mpsc::channel(self.config.queue_capacity());

        let run = async move { self.send_with_events(prompt, &tx, cancel).await };
        let collect = async {
            let mut events = Vec::new();
            while let Some(event) = rx.recv().await {
                events.push(event);
            }
            events
        };

        let (result, events) = tokio::join!(run, collect);
        result.map(|result| TurnReport { events, result })
    }

    /// Send `prompt`, forwarding caller-visible events to `events` as they
    /// arrive, and return the turn result.
    ///
    /// A dropped `events` receiver does not end the send; events are then
    /// discarded until the turn result arrives.
    ///
    /// # Errors
    ///
    /// - [`AppError::Closed`] when the session is closed, before or during
    ///   the send.
    /// - [`AppError::TurnLimit`] when the ceiling is already reached (no
    ///   result attached) or is exceeded by this turn (result attached).
    /// - [`AppError::Cancelled`] / [`AppError::Timeout`] on cancellation or
    ///   when the per-call timeout elapses.
    /// - [`AppError::Decode`] when the child's output could not be decoded.
    /// - [`AppError::StreamTerminated`] when the output closes before a turn
    ///   result.
    /// - [`AppError::Io`] when a frame cannot be written.
    pub async fn send_with_events(
        &self,
        prompt: &str,
        events: &mpsc::Sender<Event>,
        cancel: &CancellationToken,
    ) -> Result<TurnResult> {
        self.check_ready()?;

        let mut queue = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(AppError::Cancelled("send cancelled".into())),
            () = self.shutdown.cancelled() => return Err(AppError::Closed("session is closed".into())),
            queue = self.events.lock() => queue,
        };

        // Another send may have closed the session or used up the ceiling
        // while this one waited for the queue.
        self.check_ready()?;
        self.set_phase(Phase::AwaitingTurn);

        let call = cancel.child_token();
        let dispatch = self.dispatch(prompt, &mut queue, events, &call);

        let timed = async {
            match self.config.call_timeout() {
                Some(limit) => {
                    if let Ok(result) = tokio::time::timeout(limit, dispatch).await {
                        result
                    } else {
                        call.cancel();
                        Err(AppError::Timeout(format!(
                            "send did not complete within {}ms",
                            limit.as_millis()
                        )))
                    }
                }
                None => dispatch.await,
            }
        };

        let outcome = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Err(AppError::Closed("session closed during send".into())),
            result = timed => result,
        };

        self.finish_send(&outcome);
        outcome
    }

    async fn dispatch(
        &self,
        prompt: &str,
        queue: &mut mpsc::Receiver<Event>,
        events: &mpsc::Sender<Event>,
        call: &CancellationToken,
    ) -> Result<TurnResult> {
        self.discard_stale(queue, call).await?;
        self.check_ready()?;

        self.process
            .write_frame(&PromptFrame::new(prompt), call)
            .await?;
        if let Ok(mut state) = self.state.lock() {
            state.unanswered = state.unanswered.saturating_add(1);
        }
        debug!(local_id = %self.local_id, "prompt written");

        loop {
            let next = tokio::select! {
                biased;
                () = call.cancelled() => {
                    return Err(AppError::Cancelled("send cancelled".into()));
                }
                next = queue.recv() => next,
            };

            let Some(event) = next else {
                return Err(self.stream_end_error());
            };

            self.observe_session_id(&event.meta.session_id);

            match event.body {
                EventBody::SessionInit(ref init) => {
                    self.observe_session_id(&init.session_id);
                    debug!(
                        local_id = %self.local_id,
                        session_id = %init.session_id,
                        tools = init.tools.len(),
                        "session init absorbed"
                    );
                }
                EventBody::ControlRequest(ref request) => {
                    let session_id = self.session_id();
                    let outcome = self.coordinator.handle(&session_id, request, call).await?;
                    debug!(request_id = %request.request_id, ?outcome, "control request handled");
                }
                EventBody::TurnResult(result) => {
                    return self.complete_turn(result);
                }
                EventBody::Text(_)
                | EventBody::Reasoning(_)
                | EventBody::ActionRequest(_)
                | EventBody::ActionOutcome(_)
                | EventBody::Failure(_) => {
                    self.forward(event, events, call).await?;
                }
            }
        }
    }

    /// Drain what is left of earlier turns whose send ended by timeout or
    /// cancellation, up to and including their turn results.
    ///
    /// Control requests in the backlog are still answered; every other event
    /// is dropped. Their turns still count toward the ceiling.
    async fn discard_stale(
        &self,
        queue: &mut mpsc::Receiver<Event>,
        call: &CancellationToken,
    ) -> Result<()> {
        loop {
            let pending = self.lock_state()?.unanswered;
            if pending == 0 {
                return Ok(());
            }

            let next = tokio::select! {
                biased;
                () = call.cancelled() => {
                    return Err(AppError::Cancelled("send cancelled".into()));
                }
                next = queue.recv() => next,
            };
            let Some(event) = next else {
                return Err(self.stream_end_error());
            };

            self.observe_session_id(&event.meta.session_id);
            let kind = event.kind_name();
            let sequence = event.meta.sequence;

            match event.body {
                EventBody::SessionInit(ref init) => self.observe_session_id(&init.session_id),
                EventBody::ControlRequest(ref request) => {
                    let session_id = self.session_id();
                    self.coordinator.handle(&session_id, request, call).await?;
                }
                EventBody::TurnResult(result) => {
                    let turns = {
                        let mut state = self.lock_state()?;
                        state.turns = state.turns.saturating_add(result.num_turns);
                        state.unanswered = state.unanswered.saturating_sub(1);
                        state.turns
                    };
                    info!(
                        local_id = %self.local_id,
                        turns,
                        num_turns = result.num_turns,
                        "stale turn result discarded"
                    );
                }
                _ => debug!(local_id = %self.local_id, kind, sequence, "stale event discarded"),
            }
        }
    }

    async fn forward(
        &self,
        event: Event,
        events: &mpsc::Sender<Event>,
        call: &CancellationToken,
    ) -> Result<()> {
        if self.audit.is_enabled() {
            match serde_json::to_value(&event) {
                Ok(data) => self.audit.emit(&self.audit_id(), AuditEventType::Event, data),
                Err(e) => debug!(error = %e, "event not serialisable for audit"),
            }
        }

        if events.is_closed() {
            return Ok(());
        }

        tokio::select! {
            biased;
            () = call.cancelled() => Err(AppError::Cancelled("send cancelled".into())),
            sent = events.send(event) => {
                if sent.is_err() {
                    debug!(local_id = %self.local_id, "event receiver dropped, discarding");
                }
                Ok(())
            }
        }
    }

    fn complete_turn(&self, result: TurnResult) -> Result<TurnResult> {
        let max = self.config.max_turns();
        let (turns, session_id) = {
            let mut state = self.lock_state()?;
            state.turns = state.turns.saturating_add(result.num_turns);
            state.unanswered = state.unanswered.saturating_sub(1);
            (state.turns, state.session_id.clone())
        };

        info!(
            session_id = %session_id,
            turns,
            num_turns = result.num_turns,
            cost_usd = result.total_cost_usd,
            is_error = result.is_error,
            "turn completed"
        );

        match max {
            Some(max_allowed) if turns > max_allowed => {
                warn!(session_id = %session_id, turns, max_allowed, "turn ceiling exceeded");
                Err(AppError::TurnLimit(Box::new(TurnLimitExceeded {
                    turns,
                    max_allowed,
                    session_id,
                    result: Some(result),
                })))
            }
            _ => Ok(result),
        }
    }

    // ── Teardown ─────────────────────────────────────────────────────────────

    /// Close the session and release every resource. Idempotent.
    ///
    /// Safe to call while a send is in flight; that send fails with
    /// [`AppError::Closed`].
    ///
    /// # Errors
    ///
    /// Returns `AppError::Io` if the child could not be reaped. The session
    /// is closed regardless.
    pub async fn close(&self) -> Result<()> {
        {
            let mut state = self.lock_state()?;
            if state.phase == Phase::Closed {
                return Ok(());
            }
            state.phase = Phase::Closed;
        }

        self.shutdown.cancel();
        self.pump.stop();

        let terminated = self.process.terminate().await;
        self.pump.join().await;

        let status = terminated
            .as_ref()
            .ok()
            .and_then(|s| s.as_ref().map(ToString::to_string));
        info!(local_id = %self.local_id, session_id = %self.session_id(), status = ?status, "session closed");

        self.audit.emit(
            &self.audit_id(),
            AuditEventType::SessionEnd,
            json!({
                "turns": self.turns(),
                "exit_status": status,
            }),
        );
        self.audit.flush().await;

        terminated.map(|_| ())
    }

    // ── Internals ────────────────────────────────────────────────────────────

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, SessionState>> {
        self.state
            .lock()
            .map_err(|_| AppError::Closed("session state poisoned".into()))
    }

    fn check_ready(&self) -> Result<()> {
        let state = self.lock_state()?;
        if state.phase == Phase::Closed {
            return Err(AppError::Closed("session is closed".into()));
        }
        if let Some(max_allowed) = self.config.max_turns() {
            if state.turns >= max_allowed {
                return Err(AppError::TurnLimit(Box::new(TurnLimitExceeded {
                    turns: state.turns,
                    max_allowed,
                    session_id: state.session_id.clone(),
                    result: None,
                })));
            }
        }
        Ok(())
    }

    fn set_phase(&self, phase: Phase) {
        if let Ok(mut state) = self.state.lock() {
            if state.phase != Phase::Closed {
                state.phase = phase;
            }
        }
    }

    fn finish_send(&self, outcome: &Result<TurnResult>) {
        if let Ok(mut state) = self.state.lock() {
            if state.phase != Phase::Closed {
                state.phase = Phase::Started;
            }
            if let Err(e) = outcome {
                state.last_error = Some(e.clone());
            }
        }
    }

    fn observe_session_id(&self, id: &str) {
        if id.is_empty() {
            return;
        }
        if let Ok(mut state) = self.state.lock() {
            if state.session_id.is_empty() {
                info!(local_id = %self.local_id, session_id = id, "session id captured");
                id.clone_into(&mut state.session_id);
            }
        }
    }

    fn stream_end_error(&self) -> AppError {
        self.pump.error().unwrap_or_else(|| {
            AppError::StreamTerminated("child output closed before a turn result".into())
        })
    }

    /// Session id for audit records: the child's id once known, else the
    /// local id.
    fn audit_id(&self) -> String {
        let id = self.session_id();
        if id.is_empty() {
            self.local_id.to_string()
        } else {
            id
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("local_id", &self.local_id)
            .field("session_id", &self.session_id())
            .field("phase", &self.phase())
            .field("turns", &self.turns())
            .finish_non_exhaustive()
    }
}
