//! Control sub-protocol handling.
//!
//! The [`ControlCoordinator`] answers each inbound [`ControlRequest`]:
//!
//! 1. A request with no action name is allowed immediately.
//! 2. Otherwise the [`PolicyChain`] decides.
//! 3. `Deny` writes a denial frame; no capability runs.
//! 4. `Allow` with a registered capability executes it with the rewritten
//!    input (the original input when nothing was rewritten) and writes a
//!    capability-result frame. Failures go to the child, never the caller.
//! 5. `Allow` without a capability writes a plain allow frame, carrying
//!    `updated_input` when a policy rewrote the input.
//!
//! Exactly one frame is written per request id; repeats are dropped. The
//! most recent [`ANSWERED_ID_CAPACITY`] ids are remembered for that check.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::audit::{AuditDispatcher, AuditEventType};
use crate::capability::{execute_isolated, CapabilityContext, CapabilityRegistry};
use crate::policy::{Evaluation, PolicyChain};
use crate::process::ProcessHandle;
use crate::protocol::event::ControlRequest;
use crate::protocol::frames::{CapabilityResultFrame, ControlResponse};
use crate::protocol::value::merge_inputs;
use crate::{AppError, Result};

/// Number of answered request ids remembered for duplicate detection.
pub const ANSWERED_ID_CAPACITY: usize = 4096;

/// Answered request ids, oldest evicted first once `capacity` is reached.
#[derive(Debug)]
struct AnsweredIds {
    capacity: usize,
    order: VecDeque<String>,
    ids: HashSet<String>,
}

impl AnsweredIds {
    fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            order: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// Record `id`; `false` if it is already present.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_owned());
        self.ids.insert(id.to_owned());
        true
    }

    fn len(&self) -> usize {
        self.order.len()
    }
}

/// What the coordinator did with one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlOutcome {
    /// Plain allow frame written.
    Allowed {
        /// `true` when the frame carried `updated_input`.
        rewritten: bool,
    },
    /// Denial frame written.
    Denied {
        /// Reason sent to the child.
        reason: Option<String>,
    },
    /// A capability ran and its result frame was written.
    Executed {
        /// Capability name.
        capability: String,
        /// `true` when the capability failed.
        is_error: bool,
    },
    /// Request id already answered; nothing written.
    Duplicate,
}

/// Turns control requests into response frames.
pub struct ControlCoordinator {
    policies: Arc<PolicyChain>,
    capabilities: Arc<CapabilityRegistry>,
    process: Arc<ProcessHandle>,
    audit: Arc<AuditDispatcher>,
    answered: Mutex<AnsweredIds>,
}

impl ControlCoordinator {
    /// Create a coordinator writing responses through `process`.
    #[must_use]
    pub fn new(
        policies: Arc<PolicyChain>,
        capabilities: Arc<CapabilityRegistry>,
        process: Arc<ProcessHandle>,
        audit: Arc<AuditDispatcher>,
    ) -> Self {
        Self {
            policies,
            capabilities,
            process,
            audit,
            answered: Mutex::new(AnsweredIds::new(ANSWERED_ID_CAPACITY)),
        }
    }

    /// Number of answered request ids currently remembered.
    #[must_use]
    pub fn answered_count(&self) -> usize {
        self.answered.lock().map_or(0, |ids| ids.len())
    }

    /// Answer `request`.
    ///
    /// `session_id` is used for capability context, logs and audit records.
    ///
    /// # Errors
    ///
    /// - [`AppError::Io`] / [`AppError::Closed`] when the response frame
    ///   cannot be written.
    /// - [`AppError::Cancelled`] when `cancel` fires during capability
    ///   execution or the write.
    pub async fn handle(
        &self,
        session_id: &str,
        request: &ControlRequest,
        cancel: &CancellationToken,
    ) -> Result<ControlOutcome> {
        if !self.claim(&request.request_id) {
            warn!(
                session_id,
                request_id = %request.request_id,
                "duplicate control request dropped"
            );
            return Ok(ControlOutcome::Duplicate);
        }

        let Some(call) = request.tool_call() else {
            debug!(session_id, request_id = %request.request_id, "control request names no action, allowing");
            self.process
                .write_frame(&ControlResponse::allow(&request.request_id), cancel)
                .await?;
            self.record(session_id, request, "allow", None, None, None);
            return Ok(ControlOutcome::Allowed { rewritten: false });
        };

        let Evaluation {
            decision,
            decided_by,
            faults,
        } = self.policies.evaluate_detailed(&call);

        for fault in &faults {
            self.audit.emit(
                session_id,
                AuditEventType::PolicyFault,
                json!({
                    "request_id": request.request_id,
                    "tool_name": call.name,
                    "policy": fault.policy,
                    "message": fault.message,
                }),
            );
        }

        if decision.is_deny() {
            info!(
                session_id,
                request_id = %request.request_id,
                tool_name = %call.name,
                reason = ?decision.reason,
                "control request denied"
            );
            self.process
                .write_frame(
                    &ControlResponse::deny(&request.request_id, decision.reason.clone()),
                    cancel,
                )
                .await?;
            self.record(
                session_id,
                request,
                "deny",
                decision.reason.as_deref(),
                decided_by.as_deref(),
                None,
            );
            return Ok(ControlOutcome::Denied {
                reason: decision.reason,
            });
        }

        let rewritten = decision
            .updated_input
            .as_ref()
            .map(|update| merge_inputs(Some(&call.input), Some(update)).unwrap_or_default());

        if let Some(capability) = self.capabilities.get(&call.name) {
            let input = rewritten.unwrap_or_else(|| call.input.clone());
            let ctx = CapabilityContext {
                session_id: session_id.to_owned(),
                request_id: request.request_id.clone(),
                cancel: cancel.clone(),
            };

            debug!(session_id, request_id = %request.request_id, capability = capability.name(), "executing capability");
            let frame = match execute_isolated(capability.as_ref(), ctx, input).await {
                Ok(value) => CapabilityResultFrame::success(&request.request_id, value),
                Err(AppError::Cancelled(msg)) if cancel.is_cancelled() => {
                    return Err(AppError::Cancelled(msg));
                }
                Err(e) => {
                    warn!(
                        session_id,
                        request_id = %request.request_id,
                        capability = capability.name(),
                        error = %e,
                        "capability failed"
                    );
                    CapabilityResultFrame::failure(&request.request_id, e.to_string())
                }
            };

            let is_error = frame.is_error;
            self.process.write_frame(&frame, cancel).await?;
            self.record(
                session_id,
                request,
                "allow",
                decision.reason.as_deref(),
                decided_by.as_deref(),
                Some((capability.name(), is_error)),
            );
            return Ok(ControlOutcome::Executed {
                capability: capability.name().to_owned(),
                is_error,
            });
        }

        let mut response = ControlResponse::allow(&request.request_id);
        response.reason.clone_from(&decision.reason);
        response.updated_input = rewritten;
        let has_rewrite = response.updated_input.is_some();

        info!(
            session_id,
            request_id = %request.request_id,
            tool_name = %call.name,
            rewritten = has_rewrite,
            "control request allowed"
        );
        self.process.write_frame(&response, cancel).await?;
        self.record(
            session_id,
            request,
            "allow",
            decision.reason.as_deref(),
            decided_by.as_deref(),
            None,
        );
        Ok(ControlOutcome::Allowed {
            rewritten: has_rewrite,
        })
    }

    /// Mark `request_id` answered; `false` if it already was.
    fn claim(&self, request_id: &str) -> bool {
        self.answered
            .lock()
            .map_or(true, |mut ids| ids.insert(request_id))
    }

    fn record(
        &self,
        session_id: &str,
        request: &ControlRequest,
        decision: &str,
        reason: Option<&str>,
        decided_by: Option<&str>,
        capability: Option<(&str, bool)>,
    ) {
        let mut data = json!({
            "request_id": request.request_id,
            "kind": request.kind,
            "tool_name": request.tool_name,
            "tool_input": request.tool_input,
            "decision": decision,
            "reason": reason,
            "decided_by": decided_by,
        });
        if let (Some((name, is_error)), Some(obj)) = (capability, data.as_object_mut()) {
            obj.insert("capability".into(), json!(name));
            obj.insert("is_error".into(), json!(is_error));
        }
        self.audit
            .emit(session_id, AuditEventType::ControlDecision, data);
    }
}

impl std::fmt::Debug for ControlCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlCoordinator")
            .field("policies", &self.policies)
            .field("capabilities", &self.capabilities)
            .field("answered", &self.answered_count())
            .finish_non_exhaustive()
    }
}
