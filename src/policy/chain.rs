//! Policy chain evaluation.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, info, info_span, warn};

use super::{Decision, Policy, PolicyDecision};
use crate::protocol::event::ToolCall;
use crate::protocol::value::merge_inputs;

/// Diagnostic recorded when a policy panics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyFault {
    /// Name of the faulting policy.
    pub policy: String,
    /// Panic payload rendered as text.
    pub message: String,
}

/// Full result of one chain evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation {
    /// Terminal decision; never [`Decision::Continue`].
    pub decision: PolicyDecision,
    /// Name of the policy that terminated evaluation, or `None` when every
    /// policy continued.
    pub decided_by: Option<String>,
    /// Policies that panicked and were skipped.
    pub faults: Vec<PolicyFault>,
}

/// Ordered sequence of policies.
///
/// # Evaluation
///
/// Policies run in registration order. Before each one the rewrite
/// accumulated so far is merged over the original input.
///
/// - `Deny` returns at once; later policies never run.
/// - `Allow` merges its rewrite and returns.
/// - `Continue` merges its rewrite and moves on.
///
/// When every policy continues (or the chain is empty) the result is
/// `Allow` carrying the accumulated rewrite.
#[derive(Clone, Default)]
pub struct PolicyChain {
    policies: Vec<Arc<dyn Policy>>,
}

impl PolicyChain {
    /// Create an empty chain, which allows everything.
    #[must_use]
    pub fn new() -> Self {
        Self {
            policies: Vec::new(),
        }
    }

    /// Append a policy.
    pub fn push(&mut self, policy: Arc<dyn Policy>) {
        debug!(policy = policy.name(), position = self.policies.len(), "registering policy");
        self.policies.push(policy);
    }

    /// Append a policy, builder style.
    #[must_use]
    pub fn with(mut self, policy: Arc<dyn Policy>) -> Self {
        self.push(policy);
        self
    }

    /// Append every policy of `other`, keeping its order.
    pub fn extend(&mut self, other: PolicyChain) {
        self.policies.extend(other.policies);
    }

    /// Number of registered policies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.policies.len()
    }

    /// `true` when no policy is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Policy names in evaluation order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.policies.iter().map(|p| p.name().to_owned()).collect()
    }

    /// Evaluate `call` and return the terminal decision.
    #[must_use]
    pub fn evaluate(&self, call: &ToolCall) -> PolicyDecision {
        self.evaluate_detailed(call).decision
    }

    /// Evaluate `call`, also reporting which policy decided and any faults.
    #[must_use]
    pub fn evaluate_detailed(&self, call: &ToolCall) -> Evaluation {
        let _span = info_span!("policy_evaluate", tool_name = %call.name).entered();

        let mut accumulated = None;
        let mut faults = Vec::new();

        for policy in &self.policies {
            let effective = ToolCall {
                id: call.id.clone(),
                name: call.name.clone(),
                input: merge_inputs(Some(&call.input), accumulated.as_ref()).unwrap_or_default(),
            };

            let outcome = match catch_unwind(AssertUnwindSafe(|| policy.decide(&effective))) {
                Ok(outcome) => outcome,
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!(
                        policy = policy.name(),
                        error = %message,
                        "policy panicked, treating as continue"
                    );
                    faults.push(PolicyFault {
                        policy: policy.name().to_owned(),
                        message,
                    });
                    continue;
                }
            };

            match outcome.decision {
                Decision::Deny => {
                    info!(policy = policy.name(), reason = ?outcome.reason, "action denied");
                    return Evaluation {
                        decision: PolicyDecision {
                            decision: Decision::Deny,
                            reason: outcome.reason,
                            updated_input: None,
                        },
                        decided_by: Some(policy.name().to_owned()),
                        faults,
                    };
                }
                Decision::Allow => {
                    accumulated = merge_inputs(accumulated.as_ref(), outcome.updated_input.as_ref());
                    info!(policy = policy.name(), "action allowed");
                    return Evaluation {
                        decision: PolicyDecision {
                            decision: Decision::Allow,
                            reason: outcome.reason,
                            updated_input: accumulated,
                        },
                        decided_by: Some(policy.name().to_owned()),
                        faults,
                    };
                }
                Decision::Continue => {
                    accumulated = merge_inputs(accumulated.as_ref(), outcome.updated_input.as_ref());
                }
            }
        }

        Evaluation {
            decision: PolicyDecision {
                decision: Decision::Allow,
                reason: None,
                updated_input: accumulated,
            },
            decided_by: None,
            faults,
        }
    }
}

impl std::fmt::Debug for PolicyChain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyChain")
            .field("policies", &self.names())
            .finish()
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}
