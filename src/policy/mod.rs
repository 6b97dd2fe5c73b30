//! Ordered policy evaluation for proposed actions.
//!
//! A [`Policy`] inspects one [`ToolCall`] and returns a [`PolicyDecision`].
//! [`PolicyChain`] runs policies in registration order and combines their
//! outcomes into exactly one terminal decision plus merged input rewrites.

pub mod chain;
pub mod rules;

use serde::{Deserialize, Serialize};

use crate::protocol::event::ToolCall;
use crate::protocol::value::InputMap;

pub use chain::{Evaluation, PolicyChain, PolicyFault};
pub use rules::{FnPolicy, InputRewritePolicy, PolicyRule, RuleDecision, ToolPatternPolicy};

/// Outcome kind of one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    /// Defer to the next policy.
    Continue,
    /// Stop evaluation and let the action proceed.
    Allow,
    /// Stop evaluation and refuse the action.
    Deny,
}

/// Decision plus optional reason and input rewrite.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PolicyDecision {
    /// Outcome kind.
    pub decision: Decision,
    /// Human-readable reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Keys to overwrite in the action input.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub updated_input: Option<InputMap>,
}

impl PolicyDecision {
    /// Defer to the next policy.
    #[must_use]
    pub fn continue_() -> Self {
        Self {
            decision: Decision::Continue,
            reason: None,
            updated_input: None,
        }
    }

    /// Let the action proceed.
    #[must_use]
    pub fn allow() -> Self {
        Self {
            decision: Decision::Allow,
            reason: None,
            updated_input: None,
        }
    }

    /// Refuse the action.
    #[must_use]
    pub fn deny(reason: impl Into<String>) -> Self {
        Self {
            decision: Decision::Deny,
            reason: Some(reason.into()),
            updated_input: None,
        }
    }

    /// Attach a reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attach an input rewrite.
    #[must_use]
    pub fn with_updated_input(mut self, input: InputMap) -> Self {
        self.updated_input = Some(input);
        self
    }

    /// `true` for [`Decision::Allow`].
    #[must_use]
    pub fn is_allow(&self) -> bool {
        self.decision == Decision::Allow
    }

    /// `true` for [`Decision::Deny`].
    #[must_use]
    pub fn is_deny(&self) -> bool {
        self.decision == Decision::Deny
    }
}

/// One decision function in a [`PolicyChain`].
///
/// Implementations must be [`Send`] and [`Sync`]; the chain is shared across
/// tasks behind an [`std::sync::Arc`]. A panic inside [`Policy::decide`] is
/// caught by the chain and counted as [`Decision::Continue`].
pub trait Policy: Send + Sync {
    /// Name used in logs, audit records and fault reports.
    fn name(&self) -> &str;

    /// Decide on `call`, whose input already reflects earlier rewrites.
    fn decide(&self, call: &ToolCall) -> PolicyDecision;
}
