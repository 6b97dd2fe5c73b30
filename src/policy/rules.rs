//! Built-in policies.
//!
//! - [`ToolPatternPolicy`]: glob match on the action name, optionally
//!   narrowed by a regex over one string input field.
//! - [`InputRewritePolicy`]: injects fixed input keys for matching actions.
//! - [`FnPolicy`]: wraps a closure.

use regex::Regex;
use serde::Deserialize;

use super::{Policy, PolicyDecision};
use crate::protocol::event::ToolCall;
use crate::protocol::value::InputMap;
use crate::{AppError, Result};

/// Terminal decision produced by a matching rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleDecision {
    /// Allow matching actions.
    Allow,
    /// Deny matching actions.
    Deny,
}

/// Declarative rule as written in the `[[policy.rules]]` TOML table.
///
/// ```toml
/// [[policy.rules]]
/// tool = "Bash"
/// input_key = "command"
/// input_pattern = "^rm\\s+-rf"
/// decision = "deny"
/// reason = "destructive shell command"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PolicyRule {
    /// Glob over the action name (`*` matches any name).
    pub tool: String,
    /// Input field the `input_pattern` is matched against.
    #[serde(default)]
    pub input_key: Option<String>,
    /// Regular expression over the `input_key` field's string value.
    #[serde(default)]
    pub input_pattern: Option<String>,
    /// Decision when the rule matches.
    pub decision: RuleDecision,
    /// Reason attached to the decision.
    #[serde(default)]
    pub reason: Option<String>,
}

// ── ToolPatternPolicy ────────────────────────────────────────────────────────

/// Allows or denies actions whose name matches a glob.
///
/// Non-matching actions continue to the next policy. When an input
/// constraint is present, the named field must be a string matching the
/// regex; a missing or non-string field is a non-match.
#[derive(Debug, Clone)]
pub struct ToolPatternPolicy {
    name: String,
    tool: glob::Pattern,
    input: Option<(String, Regex)>,
    decision: RuleDecision,
    reason: Option<String>,
}

impl ToolPatternPolicy {
    /// Deny actions whose name matches `tool_glob`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` for an invalid glob.
    pub fn deny(tool_glob: &str, reason: impl Into<String>) -> Result<Self> {
        Self::build(tool_glob, RuleDecision::Deny, Some(reason.into()))
    }

    /// Allow actions whose name matches `tool_glob`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` for an invalid glob.
    pub fn allow(tool_glob: &str) -> Result<Self> {
        Self::build(tool_glob, RuleDecision::Allow, None)
    }

    /// Compile a declarative rule.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` for an invalid glob or regex, or when only
    /// one of `input_key` / `input_pattern` is set.
    pub fn from_rule(rule: &PolicyRule) -> Result<Self> {
        let policy = Self::build(&rule.tool, rule.decision, rule.reason.clone())?;
        match (&rule.input_key, &rule.input_pattern) {
            (None, None) => Ok(policy),
            (Some(key), Some(pattern)) => policy.with_input_pattern(key, pattern),
            _ => Err(AppError::Policy(
                "input_key and input_pattern must be set together".into(),
            )),
        }
    }

    /// Narrow the rule to actions whose `key` input matches `pattern`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` for an invalid regex.
    pub fn with_input_pattern(mut self, key: &str, pattern: &str) -> Result<Self> {
        let regex = Regex::new(pattern)
            .map_err(|e| AppError::Policy(format!("invalid input pattern '{pattern}': {e}")))?;
        self.name = format!("{}:{key}~{pattern}", self.name);
        self.input = Some((key.to_owned(), regex));
        Ok(self)
    }

    fn build(tool_glob: &str, decision: RuleDecision, reason: Option<String>) -> Result<Self> {
        let tool = glob::Pattern::new(tool_glob)
            .map_err(|e| AppError::Policy(format!("invalid tool pattern '{tool_glob}': {e}")))?;
        let verb = match decision {
            RuleDecision::Allow => "allow",
            RuleDecision::Deny => "deny",
        };
        Ok(Self {
            name: format!("{verb}:{tool_glob}"),
            tool,
            input: None,
            decision,
            reason,
        })
    }

    fn matches(&self, call: &ToolCall) -> bool {
        if !self.tool.matches(&call.name) {
            return false;
        }
        match &self.input {
            None => true,
            Some((key, regex)) => call
                .input
                .get(key)
                .and_then(|v| v.as_str())
                .is_some_and(|s| regex.is_match(s)),
        }
    }
}

impl Policy for ToolPatternPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, call: &ToolCall) -> PolicyDecision {
        if !self.matches(call) {
            return PolicyDecision::continue_();
        }
        match self.decision {
            RuleDecision::Deny => PolicyDecision::deny(
                self.reason
                    .clone()
                    .unwrap_or_else(|| format!("denied by rule {}", self.name)),
            ),
            RuleDecision::Allow => {
                let allow = PolicyDecision::allow();
                match &self.reason {
                    Some(reason) => allow.with_reason(reason.clone()),
                    None => allow,
                }
            }
        }
    }
}

// ── InputRewritePolicy ───────────────────────────────────────────────────────

/// Continues with a fixed input rewrite for actions matching a glob.
#[derive(Debug, Clone)]
pub struct InputRewritePolicy {
    name: String,
    tool: glob::Pattern,
    set: InputMap,
}

impl InputRewritePolicy {
    /// Overwrite the keys in `set` for actions matching `tool_glob`.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` for an invalid glob.
    pub fn new(tool_glob: &str, set: InputMap) -> Result<Self> {
        let tool = glob::Pattern::new(tool_glob)
            .map_err(|e| AppError::Policy(format!("invalid tool pattern '{tool_glob}': {e}")))?;
        Ok(Self {
            name: format!("rewrite:{tool_glob}"),
            tool,
            set,
        })
    }
}

impl Policy for InputRewritePolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, call: &ToolCall) -> PolicyDecision {
        if self.tool.matches(&call.name) {
            PolicyDecision::continue_().with_updated_input(self.set.clone())
        } else {
            PolicyDecision::continue_()
        }
    }
}

// ── FnPolicy ─────────────────────────────────────────────────────────────────

/// Policy backed by a closure.
pub struct FnPolicy<F> {
    name: String,
    decide: F,
}

impl<F> FnPolicy<F>
where
    F: Fn(&ToolCall) -> PolicyDecision + Send + Sync,
{
    /// Wrap `decide` under `name`.
    pub fn new(name: impl Into<String>, decide: F) -> Self {
        Self {
            name: name.into(),
            decide,
        }
    }
}

impl<F> Policy for FnPolicy<F>
where
    F: Fn(&ToolCall) -> PolicyDecision + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn decide(&self, call: &ToolCall) -> PolicyDecision {
        (self.decide)(call)
    }
}

impl<F> std::fmt::Debug for FnPolicy<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnPolicy").field("name", &self.name).finish()
    }
}
