//! Session configuration, builder, and TOML loading.
//!
//! [`SessionConfig`] is an immutable value built once through
//! [`SessionConfigBuilder`] and handed to the session constructor. The
//! [`BridgeConfig`] TOML form is what the `agent-bridge` binary reads; it
//! converts into a [`SessionConfig`] and a [`PolicyChain`].

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::policy::rules::{PolicyRule, ToolPatternPolicy};
use crate::policy::PolicyChain;
use crate::process::ALLOWED_ENV_VARS;
use crate::{AppError, Result};

/// Default bounded-queue capacity between the pump and the dispatch loop.
pub const DEFAULT_QUEUE_CAPACITY: usize = 64;

// ── ConfigProvider ───────────────────────────────────────────────────────────

/// Supplies everything needed to launch the child process.
///
/// Consulted only at process start.
pub trait ConfigProvider: Send + Sync {
    /// Executable to launch.
    fn command(&self) -> &str;
    /// Arguments passed to the executable.
    fn args(&self) -> &[String];
    /// Fully resolved environment for the child.
    fn env(&self) -> Vec<(String, String)>;
    /// Working directory, or the current one when `None`.
    fn working_dir(&self) -> Option<&Path>;
}

/// Launch parameters for the child process.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ProcessConfig {
    /// Executable to launch (e.g. `claude`).
    pub command: String,
    /// Arguments passed to the executable.
    #[serde(default)]
    pub args: Vec<String>,
    /// Variables set explicitly on the child.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Extra variables copied from the bridge's own environment, on top of
    /// [`ALLOWED_ENV_VARS`].
    #[serde(default)]
    pub passthrough_env: Vec<String>,
    /// Working directory for the child.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
}

impl ProcessConfig {
    /// Launch `command` with no arguments.
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: BTreeMap::new(),
            passthrough_env: Vec::new(),
            working_dir: None,
        }
    }
}

impl ConfigProvider for ProcessConfig {
    fn command(&self) -> &str {
        &self.command
    }

    fn args(&self) -> &[String] {
        &self.args
    }

    /// Allowlisted and passthrough variables from the current environment,
    /// then explicit `env` entries, which win on conflict.
    fn env(&self) -> Vec<(String, String)> {
        let mut resolved = BTreeMap::new();
        let inherited = ALLOWED_ENV_VARS
            .iter()
            .copied()
            .chain(self.passthrough_env.iter().map(String::as_str));
        for key in inherited {
            if let Ok(val) = std::env::var(key) {
                resolved.insert(key.to_owned(), val);
            }
        }
        resolved.extend(self.env.iter().map(|(k, v)| (k.clone(), v.clone())));
        resolved.into_iter().collect()
    }

    fn working_dir(&self) -> Option<&Path> {
        self.working_dir.as_deref()
    }
}

// ── SessionConfig ────────────────────────────────────────────────────────────

/// Immutable session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    process: ProcessConfig,
    max_turns: Option<u32>,
    call_timeout: Option<Duration>,
    queue_capacity: usize,
}

impl SessionConfig {
    /// Start building a configuration that launches `command`.
    #[must_use]
    pub fn builder(command: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(ProcessConfig::new(command))
    }

    /// Child launch parameters.
    #[must_use]
    pub fn process(&self) -> &ProcessConfig {
        &self.process
    }

    /// Cumulative turn ceiling, if any.
    #[must_use]
    pub fn max_turns(&self) -> Option<u32> {
        self.max_turns
    }

    /// Per-call timeout applied to each send, if any.
    #[must_use]
    pub fn call_timeout(&self) -> Option<Duration> {
        self.call_timeout
    }

    /// Capacity of the pump's output queue.
    #[must_use]
    pub fn queue_capacity(&self) -> usize {
        self.queue_capacity
    }
}

/// Builder for [`SessionConfig`].
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    process: ProcessConfig,
    max_turns: Option<u32>,
    call_timeout: Option<Duration>,
    queue_capacity: usize,
}

impl SessionConfigBuilder {
    /// Start from existing launch parameters.
    #[must_use]
    pub fn new(process: ProcessConfig) -> Self {
        Self {
            process,
            max_turns: None,
            call_timeout: None,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }

    /// Append one argument.
    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.process.args.push(arg.into());
        self
    }

    /// Append several arguments.
    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.process.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Set one environment variable on the child.
    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.process.env.insert(key.into(), value.into());
        self
    }

    /// Copy `key` from the bridge's environment when present.
    #[must_use]
    pub fn passthrough_env(mut self, key: impl Into<String>) -> Self {
        self.process.passthrough_env.push(key.into());
        self
    }

    /// Set the child's working directory.
    #[must_use]
    pub fn working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.process.working_dir = Some(dir.into());
        self
    }

    /// Fail sends once cumulative turns exceed `max`.
    #[must_use]
    pub fn max_turns(mut self, max: u32) -> Self {
        self.max_turns = Some(max);
        self
    }

    /// Bound each send by `timeout`.
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    /// Capacity of the pump's output queue.
    #[must_use]
    pub fn queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Validate and freeze the configuration.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` when the command is blank, the queue
    /// capacity or turn ceiling is zero, or the timeout is zero.
    pub fn build(self) -> Result<SessionConfig> {
        if self.process.command.trim().is_empty() {
            return Err(AppError::Config("process command must not be empty".into()));
        }
        if self.queue_capacity == 0 {
            return Err(AppError::Config(
                "queue_capacity must be greater than zero".into(),
            ));
        }
        if self.max_turns == Some(0) {
            return Err(AppError::Config(
                "max_turns must be greater than zero".into(),
            ));
        }
        if self.call_timeout == Some(Duration::ZERO) {
            return Err(AppError::Config(
                "call_timeout must be greater than zero".into(),
            ));
        }

        Ok(SessionConfig {
            process: self.process,
            max_turns: self.max_turns,
            call_timeout: self.call_timeout,
            queue_capacity: self.queue_capacity,
        })
    }
}

// ── BridgeConfig (TOML) ──────────────────────────────────────────────────────

/// Session limits section of the TOML file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct SessionSection {
    /// Cumulative turn ceiling.
    #[serde(default)]
    pub max_turns: Option<u32>,
    /// Per-send timeout in seconds.
    #[serde(default)]
    pub call_timeout_seconds: Option<u64>,
    /// Pump queue capacity.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

/// Policy section: ordered rules evaluated before any custom policies.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct PolicySection {
    /// Rules in evaluation order.
    #[serde(default)]
    pub rules: Vec<PolicyRule>,
}

/// Audit section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct AuditSection {
    /// Directory receiving `audit-YYYY-MM-DD.jsonl` files.
    pub log_dir: PathBuf,
}

/// Bridge configuration parsed from a TOML file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BridgeConfig {
    /// Child launch parameters.
    pub process: ProcessConfig,
    /// Session limits.
    #[serde(default)]
    pub session: SessionSection,
    /// Pattern rules.
    #[serde(default)]
    pub policy: PolicySection,
    /// Optional JSONL audit log.
    #[serde(default)]
    pub audit: Option<AuditSection>,
}

impl BridgeConfig {
    /// Load and validate configuration from a TOML file path.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if the file cannot be read, contains
    /// invalid TOML, or fails validation.
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = fs::read_to_string(path)
            .map_err(|err| AppError::Config(format!("failed to read config: {err}")))?;
        Self::from_toml_str(&raw)
    }

    /// Parse configuration from a TOML string and normalize paths.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Config` if parsing or validation fails.
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Build the immutable [`SessionConfig`].
    ///
    /// # Errors
    ///
    /// Propagates [`SessionConfigBuilder::build`] validation failures.
    pub fn session_config(&self) -> Result<SessionConfig> {
        let mut builder = SessionConfigBuilder::new(self.process.clone())
            .queue_capacity(self.session.queue_capacity);
        if let Some(max) = self.session.max_turns {
            builder = builder.max_turns(max);
        }
        if let Some(secs) = self.session.call_timeout_seconds {
            builder = builder.call_timeout(Duration::from_secs(secs));
        }
        builder.build()
    }

    /// Compile the configured rules into a [`PolicyChain`], in file order.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Policy` for an invalid glob or regex.
    pub fn policy_chain(&self) -> Result<PolicyChain> {
        let mut chain = PolicyChain::new();
        for rule in &self.policy.rules {
            chain.push(Arc::new(ToolPatternPolicy::from_rule(rule)?));
        }
        Ok(chain)
    }

    fn validate(&mut self) -> Result<()> {
        if self.process.command.trim().is_empty() {
            return Err(AppError::Config("process.command must not be empty".into()));
        }

        if self.session.queue_capacity == 0 {
            return Err(AppError::Config(
                "session.queue_capacity must be greater than zero".into(),
            ));
        }

        if let Some(dir) = self.process.working_dir.take() {
            let canonical = dir
                .canonicalize()
                .map_err(|err| AppError::Config(format!("process.working_dir invalid: {err}")))?;
            self.process.working_dir = Some(canonical);
        }

        for rule in &self.policy.rules {
            ToolPatternPolicy::from_rule(rule).map_err(|err| {
                AppError::Config(format!("invalid policy rule for '{}': {err}", rule.tool))
            })?;
        }

        Ok(())
    }
}
