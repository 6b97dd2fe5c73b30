//! Session assembly.

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite};

use super::Session;
use crate::audit::{AuditDispatcher, AuditSink};
use crate::capability::{Capability, CapabilityRegistry};
use crate::config::SessionConfig;
use crate::policy::{Policy, PolicyChain};
use crate::process::{spawn_process, ProcessHandle};
use crate::Result;

/// Collects policies, capabilities and an optional audit sink, then starts
/// a [`Session`].
pub struct SessionBuilder {
    config: SessionConfig,
    policies: PolicyChain,
    capabilities: CapabilityRegistry,
    audit: Option<Arc<dyn AuditSink>>,
}

impl SessionBuilder {
    /// Start from `config` with an empty policy chain and no capabilities.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            config,
            policies: PolicyChain::new(),
            capabilities: CapabilityRegistry::new(),
            audit: None,
        }
    }

    /// Append one policy to the chain.
    #[must_use]
    pub fn policy(mut self, policy: Arc<dyn Policy>) -> Self {
        self.policies.push(policy);
        self
    }

    /// Append every policy of `chain`, keeping its order.
    #[must_use]
    pub fn policies(mut self, chain: PolicyChain) -> Self {
        self.policies.extend(chain);
        self
    }

    /// Register a local capability.
    #[must_use]
    pub fn capability(mut self, capability: Arc<dyn Capability>) -> Self {
        self.capabilities.register(capability);
        self
    }

    /// Replace the capability registry.
    #[must_use]
    pub fn capabilities(mut self, registry: CapabilityRegistry) -> Self {
        self.capabilities = registry;
        self
    }

    /// Deliver audit records to `sink`.
    #[must_use]
    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit = Some(sink);
        self
    }

    /// Launch the configured child and start the session.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Start` when the child cannot be launched.
    pub fn start(self) -> Result<Session> {
        let process = spawn_process(self.config.process())?;
        self.assemble(process)
    }

    /// Start the session over caller-supplied pipes instead of a child
    /// process. `output` plays the child's stdout, `input` its stdin.
    ///
    /// Must be called from within a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `AppError::Start` if the output stream cannot be attached.
    pub fn connect<R, W>(self, output: R, input: W) -> Result<Session>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let process = ProcessHandle::from_pipes(Box::new(output), Box::new(input));
        self.assemble(process)
    }

    fn assemble(self, process: ProcessHandle) -> Result<Session> {
        let audit = match self.audit {
            Some(sink) => AuditDispatcher::new(sink),
            None => AuditDispatcher::disabled(),
        };
        Session::assemble(
            self.config,
            Arc::new(self.policies),
            Arc::new(self.capabilities),
            process,
            audit,
        )
    }
}

impl std::fmt::Debug for SessionBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionBuilder")
            .field("config", &self.config)
            .field("policies", &self.policies)
            .field("capabilities", &self.capabilities)
            .field("audit", &self.audit.is_some())
            .finish()
    }
}
