//! Locally implemented actions the child may ask the bridge to perform.
//!
//! A [`Capability`] is looked up by action name in a [`CapabilityRegistry`]
//! and executed with the (possibly rewritten) action input. Execution is
//! isolated by [`execute_isolated`]: panics become
//! [`AppError::Capability`] and cancellation becomes
//! [`AppError::Cancelled`].

use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::FutureExt;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::policy::chain::panic_message;
use crate::protocol::value::InputMap;
use crate::{AppError, Result};

/// Boxed future returned by [`Capability::execute`].
pub type CapabilityFuture<'a> = Pin<Box<dyn Future<Output = Result<Value>> + Send + 'a>>;

/// Context handed to a capability invocation.
#[derive(Debug, Clone)]
pub struct CapabilityContext {
    /// Session the request arrived on (may be empty before session init).
    pub session_id: String,
    /// Control request being fulfilled.
    pub request_id: String,
    /// Fires when the invoking dispatch is cancelled.
    pub cancel: CancellationToken,
}

/// An in-process implementation of a named action.
pub trait Capability: Send + Sync {
    /// Action name this capability answers to.
    fn name(&self) -> &str;

    /// Execute with structured `input`.
    ///
    /// # Errors
    ///
    /// Any error is reported to the child as a failure payload; it never
    /// reaches the session caller.
    fn execute(&self, ctx: CapabilityContext, input: InputMap) -> CapabilityFuture<'_>;
}

/// Capability backed by an async closure.
pub struct FnCapability<F> {
    name: String,
    run: F,
}

impl<F, Fut> FnCapability<F>
where
    F: Fn(CapabilityContext, InputMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    /// Wrap `run` under `name`.
    pub fn new(name: impl Into<String>, run: F) -> Self {
        Self {
            name: name.into(),
            run,
        }
    }
}

impl<F, Fut> Capability for FnCapability<F>
where
    F: Fn(CapabilityContext, InputMap) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Value>> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn execute(&self, ctx: CapabilityContext, input: InputMap) -> CapabilityFuture<'_> {
        Box::pin((self.run)(ctx, input))
    }
}

impl<F> std::fmt::Debug for FnCapability<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FnCapability")
            .field("name", &self.name)
            .finish()
    }
}

/// Lookup of capabilities by action name.
#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    entries: HashMap<String, Arc<dyn Capability>>,
}

impl CapabilityRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Register `capability`, replacing and returning any previous entry
    /// with the same name.
    pub fn register(&mut self, capability: Arc<dyn Capability>) -> Option<Arc<dyn Capability>> {
        let name = capability.name().to_owned();
        debug!(capability = %name, "registering capability");
        self.entries.insert(name, capability)
    }

    /// Register `capability`, builder style.
    #[must_use]
    pub fn with(mut self, capability: Arc<dyn Capability>) -> Self {
        self.register(capability);
        self
    }

    /// Look up a capability by action name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn Capability>> {
        self.entries.get(name).map(Arc::clone)
    }

    /// `true` when `name` is registered.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names, sorted.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.entries.keys().cloned().collect();
        names.sort();
        names
    }

    /// Number of registered capabilities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// `true` when nothing is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("names", &self.names())
            .finish()
    }
}

/// Execute `capability`, converting panics and cancellation into errors.
///
/// # Errors
///
/// - [`AppError::Cancelled`] when `ctx.cancel` fires first.
/// - [`AppError::Capability`] when the capability panics.
/// - Any error the capability itself returns.
pub async fn execute_isolated(
    capability: &dyn Capability,
    ctx: CapabilityContext,
    input: InputMap,
) -> Result<Value> {
    let cancel = ctx.cancel.clone();
    let request_id = ctx.request_id.clone();
    let run = AssertUnwindSafe(async move { capability.execute(ctx, input).await }).catch_unwind();

    tokio::select! {
        biased;

        () = cancel.cancelled() => {
            debug!(request_id, capability = capability.name(), "capability cancelled");
            Err(AppError::Cancelled(format!(
                "capability '{}' cancelled",
                capability.name()
            )))
        }

        outcome = run => match outcome {
            Ok(result) => result,
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(request_id, capability = capability.name(), error = %message, "capability panicked");
                Err(AppError::Capability(format!(
                    "capability '{}' panicked: {message}",
                    capability.name()
                )))
            }
        },
    }
}
