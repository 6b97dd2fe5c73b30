#![forbid(unsafe_code)]

//! Bridge to a child process speaking newline-delimited JSON over stdio.
//!
//! Decodes the child's output into typed [`Event`]s, answers its control
//! requests through a [`PolicyChain`] and optional local [`Capability`]s,
//! and exposes a [`Session`] for sending prompts.

pub mod audit;
pub mod capability;
pub mod config;
pub mod control;
pub mod errors;
pub mod policy;
pub mod process;
pub mod protocol;
pub mod pump;
pub mod session;

pub use capability::{Capability, CapabilityRegistry, FnCapability};
pub use config::{BridgeConfig, ConfigProvider, ProcessConfig, SessionConfig};
pub use errors::{AppError, Result, TurnLimitExceeded};
pub use policy::{Decision, Policy, PolicyChain, PolicyDecision};
pub use protocol::event::{Event, EventBody, TurnResult};
pub use session::{Session, SessionBuilder, TurnReport};
