//! # Orchestration Engine
//!
//! Turns routing intents into ordered, policy-checked IS-05 calls and drives
//! deferred work to completion.
//!
//! ## Core Components
//!
//! - [`ConnectionStateStore`]: intended receiver state, history and change events
//! - [`ConnectionActivationOrchestrator`]: one logical activation over many receivers
//! - [`ScheduledActivationRunner`]: background loop for due scheduled activations
//! - [`PlaybookEngine`] / [`ScheduledPlaybookRunner`]: multi-step workflows
//! - [`AutomationJobRunner`]: interval/cron triggered built-in checks
//! - [`OrchestrationCore`]: wires the above over one store and owns the loops
//!
//! The three runners share nothing but the store. Each processes its due work
//! strictly one item at a time.

pub mod activation;
pub mod activation_runner;
pub mod automation;
pub mod bootstrap;
pub mod connection_state;
pub mod ordering;
pub mod playbook;

pub use activation::{
    ActivationOutcome, ActivationReport, ActivationRequest, ConnectionActivationOrchestrator,
    ReceiverPatchResult,
};
pub use activation_runner::ScheduledActivationRunner;
pub use automation::{AutomationChecks, AutomationJobRunner, BuiltinCheck};
pub use bootstrap::OrchestrationCore;
pub use connection_state::ConnectionStateStore;
pub use ordering::order_receivers;
pub use playbook::{PlaybookEngine, PlaybookRunReport, PlaybookStep, ScheduledPlaybookRunner};
