#![allow(clippy::doc_markdown)] // Allow technical terms like PostgreSQL, SQLx in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # NMOS Control Core
//!
//! Orchestration and scheduling core for NMOS routing control.
//!
//! ## Overview
//!
//! The core turns a routing intent ("put flow F on receivers R1..Rn") into
//! policy-checked, correctly ordered IS-05 staged-endpoint PATCH calls, records
//! the intended connection state of every receiver, and drives deferred work:
//! scheduled activations, scheduled playbook executions and automation jobs.
//!
//! ## Module Organization
//!
//! - [`models`] - Plain data types for policies, connections, schedules and playbooks
//! - [`store`] - Async store traits with in-memory and PostgreSQL implementations
//! - [`registry`] - Read-only flow and NMOS registry collaborators
//! - [`policy`] - Routing policy evaluation and audit
//! - [`is05`] - IS-05 staged-endpoint request shape and HTTP client
//! - [`orchestration`] - Activation orchestrator, playbooks, automation and runners
//! - [`schedule`] - Interval and cron schedule evaluation
//! - [`state_machine`] - Status lifecycles for scheduled and executed work
//! - [`events`] - Connection change broadcast
//! - [`config`] - Layered configuration
//! - [`logging`] / [`metrics`] - Tracing subscriber setup and OpenTelemetry instruments
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use nmos_control::config::ControlConfig;
//! use nmos_control::is05::HttpConnectionApi;
//! use nmos_control::orchestration::OrchestrationCore;
//! use nmos_control::registry::MemoryRegistry;
//! use nmos_control::store::MemoryStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = ControlConfig::default();
//! let registry = Arc::new(MemoryRegistry::new());
//! let api = Arc::new(HttpConnectionApi::new(&config.is05)?);
//!
//! let mut core = OrchestrationCore::bootstrap(
//!     Arc::new(MemoryStore::new()),
//!     registry.clone(),
//!     registry,
//!     api,
//!     config,
//! );
//! core.start();
//! // ...
//! core.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod events;
pub mod is05;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestration;
pub mod policy;
pub mod registry;
pub mod schedule;
pub mod state_machine;
pub mod store;

pub use config::{ConfigLoader, ControlConfig};
pub use error::{ControlError, ControlResult, RemoteCallError};
pub use events::{ControlEvent, EventPublisher};
pub use models::Actor;
pub use orchestration::{
    ActivationReport, ActivationRequest, ConnectionActivationOrchestrator, OrchestrationCore,
    PlaybookEngine,
};
pub use policy::RoutingPolicyEngine;
pub use store::{ControlStore, MemoryStore, PgStore};
