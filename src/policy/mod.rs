//! # Routing Policy Engine
//!
//! Evaluates a sender→receiver connection intent against the enabled routing
//! policies and records one audit row per check.

pub mod engine;
pub mod patterns;

pub use engine::{ConnectionIntent, PolicyViolation, RoutingPolicyEngine};
pub use patterns::matches_pattern;
