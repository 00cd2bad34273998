//! # Playbooks
//!
//! Declarative multi-step routing workflows with `{{name}}` parameter
//! templating and role gating, executed on demand or on a schedule.

pub mod engine;
pub mod runner;
pub mod steps;

pub use engine::{PlaybookEngine, PlaybookRunReport};
pub use runner::ScheduledPlaybookRunner;
pub use steps::{resolve_parameters, PlaybookStep};
