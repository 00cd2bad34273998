//! # Automation Jobs
//!
//! Interval/cron triggered maintenance checks. The job id selects the built-in
//! check; ids without a built-in are skipped.

pub mod checks;
pub mod runner;

pub use checks::{detect_collisions, nmos_consistency, AutomationChecks, BuiltinCheck};
pub use runner::AutomationJobRunner;
