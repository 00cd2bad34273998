//! Status lifecycles for scheduled and executed work.
//!
//! Stores apply these rules to every status write; the Postgres store encodes the
//! same rules as conditional `UPDATE ... WHERE status = ...` statements.

pub mod guards;
pub mod states;

pub use guards::ensure_transition;
pub use states::{
    Lifecycle, PlaybookExecutionStatus, ScheduledActivationStatus, ScheduledPlaybookStatus,
};
