//! # Schedule Calculator
//!
//! Pure next-due-time computation for automation jobs. Nothing here touches a
//! store or a clock; callers pass `from`/`now` explicitly.

pub mod cron;

use chrono::{DateTime, Duration, Utc};

use crate::models::{AutomationJob, ScheduleType};

pub use cron::CronSchedule;

/// Parsed form of a job's `(schedule_type, schedule_value)`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleSpec {
    Interval(Duration),
    Cron(CronSchedule),
}

impl ScheduleSpec {
    /// `None` when the value is malformed for its type
    pub fn parse(schedule_type: ScheduleType, schedule_value: &str) -> Option<Self> {
        match schedule_type {
            ScheduleType::Interval => {
                let seconds = schedule_value.trim().parse::<i64>().ok()?;
                if seconds <= 0 {
                    return None;
                }
                Some(Self::Interval(Duration::seconds(seconds)))
            }
            ScheduleType::Cron => CronSchedule::parse(schedule_value).map(Self::Cron),
        }
    }
}

/// Next time `job` is due, evaluated from `from`.
///
/// Interval jobs that never ran are due at `from`; otherwise at
/// `last_run_at + interval`. Cron jobs are due at the first matching minute
/// after `from`.
pub fn next_run(job: &AutomationJob, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match ScheduleSpec::parse(job.schedule_type, &job.schedule_value)? {
        ScheduleSpec::Interval(interval) => match job.last_run_at {
            None => Some(from),
            Some(last_run_at) => last_run_at.checked_add_signed(interval),
        },
        ScheduleSpec::Cron(schedule) => schedule.next_after(from),
    }
}

/// True iff the job is due at `now`.
///
/// Interval jobs use `next_run(job, now)`. Cron jobs are evaluated from their
/// last run (or from the minute before `now` when they never ran), since a
/// search starting after `now` could never be due.
pub fn should_run(job: &AutomationJob, now: DateTime<Utc>) -> bool {
    match ScheduleSpec::parse(job.schedule_type, &job.schedule_value) {
        None => false,
        Some(ScheduleSpec::Interval(_)) => next_run(job, now).is_some_and(|due| due <= now),
        Some(ScheduleSpec::Cron(schedule)) => {
            let reference = job.last_run_at.unwrap_or(now - Duration::minutes(1));
            schedule.next_after(reference).is_some_and(|due| due <= now)
        }
    }
}
