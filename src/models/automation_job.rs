//! # Automation Job Model
//!
//! Periodic built-in maintenance checks. The `job_id` doubles as the selector
//! for which built-in check runs (see `crate::orchestration::automation::BuiltinCheck`).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// How `schedule_value` is interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleType {
    /// `schedule_value` is a positive number of seconds
    Interval,
    /// `schedule_value` is a 5-field cron expression
    Cron,
}

impl fmt::Display for ScheduleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Interval => write!(f, "interval"),
            Self::Cron => write!(f, "cron"),
        }
    }
}

impl std::str::FromStr for ScheduleType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "interval" => Ok(Self::Interval),
            "cron" => Ok(Self::Cron),
            _ => Err(format!("Invalid schedule type: {s}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationJob {
    pub job_id: String,
    pub job_type: String,
    pub enabled: bool,
    pub schedule_type: ScheduleType,
    pub schedule_value: String,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_status: Option<String>,
    pub last_run_result: Option<Value>,
    pub updated_at: DateTime<Utc>,
}

impl AutomationJob {
    /// Job definition that has never run
    pub fn new(
        job_id: impl Into<String>,
        job_type: impl Into<String>,
        schedule_type: ScheduleType,
        schedule_value: impl Into<String>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            job_type: job_type.into(),
            enabled: true,
            schedule_type,
            schedule_value: schedule_value.into(),
            last_run_at: None,
            last_run_status: None,
            last_run_result: None,
            updated_at: Utc::now(),
        }
    }
}

/// Outcome written back onto the job after a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRunRecord {
    pub ran_at: DateTime<Utc>,
    pub status: String,
    pub result: Value,
}

/// Stored output of a built-in check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckerResult {
    pub id: uuid::Uuid,
    pub kind: String,
    pub result: Value,
    pub checked_at: DateTime<Utc>,
}
