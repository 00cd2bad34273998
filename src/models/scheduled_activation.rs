//! # Scheduled Activation Model
//!
//! A deferred IS-05 activation of a flow onto a set of receivers. Status moves
//! through [`ScheduledActivationStatus`]; see `crate::state_machine`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

use crate::error::{ControlError, ControlResult};
use crate::state_machine::ScheduledActivationStatus;

/// Dispatch mode of an activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivationMode {
    /// Submission order, receivers patched concurrently
    Immediate,
    /// Ordered by media format, receivers patched one after another
    SafeSwitch,
}

impl fmt::Display for ActivationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Immediate => write!(f, "immediate"),
            Self::SafeSwitch => write!(f, "safe_switch"),
        }
    }
}

impl std::str::FromStr for ActivationMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "immediate" => Ok(Self::Immediate),
            "safe_switch" => Ok(Self::SafeSwitch),
            _ => Err(format!("Invalid activation mode: {s}")),
        }
    }
}

impl Default for ActivationMode {
    fn default() -> Self {
        Self::Immediate
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledActivation {
    pub id: Uuid,
    pub flow_id: String,
    pub receiver_ids: Vec<String>,
    pub is05_base_url: String,
    pub sender_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    pub mode: ActivationMode,
    pub status: ScheduledActivationStatus,
    pub executed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
}

/// New ScheduledActivation for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledActivation {
    pub flow_id: String,
    pub receiver_ids: Vec<String>,
    pub is05_base_url: String,
    pub sender_id: Option<String>,
    pub scheduled_at: DateTime<Utc>,
    #[serde(default)]
    pub mode: ActivationMode,
    pub created_by: String,
}

impl NewScheduledActivation {
    pub fn validate(&self) -> ControlResult<()> {
        if self.flow_id.trim().is_empty() {
            return Err(ControlError::validation("flow_id is required"));
        }
        if self.receiver_ids.is_empty() {
            return Err(ControlError::validation("receiver_ids must not be empty"));
        }
        if self.is05_base_url.trim().is_empty() {
            return Err(ControlError::validation("is05_base_url is required"));
        }
        Ok(())
    }

    pub fn into_activation(self, now: DateTime<Utc>) -> ScheduledActivation {
        ScheduledActivation {
            id: Uuid::new_v4(),
            flow_id: self.flow_id,
            receiver_ids: self.receiver_ids,
            is05_base_url: self.is05_base_url,
            sender_id: self.sender_id,
            scheduled_at: self.scheduled_at,
            mode: self.mode,
            status: ScheduledActivationStatus::Pending,
            executed_at: None,
            result: None,
            created_by: self.created_by,
            created_at: now,
        }
    }
}
