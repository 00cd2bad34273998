//! # Maintenance Window Model
//!
//! Declarative periods during which callers may tolerate policy overrides.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ControlError, ControlResult};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    pub id: Uuid,
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub routing_policy_id: Option<Uuid>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
}

impl MaintenanceWindow {
    /// Window is enabled and `at` falls within `[start_time, end_time)`
    pub fn is_active_at(&self, at: DateTime<Utc>) -> bool {
        self.enabled && self.start_time <= at && at < self.end_time
    }
}

/// New MaintenanceWindow for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewMaintenanceWindow {
    pub name: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub routing_policy_id: Option<Uuid>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NewMaintenanceWindow {
    pub fn validate(&self) -> ControlResult<()> {
        if self.name.trim().is_empty() {
            return Err(ControlError::validation("maintenance window name is required"));
        }
        if self.end_time <= self.start_time {
            return Err(ControlError::validation(
                "maintenance window end_time must be after start_time",
            ));
        }
        Ok(())
    }

    pub fn into_window(self, now: DateTime<Utc>) -> MaintenanceWindow {
        MaintenanceWindow {
            id: Uuid::new_v4(),
            name: self.name,
            start_time: self.start_time,
            end_time: self.end_time,
            routing_policy_id: self.routing_policy_id,
            enabled: self.enabled,
            created_at: now,
        }
    }
}
