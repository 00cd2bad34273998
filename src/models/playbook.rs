//! # Playbook Models
//!
//! Named, parameterized step sequences plus the records of their executions.
//! Steps are stored as raw JSON objects; they are only decoded into typed
//! actions at execution time, so an unknown action is an execution error rather
//! than a definition error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::{ControlError, ControlResult};
use crate::state_machine::{PlaybookExecutionStatus, ScheduledPlaybookStatus};

/// Role that passes every playbook authorization check
pub const ADMIN_ROLE: &str = "admin";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playbook {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Value>,
    pub parameters: Value,
    pub allowed_roles: Vec<String>,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Playbook {
    /// `admin` is always permitted regardless of `allowed_roles`
    pub fn permits_role(&self, role: &str) -> bool {
        role == ADMIN_ROLE || self.allowed_roles.iter().any(|allowed| allowed == role)
    }
}

/// New Playbook for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPlaybook {
    pub name: String,
    pub description: Option<String>,
    pub steps: Vec<Value>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub allowed_roles: Vec<String>,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_enabled() -> bool {
    true
}

impl NewPlaybook {
    pub fn validate(&self) -> ControlResult<()> {
        if self.name.trim().is_empty() {
            return Err(ControlError::validation("playbook name is required"));
        }
        if self.steps.is_empty() {
            return Err(ControlError::validation("playbook must declare at least one step"));
        }
        for (index, step) in self.steps.iter().enumerate() {
            let has_action = step
                .as_object()
                .and_then(|obj| obj.get("action"))
                .map(Value::is_string)
                .unwrap_or(false);
            if !has_action {
                return Err(ControlError::validation(format!(
                    "step {index} must be an object with a string 'action'"
                )));
            }
        }
        Ok(())
    }

    pub fn into_playbook(self, now: DateTime<Utc>) -> Playbook {
        Playbook {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            steps: self.steps,
            parameters: self.parameters,
            allowed_roles: self.allowed_roles,
            enabled: self.enabled,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of one executed step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub index: usize,
    pub action: String,
    pub success: bool,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybookExecution {
    pub id: Uuid,
    pub playbook_id: Uuid,
    pub parameters: Map<String, Value>,
    pub status: PlaybookExecutionStatus,
    pub executed_by: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result: Vec<StepOutcome>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledPlaybookExecution {
    pub id: Uuid,
    pub playbook_id: Uuid,
    pub parameters: Map<String, Value>,
    pub scheduled_at: DateTime<Utc>,
    pub status: ScheduledPlaybookStatus,
    pub execution_id: Option<Uuid>,
    pub executed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub created_by: String,
    pub created_by_role: String,
    pub created_at: DateTime<Utc>,
}

/// New ScheduledPlaybookExecution for creation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewScheduledPlaybook {
    pub playbook_id: Uuid,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    pub scheduled_at: DateTime<Utc>,
    pub created_by: String,
    pub created_by_role: String,
}

impl NewScheduledPlaybook {
    pub fn into_scheduled(self, now: DateTime<Utc>) -> ScheduledPlaybookExecution {
        ScheduledPlaybookExecution {
            id: Uuid::new_v4(),
            playbook_id: self.playbook_id,
            parameters: self.parameters,
            scheduled_at: self.scheduled_at,
            status: ScheduledPlaybookStatus::Pending,
            execution_id: None,
            executed_at: None,
            result: None,
            created_by: self.created_by,
            created_by_role: self.created_by_role,
            created_at: now,
        }
    }
}
