use serde::{Deserialize, Serialize};
use std::fmt;

/// Common surface of the status enums so guards can treat them uniformly
pub trait Lifecycle: Copy + PartialEq + fmt::Display {
    /// Entity name used in transition errors
    const ENTITY: &'static str;

    /// Check if this is a terminal state (no further transitions allowed)
    fn is_terminal(&self) -> bool;

    /// Check if `next` is a legal successor of this state
    fn can_transition_to(&self, next: Self) -> bool;
}

/// Scheduled activation status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledActivationStatus {
    /// Waiting for `scheduled_at`; the only cancellable state
    Pending,
    /// Claimed by the activation runner
    Executing,
    /// At least one receiver accepted the patch
    Executed,
    /// No receiver accepted the patch, or the flow could not be resolved
    Failed,
    /// Cancelled by an operator before execution
    Cancelled,
}

impl Lifecycle for ScheduledActivationStatus {
    const ENTITY: &'static str = "scheduled_activation";

    fn is_terminal(&self) -> bool {
        matches!(self, Self::Executed | Self::Failed | Self::Cancelled)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Executing, Self::Executed)
                | (Self::Executing, Self::Failed)
        )
    }
}

impl fmt::Display for ScheduledActivationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing => write!(f, "executing"),
            Self::Executed => write!(f, "executed"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ScheduledActivationStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "executing" => Ok(Self::Executing),
            "executed" => Ok(Self::Executed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid scheduled activation status: {s}")),
        }
    }
}

/// Playbook execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybookExecutionStatus {
    /// Created before the first step runs
    Running,
    /// Every step succeeded
    Success,
    /// A step failed and execution stopped there
    Error,
}

impl Lifecycle for PlaybookExecutionStatus {
    const ENTITY: &'static str = "playbook_execution";

    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Running, Self::Success) | (Self::Running, Self::Error)
        )
    }
}

impl fmt::Display for PlaybookExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
        }
    }
}

impl std::str::FromStr for PlaybookExecutionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            _ => Err(format!("Invalid playbook execution status: {s}")),
        }
    }
}

/// Scheduled playbook execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduledPlaybookStatus {
    Pending,
    Executing,
    /// The produced execution finished with `success`
    Success,
    /// The produced execution finished with `error`
    Error,
    /// The playbook could not be run at all (missing, disabled, unauthorized)
    Failed,
    Cancelled,
}

impl Lifecycle for ScheduledPlaybookStatus {
    const ENTITY: &'static str = "scheduled_playbook_execution";

    fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Executing)
    }

    fn can_transition_to(&self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Pending, Self::Executing)
                | (Self::Pending, Self::Cancelled)
                | (Self::Executing, Self::Success)
                | (Self::Executing, Self::Error)
                | (Self::Executing, Self::Failed)
        )
    }
}

impl fmt::Display for ScheduledPlaybookStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Executing => write!(f, "executing"),
            Self::Success => write!(f, "success"),
            Self::Error => write!(f, "error"),
            Self::Failed => write!(f, "failed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl std::str::FromStr for ScheduledPlaybookStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "executing" => Ok(Self::Executing),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(format!("Invalid scheduled playbook status: {s}")),
        }
    }
}

impl Default for ScheduledActivationStatus {
    fn default() -> Self {
        Self::Pending
    }
}

impl Default for ScheduledPlaybookStatus {
    fn default() -> Self {
        Self::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_activation_terminal_check() {
        assert!(ScheduledActivationStatus::Executed.is_terminal());
        assert!(ScheduledActivationStatus::Failed.is_terminal());
        assert!(ScheduledActivationStatus::Cancelled.is_terminal());
        assert!(!ScheduledActivationStatus::Pending.is_terminal());
        assert!(!ScheduledActivationStatus::Executing.is_terminal());
    }

    #[test]
    fn test_activation_transitions() {
        use ScheduledActivationStatus::*;
        assert!(Pending.can_transition_to(Cancelled));
        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Executed));
        assert!(!Executing.can_transition_to(Cancelled));
        assert!(!Executed.can_transition_to(Cancelled));
        assert!(!Failed.can_transition_to(Cancelled));
        assert!(!Pending.can_transition_to(Executed));
    }

    #[test]
    fn test_scheduled_playbook_transitions() {
        use ScheduledPlaybookStatus::*;
        assert!(Pending.can_transition_to(Executing));
        assert!(Executing.can_transition_to(Failed));
        assert!(!Executing.can_transition_to(Cancelled));
        assert!(!Success.can_transition_to(Pending));
    }

    #[test]
    fn test_state_string_conversion() {
        assert_eq!(ScheduledActivationStatus::Executing.to_string(), "executing");
        assert_eq!(
            "safe".parse::<ScheduledActivationStatus>().ok(),
            None
        );
        assert_eq!(
            "error".parse::<PlaybookExecutionStatus>().unwrap(),
            PlaybookExecutionStatus::Error
        );
    }

    #[test]
    fn test_state_serde() {
        let status = ScheduledPlaybookStatus::Executing;
        let json = serde_json::to_string(&status).unwrap();
        assert_eq!(json, "\"executing\"");

        let parsed: ScheduledPlaybookStatus = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, status);
    }
}
