use super::states::Lifecycle;
use crate::error::{ControlError, ControlResult};

/// Reject `from -> to` unless the lifecycle allows it
pub fn ensure_transition<S: Lifecycle>(id: impl ToString, from: S, to: S) -> ControlResult<()> {
    if from.can_transition_to(to) {
        Ok(())
    } else {
        Err(ControlError::InvalidStateTransition {
            entity: S::ENTITY,
            id: id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_machine::ScheduledActivationStatus;

    #[test]
    fn test_cancel_after_execution_is_too_late() {
        let err = ensure_transition(
            "a-1",
            ScheduledActivationStatus::Executed,
            ScheduledActivationStatus::Cancelled,
        )
        .unwrap_err();
        assert_eq!(
            err.to_string(),
            "Invalid state transition for scheduled_activation a-1: executed -> cancelled"
        );
    }
}
