//! Task state transition rules.

use thiserror::Error;

use super::task::TaskState;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransitionError {
    #[error("invalid task transition from {from} to {to}")]
    InvalidTransition { from: TaskState, to: TaskState },
    #[error("task already finished in terminal state {state}")]
    FromTerminalState { state: TaskState },
}

pub struct TaskTransition;

impl TaskTransition {
    pub fn validate(from: TaskState, to: TaskState) -> Result<(), TransitionError> {
        if Self::is_terminal(from) {
            return Err(TransitionError::FromTerminalState { state: from });
        }

        let is_valid = match (from, to) {
            (TaskState::Queued, TaskState::Running) => true,
            // cache hit or cancelled admission
            (TaskState::Queued, TaskState::Succeeded) => true,
            (TaskState::Queued, TaskState::Cancelled) => true,
            (TaskState::Running, to) => Self::is_terminal(to),
            _ => false,
        };

        if is_valid {
            Ok(())
        } else {
            Err(TransitionError::InvalidTransition { from, to })
        }
    }

    pub fn is_terminal(state: TaskState) -> bool {
        matches!(
            state,
            TaskState::Succeeded | TaskState::Failed | TaskState::TimedOut | TaskState::Cancelled
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(TaskTransition::validate(TaskState::Queued, TaskState::Running).is_ok());
        assert!(TaskTransition::validate(TaskState::Queued, TaskState::Succeeded).is_ok());
        assert!(TaskTransition::validate(TaskState::Queued, TaskState::Cancelled).is_ok());
        for to in [
            TaskState::Succeeded,
            TaskState::Failed,
            TaskState::TimedOut,
            TaskState::Cancelled,
        ] {
            assert!(TaskTransition::validate(TaskState::Running, to).is_ok());
        }
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(matches!(
            TaskTransition::validate(TaskState::Queued, TaskState::Failed),
            Err(TransitionError::InvalidTransition { .. })
        ));
        assert!(TaskTransition::validate(TaskState::Queued, TaskState::TimedOut).is_err());
        assert!(TaskTransition::validate(TaskState::Running, TaskState::Queued).is_err());
        assert!(TaskTransition::validate(TaskState::Running, TaskState::Running).is_err());
    }

    #[test]
    fn test_terminal_is_final() {
        for from in [
            TaskState::Succeeded,
            TaskState::Failed,
            TaskState::TimedOut,
            TaskState::Cancelled,
        ] {
            assert!(TaskTransition::is_terminal(from));
            assert_eq!(
                TaskTransition::validate(from, TaskState::Running),
                Err(TransitionError::FromTerminalState { state: from })
            );
        }
        assert!(!TaskTransition::is_terminal(TaskState::Queued));
    }
}
