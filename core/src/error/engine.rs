use thiserror::Error;

use super::ConfigError;
use crate::descriptor::Priority;
use crate::recovery::FailureRecord;
use crate::registry::{ExecutionResult, TaskId, TransitionError};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("no worker slot available within {waited_ms}ms")]
    CapacityExceeded { waited_ms: u64 },
    #[error("task {task_id} timed out after {timeout_ms}ms")]
    Timeout { task_id: TaskId, timeout_ms: u64 },
    #[error("task {task_id} failed (exit code {exit_code:?}): {diagnostic}")]
    ProcessFailure {
        task_id: TaskId,
        exit_code: Option<i32>,
        diagnostic: String,
    },
    #[error("invalid descriptor: {0}")]
    InvalidDescriptor(String),
    #[error("engine is degraded; {priority} priority work is not admitted")]
    Degraded { priority: Priority },
    #[error("recovery escalated after {} attempt(s)", .trail.len())]
    Escalated {
        trail: Vec<FailureRecord>,
        last: Box<ExecutionResult>,
    },
    #[error("low-priority work dropped after {} attempt(s)", .trail.len())]
    Dropped { trail: Vec<FailureRecord> },
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    #[error("task cancelled: {0}")]
    Cancelled(TaskId),
    #[error(transparent)]
    InvalidTransition(#[from] TransitionError),
    #[error("{0}")]
    Launch(String),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("persist error: {0}")]
    Persist(#[from] serde_json::Error),
}

impl EngineError {
    /// Stable machine-readable code for callers that route on error kind.
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::CapacityExceeded { .. } => "capacity_exceeded",
            EngineError::Timeout { .. } => "timeout",
            EngineError::ProcessFailure { .. } => "process_failure",
            EngineError::InvalidDescriptor(_) => "invalid_descriptor",
            EngineError::Degraded { .. } => "degraded",
            EngineError::Escalated { .. } => "escalated",
            EngineError::Dropped { .. } => "dropped",
            EngineError::TaskNotFound(_) => "task_not_found",
            EngineError::Cancelled(_) => "cancelled",
            EngineError::InvalidTransition(_) => "invalid_transition",
            EngineError::Launch(_) => "launch_failed",
            EngineError::Unsupported(_) => "unsupported",
            EngineError::Config(_) => "config",
            EngineError::Io(_) => "io",
            EngineError::Persist(_) => "persist",
        }
    }

    /// Whether resubmitting the same request later could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::CapacityExceeded { .. }
                | EngineError::Degraded { .. }
                | EngineError::Timeout { .. }
        )
    }

    /// Failure records accumulated before the engine gave up, if any.
    pub fn trail(&self) -> &[FailureRecord] {
        match self {
            EngineError::Escalated { trail, .. } | EngineError::Dropped { trail } => trail,
            _ => &[],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(
            EngineError::CapacityExceeded { waited_ms: 5 }.code(),
            "capacity_exceeded"
        );
        assert_eq!(
            EngineError::Degraded {
                priority: Priority::Low
            }
            .code(),
            "degraded"
        );
        assert_eq!(EngineError::InvalidDescriptor("x".into()).code(), "invalid_descriptor");
        assert_eq!(EngineError::Launch("nmap: gone".into()).code(), "launch_failed");
    }

    #[test]
    fn first_attempt_failures_carry_the_task() {
        let task_id = TaskId::new();
        let e = EngineError::Timeout {
            task_id,
            timeout_ms: 1_000,
        };
        assert_eq!(e.code(), "timeout");
        assert!(e.is_retryable());
        assert!(e.to_string().contains(&task_id.to_string()));

        let e = EngineError::ProcessFailure {
            task_id,
            exit_code: Some(2),
            diagnostic: "segfault".into(),
        };
        assert_eq!(e.code(), "process_failure");
        assert!(!e.is_retryable());
        assert!(e.to_string().ends_with("(exit code Some(2)): segfault"));
    }

    #[test]
    fn degraded_message_names_priority() {
        let e = EngineError::Degraded {
            priority: Priority::Low,
        };
        assert!(e.to_string().contains("low"));
        assert!(e.is_retryable());
        assert!(e.trail().is_empty());
    }
}
