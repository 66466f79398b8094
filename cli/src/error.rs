use hexrun_core::api::EngineError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CliError {
    #[error("config error: {0}")]
    Config(String),
    #[error("invalid input: {0}")]
    Input(String),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("{failed} of {total} task(s) did not succeed")]
    Incomplete { failed: usize, total: usize },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

/// Process exit code for an error.
///
/// 0: success
/// 11: config error
/// 12: invalid input or descriptor
/// 20: launch / IO error
/// 30: the work ran and did not succeed (failed, timed out, escalated, dropped)
/// 31: the work was not admitted (capacity, degraded mode)
/// 50: internal/uncategorized
pub fn exit_code_for_error(e: &CliError) -> i32 {
    match e {
        CliError::Config(_) => 11,
        CliError::Input(_) => 12,
        CliError::Engine(ee) => match ee {
            EngineError::Config(_) => 11,
            EngineError::InvalidDescriptor(_) => 12,
            EngineError::Launch(_) | EngineError::Io(_) => 20,
            EngineError::Timeout { .. }
            | EngineError::ProcessFailure { .. }
            | EngineError::Escalated { .. }
            | EngineError::Dropped { .. }
            | EngineError::Cancelled(_) => 30,
            EngineError::CapacityExceeded { .. } | EngineError::Degraded { .. } => 31,
            EngineError::TaskNotFound(_)
            | EngineError::InvalidTransition(_)
            | EngineError::Unsupported(_)
            | EngineError::Persist(_) => 50,
        },
        CliError::Incomplete { .. } => 30,
        CliError::Io(_) => 20,
        CliError::Anyhow(_) => 50,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hexrun_core::api::Priority;

    #[test]
    fn exit_codes_by_category() {
        assert_eq!(exit_code_for_error(&CliError::Config("x".into())), 11);
        assert_eq!(
            exit_code_for_error(&CliError::Engine(EngineError::InvalidDescriptor("x".into()))),
            12
        );
        assert_eq!(
            exit_code_for_error(&CliError::Engine(EngineError::Degraded {
                priority: Priority::Low
            })),
            31
        );
        assert_eq!(
            exit_code_for_error(&CliError::Engine(EngineError::Dropped { trail: Vec::new() })),
            30
        );
        assert_eq!(
            exit_code_for_error(&CliError::Incomplete {
                failed: 1,
                total: 3
            }),
            30
        );
    }
}
