use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::Instrument;

use super::engine::Engine;
use super::types::ExecutionReport;
use crate::descriptor::CommandDescriptor;
use crate::error::EngineError;
use crate::recovery::{Lineage, RecoveryAction};
use crate::registry::{ExecutionResult, Task, TaskId, TaskState};
use crate::util::tail;

impl Engine {
    /// Submit and wait, applying recovery on failure until the lineage
    /// succeeds, escalates or is dropped.
    pub async fn execute(&self, descriptor: CommandDescriptor) -> Result<ExecutionReport, EngineError> {
        descriptor.validate(self.config().pool.max_timeout())?;
        let span = tracing::info_span!(
            "execute",
            tool = %descriptor.tool,
            target = %descriptor.target,
            fingerprint = %descriptor.fingerprint().short()
        );
        self.execute_lineage(descriptor).instrument(span).await
    }

    /// [`execute`](Self::execute) on a spawned task.
    pub fn spawn_execute(
        &self,
        descriptor: CommandDescriptor,
    ) -> JoinHandle<Result<ExecutionReport, EngineError>> {
        let engine = self.clone();
        tokio::spawn(async move { engine.execute(descriptor).await })
    }

    async fn execute_lineage(&self, descriptor: CommandDescriptor) -> Result<ExecutionReport, EngineError> {
        let mut lineage = Lineage::new(&descriptor, self.recovery().config().retry_budget);
        let mut current = Arc::new(descriptor);
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let id = match self.submit_shared(current.clone()).await {
                Ok(id) => id,
                Err(EngineError::Degraded { .. }) if attempts > 1 => {
                    tracing::warn!(attempts, "retry refused while degraded; dropping lineage");
                    return Err(EngineError::Dropped {
                        trail: lineage.into_trail(),
                    });
                }
                Err(e) => return Err(e),
            };
            let task = self.wait_terminal(id, &current).await?;
            let result = task.to_result();

            match result.state {
                TaskState::Succeeded => {
                    return Ok(ExecutionReport {
                        result,
                        descriptor: (*current).clone(),
                        attempts,
                        trail: lineage.into_trail(),
                    })
                }
                TaskState::Cancelled => return Err(EngineError::Cancelled(id)),
                _ => {}
            }

            match self.recovery().decide(&mut lineage, &current, &result) {
                RecoveryAction::RetrySame { delay } => {
                    tokio::time::sleep(delay).await;
                }
                RecoveryAction::RetryAdjusted { descriptor, delay }
                | RecoveryAction::SubstituteTool { descriptor, delay } => {
                    if let Err(e) = descriptor.validate(self.config().pool.max_timeout()) {
                        tracing::warn!(
                            tool = %descriptor.tool,
                            error = %e,
                            "recovery produced an invalid descriptor; escalating"
                        );
                        return Err(EngineError::Escalated {
                            trail: lineage.into_trail(),
                            last: Box::new(result),
                        });
                    }
                    current = Arc::new(descriptor);
                    tokio::time::sleep(delay).await;
                }
                RecoveryAction::Escalate => return Err(escalation(lineage, result, &current)),
                RecoveryAction::Drop => {
                    return Err(EngineError::Dropped {
                        trail: lineage.into_trail(),
                    })
                }
            }
        }
    }

    async fn wait_terminal(&self, id: TaskId, descriptor: &CommandDescriptor) -> Result<Task, EngineError> {
        // The worker enforces the timeout itself; this only bounds each wait.
        let step = descriptor.timeout()
            + self.config().pool.terminate_grace() * 2
            + Duration::from_secs(1);
        loop {
            let task = self.await_task(id, step).await?;
            if task.is_terminal() {
                return Ok(task);
            }
        }
    }
}

/// A lineage that never retried reports the failure itself; otherwise the
/// caller gets the whole trail.
fn escalation(lineage: Lineage, last: ExecutionResult, descriptor: &CommandDescriptor) -> EngineError {
    if lineage.retries() > 0 {
        return EngineError::Escalated {
            trail: lineage.into_trail(),
            last: Box::new(last),
        };
    }
    if last.launch_failed {
        let reason = last.diagnostic.as_deref().unwrap_or("process did not start");
        return EngineError::Launch(format!("{}: {reason}", last.tool));
    }
    match last.state {
        TaskState::TimedOut => EngineError::Timeout {
            task_id: last.task_id,
            timeout_ms: descriptor.timeout_ms,
        },
        _ => EngineError::ProcessFailure {
            task_id: last.task_id,
            exit_code: last.exit_code,
            diagnostic: tail(last.failure_text().trim(), DIAGNOSTIC_TAIL),
        },
    }
}

const DIAGNOSTIC_TAIL: usize = 512;
