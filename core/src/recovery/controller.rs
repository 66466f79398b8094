use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::backoff::BackoffStrategy;
use super::classifier::{classify, Classification, FailureCause, FailureKind};
use super::degradation::DegradationMonitor;
use super::lineage::Lineage;
use crate::catalog::{ToolCatalog, ToolParams};
use crate::config::RecoveryConfig;
use crate::descriptor::{CommandDescriptor, Priority};
use crate::registry::{ExecutionResult, TaskId, TaskState};
use crate::util::tail;

const DIAGNOSTIC_LIMIT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    RetrySame {
        delay: Duration,
    },
    RetryAdjusted {
        descriptor: CommandDescriptor,
        delay: Duration,
    },
    SubstituteTool {
        descriptor: CommandDescriptor,
        delay: Duration,
    },
    Escalate,
    Drop,
}

impl RecoveryAction {
    pub fn kind(&self) -> ActionKind {
        match self {
            RecoveryAction::RetrySame { .. } => ActionKind::RetrySame,
            RecoveryAction::RetryAdjusted { .. } => ActionKind::RetryAdjusted,
            RecoveryAction::SubstituteTool { .. } => ActionKind::SubstituteTool,
            RecoveryAction::Escalate => ActionKind::Escalate,
            RecoveryAction::Drop => ActionKind::Drop,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    RetrySame,
    RetryAdjusted,
    SubstituteTool,
    Escalate,
    Drop,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureRecord {
    pub task_id: TaskId,
    pub tool: String,
    pub state: TaskState,
    pub kind: FailureKind,
    pub cause: FailureCause,
    pub confidence: f64,
    pub diagnostic: String,
    pub action: ActionKind,
    pub recorded_at: DateTime<Utc>,
}

/// Turns a classified failure into the next step for its lineage.
pub struct RecoveryController {
    cfg: RecoveryConfig,
    max_timeout: Duration,
    backoff: Arc<dyn BackoffStrategy>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    degradation: Arc<DegradationMonitor>,
}

impl RecoveryController {
    pub fn new(
        cfg: RecoveryConfig,
        max_timeout: Duration,
        backoff: Arc<dyn BackoffStrategy>,
        catalog: Option<Arc<dyn ToolCatalog>>,
        degradation: Arc<DegradationMonitor>,
    ) -> Self {
        Self {
            cfg,
            max_timeout,
            backoff,
            catalog,
            degradation,
        }
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.cfg
    }

    /// Classify `result` (a failed or timed-out run of `descriptor`), choose
    /// the next action and append the failure record to the lineage.
    pub fn decide(
        &self,
        lineage: &mut Lineage,
        descriptor: &CommandDescriptor,
        result: &ExecutionResult,
    ) -> RecoveryAction {
        let class = classify(result);
        let degraded = self.degradation.is_degraded();

        let action = if lineage.is_exhausted() {
            self.give_up(descriptor, degraded)
        } else {
            match self.plan(lineage, descriptor, class, degraded) {
                Some(action) if lineage.consume() => action,
                _ => self.give_up(descriptor, degraded),
            }
        };

        tracing::info!(
            task_id = %result.task_id,
            tool = %descriptor.tool,
            cause = %class.cause,
            confidence = class.confidence,
            action = ?action.kind(),
            remaining = lineage.remaining(),
            "recovery decision"
        );

        lineage.record(FailureRecord {
            task_id: result.task_id,
            tool: descriptor.tool.clone(),
            state: result.state,
            kind: class.kind,
            cause: class.cause,
            confidence: class.confidence,
            diagnostic: tail(&result.failure_text(), DIAGNOSTIC_LIMIT),
            action: action.kind(),
            recorded_at: Utc::now(),
        });
        action
    }

    fn plan(
        &self,
        lineage: &mut Lineage,
        descriptor: &CommandDescriptor,
        class: Classification,
        degraded: bool,
    ) -> Option<RecoveryAction> {
        let mut widen = if degraded {
            self.cfg.degraded_backoff_multiplier
        } else {
            1.0
        };
        let attempt = lineage.retries();

        match class.kind {
            FailureKind::Transient if class.cause == FailureCause::Timeout => {
                let delay = self.delay(attempt, class.cause, widen);
                let current = descriptor.timeout();
                let grown = current
                    .mul_f64(self.cfg.timeout_multiplier)
                    .min(self.max_timeout);
                let args = self.adjusted_args(descriptor, class.cause);
                if grown <= current && args.is_none() {
                    return Some(RecoveryAction::RetrySame { delay });
                }
                let mut next = descriptor.with_timeout(grown.max(current));
                if let Some(args) = args {
                    next.args = args;
                }
                Some(RecoveryAction::RetryAdjusted {
                    descriptor: next,
                    delay,
                })
            }
            FailureKind::Transient | FailureKind::Unknown => {
                let delay = self.delay(attempt, class.cause, widen);
                Some(self.retry_or_adjust(descriptor, class.cause, delay))
            }
            FailureKind::ParameterSensitive => {
                let delay = self.delay(attempt, class.cause, widen);
                match self.adjusted_args(descriptor, class.cause) {
                    Some(args) => Some(RecoveryAction::RetryAdjusted {
                        descriptor: descriptor.with_args(args),
                        delay,
                    }),
                    None => self.substitute(lineage, descriptor, delay),
                }
            }
            FailureKind::ToolUnavailable => {
                let delay = self.delay(attempt, class.cause, widen);
                self.substitute(lineage, descriptor, delay)
            }
            FailureKind::ResourceExhaustion => {
                let detail = format!("{}: resource exhausted", descriptor.tool);
                self.degradation.report_resource_exhaustion(detail);
                widen = widen.max(self.cfg.degraded_backoff_multiplier);
                let delay = self.delay(attempt, class.cause, widen);
                Some(self.retry_or_adjust(descriptor, class.cause, delay))
            }
        }
    }

    /// Catalog adjustment for `cause`, if it changes anything.
    fn adjusted_args(&self, descriptor: &CommandDescriptor, cause: FailureCause) -> Option<Vec<String>> {
        self.catalog
            .as_ref()
            .and_then(|c| c.adjust(descriptor, cause))
            .filter(|args| *args != descriptor.args)
    }

    fn retry_or_adjust(
        &self,
        descriptor: &CommandDescriptor,
        cause: FailureCause,
        delay: Duration,
    ) -> RecoveryAction {
        match self.adjusted_args(descriptor, cause) {
            Some(args) => RecoveryAction::RetryAdjusted {
                descriptor: descriptor.with_args(args),
                delay,
            },
            None => RecoveryAction::RetrySame { delay },
        }
    }

    fn substitute(
        &self,
        lineage: &mut Lineage,
        descriptor: &CommandDescriptor,
        delay: Duration,
    ) -> Option<RecoveryAction> {
        let catalog = self.catalog.as_ref()?;
        let params = ToolParams::with_timeout(descriptor.timeout());
        for alt in catalog.alternatives(&descriptor.tool) {
            if lineage.has_tried(&alt) {
                continue;
            }
            lineage.note_tool(&alt);
            if let Some(args) = catalog.render(&alt, &descriptor.target, &params) {
                return Some(RecoveryAction::SubstituteTool {
                    descriptor: descriptor.with_tool(alt, args),
                    delay,
                });
            }
        }
        None
    }

    fn give_up(&self, descriptor: &CommandDescriptor, degraded: bool) -> RecoveryAction {
        if degraded
            && descriptor.priority == Priority::Low
            && self.cfg.drop_low_priority_when_degraded
        {
            RecoveryAction::Drop
        } else {
            RecoveryAction::Escalate
        }
    }

    fn delay(&self, attempt: u32, cause: FailureCause, widen: f64) -> Duration {
        self.backoff.next_delay(attempt, cause).mul_f64(widen.max(1.0))
    }
}
