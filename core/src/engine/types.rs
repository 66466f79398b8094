use serde::Serialize;

use crate::descriptor::CommandDescriptor;
use crate::recovery::FailureRecord;
use crate::registry::ExecutionResult;

/// Outcome of a submit-and-await request, including any recovery steps.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    pub result: ExecutionResult,
    /// The descriptor of the final attempt (may differ from the request
    /// after an adjusted retry or tool substitution).
    pub descriptor: CommandDescriptor,
    pub attempts: u32,
    pub trail: Vec<FailureRecord>,
}

impl ExecutionReport {
    pub fn recovered(&self) -> bool {
        !self.trail.is_empty()
    }
}

/// What `save_state` / `load_state` touched; None when no path is configured.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateReport {
    pub cache_entries: Option<usize>,
    pub history_records: Option<usize>,
}
