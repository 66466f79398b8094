use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::transitions::TaskTransition;
use crate::descriptor::{CommandDescriptor, Fingerprint};
use crate::util::CapturedOutput;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(TaskId)
    }
}

pub type SlotId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Queued,
    Running,
    Succeeded,
    Failed,
    TimedOut,
    Cancelled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        TaskTransition::is_terminal(self)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Queued => "queued",
            TaskState::Running => "running",
            TaskState::Succeeded => "succeeded",
            TaskState::Failed => "failed",
            TaskState::TimedOut => "timed_out",
            TaskState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub id: TaskId,
    pub descriptor: Arc<CommandDescriptor>,
    pub fingerprint: Fingerprint,
    pub state: TaskState,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub exit_code: Option<i32>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub slot: Option<SlotId>,
    pub pid: Option<u32>,
    pub paused: bool,
    pub cache_hit: bool,
    pub diagnostic: Option<String>,
    /// Wall time spent in a slot, measured on the runtime clock.
    pub elapsed_ms: u64,
    /// The process never started.
    pub launch_failed: bool,
}

impl Task {
    pub(crate) fn queued(descriptor: Arc<CommandDescriptor>) -> Self {
        let fingerprint = descriptor.fingerprint();
        Self {
            id: TaskId::new(),
            descriptor,
            fingerprint,
            state: TaskState::Queued,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            exit_code: None,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::default(),
            slot: None,
            pid: None,
            paused: false,
            cache_hit: false,
            diagnostic: None,
            elapsed_ms: 0,
            launch_failed: false,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn to_result(&self) -> ExecutionResult {
        ExecutionResult {
            task_id: self.id,
            tool: self.descriptor.tool.clone(),
            target: self.descriptor.target.clone(),
            fingerprint: self.fingerprint.clone(),
            state: self.state,
            exit_code: self.exit_code,
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
            elapsed_ms: self.elapsed_ms,
            cache_hit: self.cache_hit,
            completed_at: self.completed_at,
            diagnostic: self.diagnostic.clone(),
            launch_failed: self.launch_failed,
        }
    }
}

/// What callers get back for a finished (or still running) task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub task_id: TaskId,
    pub tool: String,
    pub target: String,
    pub fingerprint: Fingerprint,
    pub state: TaskState,
    pub exit_code: Option<i32>,
    pub stdout: CapturedOutput,
    pub stderr: CapturedOutput,
    pub elapsed_ms: u64,
    pub cache_hit: bool,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostic: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub launch_failed: bool,
}

impl ExecutionResult {
    pub fn succeeded(&self) -> bool {
        self.state == TaskState::Succeeded
    }

    /// Text the failure classifier looks at: diagnostic first, then stderr.
    pub fn failure_text(&self) -> String {
        let mut text = String::new();
        if let Some(d) = &self.diagnostic {
            text.push_str(d);
        }
        if !self.stderr.text.is_empty() {
            if !text.is_empty() {
                text.push('\n');
            }
            text.push_str(&self.stderr.text);
        }
        text
    }
}

#[derive(Debug, Clone, Default)]
pub struct TaskFilter {
    pub states: Option<HashSet<TaskState>>,
    pub tool: Option<String>,
    pub target: Option<String>,
    /// Some(true): terminal only; Some(false): queued/running only.
    pub terminal: Option<bool>,
}

impl TaskFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn active() -> Self {
        Self {
            terminal: Some(false),
            ..Self::default()
        }
    }

    pub fn with_states(states: impl IntoIterator<Item = TaskState>) -> Self {
        Self {
            states: Some(states.into_iter().collect()),
            ..Self::default()
        }
    }

    pub fn tool(mut self, tool: impl Into<String>) -> Self {
        self.tool = Some(tool.into());
        self
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn matches(&self, task: &Task) -> bool {
        if let Some(states) = &self.states {
            if !states.contains(&task.state) {
                return false;
            }
        }
        if let Some(tool) = &self.tool {
            if !task.descriptor.tool.eq_ignore_ascii_case(tool) {
                return false;
            }
        }
        if let Some(target) = &self.target {
            if task.descriptor.target != *target {
                return false;
            }
        }
        match self.terminal {
            Some(t) => task.is_terminal() == t,
            None => true,
        }
    }
}

/// Immutable point-in-time listing, ordered by creation time.
#[derive(Debug, Clone, Default)]
pub struct TaskListing {
    tasks: Arc<[Task]>,
}

impl TaskListing {
    pub(crate) fn new(mut tasks: Vec<Task>) -> Self {
        tasks.sort_by_key(|t| t.created_at);
        Self {
            tasks: tasks.into(),
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Task> {
        self.tasks.iter()
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn ids(&self) -> Vec<TaskId> {
        self.tasks.iter().map(|t| t.id).collect()
    }
}

impl<'a> IntoIterator for &'a TaskListing {
    type Item = &'a Task;
    type IntoIter = std::slice::Iter<'a, Task>;

    fn into_iter(self) -> Self::IntoIter {
        self.tasks.iter()
    }
}
