//! Task registry: owns every task record, validates state transitions and
//! fans completion events out to subscribers.

mod events;
mod registry;
mod task;
mod transitions;

pub use events::{CompletionEvent, CompletionSubscriber};
pub use registry::TaskRegistry;
pub use task::{ExecutionResult, SlotId, Task, TaskFilter, TaskId, TaskListing, TaskState};
pub use transitions::{TaskTransition, TransitionError};
