use std::sync::Arc;

use super::task::ExecutionResult;
use crate::descriptor::CommandDescriptor;

/// Published once per terminal transition (and again on redelivery).
#[derive(Debug, Clone)]
pub struct CompletionEvent {
    pub descriptor: Arc<CommandDescriptor>,
    pub result: ExecutionResult,
}

/// Receives completion events synchronously on the completing worker.
///
/// Delivery is at-least-once; implementations must ignore a task id they
/// have already accounted for. Keep the callback short and never block.
pub trait CompletionSubscriber: Send + Sync {
    fn name(&self) -> &str;
    fn on_completion(&self, event: &CompletionEvent);
}
