use std::time::Duration;

use super::classifier::FailureCause;

/// Delay policy between recovery attempts.
pub trait BackoffStrategy: Send + Sync {
    fn name(&self) -> &str;
    /// Delay before retry number `attempt` (0-based) of a lineage.
    fn next_delay(&self, attempt: u32, cause: FailureCause) -> Duration;
}

/// Same delay for every attempt.
pub struct FixedBackoff {
    delay: Duration,
}

impl FixedBackoff {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

impl BackoffStrategy for FixedBackoff {
    fn name(&self) -> &str {
        "fixed"
    }

    fn next_delay(&self, _attempt: u32, _cause: FailureCause) -> Duration {
        self.delay
    }
}
