use std::time::Duration;

use hexrun_core::config::RecoveryConfig;
use hexrun_core::recovery::{BackoffStrategy, FailureCause};

/// `base * 2^attempt`, capped at `max_delay_ms`.
pub struct ExponentialBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

/// `base * (attempt + 1)`, capped at `max_delay_ms`.
pub struct LinearBackoff {
    base_delay_ms: u64,
    max_delay_ms: u64,
}

impl ExponentialBackoff {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn from_config(cfg: &RecoveryConfig) -> Self {
        Self::new(cfg.base_delay_ms, cfg.max_delay_ms)
    }
}

impl LinearBackoff {
    pub fn new(base_delay_ms: u64, max_delay_ms: u64) -> Self {
        Self {
            base_delay_ms,
            max_delay_ms,
        }
    }

    pub fn from_config(cfg: &RecoveryConfig) -> Self {
        Self::new(cfg.base_delay_ms, cfg.max_delay_ms)
    }
}

impl BackoffStrategy for ExponentialBackoff {
    fn name(&self) -> &str {
        "exponential-backoff"
    }

    fn next_delay(&self, attempt: u32, _cause: FailureCause) -> Duration {
        let exp = 1u64 << attempt.min(30);
        let delay = self.base_delay_ms.saturating_mul(exp);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}

impl BackoffStrategy for LinearBackoff {
    fn name(&self) -> &str {
        "linear"
    }

    fn next_delay(&self, attempt: u32, _cause: FailureCause) -> Duration {
        let multiplier = attempt.saturating_add(1) as u64;
        let delay = self.base_delay_ms.saturating_mul(multiplier);
        Duration::from_millis(delay.min(self.max_delay_ms))
    }
}
