//! Failure classification, per-lineage recovery decisions and the
//! process-wide degradation monitor.

mod backoff;
mod classifier;
mod controller;
mod degradation;
mod lineage;

pub use backoff::{BackoffStrategy, FixedBackoff};
pub use classifier::{classify, classify_text, Classification, FailureCause, FailureKind};
pub use controller::{ActionKind, FailureRecord, RecoveryAction, RecoveryController};
pub use degradation::{DegradationMonitor, DegradationReason, DegradationState, DegradationStatus};
pub use lineage::Lineage;
