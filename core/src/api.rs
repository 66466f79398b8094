//! Stable re-exports for consumers (`cli`, `plugins`, and external crates).
//!
//! Prefer importing from `hexrun_core::api` instead of reaching into internal modules.

pub use crate::cache::{CachePut, CacheStats, ResultCache};
pub use crate::catalog::{EmptyCatalog, FollowUp, ToolCatalog, ToolParams, ToolSpec};
pub use crate::config::{
    get_hexrun_data_dir, load_default, load_explicit, load_from_path, AdmissionMode, BackoffKind,
    CacheConfig, DecisionConfig, DegradationConfig, EngineConfig, LoggingConfig, PoolConfig,
    RecoveryConfig, ScalingConfig,
};
pub use crate::decision::{
    DecisionEngine, Finding, FindingKind, FindingsExtractor, Recommendation, TargetClass,
    TargetProfile, ToolOutcome,
};
pub use crate::descriptor::{CommandDescriptor, DescriptorBuilder, Fingerprint, Priority};
pub use crate::engine::{Engine, EngineBuilder, ExecutionReport, StateReport};
pub use crate::error::{ConfigError, EngineError};
pub use crate::pool::{PoolStats, ProcessPool, WorkerSlot};
pub use crate::recovery::{
    classify, classify_text, ActionKind, BackoffStrategy, Classification, DegradationReason,
    DegradationState, DegradationStatus, FailureCause, FailureKind, FailureRecord, FixedBackoff,
    RecoveryAction,
};
pub use crate::registry::{
    CompletionEvent, CompletionSubscriber, ExecutionResult, Task, TaskFilter, TaskId,
    TaskListing, TaskState,
};
pub use crate::runner::{ExitInfo, LaunchSpec, ProcessLauncher, ProcessSession, Signal};
pub use crate::scaler::{HostPressure, PressureSource, ScaleDecision};
pub use crate::util::CapturedOutput;
