//! Tool selection: target profiling, outcome history and ranking.

mod engine;
mod finding;
mod history;
mod profile;

pub use engine::{DecisionEngine, Recommendation, ToolOutcome};
pub use finding::{Finding, FindingKind, FindingsExtractor};
pub use history::{HistoryBucket, HistorySnapshot, OutcomeHistory, OutcomeRecord, ToolSignal};
pub use profile::{TargetClass, TargetProfile};
