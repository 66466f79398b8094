mod load;
mod types;

pub use load::{get_hexrun_data_dir, load_default, load_explicit, load_from_path};
pub use types::{
    AdmissionMode, BackoffKind, CacheConfig, DecisionConfig, DegradationConfig, EngineConfig,
    LoggingConfig, PoolConfig, RecoveryConfig, ScalingConfig,
};
