use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::descriptor::Priority;
use crate::error::ConfigError;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub pool: PoolConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub scaling: ScalingConfig,

    #[serde(default)]
    pub recovery: RecoveryConfig,

    #[serde(default)]
    pub degradation: DegradationConfig,

    #[serde(default)]
    pub decision: DecisionConfig,
}

impl EngineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let p = &self.pool;
        if p.min_workers == 0 {
            return Err(ConfigError::invalid("pool.min_workers", "must be at least 1"));
        }
        if p.min_workers > p.max_workers {
            return Err(ConfigError::invalid(
                "pool.min_workers",
                format!("{} exceeds max_workers {}", p.min_workers, p.max_workers),
            ));
        }
        if p.initial_workers < p.min_workers || p.initial_workers > p.max_workers {
            return Err(ConfigError::invalid(
                "pool.initial_workers",
                format!(
                    "{} outside [{}, {}]",
                    p.initial_workers, p.min_workers, p.max_workers
                ),
            ));
        }
        if p.default_timeout_ms == 0 || p.default_timeout_ms > p.max_timeout_ms {
            return Err(ConfigError::invalid(
                "pool.default_timeout_ms",
                "must be > 0 and not above max_timeout_ms",
            ));
        }

        let s = &self.scaling;
        if s.high_water <= s.low_water {
            return Err(ConfigError::invalid(
                "scaling.high_water",
                format!("{} must exceed low_water {}", s.high_water, s.low_water),
            ));
        }
        check_fraction("scaling.high_water", s.high_water)?;
        check_fraction("scaling.pressure_threshold", s.pressure_threshold)?;
        if s.low_water < 0.0 {
            return Err(ConfigError::invalid("scaling.low_water", "must be >= 0"));
        }
        if s.step_up == 0 || s.step_down == 0 {
            return Err(ConfigError::invalid("scaling.step_up", "steps must be >= 1"));
        }

        let d = &self.degradation;
        check_fraction("degradation.failure_threshold", d.failure_threshold)?;
        check_fraction("degradation.capacity_factor", d.capacity_factor)?;
        if d.window_size == 0 {
            return Err(ConfigError::invalid("degradation.window_size", "must be >= 1"));
        }
        if d.min_samples > d.window_size {
            return Err(ConfigError::invalid(
                "degradation.min_samples",
                "must not exceed window_size",
            ));
        }
        if d.resource_failure_threshold == 0 {
            return Err(ConfigError::invalid(
                "degradation.resource_failure_threshold",
                "must be >= 1",
            ));
        }

        let r = &self.recovery;
        check_multiplier("recovery.timeout_multiplier", r.timeout_multiplier)?;
        check_multiplier(
            "recovery.degraded_backoff_multiplier",
            r.degraded_backoff_multiplier,
        )?;
        if r.base_delay_ms > r.max_delay_ms {
            return Err(ConfigError::invalid(
                "recovery.base_delay_ms",
                "must not exceed max_delay_ms",
            ));
        }

        let dc = &self.decision;
        if dc.decay <= 0.0 || dc.decay > 1.0 {
            return Err(ConfigError::invalid("decision.decay", "must be in (0, 1]"));
        }
        if dc.history_per_key == 0 {
            return Err(ConfigError::invalid("decision.history_per_key", "must be >= 1"));
        }
        if dc.max_timeout_secs.saturating_mul(1000) > p.max_timeout_ms {
            return Err(ConfigError::invalid(
                "decision.max_timeout_secs",
                format!("must not exceed pool.max_timeout_ms ({}ms)", p.max_timeout_ms),
            ));
        }
        Ok(())
    }
}

const MAX_MULTIPLIER: f64 = 100.0;

fn check_multiplier(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v.is_finite() && (1.0..=MAX_MULTIPLIER).contains(&v) {
        Ok(())
    } else {
        Err(ConfigError::invalid(
            field,
            format!("{v} not in [1, {MAX_MULTIPLIER}]"),
        ))
    }
}

fn check_fraction(field: &'static str, v: f64) -> Result<(), ConfigError> {
    if v > 0.0 && v <= 1.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(field, format!("{v} not in (0, 1]")))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_logging_enabled")]
    pub enabled: bool,

    /// If true, log to stderr.
    #[serde(default = "default_logging_console")]
    pub console: bool,

    /// If true, log to a file under `directory` (or ~/.hexrun/logs if unset).
    #[serde(default = "default_logging_file")]
    pub file: bool,

    /// EnvFilter string, e.g. "info" or "hexrun_core=debug".
    #[serde(default = "default_logging_level")]
    pub level: String,

    #[serde(default)]
    pub directory: Option<String>,
}

fn default_logging_enabled() -> bool {
    true
}

fn default_logging_console() -> bool {
    true
}

fn default_logging_file() -> bool {
    false
}

fn default_logging_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            enabled: default_logging_enabled(),
            console: default_logging_console(),
            file: default_logging_file(),
            level: default_logging_level(),
            directory: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionMode {
    /// Block up to `admission_timeout_ms` for a free slot.
    Wait,
    /// Fail immediately when no slot is free.
    Reject,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    #[serde(default = "default_min_workers")]
    pub min_workers: usize,

    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    #[serde(default = "default_initial_workers")]
    pub initial_workers: usize,

    #[serde(default = "default_admission_mode")]
    pub admission_mode: AdmissionMode,

    #[serde(default = "default_admission_timeout_ms")]
    pub admission_timeout_ms: u64,

    /// Time between SIGTERM and SIGKILL.
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    /// Tail kept per output stream.
    #[serde(default = "default_capture_bytes")]
    pub capture_bytes: usize,

    #[serde(default = "default_timeout_ms")]
    pub default_timeout_ms: u64,

    #[serde(default = "default_max_timeout_ms")]
    pub max_timeout_ms: u64,

    /// Terminal tasks older than this are pruned from the registry.
    #[serde(default = "default_task_retention_secs")]
    pub task_retention_secs: u64,
}

fn default_min_workers() -> usize {
    2
}

fn default_max_workers() -> usize {
    (num_cpus::get() * 2).clamp(4, 32)
}

fn default_initial_workers() -> usize {
    num_cpus::get().clamp(default_min_workers(), default_max_workers())
}

fn default_admission_mode() -> AdmissionMode {
    AdmissionMode::Wait
}

fn default_admission_timeout_ms() -> u64 {
    30_000
}

fn default_terminate_grace_ms() -> u64 {
    5_000
}

fn default_capture_bytes() -> usize {
    256 * 1024
}

fn default_timeout_ms() -> u64 {
    300_000
}

fn default_max_timeout_ms() -> u64 {
    3_600_000
}

fn default_task_retention_secs() -> u64 {
    3600
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_workers: default_min_workers(),
            max_workers: default_max_workers(),
            initial_workers: default_initial_workers(),
            admission_mode: default_admission_mode(),
            admission_timeout_ms: default_admission_timeout_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
            capture_bytes: default_capture_bytes(),
            default_timeout_ms: default_timeout_ms(),
            max_timeout_ms: default_max_timeout_ms(),
            task_retention_secs: default_task_retention_secs(),
        }
    }
}

impl PoolConfig {
    pub fn admission_timeout(&self) -> Duration {
        match self.admission_mode {
            AdmissionMode::Wait => Duration::from_millis(self.admission_timeout_ms),
            AdmissionMode::Reject => Duration::ZERO,
        }
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn max_timeout(&self) -> Duration {
        Duration::from_millis(self.max_timeout_ms)
    }

    pub fn task_retention(&self) -> Duration {
        Duration::from_secs(self.task_retention_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,

    #[serde(default = "default_cache_max_entries")]
    pub max_entries: usize,

    #[serde(default = "default_cache_ttl_secs")]
    pub default_ttl_secs: u64,

    #[serde(default = "default_purge_interval_secs")]
    pub purge_interval_secs: u64,

    /// Snapshot file; relative paths resolve against the data directory.
    #[serde(default)]
    pub persist_path: Option<String>,
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_max_entries() -> usize {
    1000
}

fn default_cache_ttl_secs() -> u64 {
    3600
}

fn default_purge_interval_secs() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            max_entries: default_cache_max_entries(),
            default_ttl_secs: default_cache_ttl_secs(),
            purge_interval_secs: default_purge_interval_secs(),
            persist_path: None,
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_secs(self.default_ttl_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingConfig {
    #[serde(default = "default_scaling_enabled")]
    pub enabled: bool,

    /// Utilization at or above which the pool grows (when work is queued).
    #[serde(default = "default_high_water")]
    pub high_water: f64,

    #[serde(default = "default_low_water")]
    pub low_water: f64,

    #[serde(default = "default_step")]
    pub step_up: usize,

    #[serde(default = "default_step")]
    pub step_down: usize,

    #[serde(default = "default_sustain_secs")]
    pub sustain_secs: u64,

    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    /// Host CPU/memory fraction treated as pressure.
    #[serde(default = "default_pressure_threshold")]
    pub pressure_threshold: f64,
}

fn default_scaling_enabled() -> bool {
    true
}

fn default_high_water() -> f64 {
    0.8
}

fn default_low_water() -> f64 {
    0.3
}

fn default_step() -> usize {
    1
}

fn default_sustain_secs() -> u64 {
    30
}

fn default_cooldown_secs() -> u64 {
    15
}

fn default_interval_secs() -> u64 {
    5
}

fn default_pressure_threshold() -> f64 {
    0.9
}

impl Default for ScalingConfig {
    fn default() -> Self {
        Self {
            enabled: default_scaling_enabled(),
            high_water: default_high_water(),
            low_water: default_low_water(),
            step_up: default_step(),
            step_down: default_step(),
            sustain_secs: default_sustain_secs(),
            cooldown_secs: default_cooldown_secs(),
            interval_secs: default_interval_secs(),
            pressure_threshold: default_pressure_threshold(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    Exponential,
    Linear,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Attempts allowed per lineage after the first one.
    #[serde(default = "default_retry_budget")]
    pub retry_budget: u32,

    #[serde(default = "default_backoff_kind")]
    pub backoff: BackoffKind,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    #[serde(default = "default_timeout_multiplier")]
    pub timeout_multiplier: f64,

    /// Backoff widening while degraded or after resource exhaustion.
    #[serde(default = "default_degraded_backoff_multiplier")]
    pub degraded_backoff_multiplier: f64,

    #[serde(default = "default_drop_low_priority")]
    pub drop_low_priority_when_degraded: bool,
}

fn default_retry_budget() -> u32 {
    3
}

fn default_backoff_kind() -> BackoffKind {
    BackoffKind::Exponential
}

fn default_base_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    60_000
}

fn default_timeout_multiplier() -> f64 {
    2.0
}

fn default_degraded_backoff_multiplier() -> f64 {
    2.0
}

fn default_drop_low_priority() -> bool {
    true
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            retry_budget: default_retry_budget(),
            backoff: default_backoff_kind(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            timeout_multiplier: default_timeout_multiplier(),
            degraded_backoff_multiplier: default_degraded_backoff_multiplier(),
            drop_low_priority_when_degraded: default_drop_low_priority(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DegradationConfig {
    #[serde(default = "default_window_size")]
    pub window_size: usize,

    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Failure rate strictly above which the engine degrades.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: f64,

    #[serde(default = "default_degradation_cooldown_secs")]
    pub cooldown_secs: u64,

    #[serde(default = "default_capacity_factor")]
    pub capacity_factor: f64,

    /// Submissions below this priority are rejected while degraded.
    #[serde(default = "default_reject_below")]
    pub reject_below: Priority,

    /// Resource-exhaustion failures within one cooldown window that count
    /// as systemic pressure.
    #[serde(default = "default_resource_failure_threshold")]
    pub resource_failure_threshold: usize,
}

fn default_window_size() -> usize {
    10
}

fn default_min_samples() -> usize {
    5
}

fn default_failure_threshold() -> f64 {
    0.5
}

fn default_degradation_cooldown_secs() -> u64 {
    60
}

fn default_capacity_factor() -> f64 {
    0.5
}

fn default_reject_below() -> Priority {
    Priority::Normal
}

fn default_resource_failure_threshold() -> usize {
    3
}

impl Default for DegradationConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
            min_samples: default_min_samples(),
            failure_threshold: default_failure_threshold(),
            cooldown_secs: default_degradation_cooldown_secs(),
            capacity_factor: default_capacity_factor(),
            reject_below: default_reject_below(),
            resource_failure_threshold: default_resource_failure_threshold(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionConfig {
    #[serde(default = "default_history_per_key")]
    pub history_per_key: usize,

    /// Weight multiplier per step back in history (1.0 = no decay).
    #[serde(default = "default_decay")]
    pub decay: f64,

    /// Pseudo-observations backing the catalog's static effectiveness.
    #[serde(default = "default_prior_weight")]
    pub prior_weight: f64,

    #[serde(default = "default_effectiveness_weight")]
    pub effectiveness_weight: f64,

    #[serde(default = "default_success_weight")]
    pub success_weight: f64,

    #[serde(default = "default_yield_weight")]
    pub yield_weight: f64,

    #[serde(default = "default_max_chain_depth")]
    pub max_chain_depth: usize,

    /// Cap applied to timeouts grown from history.
    #[serde(default = "default_max_timeout_secs")]
    pub max_timeout_secs: u64,

    #[serde(default)]
    pub persist_path: Option<String>,

    /// Extra tool table merged over the built-in catalog.
    #[serde(default)]
    pub catalog_path: Option<String>,
}

fn default_history_per_key() -> usize {
    50
}

fn default_decay() -> f64 {
    0.95
}

fn default_prior_weight() -> f64 {
    2.0
}

fn default_effectiveness_weight() -> f64 {
    0.4
}

fn default_success_weight() -> f64 {
    0.5
}

fn default_yield_weight() -> f64 {
    0.1
}

fn default_max_chain_depth() -> usize {
    3
}

fn default_max_timeout_secs() -> u64 {
    3600
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            history_per_key: default_history_per_key(),
            decay: default_decay(),
            prior_weight: default_prior_weight(),
            effectiveness_weight: default_effectiveness_weight(),
            success_weight: default_success_weight(),
            yield_weight: default_yield_weight(),
            max_chain_depth: default_max_chain_depth(),
            max_timeout_secs: default_max_timeout_secs(),
            persist_path: None,
            catalog_path: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let cfg: EngineConfig = toml::from_str(
            r#"
            [pool]
            min_workers = 1
            max_workers = 3
            initial_workers = 2
            admission_mode = "reject"

            [degradation]
            reject_below = "high"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.pool.max_workers, 3);
        assert_eq!(cfg.pool.admission_timeout(), Duration::ZERO);
        assert_eq!(cfg.degradation.reject_below, Priority::High);
        assert_eq!(cfg.degradation.window_size, 10);
        assert!(cfg.cache.enabled);
        cfg.validate().unwrap();
    }

    #[test]
    fn rejects_inverted_bounds() {
        let mut cfg = EngineConfig::default();
        cfg.pool.min_workers = 5;
        cfg.pool.max_workers = 4;
        cfg.pool.initial_workers = 4;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.scaling.low_water = 0.9;
        cfg.scaling.high_water = 0.8;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("scaling.high_water"));

        let mut cfg = EngineConfig::default();
        cfg.degradation.failure_threshold = 0.0;
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.degradation.window_size = 0;
        cfg.degradation.min_samples = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn rejects_unusable_multipliers() {
        for bad in [f64::NAN, f64::INFINITY, 0.5, 1e9] {
            let mut cfg = EngineConfig::default();
            cfg.recovery.timeout_multiplier = bad;
            assert!(cfg.validate().is_err(), "timeout_multiplier {bad}");

            let mut cfg = EngineConfig::default();
            cfg.recovery.degraded_backoff_multiplier = bad;
            let err = cfg.validate().unwrap_err();
            assert!(err.to_string().contains("degraded_backoff_multiplier"));
        }
    }

    #[test]
    fn decision_timeout_cap_must_fit_the_pool() {
        let mut cfg = EngineConfig::default();
        cfg.pool.max_timeout_ms = 600_000;
        cfg.pool.default_timeout_ms = 300_000;
        cfg.decision.max_timeout_secs = 3600;
        let err = cfg.validate().unwrap_err();
        assert!(err.to_string().contains("decision.max_timeout_secs"));

        cfg.decision.max_timeout_secs = 600;
        cfg.validate().unwrap();
    }
}
