use std::sync::Arc;

use anyhow::{Context, Result};

use hexrun_core::api::{Engine, EngineBuilder, ToolCatalog};
use hexrun_core::config::{BackoffKind, EngineConfig, RecoveryConfig, ScalingConfig};
use hexrun_core::recovery::BackoffStrategy;
use hexrun_core::scaler::PressureSource;

use crate::catalog::StaticToolCatalog;
use crate::findings::RegexFindingsExtractor;
use crate::pressure::{FixedPressureSource, SysinfoPressureSource};
use crate::runner::TokioProcessLauncher;
use crate::strategies::{ExponentialBackoff, LinearBackoff};

pub fn build_backoff(cfg: &RecoveryConfig) -> Arc<dyn BackoffStrategy> {
    match cfg.backoff {
        BackoffKind::Exponential => Arc::new(ExponentialBackoff::from_config(cfg)),
        BackoffKind::Linear => Arc::new(LinearBackoff::from_config(cfg)),
    }
}

pub fn build_pressure(cfg: &ScalingConfig) -> Arc<dyn PressureSource> {
    if cfg.enabled {
        Arc::new(SysinfoPressureSource::new())
    } else {
        Arc::new(FixedPressureSource::idle())
    }
}

/// Built-in catalog, extended by `decision.catalog_path` when set.
pub fn build_catalog(cfg: &EngineConfig) -> Result<Arc<dyn ToolCatalog>> {
    let catalog = match cfg.decision.catalog_path.as_deref().map(str::trim) {
        Some(path) if !path.is_empty() => StaticToolCatalog::builtin_with_overrides(path)?,
        _ => StaticToolCatalog::builtin()?,
    };
    tracing::debug!(tools = catalog.len(), "tool catalog ready");
    Ok(Arc::new(catalog))
}

/// Engine wired with the real process launcher and default collaborators.
pub fn build_engine(cfg: EngineConfig) -> Result<Engine> {
    let catalog = build_catalog(&cfg)?;
    let backoff = build_backoff(&cfg.recovery);
    let pressure = build_pressure(&cfg.scaling);
    EngineBuilder::new(cfg)
        .with_launcher(Arc::new(TokioProcessLauncher::new()))
        .with_catalog(catalog)
        .with_backoff(backoff)
        .with_pressure_source(pressure)
        .with_findings_extractor(Arc::new(RegexFindingsExtractor::new()))
        .build()
        .context("failed to build engine")
}
