use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;

use super::engine::{Engine, EngineInner};
use crate::cache::ResultCache;
use crate::catalog::{EmptyCatalog, ToolCatalog};
use crate::config::EngineConfig;
use crate::decision::{DecisionEngine, FindingsExtractor};
use crate::error::{ConfigError, EngineError};
use crate::pool::ProcessPool;
use crate::recovery::{BackoffStrategy, DegradationMonitor, FixedBackoff, RecoveryController};
use crate::registry::TaskRegistry;
use crate::runner::ProcessLauncher;
use crate::scaler::{AutoScaler, PressureSource};

/// Collaborators injected into the engine. Only the launcher is required.
pub struct EngineBuilder {
    cfg: EngineConfig,
    launcher: Option<Arc<dyn ProcessLauncher>>,
    catalog: Option<Arc<dyn ToolCatalog>>,
    backoff: Option<Arc<dyn BackoffStrategy>>,
    pressure: Option<Arc<dyn PressureSource>>,
    extractor: Option<Arc<dyn FindingsExtractor>>,
}

impl EngineBuilder {
    pub fn new(cfg: EngineConfig) -> Self {
        Self {
            cfg,
            launcher: None,
            catalog: None,
            backoff: None,
            pressure: None,
            extractor: None,
        }
    }

    pub fn with_config(mut self, cfg: EngineConfig) -> Self {
        self.cfg = cfg;
        self
    }

    pub fn with_launcher(mut self, launcher: Arc<dyn ProcessLauncher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    pub fn with_catalog(mut self, catalog: Arc<dyn ToolCatalog>) -> Self {
        self.catalog = Some(catalog);
        self
    }

    pub fn with_backoff(mut self, backoff: Arc<dyn BackoffStrategy>) -> Self {
        self.backoff = Some(backoff);
        self
    }

    pub fn with_pressure_source(mut self, pressure: Arc<dyn PressureSource>) -> Self {
        self.pressure = Some(pressure);
        self
    }

    pub fn with_findings_extractor(mut self, extractor: Arc<dyn FindingsExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn build(self) -> Result<Engine, EngineError> {
        let EngineBuilder {
            cfg,
            launcher,
            catalog,
            backoff,
            pressure,
            extractor,
        } = self;

        cfg.validate()?;
        let launcher = launcher
            .ok_or_else(|| ConfigError::invalid("launcher", "no process launcher configured"))?;
        let catalog = catalog.unwrap_or_else(|| Arc::new(EmptyCatalog));
        let backoff = backoff.unwrap_or_else(|| {
            Arc::new(FixedBackoff::new(Duration::from_millis(
                cfg.recovery.base_delay_ms,
            )))
        });

        let registry = TaskRegistry::new();
        let pool = ProcessPool::new(cfg.pool.clone(), launcher, registry.clone());
        let monitor = Arc::new(DegradationMonitor::new(
            cfg.degradation.clone(),
            Some(pool.clone()),
        ));
        let cache = Arc::new(ResultCache::new(&cfg.cache));
        let decision = Arc::new(DecisionEngine::new(
            cfg.decision.clone(),
            Duration::from_millis(cfg.pool.default_timeout_ms),
            catalog.clone(),
            extractor,
        ));
        let scaler = Arc::new(AutoScaler::new(
            cfg.scaling.clone(),
            pool.clone(),
            monitor.clone(),
            pressure,
        ));
        let recovery = RecoveryController::new(
            cfg.recovery.clone(),
            cfg.pool.max_timeout(),
            backoff,
            Some(catalog.clone()),
            monitor.clone(),
        );

        // Cache first: a woken awaiter may resubmit the same fingerprint.
        registry.add_subscriber(cache.clone());
        registry.add_subscriber(monitor.clone());
        registry.add_subscriber(decision.clone());
        registry.add_subscriber(scaler.clone());

        let (shutdown_tx, _) = watch::channel(false);
        tracing::info!(
            capacity = pool.capacity(),
            cache = cfg.cache.enabled,
            scaling = cfg.scaling.enabled,
            "engine ready"
        );

        Ok(Engine {
            inner: Arc::new(EngineInner {
                cfg,
                registry,
                pool,
                cache,
                monitor,
                recovery,
                decision,
                scaler,
                catalog,
                shutdown_tx,
                background: Mutex::new(Vec::new()),
            }),
        })
    }
}
