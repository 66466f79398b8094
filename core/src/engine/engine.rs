use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::types::StateReport;
use crate::cache::{CacheStats, ResultCache};
use crate::catalog::{ToolCatalog, ToolParams};
use crate::config::EngineConfig;
use crate::decision::{DecisionEngine, Finding, Recommendation, TargetProfile, ToolOutcome};
use crate::descriptor::{CommandDescriptor, Fingerprint};
use crate::error::EngineError;
use crate::pool::{PoolStats, ProcessPool};
use crate::recovery::{DegradationMonitor, DegradationStatus, RecoveryController};
use crate::registry::{ExecutionResult, Task, TaskFilter, TaskId, TaskListing, TaskRegistry, TaskState};
use crate::scaler::AutoScaler;
use crate::util::lock;

/// Cloneable handle; every clone drives the same engine.
#[derive(Clone)]
pub struct Engine {
    pub(super) inner: Arc<EngineInner>,
}

pub(super) struct EngineInner {
    pub cfg: EngineConfig,
    pub registry: TaskRegistry,
    pub pool: ProcessPool,
    pub cache: Arc<ResultCache>,
    pub monitor: Arc<DegradationMonitor>,
    pub recovery: RecoveryController,
    pub decision: Arc<DecisionEngine>,
    pub scaler: Arc<AutoScaler>,
    pub catalog: Arc<dyn ToolCatalog>,
    pub shutdown_tx: watch::Sender<bool>,
    pub background: Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    pub fn config(&self) -> &EngineConfig {
        &self.inner.cfg
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn pool(&self) -> &ProcessPool {
        &self.inner.pool
    }

    pub fn cache(&self) -> &ResultCache {
        &self.inner.cache
    }

    pub fn degradation(&self) -> &DegradationMonitor {
        &self.inner.monitor
    }

    pub fn decision(&self) -> &DecisionEngine {
        &self.inner.decision
    }

    pub fn scaler(&self) -> &AutoScaler {
        &self.inner.scaler
    }

    pub fn catalog(&self) -> &Arc<dyn ToolCatalog> {
        &self.inner.catalog
    }

    pub(super) fn recovery(&self) -> &RecoveryController {
        &self.inner.recovery
    }

    fn max_timeout(&self) -> Duration {
        self.inner.cfg.pool.max_timeout()
    }

    /// Submit without waiting. Degraded mode rejects low-priority work
    /// before anything is registered; a cache hit yields a task that is
    /// already succeeded and never occupies a slot.
    pub async fn submit(&self, descriptor: CommandDescriptor) -> Result<TaskId, EngineError> {
        descriptor.validate(self.max_timeout())?;
        self.submit_shared(Arc::new(descriptor)).await
    }

    pub(super) async fn submit_shared(
        &self,
        descriptor: Arc<CommandDescriptor>,
    ) -> Result<TaskId, EngineError> {
        if !self.inner.monitor.admits(descriptor.priority) {
            tracing::warn!(
                tool = %descriptor.tool,
                priority = %descriptor.priority,
                "rejected while degraded"
            );
            return Err(EngineError::Degraded {
                priority: descriptor.priority,
            });
        }

        if descriptor.cacheable {
            if let Some(hit) = self.inner.cache.get(&descriptor.fingerprint()) {
                let task = self.inner.registry.insert_cached(descriptor, &hit);
                return Ok(task.id);
            }
        }

        self.inner.pool.submit_shared(descriptor).await
    }

    pub fn poll(&self, id: TaskId) -> Result<TaskState, EngineError> {
        self.inner.registry.poll(id)
    }

    pub async fn await_task(&self, id: TaskId, timeout: Duration) -> Result<Task, EngineError> {
        self.inner.registry.await_task(id, timeout).await
    }

    pub fn status(&self, id: TaskId) -> Result<Task, EngineError> {
        self.inner.registry.status(id)
    }

    /// The result of a terminal task; None while it is still queued or running.
    pub fn result(&self, id: TaskId) -> Result<Option<ExecutionResult>, EngineError> {
        let task = self.inner.registry.status(id)?;
        Ok(task.is_terminal().then(|| task.to_result()))
    }

    pub fn list(&self, filter: &TaskFilter) -> TaskListing {
        self.inner.registry.list(filter)
    }

    pub fn pause(&self, id: TaskId) -> Result<(), EngineError> {
        self.inner.pool.pause(id)
    }

    pub fn resume(&self, id: TaskId) -> Result<(), EngineError> {
        self.inner.pool.resume(id)
    }

    pub fn terminate(&self, id: TaskId) -> Result<(), EngineError> {
        self.inner.pool.terminate(id)
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.inner.pool.stats()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.inner.cache.clear();
    }

    pub fn invalidate(&self, fingerprint: &Fingerprint) -> bool {
        self.inner.cache.invalidate(fingerprint)
    }

    pub fn degradation_status(&self) -> DegradationStatus {
        self.inner.monitor.status()
    }

    pub fn trigger_degradation(&self, note: impl Into<String>) {
        self.inner.monitor.trigger(note);
    }

    pub fn clear_degradation(&self) {
        self.inner.monitor.clear();
    }

    pub fn recommend(&self, profile: &TargetProfile) -> Vec<Recommendation> {
        self.inner.decision.recommend(profile)
    }

    pub fn optimize(&self, tool: &str, profile: &TargetProfile) -> ToolParams {
        self.inner.decision.optimize(tool, profile)
    }

    pub fn chain(&self, findings: &[Finding], depth: usize, max_depth: usize) -> Vec<CommandDescriptor> {
        self.inner.decision.chain(findings, depth, max_depth)
    }

    pub fn plan(&self, profile: &TargetProfile, limit: usize) -> Vec<CommandDescriptor> {
        self.inner.decision.plan(profile, limit)
    }

    pub fn feedback(&self, task_id: TaskId, outcome: &ToolOutcome) -> bool {
        self.inner.decision.feedback(task_id, outcome)
    }

    /// Findings in a finished task's output, via the injected extractor.
    pub fn findings(&self, result: &ExecutionResult) -> Vec<Finding> {
        self.inner
            .decision
            .extract_findings(&result.tool, &result.target, &result.stdout.text)
    }

    fn cache_path(&self) -> Option<PathBuf> {
        self.inner.cfg.cache.persist_path.as_ref().map(PathBuf::from)
    }

    fn history_path(&self) -> Option<PathBuf> {
        self.inner.cfg.decision.persist_path.as_ref().map(PathBuf::from)
    }

    /// Write cache and history snapshots to their configured paths.
    pub fn save_state(&self) -> Result<StateReport, EngineError> {
        let mut report = StateReport::default();
        if let Some(path) = self.cache_path() {
            self.inner.cache.save_to(&path)?;
            report.cache_entries = Some(self.inner.cache.len());
        }
        if let Some(path) = self.history_path() {
            self.inner.decision.save_to(&path)?;
            report.history_records = Some(self.inner.decision.history().len());
        }
        tracing::info!(?report, "engine state saved");
        Ok(report)
    }

    /// Restore snapshots; a missing file is a cold start.
    pub fn load_state(&self) -> Result<StateReport, EngineError> {
        let mut report = StateReport::default();
        if let Some(path) = self.cache_path() {
            report.cache_entries = Some(self.inner.cache.load_from(&path)?);
        }
        if let Some(path) = self.history_path() {
            report.history_records = Some(self.inner.decision.load_from(&path)?);
        }
        tracing::info!(?report, "engine state loaded");
        Ok(report)
    }

    pub(super) fn track(&self, handle: JoinHandle<()>) {
        lock(&self.inner.background).push(handle);
    }

    /// Stop background loops, terminate running tasks and persist state.
    pub async fn shutdown(&self) {
        self.inner.shutdown_tx.send_replace(true);
        let handles: Vec<JoinHandle<()>> = lock(&self.inner.background).drain(..).collect();
        for h in handles {
            if let Err(e) = h.await {
                tracing::warn!(error = %e, "background task ended abnormally");
            }
        }
        self.inner.pool.terminate_all();
        if let Err(e) = self.save_state() {
            tracing::warn!(error = %e, "failed to persist engine state");
        }
        tracing::info!("engine shut down");
    }
}
