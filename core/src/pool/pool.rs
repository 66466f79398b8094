use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;

use super::slots::{SlotLease, SlotTable, WaitingGuard, WorkerSlot};
use super::worker::{self, Control};
use crate::config::PoolConfig;
use crate::descriptor::CommandDescriptor;
use crate::error::EngineError;
use crate::registry::{SlotId, Task, TaskId, TaskRegistry, TaskState};
use crate::runner::ProcessLauncher;
use crate::util::lock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub active: usize,
    pub idle: usize,
    pub queue_depth: usize,
    pub admission_limit: Option<usize>,
    pub min_workers: usize,
    pub max_workers: usize,
    pub completed: u64,
    pub failed: u64,
    pub cancelled: u64,
}

impl PoolStats {
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 1.0;
        }
        self.active as f64 / self.capacity as f64
    }
}

#[derive(Clone)]
pub struct ProcessPool {
    inner: Arc<PoolInner>,
}

pub(crate) struct PoolInner {
    pub cfg: PoolConfig,
    pub launcher: Arc<dyn ProcessLauncher>,
    pub registry: TaskRegistry,
    pub table: Mutex<SlotTable>,
    pub slot_freed: Notify,
    pub controls: Mutex<HashMap<TaskId, mpsc::UnboundedSender<Control>>>,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
}

impl ProcessPool {
    pub fn new(cfg: PoolConfig, launcher: Arc<dyn ProcessLauncher>, registry: TaskRegistry) -> Self {
        let initial = cfg.initial_workers.clamp(cfg.min_workers, cfg.max_workers);
        tracing::info!(
            launcher = launcher.name(),
            capacity = initial,
            min = cfg.min_workers,
            max = cfg.max_workers,
            "process pool ready"
        );
        Self {
            inner: Arc::new(PoolInner {
                cfg,
                launcher,
                registry,
                table: Mutex::new(SlotTable::new(initial)),
                slot_freed: Notify::new(),
                controls: Mutex::new(HashMap::new()),
                completed: AtomicU64::new(0),
                failed: AtomicU64::new(0),
                cancelled: AtomicU64::new(0),
            }),
        }
    }

    pub fn registry(&self) -> &TaskRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.cfg
    }

    /// Validate, queue and admit `descriptor`, then start it on a worker.
    ///
    /// Waits for a free slot according to the admission mode; a request that
    /// is not admitted in time is discarded and fails with `CapacityExceeded`.
    pub async fn submit(&self, descriptor: CommandDescriptor) -> Result<TaskId, EngineError> {
        descriptor.validate(self.inner.cfg.max_timeout())?;
        self.submit_shared(Arc::new(descriptor)).await
    }

    /// Same as [`submit`](Self::submit) for an already validated descriptor.
    pub(crate) async fn submit_shared(
        &self,
        descriptor: Arc<CommandDescriptor>,
    ) -> Result<TaskId, EngineError> {
        let registry = &self.inner.registry;
        let id = registry.register(descriptor.clone());

        let slot = match self.admit(id).await {
            Ok(slot) => slot,
            Err(EngineError::Cancelled(id)) => return Err(EngineError::Cancelled(id)),
            Err(e) => {
                registry.discard(id);
                return Err(e);
            }
        };
        let lease = SlotLease::new(self.inner.clone(), slot);

        let started = registry.transition_if(id, TaskState::Queued, TaskState::Running, |t| {
            t.slot = Some(slot);
            t.started_at = Some(Utc::now());
        })?;
        if started.is_none() {
            // terminated between admission and start
            lock(&self.inner.table).cancelled.remove(&id);
            drop(lease);
            return Err(EngineError::Cancelled(id));
        }

        let (ctl_tx, ctl_rx) = mpsc::unbounded_channel();
        lock(&self.inner.controls).insert(id, ctl_tx);
        tracing::info!(task_id = %id, tool = %descriptor.tool, slot, "task admitted");
        tokio::spawn(worker::run(self.inner.clone(), lease, id, descriptor, ctl_rx));
        Ok(id)
    }

    async fn admit(&self, id: TaskId) -> Result<SlotId, EngineError> {
        let wait = self.inner.cfg.admission_timeout();
        let deadline = Instant::now() + wait;
        let _waiting = WaitingGuard::new(&self.inner);

        loop {
            let notified = self.inner.slot_freed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut table = lock(&self.inner.table);
                if table.cancelled.remove(&id) {
                    return Err(EngineError::Cancelled(id));
                }
                if let Some(slot) = table.try_assign(id) {
                    return Ok(slot);
                }
            }

            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                tracing::warn!(task_id = %id, waited_ms = wait.as_millis() as u64, "admission timed out");
                return Err(EngineError::CapacityExceeded {
                    waited_ms: wait.as_millis() as u64,
                });
            }
        }
    }

    pub fn status(&self, id: TaskId) -> Result<Task, EngineError> {
        self.inner.registry.status(id)
    }

    /// Cancel a queued task or stop a running one (SIGTERM, then SIGKILL
    /// after the grace period). Terminal tasks are left untouched.
    pub fn terminate(&self, id: TaskId) -> Result<(), EngineError> {
        match self.inner.registry.poll(id)? {
            TaskState::Queued => {
                lock(&self.inner.table).cancelled.insert(id);
                let cancelled = self.inner.registry.transition_if(
                    id,
                    TaskState::Queued,
                    TaskState::Cancelled,
                    |t| t.diagnostic = Some("cancelled before start".to_string()),
                )?;
                if cancelled.is_some() {
                    self.inner.cancelled.fetch_add(1, Ordering::Relaxed);
                    self.inner.slot_freed.notify_waiters();
                    tracing::info!(task_id = %id, "queued task cancelled");
                    Ok(())
                } else {
                    lock(&self.inner.table).cancelled.remove(&id);
                    self.send(id, Control::Terminate)
                }
            }
            TaskState::Running => self.send(id, Control::Terminate),
            _ => Ok(()),
        }
    }

    pub fn pause(&self, id: TaskId) -> Result<(), EngineError> {
        self.require_running(id)?;
        self.send(id, Control::Pause)
    }

    pub fn resume(&self, id: TaskId) -> Result<(), EngineError> {
        self.require_running(id)?;
        self.send(id, Control::Resume)
    }

    fn require_running(&self, id: TaskId) -> Result<(), EngineError> {
        match self.inner.registry.poll(id)? {
            TaskState::Running => Ok(()),
            other => Err(EngineError::Unsupported(format!(
                "task {id} is {other}, not running"
            ))),
        }
    }

    fn send(&self, id: TaskId, ctl: Control) -> Result<(), EngineError> {
        // A missing sender means the worker is already finishing.
        if let Some(tx) = lock(&self.inner.controls).get(&id) {
            let _ = tx.send(ctl);
        }
        Ok(())
    }

    /// Terminate every queued and running task.
    pub fn terminate_all(&self) {
        let ids: Vec<TaskId> = lock(&self.inner.controls).keys().copied().collect();
        for id in ids {
            let _ = self.send(id, Control::Terminate);
        }
        let queued = self
            .inner
            .registry
            .list(&crate::registry::TaskFilter::with_states([TaskState::Queued]));
        for task in &queued {
            let _ = self.terminate(task.id);
        }
    }

    /// Grow or shrink the slot table toward `target`, clamped to
    /// [min_workers, max_workers]. Busy slots are never removed, so the
    /// result may stay above `target`. Returns the new capacity.
    pub fn resize(&self, target: usize) -> usize {
        let target = target.clamp(self.inner.cfg.min_workers, self.inner.cfg.max_workers);
        let (before, after) = {
            let mut table = lock(&self.inner.table);
            let before = table.capacity();
            if target > before {
                table.grow(target - before);
            } else if target < before {
                table.shrink(before - target);
            }
            (before, table.capacity())
        };
        if after != before {
            tracing::info!(from = before, to = after, "pool resized");
        }
        if after > before {
            self.inner.slot_freed.notify_waiters();
        }
        after
    }

    /// Cap concurrent admissions below capacity (None lifts the cap).
    pub fn set_admission_limit(&self, limit: Option<usize>) {
        let changed = {
            let mut table = lock(&self.inner.table);
            let changed = table.admission_limit != limit;
            table.admission_limit = limit;
            changed
        };
        if changed {
            tracing::info!(?limit, "admission limit changed");
            self.inner.slot_freed.notify_waiters();
        }
    }

    pub fn capacity(&self) -> usize {
        lock(&self.inner.table).capacity()
    }

    pub fn slots(&self) -> Vec<WorkerSlot> {
        lock(&self.inner.table).snapshot()
    }

    pub fn stats(&self) -> PoolStats {
        let table = lock(&self.inner.table);
        let capacity = table.capacity();
        let active = table.in_use();
        PoolStats {
            capacity,
            active,
            idle: capacity - active,
            queue_depth: table.waiting,
            admission_limit: table.admission_limit,
            min_workers: self.inner.cfg.min_workers,
            max_workers: self.inner.cfg.max_workers,
            completed: self.inner.completed.load(Ordering::Relaxed),
            failed: self.inner.failed.load(Ordering::Relaxed),
            cancelled: self.inner.cancelled.load(Ordering::Relaxed),
        }
    }
}
