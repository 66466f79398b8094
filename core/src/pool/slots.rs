use std::collections::HashSet;
use std::sync::Arc;

use serde::Serialize;

use super::pool::PoolInner;
use crate::registry::{SlotId, TaskId};
use crate::util::lock;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerSlot {
    pub id: SlotId,
    pub pid: Option<u32>,
    pub task: Option<TaskId>,
}

impl WorkerSlot {
    pub fn is_idle(&self) -> bool {
        self.task.is_none()
    }
}

pub(crate) struct SlotTable {
    slots: Vec<WorkerSlot>,
    next_id: SlotId,
    pub waiting: usize,
    pub admission_limit: Option<usize>,
    /// Queued tasks terminated before they got a slot.
    pub cancelled: HashSet<TaskId>,
}

impl SlotTable {
    pub fn new(capacity: usize) -> Self {
        let mut table = Self {
            slots: Vec::with_capacity(capacity),
            next_id: 0,
            waiting: 0,
            admission_limit: None,
            cancelled: HashSet::new(),
        };
        table.grow(capacity);
        table
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn in_use(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_idle()).count()
    }

    pub fn effective_limit(&self) -> usize {
        match self.admission_limit {
            Some(limit) => limit.min(self.capacity()),
            None => self.capacity(),
        }
    }

    pub fn try_assign(&mut self, task: TaskId) -> Option<SlotId> {
        if self.in_use() >= self.effective_limit() {
            return None;
        }
        let slot = self.slots.iter_mut().find(|s| s.is_idle())?;
        slot.task = Some(task);
        Some(slot.id)
    }

    pub fn bind_pid(&mut self, slot: SlotId, pid: Option<u32>) {
        if let Some(s) = self.slots.iter_mut().find(|s| s.id == slot) {
            s.pid = pid;
        }
    }

    pub fn release(&mut self, slot: SlotId) {
        if let Some(s) = self.slots.iter_mut().find(|s| s.id == slot) {
            s.task = None;
            s.pid = None;
        }
    }

    pub fn grow(&mut self, n: usize) {
        for _ in 0..n {
            self.slots.push(WorkerSlot {
                id: self.next_id,
                pid: None,
                task: None,
            });
            self.next_id += 1;
        }
    }

    /// Remove up to `n` idle slots; busy slots are never removed.
    pub fn shrink(&mut self, n: usize) -> usize {
        let mut removed = 0;
        while removed < n {
            match self.slots.iter().rposition(|s| s.is_idle()) {
                Some(idx) => {
                    self.slots.remove(idx);
                    removed += 1;
                }
                None => break,
            }
        }
        removed
    }

    pub fn snapshot(&self) -> Vec<WorkerSlot> {
        self.slots.clone()
    }
}

/// Holds a slot for the lifetime of one task. Dropping it, on any path,
/// frees the slot and wakes admission waiters.
pub(crate) struct SlotLease {
    inner: Arc<PoolInner>,
    slot: SlotId,
}

impl SlotLease {
    pub fn new(inner: Arc<PoolInner>, slot: SlotId) -> Self {
        Self { inner, slot }
    }

    pub fn id(&self) -> SlotId {
        self.slot
    }

    pub fn bind_pid(&self, pid: Option<u32>) {
        lock(&self.inner.table).bind_pid(self.slot, pid);
    }
}

impl Drop for SlotLease {
    fn drop(&mut self) {
        lock(&self.inner.table).release(self.slot);
        tracing::trace!(slot = self.slot, "slot released");
        self.inner.slot_freed.notify_waiters();
    }
}

/// Counts a caller waiting for admission while alive.
pub(crate) struct WaitingGuard<'a> {
    inner: &'a PoolInner,
}

impl<'a> WaitingGuard<'a> {
    pub fn new(inner: &'a PoolInner) -> Self {
        lock(&inner.table).waiting += 1;
        Self { inner }
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        let mut table = lock(&self.inner.table);
        table.waiting = table.waiting.saturating_sub(1);
    }
}
