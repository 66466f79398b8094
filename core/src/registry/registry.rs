use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, watch};

use super::events::{CompletionEvent, CompletionSubscriber};
use super::task::{ExecutionResult, Task, TaskFilter, TaskId, TaskListing, TaskState};
use super::transitions::TaskTransition;
use crate::descriptor::CommandDescriptor;
use crate::error::EngineError;
use crate::util::lock;

struct TaskCell {
    task: Task,
    state_tx: watch::Sender<TaskState>,
}

#[derive(Clone)]
pub struct TaskRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    tasks: Mutex<HashMap<TaskId, TaskCell>>,
    subscribers: RwLock<Vec<Arc<dyn CompletionSubscriber>>>,
    event_tx: broadcast::Sender<CompletionEvent>,
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskRegistry {
    pub fn new() -> Self {
        let (event_tx, _) = broadcast::channel(1024);
        Self {
            inner: Arc::new(RegistryInner {
                tasks: Mutex::new(HashMap::new()),
                subscribers: RwLock::new(Vec::new()),
                event_tx,
            }),
        }
    }

    pub fn add_subscriber(&self, subscriber: Arc<dyn CompletionSubscriber>) {
        tracing::debug!(subscriber = subscriber.name(), "completion subscriber registered");
        self.inner
            .subscribers
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(subscriber);
    }

    /// Stream of completion events for external observers. Lagging receivers
    /// lose the oldest events.
    pub fn subscribe(&self) -> broadcast::Receiver<CompletionEvent> {
        self.inner.event_tx.subscribe()
    }

    pub fn register(&self, descriptor: Arc<CommandDescriptor>) -> TaskId {
        let task = Task::queued(descriptor);
        let id = task.id;
        let (state_tx, _) = watch::channel(TaskState::Queued);
        tracing::debug!(task_id = %id, tool = %task.descriptor.tool, "task queued");
        lock(&self.inner.tasks).insert(id, TaskCell { task, state_tx });
        id
    }

    /// Record a request answered from the cache. The task is terminal from
    /// the start and publishes no completion event.
    pub fn insert_cached(
        &self,
        descriptor: Arc<CommandDescriptor>,
        cached: &ExecutionResult,
    ) -> Task {
        let mut task = Task::queued(descriptor);
        task.state = TaskState::Succeeded;
        task.cache_hit = true;
        task.exit_code = cached.exit_code;
        task.stdout = cached.stdout.clone();
        task.stderr = cached.stderr.clone();
        task.completed_at = Some(Utc::now());
        task.diagnostic = cached.diagnostic.clone();
        let (state_tx, _) = watch::channel(TaskState::Succeeded);
        tracing::debug!(task_id = %task.id, tool = %task.descriptor.tool, "served from cache");
        lock(&self.inner.tasks).insert(
            task.id,
            TaskCell {
                task: task.clone(),
                state_tx,
            },
        );
        task
    }

    /// Move a task to `to`, applying `apply` under the same lock. Entering a
    /// terminal state publishes a completion event after the lock is dropped.
    pub fn transition<F>(&self, id: TaskId, to: TaskState, apply: F) -> Result<Task, EngineError>
    where
        F: FnOnce(&mut Task),
    {
        self.apply_transition(id, None, to, apply)?
            .ok_or(EngineError::TaskNotFound(id))
    }

    /// Like [`transition`](Self::transition), but only when the task is
    /// currently in `from`. Returns `Ok(None)` otherwise.
    pub fn transition_if<F>(
        &self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
        apply: F,
    ) -> Result<Option<Task>, EngineError>
    where
        F: FnOnce(&mut Task),
    {
        self.apply_transition(id, Some(from), to, apply)
    }

    fn apply_transition<F>(
        &self,
        id: TaskId,
        expected: Option<TaskState>,
        to: TaskState,
        apply: F,
    ) -> Result<Option<Task>, EngineError>
    where
        F: FnOnce(&mut Task),
    {
        let snapshot = {
            let mut tasks = lock(&self.inner.tasks);
            let cell = tasks.get_mut(&id).ok_or(EngineError::TaskNotFound(id))?;
            if expected.is_some_and(|from| from != cell.task.state) {
                return Ok(None);
            }
            TaskTransition::validate(cell.task.state, to)?;
            apply(&mut cell.task);
            cell.task.state = to;
            if to.is_terminal() {
                cell.task.completed_at.get_or_insert_with(Utc::now);
                cell.task.paused = false;
                cell.task.slot = None;
            }
            if !to.is_terminal() {
                cell.state_tx.send_replace(to);
            }
            cell.task.clone()
        };
        tracing::debug!(task_id = %id, state = %to, "task transition");
        if to.is_terminal() {
            // Subscribers (cache, history) see the result before awaiters wake.
            self.publish(&snapshot);
            if let Some(cell) = lock(&self.inner.tasks).get(&id) {
                cell.state_tx.send_replace(to);
            }
        }
        Ok(Some(snapshot))
    }

    /// Mutate non-state fields (pid, paused flag).
    pub fn update<F>(&self, id: TaskId, apply: F) -> Result<(), EngineError>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = lock(&self.inner.tasks);
        let cell = tasks.get_mut(&id).ok_or(EngineError::TaskNotFound(id))?;
        apply(&mut cell.task);
        Ok(())
    }

    /// Forget a task that never got admitted.
    pub fn discard(&self, id: TaskId) {
        lock(&self.inner.tasks).remove(&id);
    }

    pub fn poll(&self, id: TaskId) -> Result<TaskState, EngineError> {
        lock(&self.inner.tasks)
            .get(&id)
            .map(|c| c.task.state)
            .ok_or(EngineError::TaskNotFound(id))
    }

    pub fn status(&self, id: TaskId) -> Result<Task, EngineError> {
        lock(&self.inner.tasks)
            .get(&id)
            .map(|c| c.task.clone())
            .ok_or(EngineError::TaskNotFound(id))
    }

    /// Wait until the task is terminal or `timeout` elapses, then return its
    /// snapshot. Timing out (or dropping this future) leaves the task alone.
    pub async fn await_task(&self, id: TaskId, timeout: Duration) -> Result<Task, EngineError> {
        let mut rx = {
            let tasks = lock(&self.inner.tasks);
            let cell = tasks.get(&id).ok_or(EngineError::TaskNotFound(id))?;
            cell.state_tx.subscribe()
        };
        let _ = tokio::time::timeout(timeout, rx.wait_for(|s| s.is_terminal())).await;
        self.status(id)
    }

    pub fn list(&self, filter: &TaskFilter) -> TaskListing {
        let tasks = lock(&self.inner.tasks)
            .values()
            .filter(|c| filter.matches(&c.task))
            .map(|c| c.task.clone())
            .collect();
        TaskListing::new(tasks)
    }

    /// Publish the completion event of a terminal task again.
    pub fn redeliver(&self, id: TaskId) -> Result<bool, EngineError> {
        let task = self.status(id)?;
        if !task.is_terminal() || task.cache_hit {
            return Ok(false);
        }
        self.publish(&task);
        Ok(true)
    }

    /// Drop terminal tasks that completed more than `older_than` ago.
    pub fn prune(&self, older_than: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(older_than).unwrap_or_else(|_| chrono::Duration::zero());
        let mut tasks = lock(&self.inner.tasks);
        let before = tasks.len();
        tasks.retain(|_, c| match c.task.completed_at {
            Some(done) if c.task.is_terminal() => done > cutoff,
            _ => true,
        });
        before - tasks.len()
    }

    pub fn len(&self) -> usize {
        lock(&self.inner.tasks).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn publish(&self, task: &Task) {
        let event = CompletionEvent {
            descriptor: task.descriptor.clone(),
            result: task.to_result(),
        };
        let subscribers = self
            .inner
            .subscribers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .clone();
        for s in subscribers {
            s.on_completion(&event);
        }
        let _ = self.inner.event_tx.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn descriptor() -> Arc<CommandDescriptor> {
        Arc::new(CommandDescriptor::builder("nmap", "10.0.0.1").build())
    }

    #[derive(Default)]
    struct Counter(AtomicUsize);

    impl CompletionSubscriber for Counter {
        fn name(&self) -> &str {
            "counter"
        }
        fn on_completion(&self, _event: &CompletionEvent) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn terminal_transition_publishes_and_is_final() {
        let reg = TaskRegistry::new();
        let counter = Arc::new(Counter::default());
        reg.add_subscriber(counter.clone());
        let mut events = reg.subscribe();

        let id = reg.register(descriptor());
        assert_eq!(reg.poll(id).unwrap(), TaskState::Queued);
        reg.transition(id, TaskState::Running, |t| t.slot = Some(1))
            .unwrap();
        assert_eq!(counter.0.load(Ordering::SeqCst), 0);

        let done = reg
            .transition(id, TaskState::Succeeded, |t| t.exit_code = Some(0))
            .unwrap();
        assert!(done.completed_at.is_some());
        assert_eq!(done.slot, None);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert_eq!(events.try_recv().unwrap().result.task_id, id);

        let err = reg.transition(id, TaskState::Failed, |_| {}).unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));

        assert!(reg.redeliver(id).unwrap());
        assert_eq!(counter.0.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn conditional_transition_checks_current_state() {
        let reg = TaskRegistry::new();
        let id = reg.register(descriptor());
        reg.transition(id, TaskState::Running, |_| {}).unwrap();

        let skipped = reg
            .transition_if(id, TaskState::Queued, TaskState::Cancelled, |_| {})
            .unwrap();
        assert!(skipped.is_none());
        assert_eq!(reg.poll(id).unwrap(), TaskState::Running);

        let done = reg
            .transition_if(id, TaskState::Running, TaskState::Cancelled, |_| {})
            .unwrap();
        assert_eq!(done.map(|t| t.state), Some(TaskState::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn await_returns_snapshot_on_timeout_without_cancelling() {
        let reg = TaskRegistry::new();
        let id = reg.register(descriptor());
        reg.transition(id, TaskState::Running, |_| {}).unwrap();

        let snap = reg.await_task(id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(snap.state, TaskState::Running);
        assert_eq!(reg.poll(id).unwrap(), TaskState::Running);
    }

    #[tokio::test]
    async fn await_wakes_on_completion() {
        let reg = TaskRegistry::new();
        let id = reg.register(descriptor());
        reg.transition(id, TaskState::Running, |_| {}).unwrap();

        let waiter = {
            let reg = reg.clone();
            tokio::spawn(async move { reg.await_task(id, Duration::from_secs(30)).await })
        };
        tokio::task::yield_now().await;
        reg.transition(id, TaskState::Failed, |t| t.exit_code = Some(2))
            .unwrap();

        let task = waiter.await.unwrap().unwrap();
        assert_eq!(task.state, TaskState::Failed);
        assert_eq!(task.exit_code, Some(2));
    }

    #[test]
    fn listing_is_a_stable_snapshot() {
        let reg = TaskRegistry::new();
        let a = reg.register(descriptor());
        let _b = reg.register(Arc::new(
            CommandDescriptor::builder("gobuster", "http://x").build(),
        ));

        let listing = reg.list(&TaskFilter::all().tool("NMAP"));
        assert_eq!(listing.ids(), vec![a]);

        reg.transition(a, TaskState::Cancelled, |_| {}).unwrap();
        let first: Vec<_> = listing.iter().map(|t| t.state).collect();
        let second: Vec<_> = (&listing).into_iter().map(|t| t.state).collect();
        assert_eq!(first, vec![TaskState::Queued]);
        assert_eq!(first, second);

        assert_eq!(reg.list(&TaskFilter::active()).len(), 1);
        assert_eq!(
            reg.list(&TaskFilter::with_states([TaskState::Cancelled])).len(),
            1
        );
    }

    #[test]
    fn cached_tasks_are_terminal_and_silent() {
        let reg = TaskRegistry::new();
        let counter = Arc::new(Counter::default());
        reg.add_subscriber(counter.clone());

        let id = reg.register(descriptor());
        reg.transition(id, TaskState::Running, |_| {}).unwrap();
        let original = reg
            .transition(id, TaskState::Succeeded, |t| t.exit_code = Some(0))
            .unwrap();

        let hit = reg.insert_cached(descriptor(), &original.to_result());
        assert!(hit.cache_hit);
        assert_eq!(reg.poll(hit.id).unwrap(), TaskState::Succeeded);
        assert_eq!(counter.0.load(Ordering::SeqCst), 1);
        assert!(!reg.redeliver(hit.id).unwrap());
    }

    #[test]
    fn prune_drops_only_old_terminal_tasks() {
        let reg = TaskRegistry::new();
        let done = reg.register(descriptor());
        reg.transition(done, TaskState::Cancelled, |t| {
            t.completed_at = Some(Utc::now() - chrono::Duration::hours(2))
        })
        .unwrap();
        let live = reg.register(descriptor());

        assert_eq!(reg.prune(Duration::from_secs(3600)), 1);
        assert!(reg.status(done).is_err());
        assert!(reg.status(live).is_ok());
    }
}
