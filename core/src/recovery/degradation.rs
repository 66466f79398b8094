use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::time::Instant;

use crate::config::DegradationConfig;
use crate::descriptor::Priority;
use crate::pool::ProcessPool;
use crate::registry::{CompletionEvent, CompletionSubscriber, TaskId, TaskState};
use crate::util::{lock, RecentIds};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DegradationReason {
    FailureRate { rate: f64 },
    HostPressure { detail: String },
    Operator { note: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DegradationState {
    Normal,
    Degraded {
        reason: DegradationReason,
        since: DateTime<Utc>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DegradationStatus {
    pub state: DegradationState,
    /// None until the window holds the minimum sample count.
    pub failure_rate: Option<f64>,
    pub samples: usize,
    pub window_size: usize,
    pub threshold: f64,
    pub operator_hold: bool,
    pub reject_below: Priority,
}

struct MonitorState {
    window: VecDeque<bool>,
    seen: RecentIds<TaskId>,
    state: DegradationState,
    operator: bool,
    healthy_since: Option<Instant>,
    last_pressure: Option<Instant>,
    resource_failures: VecDeque<Instant>,
}

enum Change {
    Enter,
    Exit,
}

/// Tracks recent outcomes and host pressure; flips the engine between
/// normal and degraded operation and applies the pool admission limit.
pub struct DegradationMonitor {
    cfg: DegradationConfig,
    pool: Option<ProcessPool>,
    state: Mutex<MonitorState>,
}

impl DegradationMonitor {
    pub fn new(cfg: DegradationConfig, pool: Option<ProcessPool>) -> Self {
        let seen = RecentIds::new(cfg.window_size.max(1) * 16);
        Self {
            cfg,
            pool,
            state: Mutex::new(MonitorState {
                window: VecDeque::new(),
                seen,
                state: DegradationState::Normal,
                operator: false,
                healthy_since: None,
                last_pressure: None,
                resource_failures: VecDeque::new(),
            }),
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(lock(&self.state).state, DegradationState::Degraded { .. })
    }

    /// Whether new work at `priority` may enter the pool right now.
    pub fn admits(&self, priority: Priority) -> bool {
        !self.is_degraded() || priority >= self.cfg.reject_below
    }

    pub fn failure_rate(&self) -> Option<f64> {
        Self::rate_of(&lock(&self.state).window, self.cfg.min_samples)
    }

    fn rate_of(window: &VecDeque<bool>, min_samples: usize) -> Option<f64> {
        if window.is_empty() || window.len() < min_samples {
            return None;
        }
        let failures = window.iter().filter(|ok| !**ok).count();
        Some(failures as f64 / window.len() as f64)
    }

    pub fn status(&self) -> DegradationStatus {
        let st = lock(&self.state);
        DegradationStatus {
            state: st.state.clone(),
            failure_rate: Self::rate_of(&st.window, self.cfg.min_samples),
            samples: st.window.len(),
            window_size: self.cfg.window_size,
            threshold: self.cfg.failure_threshold,
            operator_hold: st.operator,
            reject_below: self.cfg.reject_below,
        }
    }

    pub fn record_outcome(&self, task: TaskId, success: bool) {
        self.record_outcome_at(task, success, Instant::now());
    }

    /// Feed one outcome. Duplicate task ids are ignored.
    pub fn record_outcome_at(&self, task: TaskId, success: bool, now: Instant) {
        let change = {
            let mut st = lock(&self.state);
            if !st.seen.insert(task) {
                return;
            }
            st.window.push_back(success);
            while st.window.len() > self.cfg.window_size {
                st.window.pop_front();
            }
            self.evaluate_locked(&mut st, now)
        };
        self.apply(change);
    }

    pub fn report_pressure(&self, detail: impl Into<String>) {
        self.report_pressure_at(detail, Instant::now());
    }

    /// Sustained host pressure or resource exhaustion. Degrades at once and
    /// blocks recovery until a full cooldown passes without another report.
    pub fn report_pressure_at(&self, detail: impl Into<String>, now: Instant) {
        let detail = detail.into();
        let change = {
            let mut st = lock(&self.state);
            st.last_pressure = Some(now);
            st.healthy_since = None;
            if matches!(st.state, DegradationState::Normal) {
                tracing::warn!(%detail, "host pressure reported");
                st.state = DegradationState::Degraded {
                    reason: DegradationReason::HostPressure { detail },
                    since: Utc::now(),
                };
                Some(Change::Enter)
            } else {
                None
            }
        };
        self.apply(change);
    }

    pub fn report_resource_exhaustion(&self, detail: impl Into<String>) -> bool {
        self.report_resource_exhaustion_at(detail, Instant::now())
    }

    /// One task ran out of resources. Only enough of these within a
    /// cooldown window count as host pressure; returns true when this
    /// report crossed that threshold.
    pub fn report_resource_exhaustion_at(&self, detail: impl Into<String>, now: Instant) -> bool {
        let window = Duration::from_secs(self.cfg.cooldown_secs);
        let count = {
            let mut st = lock(&self.state);
            st.resource_failures.push_back(now);
            while st
                .resource_failures
                .front()
                .is_some_and(|at| now.saturating_duration_since(*at) >= window)
            {
                st.resource_failures.pop_front();
            }
            st.resource_failures.len()
        };
        let detail = detail.into();
        if count < self.cfg.resource_failure_threshold {
            tracing::debug!(%detail, count, "resource exhaustion noted");
            return false;
        }
        self.report_pressure_at(
            format!("{count} resource exhaustion failures, last: {detail}"),
            now,
        );
        true
    }

    /// Re-check exit conditions; called from the maintenance loop.
    pub fn tick(&self) {
        self.tick_at(Instant::now());
    }

    pub fn tick_at(&self, now: Instant) {
        let change = {
            let mut st = lock(&self.state);
            self.evaluate_locked(&mut st, now)
        };
        self.apply(change);
    }

    /// Operator override: degrade and hold until [`clear`](Self::clear).
    pub fn trigger(&self, note: impl Into<String>) {
        let note = note.into();
        let entered = {
            let mut st = lock(&self.state);
            st.operator = true;
            st.healthy_since = None;
            let was_normal = matches!(st.state, DegradationState::Normal);
            st.state = DegradationState::Degraded {
                reason: DegradationReason::Operator { note: note.clone() },
                since: Utc::now(),
            };
            was_normal
        };
        tracing::warn!(%note, "degradation triggered by operator");
        if entered {
            self.apply(Some(Change::Enter));
        }
    }

    /// Operator clear: back to normal immediately with an empty window.
    pub fn clear(&self) {
        let was_degraded = {
            let mut st = lock(&self.state);
            st.operator = false;
            st.window.clear();
            st.healthy_since = None;
            st.last_pressure = None;
            st.resource_failures.clear();
            let was = matches!(st.state, DegradationState::Degraded { .. });
            st.state = DegradationState::Normal;
            was
        };
        tracing::info!("degradation cleared by operator");
        if was_degraded {
            self.apply(Some(Change::Exit));
        }
    }

    fn evaluate_locked(&self, st: &mut MonitorState, now: Instant) -> Option<Change> {
        let cooldown = Duration::from_secs(self.cfg.cooldown_secs);
        let rate = Self::rate_of(&st.window, self.cfg.min_samples);
        let failing = rate.is_some_and(|r| r > self.cfg.failure_threshold);
        let pressured = st
            .last_pressure
            .is_some_and(|at| now.saturating_duration_since(at) < cooldown);

        match st.state {
            DegradationState::Normal => {
                if failing {
                    let rate = rate.unwrap_or_default();
                    tracing::warn!(
                        failure_rate = rate,
                        threshold = self.cfg.failure_threshold,
                        "failure rate above threshold; degrading"
                    );
                    st.state = DegradationState::Degraded {
                        reason: DegradationReason::FailureRate { rate },
                        since: Utc::now(),
                    };
                    st.healthy_since = None;
                    Some(Change::Enter)
                } else {
                    None
                }
            }
            DegradationState::Degraded { .. } => {
                if st.operator {
                    return None;
                }
                if failing || pressured {
                    st.healthy_since = None;
                    return None;
                }
                let since = *st.healthy_since.get_or_insert(now);
                if now.saturating_duration_since(since) >= cooldown {
                    tracing::info!(failure_rate = ?rate, "recovered; leaving degraded mode");
                    st.state = DegradationState::Normal;
                    st.healthy_since = None;
                    Some(Change::Exit)
                } else {
                    None
                }
            }
        }
    }

    fn apply(&self, change: Option<Change>) {
        let (Some(change), Some(pool)) = (change, self.pool.as_ref()) else {
            return;
        };
        match change {
            Change::Enter => {
                let limit =
                    ((pool.capacity() as f64 * self.cfg.capacity_factor).floor() as usize).max(1);
                pool.set_admission_limit(Some(limit));
            }
            Change::Exit => pool.set_admission_limit(None),
        }
    }
}

impl CompletionSubscriber for DegradationMonitor {
    fn name(&self) -> &str {
        "degradation-monitor"
    }

    fn on_completion(&self, event: &CompletionEvent) {
        let success = match event.result.state {
            TaskState::Succeeded => true,
            TaskState::Failed | TaskState::TimedOut => false,
            // cancellation says nothing about tool health
            _ => return,
        };
        self.record_outcome(event.result.task_id, success);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn monitor() -> DegradationMonitor {
        DegradationMonitor::new(
            DegradationConfig {
                window_size: 10,
                min_samples: 5,
                failure_threshold: 0.5,
                cooldown_secs: 30,
                capacity_factor: 0.5,
                reject_below: Priority::Normal,
                resource_failure_threshold: 3,
            },
            None,
        )
    }

    fn feed(m: &DegradationMonitor, outcomes: &[bool], now: Instant) {
        for ok in outcomes {
            m.record_outcome_at(TaskId::new(), *ok, now);
        }
    }

    #[test]
    fn eighty_percent_failures_degrade() {
        let m = monitor();
        let now = Instant::now();
        feed(&m, &[false, false, false, false, false, false, false, false, true, true], now);
        assert!(m.is_degraded());
        assert!(!m.admits(Priority::Low));
        assert!(m.admits(Priority::Normal));
        assert_eq!(m.failure_rate(), Some(0.8));
        assert!(matches!(
            m.status().state,
            DegradationState::Degraded {
                reason: DegradationReason::FailureRate { .. },
                ..
            }
        ));
    }

    #[test]
    fn needs_minimum_samples() {
        let m = monitor();
        feed(&m, &[false, false, false, false], Instant::now());
        assert!(!m.is_degraded());
        assert_eq!(m.failure_rate(), None);
    }

    #[test]
    fn duplicates_are_ignored() {
        let m = monitor();
        let id = TaskId::new();
        let now = Instant::now();
        for _ in 0..10 {
            m.record_outcome_at(id, false, now);
        }
        assert_eq!(m.status().samples, 1);
    }

    #[test]
    fn exit_requires_healthy_cooldown() {
        let m = monitor();
        let t0 = Instant::now();
        feed(&m, &[false; 10], t0);
        assert!(m.is_degraded());

        feed(&m, &[true; 6], t0);
        // 4/10 failing: healthy, cooldown starts now
        assert!(m.is_degraded());
        m.tick_at(t0 + Duration::from_secs(29));
        assert!(m.is_degraded());
        m.tick_at(t0 + Duration::from_secs(30));
        assert!(!m.is_degraded());
    }

    #[test]
    fn pressure_degrades_and_delays_recovery() {
        let m = monitor();
        let t0 = Instant::now();
        m.report_pressure_at("cpu 97%", t0);
        assert!(m.is_degraded());
        m.tick_at(t0 + Duration::from_secs(10));
        assert!(m.is_degraded());
        // pressure window ends at 30s, then a full healthy cooldown
        m.tick_at(t0 + Duration::from_secs(31));
        assert!(m.is_degraded());
        m.tick_at(t0 + Duration::from_secs(61));
        assert!(!m.is_degraded());
    }

    #[test]
    fn isolated_resource_failures_do_not_degrade() {
        let m = monitor();
        let t0 = Instant::now();
        assert!(!m.report_resource_exhaustion_at("a: out of memory", t0));
        assert!(!m.report_resource_exhaustion_at("b: out of memory", t0 + Duration::from_secs(10)));
        assert!(!m.is_degraded());

        // the first report has aged out of the 30s window
        assert!(!m.report_resource_exhaustion_at("c: out of memory", t0 + Duration::from_secs(31)));
        assert!(!m.is_degraded());

        assert!(m.report_resource_exhaustion_at("d: out of memory", t0 + Duration::from_secs(32)));
        assert!(matches!(
            m.status().state,
            DegradationState::Degraded {
                reason: DegradationReason::HostPressure { .. },
                ..
            }
        ));
    }

    #[test]
    fn operator_trigger_holds_until_clear() {
        let m = monitor();
        let t0 = Instant::now();
        m.trigger("maintenance");
        feed(&m, &[true; 10], t0);
        m.tick_at(t0 + Duration::from_secs(3600));
        assert!(m.is_degraded());
        assert!(m.status().operator_hold);

        m.clear();
        assert!(!m.is_degraded());
        assert_eq!(m.status().samples, 0);
    }
}
