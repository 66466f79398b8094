use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use super::pressure::{HostPressure, PressureSource};
use crate::config::ScalingConfig;
use crate::pool::ProcessPool;
use crate::recovery::DegradationMonitor;
use crate::registry::{CompletionEvent, CompletionSubscriber};
use crate::util::lock;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSample {
    pub capacity: usize,
    pub active: usize,
    pub queue_depth: usize,
    pub utilization: f64,
    pub failure_rate: Option<f64>,
    pub failure_threshold: f64,
    pub pressure: Option<HostPressure>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HoldReason {
    Disabled,
    Cooldown,
    HostPressure,
    FailureRate,
    AtMax,
    AtMin,
    Sustaining,
    Steady,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ScaleDecision {
    Up { from: usize, to: usize },
    Down { from: usize, to: usize },
    Hold { reason: HoldReason },
}

impl ScaleDecision {
    fn hold(reason: HoldReason) -> Self {
        ScaleDecision::Hold { reason }
    }
}

#[derive(Default)]
struct ScalerState {
    low_since: Option<Instant>,
    pressure_since: Option<Instant>,
    cooldown_until: Option<Instant>,
    last_pressure: Option<HostPressure>,
}

/// Grows the pool when it is saturated with work waiting and shrinks it
/// after a sustained quiet period. Every resize starts a cooldown.
pub struct AutoScaler {
    cfg: ScalingConfig,
    pool: ProcessPool,
    monitor: Arc<DegradationMonitor>,
    pressure: Option<Arc<dyn PressureSource>>,
    state: Mutex<ScalerState>,
}

impl AutoScaler {
    pub fn new(
        cfg: ScalingConfig,
        pool: ProcessPool,
        monitor: Arc<DegradationMonitor>,
        pressure: Option<Arc<dyn PressureSource>>,
    ) -> Self {
        Self {
            cfg,
            pool,
            monitor,
            pressure,
            state: Mutex::new(ScalerState::default()),
        }
    }

    pub fn config(&self) -> &ScalingConfig {
        &self.cfg
    }

    /// Refresh host pressure from the source; keeps the last good reading
    /// when sampling fails.
    pub fn refresh_pressure(&self) -> Option<HostPressure> {
        let source = self.pressure.as_ref()?;
        match source.sample() {
            Ok(p) => {
                lock(&self.state).last_pressure = Some(p);
                Some(p)
            }
            Err(e) => {
                tracing::debug!(source = source.name(), error = %e, "pressure sample failed");
                lock(&self.state).last_pressure
            }
        }
    }

    /// Current load, using the most recent pressure reading.
    pub fn sample(&self) -> LoadSample {
        let stats = self.pool.stats();
        let degradation = self.monitor.status();
        LoadSample {
            capacity: stats.capacity,
            active: stats.active,
            queue_depth: stats.queue_depth,
            utilization: stats.utilization(),
            failure_rate: degradation.failure_rate,
            failure_threshold: degradation.threshold,
            pressure: lock(&self.state).last_pressure,
        }
    }

    /// Sample, decide and apply.
    pub fn tick(&self) -> ScaleDecision {
        self.tick_at(Instant::now())
    }

    pub fn tick_at(&self, now: Instant) -> ScaleDecision {
        let sample = self.sample();
        let decision = self.evaluate_at(&sample, now);
        match decision {
            ScaleDecision::Up { to, .. } | ScaleDecision::Down { to, .. } => {
                let actual = self.pool.resize(to);
                tracing::info!(
                    ?decision,
                    capacity = actual,
                    utilization = sample.utilization,
                    queue_depth = sample.queue_depth,
                    "auto-scaler resized pool"
                );
            }
            ScaleDecision::Hold { .. } => {}
        }
        decision
    }

    /// Decide without touching the pool. Updates sustain and cooldown
    /// bookkeeping and reports sustained host pressure.
    pub fn evaluate_at(&self, sample: &LoadSample, now: Instant) -> ScaleDecision {
        if !self.cfg.enabled {
            return ScaleDecision::hold(HoldReason::Disabled);
        }
        let sustain = Duration::from_secs(self.cfg.sustain_secs);
        let mut st = lock(&self.state);

        let pressured = sample
            .pressure
            .is_some_and(|p| p.peak() >= self.cfg.pressure_threshold);
        if pressured {
            let since = *st.pressure_since.get_or_insert(now);
            if now.saturating_duration_since(since) >= sustain {
                if let Some(p) = sample.pressure {
                    self.monitor.report_pressure_at(
                        format!("cpu {:.0}%, memory {:.0}%", p.cpu * 100.0, p.memory * 100.0),
                        now,
                    );
                }
            }
        } else {
            st.pressure_since = None;
        }

        let low = sample.utilization <= self.cfg.low_water;
        if low {
            st.low_since.get_or_insert(now);
        } else {
            st.low_since = None;
        }

        if st.cooldown_until.is_some_and(|until| now < until) {
            return ScaleDecision::hold(HoldReason::Cooldown);
        }

        let min = self.pool.config().min_workers;
        let max = self.pool.config().max_workers;
        let cap = sample.capacity;

        if sample.utilization >= self.cfg.high_water && sample.queue_depth > 0 {
            if pressured {
                return ScaleDecision::hold(HoldReason::HostPressure);
            }
            if sample
                .failure_rate
                .is_some_and(|r| r > sample.failure_threshold)
            {
                return ScaleDecision::hold(HoldReason::FailureRate);
            }
            if cap >= max {
                return ScaleDecision::hold(HoldReason::AtMax);
            }
            let to = (cap + self.cfg.step_up.max(1)).min(max);
            self.start_cooldown(&mut st, now);
            return ScaleDecision::Up { from: cap, to };
        }

        if let Some(since) = st.low_since {
            if cap <= min {
                return ScaleDecision::hold(HoldReason::AtMin);
            }
            if now.saturating_duration_since(since) < sustain {
                return ScaleDecision::hold(HoldReason::Sustaining);
            }
            let to = cap.saturating_sub(self.cfg.step_down.max(1)).max(min);
            self.start_cooldown(&mut st, now);
            st.low_since = None;
            return ScaleDecision::Down { from: cap, to };
        }

        ScaleDecision::hold(HoldReason::Steady)
    }

    fn start_cooldown(&self, st: &mut ScalerState, now: Instant) {
        st.cooldown_until = Some(now + Duration::from_secs(self.cfg.cooldown_secs));
    }

    /// Periodic loop; exits when `shutdown` flips to true.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(self.cfg.interval_secs.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.refresh_pressure();
                    self.tick();
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::debug!("auto-scaler stopped");
    }
}

impl CompletionSubscriber for AutoScaler {
    fn name(&self) -> &str {
        "auto-scaler"
    }

    fn on_completion(&self, _event: &CompletionEvent) {
        self.tick();
    }
}
