use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use anyhow::Result;
use hexrun_core::scaler::{HostPressure, PressureSource};
use sysinfo::System;

const REFRESH_INTERVAL: Duration = Duration::from_secs(1);

struct SysState {
    sys: System,
    last_refresh: Instant,
    cached: HostPressure,
}

impl SysState {
    fn refresh(&mut self) {
        self.sys.refresh_cpu();
        self.sys.refresh_memory();
        let cpus = self.sys.cpus();
        let cpu_count = cpus.len().max(1);
        let cpu = cpus.iter().map(|c| c.cpu_usage() as f64).sum::<f64>() / cpu_count as f64;
        let total_memory = self.sys.total_memory().max(1);
        let memory = self.sys.used_memory() as f64 / total_memory as f64;
        self.cached = HostPressure::new(cpu / 100.0, memory);
        self.last_refresh = Instant::now();
    }
}

/// Host CPU and memory load via `sysinfo`. One `System` is reused across
/// samples and refreshed at most once per second.
pub struct SysinfoPressureSource {
    state: Mutex<SysState>,
}

impl SysinfoPressureSource {
    pub fn new() -> Self {
        let mut state = SysState {
            sys: System::new(),
            last_refresh: Instant::now(),
            cached: HostPressure::default(),
        };
        state.refresh();
        Self {
            state: Mutex::new(state),
        }
    }
}

impl Default for SysinfoPressureSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PressureSource for SysinfoPressureSource {
    fn name(&self) -> &str {
        "sysinfo"
    }

    fn sample(&self) -> Result<HostPressure> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if state.last_refresh.elapsed() > REFRESH_INTERVAL {
            state.refresh();
        }
        Ok(state.cached)
    }
}

/// Always reports the same pressure. Useful where host sampling is
/// unwanted or unavailable.
pub struct FixedPressureSource {
    pressure: HostPressure,
}

impl FixedPressureSource {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self {
            pressure: HostPressure::new(cpu, memory),
        }
    }

    pub fn idle() -> Self {
        Self::new(0.0, 0.0)
    }
}

impl PressureSource for FixedPressureSource {
    fn name(&self) -> &str {
        "fixed"
    }

    fn sample(&self) -> Result<HostPressure> {
        Ok(self.pressure)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sysinfo_sample_is_a_fraction() {
        let source = SysinfoPressureSource::new();
        let p = source.sample().unwrap();
        assert!((0.0..=1.0).contains(&p.cpu));
        assert!((0.0..=1.0).contains(&p.memory));
        // Second sample inside the refresh window is served from cache.
        assert_eq!(source.sample().unwrap(), p);
    }

    #[test]
    fn fixed_source_clamps() {
        let source = FixedPressureSource::new(1.5, -0.2);
        let p = source.sample().unwrap();
        assert_eq!(p, HostPressure::new(1.0, 0.0));
        assert_eq!(FixedPressureSource::idle().sample().unwrap().peak(), 0.0);
    }
}
