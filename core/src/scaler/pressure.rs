use serde::{Deserialize, Serialize};

/// Host utilization as fractions in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct HostPressure {
    pub cpu: f64,
    pub memory: f64,
}

impl HostPressure {
    pub fn new(cpu: f64, memory: f64) -> Self {
        Self {
            cpu: cpu.clamp(0.0, 1.0),
            memory: memory.clamp(0.0, 1.0),
        }
    }

    pub fn peak(&self) -> f64 {
        self.cpu.max(self.memory)
    }
}

/// Samples host CPU and memory load for the auto-scaler.
pub trait PressureSource: Send + Sync {
    fn name(&self) -> &str;
    fn sample(&self) -> anyhow::Result<HostPressure>;
}
