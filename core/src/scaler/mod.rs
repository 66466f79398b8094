//! Load-driven pool sizing with hysteresis and host pressure reporting.

mod pressure;
mod scaler;

pub use pressure::{HostPressure, PressureSource};
pub use scaler::{AutoScaler, HoldReason, LoadSample, ScaleDecision};
