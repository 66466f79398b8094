//! Bounded process pool: slot admission, child supervision, timeouts and
//! per-task control signals.

mod pool;
mod slots;
mod worker;

pub use pool::{PoolStats, ProcessPool};
pub use slots::WorkerSlot;
