//! The engine facade: one cloneable handle over pool, registry, cache,
//! recovery, scaling and decision components.

mod background;
mod builder;
mod engine;
mod run;
mod types;

pub use builder::EngineBuilder;
pub use engine::Engine;
pub use types::{ExecutionReport, StateReport};
