mod config;
mod engine;

pub use config::ConfigError;
pub use engine::EngineError;
