pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod decision;
pub mod descriptor;
pub mod engine;
pub mod error;
pub mod persist;
pub mod pool;
pub mod recovery;
pub mod registry;
pub mod runner;
pub mod scaler;
pub mod util;
