pub mod catalog;
pub mod factory;
pub mod findings;
pub mod pressure;
pub mod runner;
pub mod strategies;
