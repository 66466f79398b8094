//! hexrun CLI library; modules are exposed for unit and integration tests.

pub mod commands;
pub mod error;
pub mod output;
pub mod utils;
