//! Command descriptors: the immutable unit of work handed to the engine.

mod fingerprint;
mod types;

pub use fingerprint::Fingerprint;
pub use types::{CommandDescriptor, DescriptorBuilder, Priority};
