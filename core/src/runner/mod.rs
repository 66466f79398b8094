mod abort;
mod io_pump;
mod traits;
mod types;

pub use abort::terminate_with_grace;
pub use io_pump::{pump_stream, StreamLabel};
pub use traits::{ProcessLauncher, ProcessSession};
pub use types::{ExitInfo, LaunchSpec, Signal};
