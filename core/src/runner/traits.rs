use async_trait::async_trait;
use tokio::io::AsyncRead;

use super::types::{ExitInfo, LaunchSpec, Signal};

/// A started child process.
#[async_trait]
pub trait ProcessSession: Send {
    fn pid(&self) -> Option<u32>;
    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>>;
    async fn signal(&mut self, signal: Signal) -> anyhow::Result<()>;
    /// Must be cancel-safe: the pool races it against timers and control
    /// messages and calls it again after the other branch is handled.
    async fn wait(&mut self) -> anyhow::Result<ExitInfo>;
}

#[async_trait]
pub trait ProcessLauncher: Send + Sync {
    fn name(&self) -> &str;
    async fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<Box<dyn ProcessSession>>;
}
