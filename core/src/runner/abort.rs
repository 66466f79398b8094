use std::time::Duration;

use tokio::time::timeout;

use super::traits::ProcessSession;
use super::types::{ExitInfo, Signal};

/// SIGTERM, wait up to `grace`, then SIGKILL and reap.
///
/// Returns the exit status if the child could be reaped. A session that
/// survives SIGKILL for another grace period is abandoned; dropping it kills
/// the child through `kill_on_drop`.
pub async fn terminate_with_grace(
    session: &mut dyn ProcessSession,
    grace: Duration,
) -> Option<ExitInfo> {
    let pid = session.pid();
    if let Err(e) = session.signal(Signal::Term).await {
        tracing::debug!(?pid, error = %e, "SIGTERM failed");
    }
    match timeout(grace, session.wait()).await {
        Ok(Ok(exit)) => return Some(exit),
        Ok(Err(e)) => {
            tracing::debug!(?pid, error = %e, "wait after SIGTERM failed");
        }
        Err(_) => {
            tracing::debug!(?pid, grace_ms = grace.as_millis() as u64, "grace expired; killing");
        }
    }
    if let Err(e) = session.signal(Signal::Kill).await {
        tracing::warn!(?pid, error = %e, "SIGKILL failed");
    }
    match timeout(grace, session.wait()).await {
        Ok(Ok(exit)) => Some(exit),
        _ => {
            tracing::warn!(?pid, "child did not exit after SIGKILL");
            None
        }
    }
}
