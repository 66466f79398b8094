use std::process::Stdio;

use anyhow::{Context, Result};
use async_trait::async_trait;
use hexrun_core::runner::{ExitInfo, LaunchSpec, ProcessLauncher, ProcessSession, Signal};
use tokio::io::AsyncRead;
use tokio::process::{Child, Command};

/// Launches real OS processes with piped stdout/stderr. On unix every child
/// gets its own process group so signals reach the whole tree.
pub struct TokioProcessLauncher {}

impl TokioProcessLauncher {
    pub fn new() -> Self {
        Self {}
    }
}

impl Default for TokioProcessLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ProcessLauncher for TokioProcessLauncher {
    fn name(&self) -> &str {
        "tokio-process"
    }

    async fn launch(&self, spec: &LaunchSpec) -> Result<Box<dyn ProcessSession>> {
        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .envs(&spec.envs)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        #[cfg(unix)]
        cmd.process_group(0);

        let child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn '{}'", spec.program))?;
        tracing::debug!(program = %spec.program, pid = ?child.id(), "spawned child");

        Ok(Box::new(TokioProcessSession { child }))
    }
}

struct TokioProcessSession {
    child: Child,
}

#[async_trait]
impl ProcessSession for TokioProcessSession {
    fn pid(&self) -> Option<u32> {
        self.child.id()
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stdout
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.child
            .stderr
            .take()
            .map(|s| Box::new(s) as Box<dyn AsyncRead + Unpin + Send>)
    }

    async fn signal(&mut self, signal: Signal) -> Result<()> {
        // Already reaped: nothing to signal, and the pid may have been reused.
        let Some(pid) = self.child.id() else {
            return Ok(());
        };
        send_signal(&mut self.child, pid, signal)
    }

    async fn wait(&mut self) -> Result<ExitInfo> {
        let status = self.child.wait().await.context("failed to wait for child")?;
        Ok(exit_info(status))
    }
}

#[cfg(unix)]
fn send_signal(_child: &mut Child, pid: u32, signal: Signal) -> Result<()> {
    let sig = match signal {
        Signal::Term => libc::SIGTERM,
        Signal::Kill => libc::SIGKILL,
        Signal::Stop => libc::SIGSTOP,
        Signal::Cont => libc::SIGCONT,
    };
    let rc = unsafe { libc::killpg(pid as libc::pid_t, sig) };
    if rc != 0 {
        let err = std::io::Error::last_os_error();
        // ESRCH: the group is gone between the id check and the signal.
        if err.raw_os_error() != Some(libc::ESRCH) {
            return Err(err).with_context(|| format!("failed to signal process group {pid}"));
        }
    }
    Ok(())
}

#[cfg(not(unix))]
fn send_signal(child: &mut Child, _pid: u32, signal: Signal) -> Result<()> {
    match signal {
        Signal::Term | Signal::Kill => child.start_kill().context("failed to kill child"),
        Signal::Stop | Signal::Cont => {
            anyhow::bail!("suspending processes is not supported on this platform")
        }
    }
}

#[cfg(unix)]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    use std::os::unix::process::ExitStatusExt;
    match (status.code(), status.signal()) {
        (Some(code), _) => ExitInfo::code(code),
        (None, Some(sig)) => ExitInfo::signaled(sig),
        (None, None) => ExitInfo::code(-1),
    }
}

#[cfg(not(unix))]
fn exit_info(status: std::process::ExitStatus) -> ExitInfo {
    ExitInfo::code(status.code().unwrap_or(-1))
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::collections::BTreeMap;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;

    fn spec(program: &str, args: &[&str]) -> LaunchSpec {
        LaunchSpec {
            program: program.to_string(),
            args: args.iter().map(|s| s.to_string()).collect(),
            envs: BTreeMap::new(),
        }
    }

    #[tokio::test]
    async fn captures_output_and_exit_code() {
        let launcher = TokioProcessLauncher::new();
        let mut session = launcher
            .launch(&spec("sh", &["-c", "echo hello; echo oops >&2; exit 3"]))
            .await
            .unwrap();
        assert!(session.pid().is_some());

        let mut out = String::new();
        session.stdout().unwrap().read_to_string(&mut out).await.unwrap();
        let mut err = String::new();
        session.stderr().unwrap().read_to_string(&mut err).await.unwrap();

        let exit = session.wait().await.unwrap();
        assert_eq!(out.trim(), "hello");
        assert_eq!(err.trim(), "oops");
        assert_eq!(exit, ExitInfo::code(3));
        assert!(!exit.success());
    }

    #[tokio::test]
    async fn passes_environment() {
        let launcher = TokioProcessLauncher::new();
        let mut s = spec("sh", &["-c", "printf %s \"$HEXRUN_MARKER\""]);
        s.envs.insert("HEXRUN_MARKER".into(), "42".into());
        let mut session = launcher.launch(&s).await.unwrap();
        let mut out = String::new();
        session.stdout().unwrap().read_to_string(&mut out).await.unwrap();
        assert!(session.wait().await.unwrap().success());
        assert_eq!(out, "42");
    }

    #[tokio::test]
    async fn missing_program_fails_to_launch() {
        let launcher = TokioProcessLauncher::new();
        let err = launcher
            .launch(&spec("hexrun-definitely-missing-tool", &[]))
            .await
            .err()
            .unwrap();
        let io = err.downcast_ref::<std::io::Error>().unwrap();
        assert_eq!(io.kind(), std::io::ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn terminate_reports_signal() {
        let launcher = TokioProcessLauncher::new();
        let mut session = launcher.launch(&spec("sleep", &["30"])).await.unwrap();
        session.signal(Signal::Term).await.unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), session.wait())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, ExitInfo::signaled(libc::SIGTERM));

        // Signalling a reaped child is a no-op.
        session.signal(Signal::Kill).await.unwrap();
    }
}
