use std::panic::AssertUnwindSafe;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use super::pool::PoolInner;
use super::slots::SlotLease;
use crate::descriptor::CommandDescriptor;
use crate::registry::{TaskId, TaskState};
use crate::runner::{
    pump_stream, terminate_with_grace, ExitInfo, LaunchSpec, Signal, StreamLabel,
};
use crate::util::{lock, CapturedOutput, RingBytes};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Control {
    Pause,
    Resume,
    Terminate,
}

struct Finish {
    state: TaskState,
    exit_code: Option<i32>,
    stdout: CapturedOutput,
    stderr: CapturedOutput,
    diagnostic: Option<String>,
    elapsed_ms: u64,
    launch_failed: bool,
}

impl Finish {
    fn failed(exit_code: Option<i32>, diagnostic: String, started: Instant) -> Self {
        Self {
            state: TaskState::Failed,
            exit_code,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::default(),
            diagnostic: Some(diagnostic),
            elapsed_ms: started.elapsed().as_millis() as u64,
            launch_failed: false,
        }
    }

    fn not_launched(e: &anyhow::Error, started: Instant) -> Self {
        Self {
            launch_failed: true,
            ..Self::failed(launch_exit_code(e), format!("launch failed: {e:#}"), started)
        }
    }
}

enum End {
    Exited(ExitInfo),
    WaitFailed(String),
    TimedOut,
    Terminated,
}

pub(crate) async fn run(
    inner: Arc<PoolInner>,
    lease: SlotLease,
    id: TaskId,
    descriptor: Arc<CommandDescriptor>,
    ctl_rx: mpsc::UnboundedReceiver<Control>,
) {
    let started = Instant::now();
    let finish = match AssertUnwindSafe(drive(&inner, &lease, id, &descriptor, ctl_rx))
        .catch_unwind()
        .await
    {
        Ok(finish) => finish,
        Err(_) => {
            tracing::error!(task_id = %id, tool = %descriptor.tool, "worker panicked");
            Finish::failed(None, "worker panicked".to_string(), started)
        }
    };

    lock(&inner.controls).remove(&id);
    // Free the slot before the task turns terminal so awaiting callers see it.
    drop(lease);

    match finish.state {
        TaskState::Succeeded => inner.completed.fetch_add(1, Ordering::Relaxed),
        TaskState::Cancelled => inner.cancelled.fetch_add(1, Ordering::Relaxed),
        _ => inner.failed.fetch_add(1, Ordering::Relaxed),
    };

    tracing::info!(
        task_id = %id,
        tool = %descriptor.tool,
        state = %finish.state,
        exit_code = ?finish.exit_code,
        elapsed_ms = finish.elapsed_ms,
        "task finished"
    );

    let Finish {
        state,
        exit_code,
        stdout,
        stderr,
        diagnostic,
        elapsed_ms,
        launch_failed,
    } = finish;
    if let Err(e) = inner.registry.transition(id, state, |t| {
        t.exit_code = exit_code;
        t.stdout = stdout;
        t.stderr = stderr;
        t.diagnostic = diagnostic;
        t.elapsed_ms = elapsed_ms;
        t.launch_failed = launch_failed;
        t.pid = None;
    }) {
        tracing::warn!(task_id = %id, error = %e, "failed to record task completion");
    }
}

async fn drive(
    inner: &PoolInner,
    lease: &SlotLease,
    id: TaskId,
    descriptor: &CommandDescriptor,
    mut ctl_rx: mpsc::UnboundedReceiver<Control>,
) -> Finish {
    let started = Instant::now();
    let grace = inner.cfg.terminate_grace();
    let spec = LaunchSpec::from(descriptor);

    let mut session = match inner.launcher.launch(&spec).await {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(task_id = %id, tool = %spec.program, error = %e, "launch failed");
            return Finish::not_launched(&e, started);
        }
    };

    let pid = session.pid();
    lease.bind_pid(pid);
    let _ = inner.registry.update(id, |t| t.pid = pid);
    tracing::debug!(task_id = %id, ?pid, slot = lease.id(), "child started");

    let cap = inner.cfg.capture_bytes;
    let out_ring = RingBytes::new(cap);
    let err_ring = RingBytes::new(cap);
    let out_pump = session
        .stdout()
        .map(|rd| pump_stream(rd, out_ring.clone(), StreamLabel::Stdout));
    let err_pump = session
        .stderr()
        .map(|rd| pump_stream(rd, err_ring.clone(), StreamLabel::Stderr));

    let sleep = tokio::time::sleep_until(started + descriptor.timeout());
    tokio::pin!(sleep);
    let mut ctl_open = true;

    let end = loop {
        tokio::select! {
            res = session.wait() => {
                break match res {
                    Ok(exit) => End::Exited(exit),
                    Err(e) => End::WaitFailed(format!("{e:#}")),
                };
            }
            _ = &mut sleep => {
                tracing::warn!(task_id = %id, timeout_ms = descriptor.timeout_ms, "task timed out");
                terminate_with_grace(session.as_mut(), grace).await;
                break End::TimedOut;
            }
            ctl = ctl_rx.recv(), if ctl_open => match ctl {
                Some(Control::Pause) => {
                    if let Err(e) = session.signal(Signal::Stop).await {
                        tracing::warn!(task_id = %id, error = %e, "pause failed");
                    } else {
                        let _ = inner.registry.update(id, |t| t.paused = true);
                    }
                }
                Some(Control::Resume) => {
                    if let Err(e) = session.signal(Signal::Cont).await {
                        tracing::warn!(task_id = %id, error = %e, "resume failed");
                    } else {
                        let _ = inner.registry.update(id, |t| t.paused = false);
                    }
                }
                Some(Control::Terminate) => {
                    tracing::info!(task_id = %id, "terminating on request");
                    terminate_with_grace(session.as_mut(), grace).await;
                    break End::Terminated;
                }
                None => ctl_open = false,
            },
        }
    };
    drop(session);

    let stdout = collect(out_pump, &out_ring, grace).await;
    let stderr = collect(err_pump, &err_ring, grace).await;
    let elapsed_ms = started.elapsed().as_millis() as u64;

    let (state, exit_code, diagnostic) = match end {
        End::Exited(exit) if exit.success() => (TaskState::Succeeded, exit.code, None),
        End::Exited(exit) => {
            let why = match (exit.code, exit.signal) {
                (Some(code), _) => format!("exited with code {code}"),
                (None, Some(sig)) => format!("killed by signal {sig}"),
                (None, None) => "exited abnormally".to_string(),
            };
            (TaskState::Failed, exit.code, Some(why))
        }
        End::WaitFailed(e) => (TaskState::Failed, None, Some(format!("wait failed: {e}"))),
        End::TimedOut => (
            TaskState::TimedOut,
            None,
            Some(format!("timed out after {}ms", descriptor.timeout_ms)),
        ),
        End::Terminated => (
            TaskState::Cancelled,
            None,
            Some("terminated by request".to_string()),
        ),
    };

    Finish {
        state,
        exit_code,
        stdout,
        stderr,
        diagnostic,
        elapsed_ms,
        launch_failed: false,
    }
}

async fn collect(
    pump: Option<JoinHandle<std::io::Result<u64>>>,
    ring: &RingBytes,
    grace: Duration,
) -> CapturedOutput {
    if let Some(mut handle) = pump {
        // Grandchildren can keep a pipe open after the child is gone.
        if tokio::time::timeout(grace, &mut handle).await.is_err() {
            handle.abort();
        }
    }
    ring.snapshot()
}

fn launch_exit_code(e: &anyhow::Error) -> Option<i32> {
    let not_found = e
        .chain()
        .filter_map(|c| c.downcast_ref::<std::io::Error>())
        .any(|io| io.kind() == std::io::ErrorKind::NotFound);
    not_found.then_some(127)
}
