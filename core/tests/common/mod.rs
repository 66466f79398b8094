#![allow(dead_code)]

use std::collections::{HashMap, HashSet, VecDeque};
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hexrun_core::api::{
    EngineConfig, ExitInfo, LaunchSpec, ProcessLauncher, ProcessSession, Signal,
};
use tokio::io::AsyncRead;
use tokio::time::Instant;

/// Behaviour of one scripted child process.
#[derive(Debug, Clone)]
pub struct Step {
    pub sleep: Duration,
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
    /// Keep running after SIGTERM; only SIGKILL ends it.
    pub ignore_term: bool,
    /// Panic inside `wait` instead of exiting.
    pub panic: bool,
}

impl Step {
    pub fn ok(sleep_ms: u64) -> Self {
        Self {
            sleep: Duration::from_millis(sleep_ms),
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
            ignore_term: false,
            panic: false,
        }
    }

    pub fn fail(sleep_ms: u64, code: i32, stderr: &str) -> Self {
        Self {
            exit_code: code,
            stderr: stderr.to_string(),
            ..Self::ok(sleep_ms)
        }
    }

    pub fn stdout(mut self, text: &str) -> Self {
        self.stdout = text.to_string();
        self
    }

    pub fn stubborn(mut self) -> Self {
        self.ignore_term = true;
        self
    }

    pub fn panics(sleep_ms: u64) -> Self {
        Self {
            panic: true,
            ..Self::ok(sleep_ms)
        }
    }
}

#[derive(Default)]
struct Counters {
    spawns: AtomicUsize,
    running: AtomicUsize,
    peak: AtomicUsize,
}

/// In-memory launcher: each program name plays its queued steps in order,
/// then falls back to the default step.
pub struct ScriptedLauncher {
    scripts: Mutex<HashMap<String, VecDeque<Step>>>,
    missing: Mutex<HashSet<String>>,
    launched: Mutex<Vec<LaunchSpec>>,
    default_step: Step,
    counters: Arc<Counters>,
}

impl ScriptedLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(HashMap::new()),
            missing: Mutex::new(HashSet::new()),
            launched: Mutex::new(Vec::new()),
            default_step: Step::ok(10),
            counters: Arc::new(Counters::default()),
        })
    }

    pub fn script(&self, program: &str, steps: Vec<Step>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(program.to_string())
            .or_default()
            .extend(steps);
    }

    /// Launching `program` fails like a missing executable.
    pub fn missing(&self, program: &str) {
        self.missing.lock().unwrap().insert(program.to_string());
    }

    pub fn spawns(&self) -> usize {
        self.counters.spawns.load(Ordering::SeqCst)
    }

    pub fn running(&self) -> usize {
        self.counters.running.load(Ordering::SeqCst)
    }

    pub fn peak(&self) -> usize {
        self.counters.peak.load(Ordering::SeqCst)
    }

    pub fn launched(&self) -> Vec<LaunchSpec> {
        self.launched.lock().unwrap().clone()
    }
}

#[async_trait]
impl ProcessLauncher for ScriptedLauncher {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn launch(&self, spec: &LaunchSpec) -> anyhow::Result<Box<dyn ProcessSession>> {
        if self.missing.lock().unwrap().contains(&spec.program) {
            return Err(anyhow::Error::new(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("{}: command not found", spec.program),
            )));
        }
        self.launched.lock().unwrap().push(spec.clone());
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&spec.program)
            .and_then(VecDeque::pop_front)
            .unwrap_or_else(|| self.default_step.clone());

        let c = &self.counters;
        let pid = c.spawns.fetch_add(1, Ordering::SeqCst) as u32 + 1000;
        let now_running = c.running.fetch_add(1, Ordering::SeqCst) + 1;
        c.peak.fetch_max(now_running, Ordering::SeqCst);

        Ok(Box::new(ScriptedSession {
            pid,
            deadline: Instant::now() + step.sleep,
            stdout: Some(step.stdout.clone().into_bytes()),
            stderr: Some(step.stderr.clone().into_bytes()),
            step,
            ended: None,
            counters: self.counters.clone(),
        }))
    }
}

struct ScriptedSession {
    pid: u32,
    deadline: Instant,
    step: Step,
    stdout: Option<Vec<u8>>,
    stderr: Option<Vec<u8>>,
    ended: Option<ExitInfo>,
    counters: Arc<Counters>,
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        self.counters.running.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProcessSession for ScriptedSession {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    fn stdout(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.stdout
            .take()
            .map(|b| Box::new(Cursor::new(b)) as Box<dyn AsyncRead + Unpin + Send>)
    }

    fn stderr(&mut self) -> Option<Box<dyn AsyncRead + Unpin + Send>> {
        self.stderr
            .take()
            .map(|b| Box::new(Cursor::new(b)) as Box<dyn AsyncRead + Unpin + Send>)
    }

    async fn signal(&mut self, signal: Signal) -> anyhow::Result<()> {
        match signal {
            Signal::Term if !self.step.ignore_term => self.ended = Some(ExitInfo::signaled(15)),
            Signal::Kill => self.ended = Some(ExitInfo::signaled(9)),
            _ => {}
        }
        Ok(())
    }

    async fn wait(&mut self) -> anyhow::Result<ExitInfo> {
        if let Some(exit) = self.ended {
            return Ok(exit);
        }
        tokio::time::sleep_until(self.deadline).await;
        if self.step.panic {
            panic!("scripted session panicked");
        }
        Ok(ExitInfo::code(self.step.exit_code))
    }
}

/// Small, deterministic engine configuration for tests.
pub fn test_config(workers: usize) -> EngineConfig {
    let mut cfg = EngineConfig::default();
    cfg.logging.enabled = false;
    cfg.pool.min_workers = 1;
    cfg.pool.max_workers = workers;
    cfg.pool.initial_workers = workers;
    cfg.pool.terminate_grace_ms = 500;
    cfg.scaling.enabled = false;
    cfg.recovery.base_delay_ms = 100;
    cfg
}
