use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::fingerprint::Fingerprint;
use crate::error::EngineError;

/// Scheduling priority. Ordering matters: degraded mode rejects everything
/// below a configured floor.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Normal,
    High,
    Critical,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Priority::Low => "low",
            Priority::Normal => "normal",
            Priority::High => "high",
            Priority::Critical => "critical",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Priority::Low),
            "normal" => Ok(Priority::Normal),
            "high" => Ok(Priority::High),
            "critical" => Ok(Priority::Critical),
            other => Err(format!("unknown priority: {other}")),
        }
    }
}

/// A single tool invocation. Descriptors are never mutated after submission;
/// recovery derives new descriptors with [`CommandDescriptor::with_args`] and
/// friends instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandDescriptor {
    pub tool: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub target: String,
    pub timeout_ms: u64,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default = "default_cacheable")]
    pub cacheable: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub envs: BTreeMap<String, String>,
}

fn default_cacheable() -> bool {
    true
}

impl CommandDescriptor {
    pub fn builder(tool: impl Into<String>, target: impl Into<String>) -> DescriptorBuilder {
        DescriptorBuilder::new(tool, target)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::of(&self.tool, &self.args, &self.target)
    }

    /// Rejects descriptors that must never reach the pool.
    pub fn validate(&self, max_timeout: Duration) -> Result<(), EngineError> {
        let tool = self.tool.trim();
        if tool.is_empty() {
            return Err(EngineError::InvalidDescriptor("tool is empty".into()));
        }
        if tool.chars().any(char::is_whitespace) {
            return Err(EngineError::InvalidDescriptor(format!(
                "tool '{}' contains whitespace",
                self.tool
            )));
        }
        if self.target.trim().is_empty() {
            return Err(EngineError::InvalidDescriptor("target is empty".into()));
        }
        if self.timeout_ms == 0 {
            return Err(EngineError::InvalidDescriptor("timeout must be > 0".into()));
        }
        if self.timeout() > max_timeout {
            return Err(EngineError::InvalidDescriptor(format!(
                "timeout {}ms exceeds maximum {}ms",
                self.timeout_ms,
                max_timeout.as_millis()
            )));
        }
        if let Some(bad) = self.args.iter().find(|a| a.contains('\0')) {
            return Err(EngineError::InvalidDescriptor(format!(
                "argument {bad:?} contains a NUL byte"
            )));
        }
        Ok(())
    }

    pub fn with_args(&self, args: Vec<String>) -> Self {
        Self {
            args,
            ..self.clone()
        }
    }

    pub fn with_timeout(&self, timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis().max(1) as u64,
            ..self.clone()
        }
    }

    pub fn with_tool(&self, tool: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            tool: tool.into(),
            args,
            ..self.clone()
        }
    }
}

pub struct DescriptorBuilder {
    inner: CommandDescriptor,
}

impl DescriptorBuilder {
    pub fn new(tool: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            inner: CommandDescriptor {
                tool: tool.into(),
                args: Vec::new(),
                target: target.into(),
                timeout_ms: 300_000,
                priority: Priority::Normal,
                cacheable: true,
                envs: BTreeMap::new(),
            },
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.inner.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.inner.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn priority(mut self, priority: Priority) -> Self {
        self.inner.priority = priority;
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.inner.cacheable = cacheable;
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.inner.envs.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> CommandDescriptor {
        self.inner
    }
}
