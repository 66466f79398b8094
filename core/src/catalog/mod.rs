//! Tool catalog interface. The engine never knows how a tool's command line
//! looks; it asks the catalog.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::decision::{Finding, TargetClass};
use crate::descriptor::CommandDescriptor;
use crate::recovery::FailureCause;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,

    #[serde(default)]
    pub category: String,

    #[serde(default)]
    pub description: String,

    /// Static effectiveness per target class, in [0, 1].
    #[serde(default)]
    pub effectiveness: BTreeMap<TargetClass, f64>,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub alternatives: Vec<String>,

    /// Argument template. `{target}` expands to the target as given,
    /// `{host}` to its bare host name. Concurrency is appended through
    /// `concurrency_flag`.
    #[serde(default)]
    pub template: Vec<String>,

    #[serde(default)]
    pub concurrency_flag: Option<String>,

    #[serde(default)]
    pub default_concurrency: Option<u32>,

    #[serde(default)]
    pub stealth_args: Vec<String>,

    #[serde(default)]
    pub aggressive_args: Vec<String>,
}

fn default_timeout_secs() -> u64 {
    300
}

impl ToolSpec {
    pub fn effectiveness_for(&self, class: TargetClass) -> f64 {
        self.effectiveness.get(&class).copied().unwrap_or(0.0)
    }

    pub fn applies_to(&self, class: TargetClass) -> bool {
        self.effectiveness_for(class) > 0.0
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Tuned invocation parameters for one tool run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolParams {
    #[serde(default)]
    pub concurrency: Option<u32>,
    pub timeout_ms: u64,
    #[serde(default)]
    pub stealth: bool,
    #[serde(default)]
    pub aggressive: bool,
    #[serde(default)]
    pub extra_args: Vec<String>,
}

impl ToolParams {
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout_ms: timeout.as_millis() as u64,
            ..Self::default()
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// A tool the catalog suggests running after a finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FollowUp {
    pub tool: String,
    pub target: String,
    pub reason: String,
}

pub trait ToolCatalog: Send + Sync {
    fn spec(&self, tool: &str) -> Option<ToolSpec>;

    fn tools(&self) -> Vec<ToolSpec>;

    /// Tools with non-zero effectiveness for `class`.
    fn tools_for(&self, class: TargetClass) -> Vec<ToolSpec>;

    /// Substitutes for `tool`, most preferred first.
    fn alternatives(&self, tool: &str) -> Vec<String>;

    /// Argument list for running `tool` against `target`; None when the
    /// catalog cannot build one.
    fn render(&self, tool: &str, target: &str, params: &ToolParams) -> Option<Vec<String>>;

    /// Adjusted arguments for a descriptor that failed with `cause`.
    fn adjust(&self, descriptor: &CommandDescriptor, cause: FailureCause) -> Option<Vec<String>>;

    fn follow_ups(&self, finding: &Finding) -> Vec<FollowUp>;
}

/// Catalog with no tools: descriptors run as given, recovery can only retry.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyCatalog;

impl ToolCatalog for EmptyCatalog {
    fn spec(&self, _tool: &str) -> Option<ToolSpec> {
        None
    }

    fn tools(&self) -> Vec<ToolSpec> {
        Vec::new()
    }

    fn tools_for(&self, _class: TargetClass) -> Vec<ToolSpec> {
        Vec::new()
    }

    fn alternatives(&self, _tool: &str) -> Vec<String> {
        Vec::new()
    }

    fn render(&self, _tool: &str, _target: &str, _params: &ToolParams) -> Option<Vec<String>> {
        None
    }

    fn adjust(&self, _descriptor: &CommandDescriptor, _cause: FailureCause) -> Option<Vec<String>> {
        None
    }

    fn follow_ups(&self, _finding: &Finding) -> Vec<FollowUp> {
        Vec::new()
    }
}
