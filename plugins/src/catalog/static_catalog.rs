use std::collections::{BTreeMap, HashSet};
use std::path::Path;

use anyhow::{bail, Context, Result};
use hexrun_core::api::{
    CommandDescriptor, Finding, FollowUp, TargetClass, ToolCatalog, ToolParams, ToolSpec,
};
use hexrun_core::recovery::FailureCause;
use serde::{Deserialize, Serialize};

use super::rules::{AdjustmentRule, FollowUpRule};

const BUILTIN: &str = include_str!("builtin.toml");

/// On-disk catalog layout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub tools: Vec<ToolSpec>,
    #[serde(default)]
    pub adjustments: Vec<AdjustmentRule>,
    #[serde(default)]
    pub follow_ups: Vec<FollowUpRule>,
}

/// Table-driven [`ToolCatalog`]. Tool names are matched case-insensitively.
#[derive(Debug, Clone, Default)]
pub struct StaticToolCatalog {
    tools: BTreeMap<String, ToolSpec>,
    adjustments: Vec<AdjustmentRule>,
    follow_ups: Vec<FollowUpRule>,
}

impl StaticToolCatalog {
    pub fn builtin() -> Result<Self> {
        Self::from_toml(BUILTIN).context("built-in tool catalog is malformed")
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(text).context("failed to parse tool catalog")?;
        let mut catalog = Self::default();
        catalog.merge(file)?;
        Ok(catalog)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tool catalog {}", path.display()))?;
        Self::from_toml(&text).with_context(|| format!("in {}", path.display()))
    }

    /// Built-in table extended (and overridden per tool) by the file at
    /// `path`.
    pub fn builtin_with_overrides(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read tool catalog {}", path.display()))?;
        let file: CatalogFile = toml::from_str(&text)
            .with_context(|| format!("failed to parse tool catalog {}", path.display()))?;
        let mut catalog = Self::builtin()?;
        catalog.merge(file)?;
        Ok(catalog)
    }

    /// Tools replace same-named entries; rules are appended after the
    /// existing ones.
    pub fn merge(&mut self, file: CatalogFile) -> Result<()> {
        for spec in file.tools {
            validate_spec(&spec)?;
            self.tools.insert(spec.name.to_ascii_lowercase(), spec);
        }
        self.adjustments.extend(file.adjustments);
        self.follow_ups.extend(file.follow_ups);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    fn lookup(&self, tool: &str) -> Option<&ToolSpec> {
        self.tools.get(&tool.trim().to_ascii_lowercase())
    }
}

fn validate_spec(spec: &ToolSpec) -> Result<()> {
    let name = spec.name.trim();
    if name.is_empty() || name.chars().any(char::is_whitespace) {
        bail!("invalid tool name {:?}", spec.name);
    }
    if let Some((class, value)) = spec
        .effectiveness
        .iter()
        .find(|(_, v)| !(0.0..=1.0).contains(*v))
    {
        bail!("{name}: effectiveness {value} for {class} is outside [0, 1]");
    }
    if spec.timeout_secs == 0 {
        bail!("{name}: timeout_secs must be > 0");
    }
    Ok(())
}

/// Bare host of a target: scheme, credentials, port and path stripped.
pub fn host_of(target: &str) -> &str {
    let rest = target.trim();
    let rest = rest.split_once("://").map_or(rest, |(_, r)| r);
    let rest = rest.split(['/', '?', '#']).next().unwrap_or(rest);
    let rest = rest.rsplit_once('@').map_or(rest, |(_, r)| r);
    if let Some(v6) = rest.strip_prefix('[') {
        return v6.split(']').next().unwrap_or(v6);
    }
    match rest.split_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => rest,
    }
}

impl ToolCatalog for StaticToolCatalog {
    fn spec(&self, tool: &str) -> Option<ToolSpec> {
        self.lookup(tool).cloned()
    }

    fn tools(&self) -> Vec<ToolSpec> {
        self.tools.values().cloned().collect()
    }

    fn tools_for(&self, class: TargetClass) -> Vec<ToolSpec> {
        let mut out: Vec<ToolSpec> = self
            .tools
            .values()
            .filter(|s| s.applies_to(class))
            .cloned()
            .collect();
        out.sort_by(|a, b| {
            b.effectiveness_for(class)
                .total_cmp(&a.effectiveness_for(class))
                .then_with(|| a.name.cmp(&b.name))
        });
        out
    }

    fn alternatives(&self, tool: &str) -> Vec<String> {
        self.lookup(tool)
            .map(|s| s.alternatives.clone())
            .unwrap_or_default()
    }

    fn render(&self, tool: &str, target: &str, params: &ToolParams) -> Option<Vec<String>> {
        let spec = self.lookup(tool)?;
        let target = target.trim();
        let host = host_of(target);

        let mut args: Vec<String> = if spec.template.is_empty() {
            vec![target.to_string()]
        } else {
            spec.template
                .iter()
                .map(|t| t.replace("{target}", target).replace("{host}", host))
                .collect()
        };
        if let (Some(flag), Some(n)) = (&spec.concurrency_flag, params.concurrency) {
            args.push(flag.clone());
            args.push(n.to_string());
        }
        args.extend(params.extra_args.iter().cloned());
        Some(args)
    }

    fn adjust(&self, descriptor: &CommandDescriptor, cause: FailureCause) -> Option<Vec<String>> {
        self.adjustments
            .iter()
            .find(|r| r.matches(&descriptor.tool, cause))
            .map(|r| r.apply(&descriptor.args))
    }

    fn follow_ups(&self, finding: &Finding) -> Vec<FollowUp> {
        let mut seen = HashSet::new();
        self.follow_ups
            .iter()
            .flat_map(|rule| rule.expand(finding))
            .filter(|f| seen.insert((f.tool.clone(), f.target.clone())))
            .collect()
    }
}
