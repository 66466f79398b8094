use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::finding::{Finding, FindingsExtractor};
use super::history::{HistorySnapshot, OutcomeHistory, OutcomeRecord};
use super::profile::{TargetClass, TargetProfile};
use crate::catalog::{ToolCatalog, ToolParams};
use crate::config::DecisionConfig;
use crate::descriptor::{CommandDescriptor, Priority};
use crate::error::EngineError;
use crate::persist;
use crate::recovery::{classify, FailureCause};
use crate::registry::{CompletionEvent, CompletionSubscriber, TaskId, TaskState};

/// One ranked candidate for a target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    pub tool: String,
    pub params: ToolParams,
    pub score: f64,
    pub effectiveness: f64,
    pub success_rate: f64,
    pub samples: usize,
}

/// Observed outcome of one tool run, fed back into history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub tool: String,
    pub target: String,
    pub success: bool,
    #[serde(default)]
    pub timed_out: bool,
    #[serde(default)]
    pub rate_limited: bool,
    #[serde(default)]
    pub latency_ms: u64,
    #[serde(default)]
    pub findings: u32,
}

pub struct DecisionEngine {
    cfg: DecisionConfig,
    default_timeout: Duration,
    catalog: Arc<dyn ToolCatalog>,
    history: OutcomeHistory,
    extractor: Option<Arc<dyn FindingsExtractor>>,
}

impl DecisionEngine {
    pub fn new(
        cfg: DecisionConfig,
        default_timeout: Duration,
        catalog: Arc<dyn ToolCatalog>,
        extractor: Option<Arc<dyn FindingsExtractor>>,
    ) -> Self {
        let history = OutcomeHistory::new(cfg.history_per_key, cfg.decay);
        Self {
            cfg,
            default_timeout,
            catalog,
            history,
            extractor,
        }
    }

    pub fn history(&self) -> &OutcomeHistory {
        &self.history
    }

    pub fn catalog(&self) -> &Arc<dyn ToolCatalog> {
        &self.catalog
    }

    fn max_timeout(&self) -> Duration {
        Duration::from_secs(self.cfg.max_timeout_secs.max(1))
    }

    /// Rank tools for a target: static effectiveness blended with a
    /// prior-smoothed, recency-weighted success rate and finding yield.
    pub fn recommend(&self, profile: &TargetProfile) -> Vec<Recommendation> {
        let class = profile.class;

        let mut candidates: Vec<(String, f64)> = self
            .catalog
            .tools_for(class)
            .into_iter()
            .map(|spec| {
                let e = spec.effectiveness_for(class);
                (spec.name, e)
            })
            .collect();
        for tool in self.history.tools_for(class) {
            if !candidates.iter().any(|(name, _)| name.eq_ignore_ascii_case(&tool)) {
                let e = self
                    .catalog
                    .spec(&tool)
                    .map(|s| s.effectiveness_for(class))
                    .unwrap_or(0.0);
                candidates.push((tool, e));
            }
        }

        let mut ranked: Vec<Recommendation> = candidates
            .into_iter()
            .map(|(tool, effectiveness)| self.score(tool, effectiveness, profile))
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.tool.cmp(&b.tool)));
        ranked
    }

    fn score(&self, tool: String, effectiveness: f64, profile: &TargetProfile) -> Recommendation {
        let signal = self.history.signal(&tool, profile.class);
        let prior = self.cfg.prior_weight.max(0.0);
        let denom = prior + signal.weight;
        let success_rate = if denom > 0.0 {
            (prior * effectiveness + signal.weighted_successes) / denom
        } else {
            effectiveness
        };
        let mean_findings = signal.mean_findings();
        let yield_score = mean_findings / (1.0 + mean_findings);

        let score = self.cfg.effectiveness_weight * effectiveness
            + self.cfg.success_weight * success_rate
            + self.cfg.yield_weight * yield_score;

        let params = self.optimize(&tool, profile);
        Recommendation {
            tool,
            params,
            score,
            effectiveness,
            success_rate,
            samples: signal.samples,
        }
    }

    /// Invocation parameters for `tool` against `profile`.
    pub fn optimize(&self, tool: &str, profile: &TargetProfile) -> ToolParams {
        let spec = self.catalog.spec(tool);
        let signal = self.history.signal(tool, profile.class);

        let base = spec
            .as_ref()
            .map(|s| s.timeout())
            .unwrap_or(self.default_timeout);
        let growth = 1u32 << signal.recent_timeouts.min(16);
        let proven = Duration::from_millis(signal.longest_recent_success_ms);
        let timeout = base
            .saturating_mul(growth)
            .max(proven)
            .min(self.max_timeout());

        let mut params = ToolParams::with_timeout(timeout);
        params.concurrency = spec.as_ref().and_then(|s| s.default_concurrency);

        if profile.stealth {
            params.stealth = true;
            params.concurrency = params.concurrency.map(|c| (c / 2).max(1));
            if let Some(s) = &spec {
                params.extra_args.extend(s.stealth_args.iter().cloned());
            }
        } else if profile.aggressive {
            params.aggressive = true;
            params.concurrency = params.concurrency.map(|c| c.saturating_mul(2));
            if let Some(s) = &spec {
                params.extra_args.extend(s.aggressive_args.iter().cloned());
            }
        }

        if signal.recently_rate_limited {
            params.concurrency = params.concurrency.map(|c| (c / 2).max(1));
        }
        params
    }

    /// Follow-up descriptors for `findings`. `depth` is the chain depth of
    /// the task that produced them.
    pub fn chain(&self, findings: &[Finding], depth: usize, max_depth: usize) -> Vec<CommandDescriptor> {
        let limit = max_depth.min(self.cfg.max_chain_depth);
        if depth >= limit {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for finding in findings {
            for follow in self.catalog.follow_ups(finding) {
                let profile = TargetProfile::analyze(&follow.target);
                let Some(descriptor) = self.render(&follow.tool, &profile, Priority::Normal) else {
                    tracing::debug!(tool = %follow.tool, target = %follow.target, "follow-up has no template");
                    continue;
                };
                if seen.insert(descriptor.fingerprint()) {
                    tracing::debug!(tool = %follow.tool, reason = %follow.reason, "chained follow-up");
                    out.push(descriptor);
                }
            }
        }
        out
    }

    /// Top `limit` recommendations as ready-to-submit descriptors.
    pub fn plan(&self, profile: &TargetProfile, limit: usize) -> Vec<CommandDescriptor> {
        self.recommend(profile)
            .into_iter()
            .filter_map(|rec| self.render_with(&rec.tool, &profile.target, &rec.params, Priority::Normal))
            .take(limit)
            .collect()
    }

    fn render(&self, tool: &str, profile: &TargetProfile, priority: Priority) -> Option<CommandDescriptor> {
        let params = self.optimize(tool, profile);
        self.render_with(tool, &profile.target, &params, priority)
    }

    fn render_with(
        &self,
        tool: &str,
        target: &str,
        params: &ToolParams,
        priority: Priority,
    ) -> Option<CommandDescriptor> {
        let args = self.catalog.render(tool, target, params)?;
        Some(
            CommandDescriptor::builder(tool, target)
                .args(args)
                .timeout(params.timeout())
                .priority(priority)
                .build(),
        )
    }

    /// Record an outcome. Repeating feedback for the same task replaces the
    /// earlier record; returns true when the task was new.
    pub fn feedback(&self, task_id: TaskId, outcome: &ToolOutcome) -> bool {
        let class = TargetProfile::analyze(&outcome.target).class;
        self.record(task_id, &outcome.tool, class, outcome)
    }

    fn record(&self, task_id: TaskId, tool: &str, class: TargetClass, outcome: &ToolOutcome) -> bool {
        self.history.record(
            tool,
            class,
            OutcomeRecord {
                task_id,
                success: outcome.success,
                timed_out: outcome.timed_out,
                rate_limited: outcome.rate_limited,
                latency_ms: outcome.latency_ms,
                findings: outcome.findings,
                recorded_at: Utc::now(),
            },
        )
    }

    pub fn extract_findings(&self, tool: &str, target: &str, stdout: &str) -> Vec<Finding> {
        self.extractor
            .as_ref()
            .map(|x| x.extract(tool, target, stdout))
            .unwrap_or_default()
    }

    pub fn snapshot(&self) -> HistorySnapshot {
        self.history.snapshot()
    }

    pub fn restore(&self, snapshot: HistorySnapshot) -> usize {
        self.history.restore(snapshot)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), EngineError> {
        persist::write_json(path, &self.snapshot())
    }

    /// Missing file is a cold start.
    pub fn load_from(&self, path: &Path) -> Result<usize, EngineError> {
        match persist::read_json::<HistorySnapshot>(path)? {
            Some(snapshot) => Ok(self.restore(snapshot)),
            None => Ok(0),
        }
    }
}

impl CompletionSubscriber for DecisionEngine {
    fn name(&self) -> &str {
        "decision-history"
    }

    fn on_completion(&self, event: &CompletionEvent) {
        let result = &event.result;
        if result.cache_hit || result.state == TaskState::Cancelled {
            return;
        }
        let findings = if result.succeeded() {
            self.extract_findings(&result.tool, &result.target, &result.stdout.text)
                .len() as u32
        } else {
            0
        };
        let rate_limited =
            !result.succeeded() && classify(result).cause == FailureCause::RateLimited;
        let outcome = ToolOutcome {
            tool: result.tool.clone(),
            target: result.target.clone(),
            success: result.succeeded(),
            timed_out: result.state == TaskState::TimedOut,
            rate_limited,
            latency_ms: result.elapsed_ms,
            findings,
        };
        self.feedback(result.task_id, &outcome);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::catalog::{FollowUp, ToolSpec};
    use crate::decision::FindingKind;

    struct Catalog {
        specs: Vec<ToolSpec>,
    }

    fn spec(name: &str, class: TargetClass, e: f64) -> ToolSpec {
        ToolSpec {
            name: name.into(),
            category: "test".into(),
            description: String::new(),
            effectiveness: BTreeMap::from([(class, e)]),
            timeout_secs: 60,
            alternatives: Vec::new(),
            template: vec!["{target}".into()],
            concurrency_flag: Some("-t".into()),
            default_concurrency: Some(10),
            stealth_args: vec!["--slow".into()],
            aggressive_args: vec!["--fast".into()],
        }
    }

    impl ToolCatalog for Catalog {
        fn spec(&self, tool: &str) -> Option<ToolSpec> {
            self.specs.iter().find(|s| s.name == tool).cloned()
        }
        fn tools(&self) -> Vec<ToolSpec> {
            self.specs.clone()
        }
        fn tools_for(&self, class: TargetClass) -> Vec<ToolSpec> {
            self.specs.iter().filter(|s| s.applies_to(class)).cloned().collect()
        }
        fn alternatives(&self, _tool: &str) -> Vec<String> {
            Vec::new()
        }
        fn render(&self, tool: &str, target: &str, params: &ToolParams) -> Option<Vec<String>> {
            self.spec(tool)?;
            let mut args = vec![target.to_string()];
            if let Some(c) = params.concurrency {
                args.push(format!("-t{c}"));
            }
            args.extend(params.extra_args.iter().cloned());
            Some(args)
        }
        fn adjust(&self, _d: &CommandDescriptor, _cause: FailureCause) -> Option<Vec<String>> {
            None
        }
        fn follow_ups(&self, finding: &Finding) -> Vec<FollowUp> {
            match &finding.kind {
                FindingKind::OpenPort { port: 80 | 443, .. } => vec![FollowUp {
                    tool: "web-a".into(),
                    target: format!("http://{}", finding.target),
                    reason: "http service".into(),
                }],
                _ => Vec::new(),
            }
        }
    }

    fn engine() -> DecisionEngine {
        let catalog = Catalog {
            specs: vec![
                spec("web-a", TargetClass::Web, 0.7),
                spec("web-b", TargetClass::Web, 0.7),
                spec("net", TargetClass::Network, 0.9),
            ],
        };
        DecisionEngine::new(
            DecisionConfig::default(),
            Duration::from_secs(300),
            Arc::new(catalog),
            None,
        )
    }

    fn outcome(tool: &str, success: bool) -> ToolOutcome {
        ToolOutcome {
            tool: tool.into(),
            target: "https://example.com".into(),
            success,
            timed_out: false,
            rate_limited: false,
            latency_ms: 100,
            findings: 0,
        }
    }

    #[test]
    fn history_separates_equally_rated_tools() {
        let d = engine();
        for i in 0..10 {
            d.feedback(TaskId::new(), &outcome("web-a", i < 9));
            d.feedback(TaskId::new(), &outcome("web-b", i < 2));
        }
        let ranked = d.recommend(&TargetProfile::analyze("https://example.com"));
        let names: Vec<&str> = ranked.iter().map(|r| r.tool.as_str()).collect();
        assert_eq!(names, vec!["web-a", "web-b"]);
        assert!(ranked[0].success_rate > ranked[1].success_rate);
        assert_eq!(ranked[0].samples, 10);
    }

    #[test]
    fn feedback_is_idempotent() {
        let d = engine();
        let id = TaskId::new();
        assert!(d.feedback(id, &outcome("web-a", false)));
        assert!(!d.feedback(id, &outcome("web-a", false)));
        assert_eq!(d.history().len(), 1);
    }

    #[test]
    fn optimize_applies_profile_and_history() {
        let d = engine();
        let base = TargetProfile::analyze("https://example.com");
        assert_eq!(d.optimize("web-a", &base).concurrency, Some(10));

        let stealth = d.optimize("web-a", &base.clone().stealth(true));
        assert_eq!(stealth.concurrency, Some(5));
        assert_eq!(stealth.extra_args, vec!["--slow".to_string()]);

        let aggressive = d.optimize("web-a", &base.clone().aggressive(true));
        assert_eq!(aggressive.concurrency, Some(20));

        for _ in 0..2 {
            let mut o = outcome("web-a", false);
            o.timed_out = true;
            d.feedback(TaskId::new(), &o);
        }
        assert_eq!(d.optimize("web-a", &base).timeout(), Duration::from_secs(240));

        let mut limited = outcome("web-a", false);
        limited.rate_limited = true;
        d.feedback(TaskId::new(), &limited);
        assert_eq!(d.optimize("web-a", &base).concurrency, Some(5));
    }

    #[test]
    fn timeout_then_success_keeps_a_longer_timeout() {
        let d = engine();
        let profile = TargetProfile::analyze("https://example.com");
        let before = d.optimize("web-a", &profile).timeout();

        let mut timed_out = outcome("web-a", false);
        timed_out.timed_out = true;
        timed_out.latency_ms = 60_000;
        d.feedback(TaskId::new(), &timed_out);
        let mut retried = outcome("web-a", true);
        retried.latency_ms = 95_000;
        d.feedback(TaskId::new(), &retried);

        let after = d.optimize("web-a", &profile).timeout();
        assert_eq!(before, Duration::from_secs(60));
        assert_eq!(after, Duration::from_secs(120));
    }

    #[test]
    fn slow_successes_raise_the_floor() {
        let d = engine();
        let mut slow = outcome("web-a", true);
        slow.latency_ms = 150_000;
        d.feedback(TaskId::new(), &slow);
        let p = d.optimize("web-a", &TargetProfile::analyze("https://example.com"));
        assert_eq!(p.timeout(), Duration::from_secs(150));
    }

    #[test]
    fn timeout_growth_is_capped() {
        let cfg = DecisionConfig {
            max_timeout_secs: 100,
            ..DecisionConfig::default()
        };
        let d = DecisionEngine::new(
            cfg,
            Duration::from_secs(300),
            Arc::new(Catalog {
                specs: vec![spec("web-a", TargetClass::Web, 0.7)],
            }),
            None,
        );
        for _ in 0..5 {
            let mut o = outcome("web-a", false);
            o.timed_out = true;
            d.feedback(TaskId::new(), &o);
        }
        let p = d.optimize("web-a", &TargetProfile::analyze("https://example.com"));
        assert_eq!(p.timeout(), Duration::from_secs(100));
    }

    #[test]
    fn chain_dedups_and_respects_depth() {
        let d = engine();
        let findings = vec![
            Finding::open_port("10.0.0.1", 80, Some("http")),
            Finding::open_port("10.0.0.1", 80, Some("http")),
            Finding::open_port("10.0.0.1", 22, Some("ssh")),
        ];
        let next = d.chain(&findings, 0, 3);
        assert_eq!(next.len(), 1);
        assert_eq!(next[0].tool, "web-a");
        assert_eq!(next[0].target, "http://10.0.0.1");

        assert!(d.chain(&findings, 3, 3).is_empty());
        assert!(d.chain(&findings, 1, 1).is_empty());
    }

    #[test]
    fn plan_renders_top_recommendations() {
        let d = engine();
        let plan = d.plan(&TargetProfile::analyze("10.0.0.5"), 5);
        assert_eq!(plan.len(), 1);
        assert_eq!(plan[0].tool, "net");
        assert_eq!(plan[0].args[0], "10.0.0.5");
        assert_eq!(plan[0].timeout(), Duration::from_secs(60));
    }

    #[test]
    fn history_persists_across_engines() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history.json");
        let d = engine();
        d.feedback(TaskId::new(), &outcome("web-a", true));
        d.save_to(&path).unwrap();

        let fresh = engine();
        assert_eq!(fresh.load_from(&path).unwrap(), 1);
        assert_eq!(fresh.load_from(&dir.path().join("missing.json")).unwrap(), 0);
    }
}
