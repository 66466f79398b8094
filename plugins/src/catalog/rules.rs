use std::collections::BTreeMap;

use hexrun_core::api::{Finding, FindingKind, FollowUp};
use hexrun_core::recovery::FailureCause;
use serde::{Deserialize, Serialize};

/// Argument rewrite applied when a tool fails with one of `causes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AdjustmentRule {
    pub tool: String,
    pub causes: Vec<FailureCause>,
    /// Flag -> value. Replaces the value after an existing flag (or a
    /// `flag=value` pair); appends the pair when the flag is absent.
    #[serde(default)]
    pub set: BTreeMap<String, String>,
    /// Drops every argument starting with one of these prefixes.
    #[serde(default)]
    pub remove: Vec<String>,
    /// Appended when not already present.
    #[serde(default)]
    pub append: Vec<String>,
}

impl AdjustmentRule {
    pub fn matches(&self, tool: &str, cause: FailureCause) -> bool {
        self.tool.eq_ignore_ascii_case(tool) && self.causes.contains(&cause)
    }

    pub fn apply(&self, args: &[String]) -> Vec<String> {
        let mut out: Vec<String> = args
            .iter()
            .filter(|a| !self.remove.iter().any(|p| a.starts_with(p.as_str())))
            .cloned()
            .collect();

        for (flag, value) in &self.set {
            let prefix = format!("{flag}=");
            if let Some(i) = out.iter().position(|a| a == flag) {
                if i + 1 < out.len() {
                    out[i + 1] = value.clone();
                } else {
                    out.push(value.clone());
                }
            } else if let Some(i) = out.iter().position(|a| a.starts_with(&prefix)) {
                out[i] = format!("{prefix}{value}");
            } else {
                out.push(flag.clone());
                out.push(value.clone());
            }
        }

        for arg in &self.append {
            if !out.contains(arg) {
                out.push(arg.clone());
            }
        }
        out
    }
}

/// Which findings trigger a follow-up rule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "on", rename_all = "snake_case")]
pub enum Trigger {
    /// An open port whose service name or number is listed. Empty lists
    /// match any open port.
    Service {
        #[serde(default)]
        services: Vec<String>,
        #[serde(default)]
        ports: Vec<u16>,
    },
    Technology {
        names: Vec<String>,
    },
    Subdomain,
    Endpoint,
    Vulnerability,
}

/// Maps a finding to follow-up tools.
///
/// `target` is a template: `{host}` is the finding's target, `{port}` and
/// `{scheme}` come from open ports, `{name}` from technologies and
/// subdomains, `{url}` from endpoints, `{id}` from vulnerabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUpRule {
    #[serde(flatten)]
    pub trigger: Trigger,
    pub tools: Vec<String>,
    #[serde(default = "default_follow_target")]
    pub target: String,
    #[serde(default)]
    pub reason: String,
}

fn default_follow_target() -> String {
    "{host}".to_string()
}

const HTTP_SERVICES: &[&str] = &["http", "http-alt", "http-proxy", "www"];
const HTTPS_SERVICES: &[&str] = &["https", "ssl/http", "https-alt", "ssl"];
const HTTPS_PORTS: &[u16] = &[443, 8443];

impl FollowUpRule {
    pub fn matches(&self, finding: &Finding) -> bool {
        match (&self.trigger, &finding.kind) {
            (Trigger::Service { services, ports }, FindingKind::OpenPort { port, service }) => {
                if services.is_empty() && ports.is_empty() {
                    return true;
                }
                ports.contains(port)
                    || service
                        .as_deref()
                        .is_some_and(|s| services.iter().any(|x| x.eq_ignore_ascii_case(s)))
            }
            (Trigger::Technology { names }, FindingKind::Technology { name }) => {
                names.iter().any(|n| n.eq_ignore_ascii_case(name))
            }
            (Trigger::Subdomain, FindingKind::Subdomain { .. })
            | (Trigger::Endpoint, FindingKind::Endpoint { .. })
            | (Trigger::Vulnerability, FindingKind::Vulnerability { .. }) => true,
            _ => false,
        }
    }

    pub fn expand(&self, finding: &Finding) -> Vec<FollowUp> {
        if !self.matches(finding) {
            return Vec::new();
        }
        let target = self.render_target(finding);
        let reason = if self.reason.is_empty() {
            describe(finding)
        } else {
            self.reason.clone()
        };
        self.tools
            .iter()
            .map(|tool| FollowUp {
                tool: tool.clone(),
                target: target.clone(),
                reason: reason.clone(),
            })
            .collect()
    }

    fn render_target(&self, finding: &Finding) -> String {
        let mut out = self.target.replace("{host}", &finding.target);
        match &finding.kind {
            FindingKind::OpenPort { port, service } => {
                out = out
                    .replace("{port}", &port.to_string())
                    .replace("{scheme}", scheme_for(*port, service.as_deref()));
            }
            FindingKind::Technology { name } | FindingKind::Subdomain { name } => {
                out = out.replace("{name}", name);
            }
            FindingKind::Endpoint { url } => {
                out = out.replace("{url}", url);
            }
            FindingKind::Vulnerability { id } => {
                out = out.replace("{id}", id);
            }
        }
        out
    }
}

fn scheme_for(port: u16, service: Option<&str>) -> &'static str {
    let https = HTTPS_PORTS.contains(&port)
        || service.is_some_and(|s| HTTPS_SERVICES.iter().any(|x| s.eq_ignore_ascii_case(x)));
    if https {
        "https"
    } else {
        "http"
    }
}

/// Whether an open-port finding looks like a web listener.
pub fn is_web_service(port: u16, service: Option<&str>) -> bool {
    matches!(port, 80 | 443 | 8000 | 8080 | 8443 | 8888)
        || service.is_some_and(|s| {
            HTTP_SERVICES
                .iter()
                .chain(HTTPS_SERVICES)
                .any(|x| s.eq_ignore_ascii_case(x))
        })
}

fn describe(finding: &Finding) -> String {
    match &finding.kind {
        FindingKind::OpenPort { port, service } => match service {
            Some(s) => format!("open port {port}/{s}"),
            None => format!("open port {port}"),
        },
        FindingKind::Technology { name } => format!("technology {name}"),
        FindingKind::Subdomain { name } => format!("subdomain {name}"),
        FindingKind::Endpoint { url } => format!("endpoint {url}"),
        FindingKind::Vulnerability { id } => format!("vulnerability {id}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn args(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn adjustment_replaces_appends_and_removes() {
        let rule = AdjustmentRule {
            tool: "nmap".into(),
            causes: vec![FailureCause::Timeout],
            set: BTreeMap::from([("--max-parallelism".to_string(), "10".to_string())]),
            remove: vec!["-T".into()],
            append: vec!["-T2".into()],
        };
        assert!(rule.matches("NMAP", FailureCause::Timeout));
        assert!(!rule.matches("nmap", FailureCause::RateLimited));

        let out = rule.apply(&args(&["-sV", "-T4", "10.0.0.1"]));
        assert_eq!(out, args(&["-sV", "10.0.0.1", "--max-parallelism", "10", "-T2"]));

        let again = rule.apply(&out);
        assert_eq!(again, out);
    }

    #[test]
    fn adjustment_rewrites_inline_values() {
        let rule = AdjustmentRule {
            tool: "nuclei".into(),
            causes: vec![FailureCause::RateLimited],
            set: BTreeMap::from([("-rate-limit".to_string(), "10".to_string())]),
            remove: Vec::new(),
            append: Vec::new(),
        };
        let out = rule.apply(&args(&["-u", "http://t", "-rate-limit=150"]));
        assert_eq!(out, args(&["-u", "http://t", "-rate-limit=10"]));
    }

    #[test]
    fn service_rule_builds_url_targets() {
        let rule = FollowUpRule {
            trigger: Trigger::Service {
                services: vec!["http".into(), "https".into()],
                ports: vec![80, 443],
            },
            tools: vec!["httpx".into(), "nuclei".into()],
            target: "{scheme}://{host}:{port}".into(),
            reason: String::new(),
        };
        let finding = Finding::open_port("10.0.0.5", 443, Some("https"));
        let follow = rule.expand(&finding);
        assert_eq!(follow.len(), 2);
        assert_eq!(follow[0].target, "https://10.0.0.5:443");
        assert_eq!(follow[1].tool, "nuclei");
        assert_eq!(follow[0].reason, "open port 443/https");

        let ssh = Finding::open_port("10.0.0.5", 22, Some("ssh"));
        assert!(rule.expand(&ssh).is_empty());
    }

    #[test]
    fn trigger_parses_from_toml() {
        let rule: FollowUpRule = toml::from_str(
            r#"
on = "technology"
names = ["wordpress"]
tools = ["wpscan"]
target = "{host}"
"#,
        )
        .unwrap();
        assert_eq!(
            rule.trigger,
            Trigger::Technology {
                names: vec!["wordpress".into()]
            }
        );
        let hit = Finding::new(
            "http://blog",
            FindingKind::Technology {
                name: "WordPress".into(),
            },
        );
        assert_eq!(rule.expand(&hit)[0].target, "http://blog");
    }
}
