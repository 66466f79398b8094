use std::collections::HashSet;

use hexrun_core::api::{Finding, FindingKind, FindingsExtractor};
use lazy_static::lazy_static;
use regex::Regex;

use crate::catalog::host_of;

const MAX_FINDINGS: usize = 500;

lazy_static! {
    // nmap: "80/tcp   open  http"
    static ref NMAP_PORT: Regex =
        Regex::new(r"(?m)^\s*(\d{1,5})/(?:tcp|udp)\s+open\s+([\w./-]+)?").expect("static regex");
    // masscan: "Discovered open port 443/tcp on 10.0.0.1"
    static ref MASSCAN_PORT: Regex =
        Regex::new(r"(?i)open port (\d{1,5})/(?:tcp|udp)").expect("static regex");
    // rustscan: "Open 10.0.0.1:22"
    static ref RUSTSCAN_PORT: Regex =
        Regex::new(r"(?m)^Open\s+\S+:(\d{1,5})\s*$").expect("static regex");
    static ref URL: Regex = Regex::new(r#"https?://[^\s"'<>\]\[)]+"#).expect("static regex");
    static ref CVE: Regex = Regex::new(r"(?i)\bCVE-\d{4}-\d{4,}\b").expect("static regex");
    static ref DOMAIN_LINE: Regex =
        Regex::new(r"(?m)^\s*([a-zA-Z0-9][a-zA-Z0-9.-]*\.[a-zA-Z]{2,})\s*$").expect("static regex");
    static ref TECHNOLOGIES: Vec<(Regex, &'static str)> = [
        (r"(?i)\bwordpress\b|wp-content|wp-includes", "wordpress"),
        (r"(?i)\bdrupal\b", "drupal"),
        (r"(?i)\bjoomla\b", "joomla"),
        (r"(?i)\bphp\b", "php"),
        (r"(?i)asp\.net|x-aspnet-version", "dotnet"),
        (r"(?i)\bnginx\b", "nginx"),
        (r"(?i)\bapache\b", "apache"),
        (r"(?i)microsoft-iis", "iis"),
        (r"(?i)\btomcat\b|\bjboss\b|\bweblogic\b", "java"),
        (r"(?i)\bexpress\b", "nodejs"),
        (r"(?i)\bdjango\b|\bflask\b|\bwerkzeug\b", "python"),
        (r"(?i)__react_devtools|\breact\b", "react"),
        (r"(?i)ng-version|\bangular\b", "angular"),
        (r"(?i)__vue__|\bvue\.js\b", "vue"),
    ]
    .into_iter()
    .map(|(p, name)| (Regex::new(p).expect("static regex"), name))
    .collect();
}

/// Pattern-based extraction over plain-text tool output: open ports
/// (nmap, masscan, rustscan), technology fingerprints, subdomains of the
/// target, URLs and CVE identifiers.
#[derive(Debug, Default, Clone, Copy)]
pub struct RegexFindingsExtractor;

impl RegexFindingsExtractor {
    pub fn new() -> Self {
        Self
    }
}

impl FindingsExtractor for RegexFindingsExtractor {
    fn name(&self) -> &str {
        "regex"
    }

    fn extract(&self, tool: &str, target: &str, stdout: &str) -> Vec<Finding> {
        let host = host_of(target).to_ascii_lowercase();
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        let mut push = |f: Finding| {
            if out.len() < MAX_FINDINGS && seen.insert(f.clone()) {
                out.push(f);
            }
        };

        for caps in NMAP_PORT.captures_iter(stdout) {
            if let Some(port) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
                push(Finding::open_port(&host, port, caps.get(2).map(|m| m.as_str())));
            }
        }
        for caps in MASSCAN_PORT
            .captures_iter(stdout)
            .chain(RUSTSCAN_PORT.captures_iter(stdout))
        {
            if let Some(port) = caps.get(1).and_then(|m| m.as_str().parse::<u16>().ok()) {
                push(Finding::open_port(&host, port, None));
            }
        }

        for (re, name) in TECHNOLOGIES.iter() {
            if re.is_match(stdout) {
                push(Finding::new(
                    target,
                    FindingKind::Technology {
                        name: name.to_string(),
                    },
                ));
            }
        }

        let suffix = format!(".{host}");
        if !host.is_empty() && !host.chars().all(|c| c.is_ascii_digit() || c == '.') {
            for caps in DOMAIN_LINE.captures_iter(stdout) {
                let name = caps[1].to_ascii_lowercase();
                if name.ends_with(&suffix) {
                    push(Finding::new(target, FindingKind::Subdomain { name }));
                }
            }
        }

        for m in URL.find_iter(stdout) {
            let url = m.as_str().trim_end_matches(['.', ',', ';']);
            if url != target {
                push(Finding::new(
                    target,
                    FindingKind::Endpoint {
                        url: url.to_string(),
                    },
                ));
            }
        }

        for m in CVE.find_iter(stdout) {
            push(Finding::new(
                target,
                FindingKind::Vulnerability {
                    id: m.as_str().to_ascii_uppercase(),
                },
            ));
        }

        tracing::debug!(tool, target, findings = out.len(), "extracted findings");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(findings: &[Finding]) -> Vec<FindingKind> {
        findings.iter().map(|f| f.kind.clone()).collect()
    }

    #[test]
    fn nmap_ports_with_services() {
        let out = "\
Starting Nmap 7.94
PORT     STATE  SERVICE  VERSION
22/tcp   open   ssh      OpenSSH 8.9
80/tcp   open   http     nginx 1.24
443/tcp  closed https
8080/tcp open   http-proxy
";
        let findings = RegexFindingsExtractor.extract("nmap", "10.0.0.1", out);
        let ports: Vec<(u16, Option<String>)> = findings
            .iter()
            .filter_map(|f| match &f.kind {
                FindingKind::OpenPort { port, service } => Some((*port, service.clone())),
                _ => None,
            })
            .collect();
        assert_eq!(
            ports,
            vec![
                (22, Some("ssh".to_string())),
                (80, Some("http".to_string())),
                (8080, Some("http-proxy".to_string())),
            ]
        );
        assert!(findings.iter().all(|f| f.target == "10.0.0.1"));
        assert!(kinds(&findings).contains(&FindingKind::Technology {
            name: "nginx".into()
        }));
    }

    #[test]
    fn masscan_and_rustscan_ports() {
        let out = "Discovered open port 443/tcp on 10.0.0.2\nOpen 10.0.0.2:22\n";
        let findings = RegexFindingsExtractor.extract("masscan", "10.0.0.2", out);
        assert_eq!(
            kinds(&findings),
            vec![
                FindingKind::OpenPort {
                    port: 443,
                    service: None
                },
                FindingKind::OpenPort {
                    port: 22,
                    service: None
                },
            ]
        );
    }

    #[test]
    fn subdomains_urls_and_cves() {
        let out = "\
api.example.com
www.example.com
other.org
http://example.com/login?next=/admin.
Found cve-2021-44228 on target
";
        let findings = RegexFindingsExtractor.extract("subfinder", "example.com", out);
        let kinds = kinds(&findings);
        assert!(kinds.contains(&FindingKind::Subdomain {
            name: "api.example.com".into()
        }));
        assert!(kinds.contains(&FindingKind::Subdomain {
            name: "www.example.com".into()
        }));
        assert!(!kinds.contains(&FindingKind::Subdomain {
            name: "other.org".into()
        }));
        assert!(kinds.contains(&FindingKind::Endpoint {
            url: "http://example.com/login?next=/admin".into()
        }));
        assert!(kinds.contains(&FindingKind::Vulnerability {
            id: "CVE-2021-44228".into()
        }));
    }

    #[test]
    fn duplicate_output_yields_unique_findings() {
        let out = "80/tcp open http\n80/tcp open http\nWordPress 6.1\nwp-content\n";
        let findings = RegexFindingsExtractor.extract("nmap", "http://blog.local", out);
        assert_eq!(findings.len(), 2);
        assert_eq!(findings[0].target, "blog.local");
    }

    #[test]
    fn empty_output_has_no_findings() {
        assert!(RegexFindingsExtractor.extract("x", "t", "").is_empty());
    }
}
