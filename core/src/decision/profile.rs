use std::fmt;
use std::str::FromStr;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum TargetClass {
    Web,
    Api,
    Network,
    Cloud,
    Binary,
    #[default]
    Unknown,
}

impl TargetClass {
    pub fn as_str(self) -> &'static str {
        match self {
            TargetClass::Web => "web",
            TargetClass::Api => "api",
            TargetClass::Network => "network",
            TargetClass::Cloud => "cloud",
            TargetClass::Binary => "binary",
            TargetClass::Unknown => "unknown",
        }
    }
}

impl fmt::Display for TargetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TargetClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "web" => Ok(TargetClass::Web),
            "api" => Ok(TargetClass::Api),
            "network" => Ok(TargetClass::Network),
            "cloud" => Ok(TargetClass::Cloud),
            "binary" => Ok(TargetClass::Binary),
            "unknown" => Ok(TargetClass::Unknown),
            other => Err(format!("unknown target class: {other}")),
        }
    }
}

lazy_static! {
    static ref IPV4: Regex = Regex::new(r"^(\d{1,3})\.(\d{1,3})\.(\d{1,3})\.(\d{1,3})(/\d{1,2})?$")
        .expect("static regex");
    static ref DOMAIN: Regex =
        Regex::new(r"^[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$").expect("static regex");
}

const BINARY_EXTENSIONS: &[&str] = &[".exe", ".bin", ".elf", ".so", ".dll"];
const CLOUD_MARKERS: &[&str] = &["amazonaws.com", "azure", "googleapis.com"];

/// What the engine knows about a target before choosing tools.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TargetProfile {
    pub target: String,
    pub class: TargetClass,
    #[serde(default)]
    pub technologies: Vec<String>,
    #[serde(default)]
    pub open_ports: Vec<u16>,
    #[serde(default)]
    pub stealth: bool,
    #[serde(default)]
    pub aggressive: bool,
}

impl TargetProfile {
    /// Classify a raw target string with cheap lexical heuristics.
    pub fn analyze(target: &str) -> Self {
        let target = target.trim();
        Self {
            target: target.to_string(),
            class: classify_target(target),
            technologies: detect_technologies(target),
            ..Self::default()
        }
    }

    pub fn with_class(target: &str, class: TargetClass) -> Self {
        Self {
            target: target.trim().to_string(),
            class,
            ..Self::default()
        }
    }

    pub fn stealth(mut self, on: bool) -> Self {
        self.stealth = on;
        self
    }

    pub fn aggressive(mut self, on: bool) -> Self {
        self.aggressive = on;
        self
    }
}

fn classify_target(target: &str) -> TargetClass {
    if target.is_empty() {
        return TargetClass::Unknown;
    }
    let lower = target.to_ascii_lowercase();
    if BINARY_EXTENSIONS.iter().any(|ext| lower.ends_with(ext)) {
        return TargetClass::Binary;
    }
    if CLOUD_MARKERS.iter().any(|m| lower.contains(m)) {
        return TargetClass::Cloud;
    }
    if let Some(rest) = lower
        .strip_prefix("http://")
        .or_else(|| lower.strip_prefix("https://"))
    {
        let (host, path) = match rest.find('/') {
            Some(i) => (&rest[..i], &rest[i..]),
            None => (rest, ""),
        };
        let path = path.split(['?', '#']).next().unwrap_or("");
        if path.contains("/api/") || path.ends_with("/api") || host.starts_with("api.") {
            return TargetClass::Api;
        }
        return TargetClass::Web;
    }
    if let Some(caps) = IPV4.captures(target) {
        let octets_ok = (1..=4).all(|i| {
            caps.get(i)
                .and_then(|m| m.as_str().parse::<u16>().ok())
                .is_some_and(|o| o <= 255)
        });
        return if octets_ok {
            TargetClass::Network
        } else {
            TargetClass::Unknown
        };
    }
    if DOMAIN.is_match(target) {
        return TargetClass::Web;
    }
    TargetClass::Unknown
}

fn detect_technologies(target: &str) -> Vec<String> {
    let lower = target.to_ascii_lowercase();
    let mut tech = Vec::new();
    if lower.contains("wordpress") || lower.contains("wp-") {
        tech.push("wordpress".to_string());
    }
    if lower.contains("php") {
        tech.push("php".to_string());
    }
    if lower.contains(".asp") {
        tech.push("dotnet".to_string());
    }
    if lower.contains("drupal") {
        tech.push("drupal".to_string());
    }
    if lower.contains("joomla") {
        tech.push("joomla".to_string());
    }
    tech
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_common_targets() {
        let cases = [
            ("https://example.com/login", TargetClass::Web),
            ("https://example.com/api/v1/users", TargetClass::Api),
            ("http://api.example.com", TargetClass::Api),
            ("10.0.0.1", TargetClass::Network),
            ("10.0.0.0/24", TargetClass::Network),
            ("300.1.1.1", TargetClass::Unknown),
            ("bucket.s3.amazonaws.com", TargetClass::Cloud),
            ("./firmware.bin", TargetClass::Binary),
            ("example.org", TargetClass::Web),
            ("", TargetClass::Unknown),
            ("not a target", TargetClass::Unknown),
        ];
        for (target, class) in cases {
            assert_eq!(TargetProfile::analyze(target).class, class, "{target}");
        }
    }

    #[test]
    fn detects_technology_hints() {
        let p = TargetProfile::analyze("https://blog.example.com/wp-login.php");
        assert_eq!(p.technologies, vec!["wordpress", "php"]);
    }
}
