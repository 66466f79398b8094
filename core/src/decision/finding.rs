use serde::{Deserialize, Serialize};

/// Structured evidence pulled out of a finished task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FindingKind {
    OpenPort { port: u16, service: Option<String> },
    Technology { name: String },
    Subdomain { name: String },
    Endpoint { url: String },
    Vulnerability { id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Finding {
    pub target: String,
    #[serde(flatten)]
    pub kind: FindingKind,
}

impl Finding {
    pub fn new(target: impl Into<String>, kind: FindingKind) -> Self {
        Self {
            target: target.into(),
            kind,
        }
    }

    pub fn open_port(target: impl Into<String>, port: u16, service: Option<&str>) -> Self {
        Self::new(
            target,
            FindingKind::OpenPort {
                port,
                service: service.map(|s| s.to_ascii_lowercase()),
            },
        )
    }
}

/// Pulls findings out of a tool's captured output.
pub trait FindingsExtractor: Send + Sync {
    fn name(&self) -> &str;
    fn extract(&self, tool: &str, target: &str, stdout: &str) -> Vec<Finding>;
}
