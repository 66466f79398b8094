use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Stable identity of a command invocation, used as the result cache key.
///
/// Normalization: tool is trimmed and lower-cased, arguments are trimmed and
/// empty ones dropped (order is preserved), target is trimmed. Components are
/// joined with NUL so `["a b"]` and `["a", "b"]` never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn of(tool: &str, args: &[String], target: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(tool.trim().to_ascii_lowercase().as_bytes());
        for arg in args.iter().map(|a| a.trim()).filter(|a| !a.is_empty()) {
            hasher.update([0u8]);
            hasher.update(arg.as_bytes());
        }
        // Separate the target from the argument list explicitly.
        hasher.update([0u8, 0u8]);
        hasher.update(target.trim().as_bytes());
        Self(hex::encode(hasher.finalize()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn short(&self) -> &str {
        &self.0[..12.min(self.0.len())]
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for Fingerprint {
    fn from(s: String) -> Self {
        Self(s)
    }
}
