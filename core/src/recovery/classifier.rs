use std::fmt;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::registry::{ExecutionResult, TaskState};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCause {
    Timeout,
    PermissionDenied,
    NetworkUnreachable,
    RateLimited,
    ToolNotFound,
    InvalidParameters,
    ResourceExhausted,
    AuthenticationFailed,
    TargetUnreachable,
    ParsingError,
    Unknown,
}

impl FailureCause {
    pub fn kind(self) -> FailureKind {
        match self {
            FailureCause::Timeout
            | FailureCause::NetworkUnreachable
            | FailureCause::RateLimited
            | FailureCause::TargetUnreachable => FailureKind::Transient,
            FailureCause::InvalidParameters | FailureCause::ParsingError => {
                FailureKind::ParameterSensitive
            }
            FailureCause::ToolNotFound
            | FailureCause::PermissionDenied
            | FailureCause::AuthenticationFailed => FailureKind::ToolUnavailable,
            FailureCause::ResourceExhausted => FailureKind::ResourceExhaustion,
            FailureCause::Unknown => FailureKind::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureCause::Timeout => "timeout",
            FailureCause::PermissionDenied => "permission_denied",
            FailureCause::NetworkUnreachable => "network_unreachable",
            FailureCause::RateLimited => "rate_limited",
            FailureCause::ToolNotFound => "tool_not_found",
            FailureCause::InvalidParameters => "invalid_parameters",
            FailureCause::ResourceExhausted => "resource_exhausted",
            FailureCause::AuthenticationFailed => "authentication_failed",
            FailureCause::TargetUnreachable => "target_unreachable",
            FailureCause::ParsingError => "parsing_error",
            FailureCause::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transient,
    ParameterSensitive,
    ToolUnavailable,
    ResourceExhaustion,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub cause: FailureCause,
    pub kind: FailureKind,
    pub confidence: f64,
}

impl Classification {
    fn new(cause: FailureCause, confidence: f64) -> Self {
        Self {
            cause,
            kind: cause.kind(),
            confidence,
        }
    }
}

const STATE_CONFIDENCE: f64 = 0.95;
const EXIT_CODE_CONFIDENCE: f64 = 0.9;
const PATTERN_CONFIDENCE: f64 = 0.8;
const UNKNOWN_CONFIDENCE: f64 = 0.3;

lazy_static! {
    // First match wins. Target lookups precede the generic "not found".
    static ref PATTERNS: Vec<(Regex, FailureCause)> = {
        let table: &[(&str, FailureCause)] = &[
            (r"timeout|timed out|connection timeout|read timeout", FailureCause::Timeout),
            (r"operation timed out|command timeout", FailureCause::Timeout),
            (r"permission denied|access denied|forbidden|not authorized", FailureCause::PermissionDenied),
            (r"sudo required|root required|insufficient privileges", FailureCause::PermissionDenied),
            (r"network unreachable|network is unreachable|host unreachable|no route to host", FailureCause::NetworkUnreachable),
            (r"connection refused|connection reset|network error", FailureCause::NetworkUnreachable),
            (r"rate limit|too many requests|throttled|\b429\b", FailureCause::RateLimited),
            (r"request limit exceeded|quota exceeded", FailureCause::RateLimited),
            (r"target unreachable|target not responding|target down", FailureCause::TargetUnreachable),
            (r"host not found|dns resolution failed|could not resolve host", FailureCause::TargetUnreachable),
            (r"command not found|no such file or directory|not found", FailureCause::ToolNotFound),
            (r"executable not found|binary not found", FailureCause::ToolNotFound),
            (r"invalid argument|invalid option|unknown option|unrecognized option", FailureCause::InvalidParameters),
            (r"bad parameter|invalid parameter|syntax error", FailureCause::InvalidParameters),
            (r"out of memory|memory error|disk full|no space left", FailureCause::ResourceExhausted),
            (r"resource temporarily unavailable|too many open files", FailureCause::ResourceExhausted),
            (r"authentication failed|login failed|invalid credentials", FailureCause::AuthenticationFailed),
            (r"unauthorized|invalid token|expired token", FailureCause::AuthenticationFailed),
            (r"parse error|parsing failed|invalid format|malformed", FailureCause::ParsingError),
            (r"json decode error|xml parse error|invalid json", FailureCause::ParsingError),
        ];
        table
            .iter()
            .filter_map(|(p, c)| match Regex::new(&format!("(?i){p}")) {
                Ok(re) => Some((re, *c)),
                Err(e) => {
                    tracing::error!(pattern = p, error = %e, "bad failure pattern");
                    None
                }
            })
            .collect()
    };
}

/// Classify free-form diagnostic text.
pub fn classify_text(text: &str) -> Classification {
    PATTERNS
        .iter()
        .find(|(re, _)| re.is_match(text))
        .map(|(_, cause)| Classification::new(*cause, PATTERN_CONFIDENCE))
        .unwrap_or_else(|| Classification::new(FailureCause::Unknown, UNKNOWN_CONFIDENCE))
}

/// Classify a failed or timed-out execution.
pub fn classify(result: &ExecutionResult) -> Classification {
    if result.state == TaskState::TimedOut {
        return Classification::new(FailureCause::Timeout, STATE_CONFIDENCE);
    }
    if result.exit_code == Some(127) {
        return Classification::new(FailureCause::ToolNotFound, EXIT_CODE_CONFIDENCE);
    }
    classify_text(&result.failure_text())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::Fingerprint;
    use crate::registry::TaskId;
    use crate::util::CapturedOutput;

    fn failed(exit: Option<i32>, stderr: &str, state: TaskState) -> ExecutionResult {
        ExecutionResult {
            task_id: TaskId::new(),
            tool: "x".into(),
            target: "t".into(),
            fingerprint: Fingerprint::of("x", &[], "t"),
            state,
            exit_code: exit,
            stdout: CapturedOutput::default(),
            stderr: CapturedOutput::from_text(stderr),
            elapsed_ms: 1,
            cache_hit: false,
            completed_at: None,
            diagnostic: None,
            launch_failed: false,
        }
    }

    #[test]
    fn timed_out_state_wins() {
        let c = classify(&failed(None, "permission denied", TaskState::TimedOut));
        assert_eq!(c.cause, FailureCause::Timeout);
        assert_eq!(c.kind, FailureKind::Transient);
        assert_eq!(c.confidence, 0.95);
    }

    #[test]
    fn exit_127_is_missing_tool() {
        let c = classify(&failed(Some(127), "", TaskState::Failed));
        assert_eq!(c.cause, FailureCause::ToolNotFound);
        assert_eq!(c.kind, FailureKind::ToolUnavailable);
        assert_eq!(c.confidence, 0.9);
    }

    #[test]
    fn stderr_patterns() {
        let cases = [
            ("Permission denied", FailureCause::PermissionDenied),
            ("Network is unreachable", FailureCause::NetworkUnreachable),
            ("Rate limit exceeded", FailureCause::RateLimited),
            ("HTTP 429 Too Many Requests", FailureCause::RateLimited),
            ("bash: nmapx: command not found", FailureCause::ToolNotFound),
            ("error: unknown option --foo", FailureCause::InvalidParameters),
            ("fatal: Out of memory", FailureCause::ResourceExhausted),
            ("Authentication failed for user", FailureCause::AuthenticationFailed),
            ("Host not found: example.invalid", FailureCause::TargetUnreachable),
            ("JSON decode error at line 1", FailureCause::ParsingError),
        ];
        for (text, cause) in cases {
            let c = classify(&failed(Some(1), text, TaskState::Failed));
            assert_eq!(c.cause, cause, "{text}");
            assert_eq!(c.confidence, 0.8);
        }
    }

    #[test]
    fn unmatched_is_unknown_with_low_confidence() {
        let c = classify(&failed(Some(3), "something odd", TaskState::Failed));
        assert_eq!(c.cause, FailureCause::Unknown);
        assert_eq!(c.kind, FailureKind::Unknown);
        assert_eq!(c.confidence, 0.3);
    }

    #[test]
    fn kinds_follow_causes() {
        assert_eq!(FailureCause::ParsingError.kind(), FailureKind::ParameterSensitive);
        assert_eq!(FailureCause::AuthenticationFailed.kind(), FailureKind::ToolUnavailable);
        assert_eq!(FailureCause::ResourceExhausted.kind(), FailureKind::ResourceExhaustion);
        assert_eq!(FailureCause::TargetUnreachable.kind(), FailureKind::Transient);
    }
}
