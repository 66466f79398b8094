//! Text and JSON rendering for command results. Tool output goes to stdout,
//! summaries and diagnostics to stderr, JSON documents to stdout.
use std::io::Write;

use hexrun_core::api::{
    CommandDescriptor, EngineError, ExecutionReport, FailureRecord, Finding, FindingKind,
    Recommendation, TargetClass, ToolSpec,
};
use serde::Serialize;

use crate::error::CliError;

/// One line per finished request in batch and plan output.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TaskSummary {
    pub tool: String,
    pub target: String,
    pub state: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    pub elapsed_ms: u64,
    pub cache_hit: bool,
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskSummary {
    pub fn from_report(report: &ExecutionReport) -> Self {
        let r = &report.result;
        Self {
            tool: r.tool.clone(),
            target: r.target.clone(),
            state: r.state.to_string(),
            task_id: Some(r.task_id.to_string()),
            exit_code: r.exit_code,
            elapsed_ms: r.elapsed_ms,
            cache_hit: r.cache_hit,
            attempts: report.attempts,
            error_code: None,
            error: None,
        }
    }

    pub fn from_error(descriptor: &CommandDescriptor, err: &EngineError) -> Self {
        let mut summary = Self {
            tool: descriptor.tool.clone(),
            target: descriptor.target.clone(),
            state: "rejected".to_string(),
            task_id: None,
            exit_code: None,
            elapsed_ms: 0,
            cache_hit: false,
            attempts: err.trail().len() as u32,
            error_code: Some(err.code()),
            error: Some(err.to_string()),
        };
        match err {
            EngineError::Escalated { last, .. } => {
                summary.tool = last.tool.clone();
                summary.state = last.state.to_string();
                summary.task_id = Some(last.task_id.to_string());
                summary.exit_code = last.exit_code;
                summary.elapsed_ms = last.elapsed_ms;
            }
            EngineError::Timeout { task_id, .. } => {
                summary.state = "timed_out".to_string();
                summary.task_id = Some(task_id.to_string());
                summary.attempts = 1;
            }
            EngineError::ProcessFailure {
                task_id, exit_code, ..
            } => {
                summary.state = "failed".to_string();
                summary.task_id = Some(task_id.to_string());
                summary.exit_code = *exit_code;
                summary.attempts = 1;
            }
            EngineError::Launch(_) => {
                summary.state = "failed".to_string();
                summary.attempts = 1;
            }
            _ => {}
        }
        summary
    }

    pub fn internal(descriptor: &CommandDescriptor, error: String) -> Self {
        Self {
            tool: descriptor.tool.clone(),
            target: descriptor.target.clone(),
            state: "aborted".to_string(),
            task_id: None,
            exit_code: None,
            elapsed_ms: 0,
            cache_hit: false,
            attempts: 0,
            error_code: Some("internal"),
            error: Some(error),
        }
    }

    pub fn line(&self) -> String {
        let mut s = format!("[{}] {} -> {}", self.state, self.tool, self.target);
        if let Some(code) = self.exit_code {
            s.push_str(&format!(" exit={code}"));
        }
        s.push_str(&format!(" {}ms", self.elapsed_ms));
        if self.cache_hit {
            s.push_str(" (cached)");
        }
        if self.attempts > 1 {
            s.push_str(&format!(" attempts={}", self.attempts));
        }
        if let Some(err) = &self.error {
            s.push_str(&format!(": {err}"));
        }
        s
    }
}

pub fn print_json<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string_pretty(value).map_err(|e| CliError::Anyhow(e.into()))?;
    println!("{text}");
    Ok(())
}

pub fn print_json_line<T: Serialize>(value: &T) -> Result<(), CliError> {
    let text = serde_json::to_string(value).map_err(|e| CliError::Anyhow(e.into()))?;
    println!("{text}");
    Ok(())
}

pub fn print_report(report: &ExecutionReport, json: bool) -> Result<(), CliError> {
    if json {
        return print_json(report);
    }
    let mut out = std::io::stdout().lock();
    out.write_all(report.result.stdout.text.as_bytes())?;
    out.flush()?;
    if report.result.stdout.truncated {
        eprintln!(
            "(stdout truncated: {} bytes total)",
            report.result.stdout.total_bytes
        );
    }
    print_trail(&report.trail);
    eprintln!("{}", TaskSummary::from_report(report).line());
    Ok(())
}

pub fn print_failure(err: &EngineError, json: bool) -> Result<(), CliError> {
    if json {
        #[derive(Serialize)]
        struct Failure<'a> {
            error_code: &'static str,
            error: String,
            trail: &'a [FailureRecord],
        }
        return print_json(&Failure {
            error_code: err.code(),
            error: err.to_string(),
            trail: err.trail(),
        });
    }
    if let EngineError::Escalated { last, .. } = err {
        if !last.stderr.text.is_empty() {
            eprint!("{}", last.stderr.text);
        }
    }
    print_trail(err.trail());
    Ok(())
}

fn print_trail(trail: &[FailureRecord]) {
    for (i, rec) in trail.iter().enumerate() {
        eprintln!(
            "  attempt {}: {} {} ({}, confidence {:.2}) -> {:?}",
            i + 1,
            rec.tool,
            rec.state,
            rec.cause,
            rec.confidence,
            rec.action
        );
    }
}

pub fn print_descriptors(descriptors: &[CommandDescriptor], json: bool) -> Result<(), CliError> {
    if json {
        return print_json(&descriptors);
    }
    for d in descriptors {
        println!(
            "{} {}  # timeout {}s",
            d.tool,
            d.args.join(" "),
            d.timeout_ms / 1000
        );
    }
    Ok(())
}

pub fn print_recommendations(recs: &[Recommendation], json: bool) -> Result<(), CliError> {
    if json {
        return print_json(&recs);
    }
    println!(
        "{:<4} {:<16} {:>6} {:>6} {:>8} {:>7}",
        "#", "tool", "score", "eff", "success", "samples"
    );
    for (i, r) in recs.iter().enumerate() {
        println!(
            "{:<4} {:<16} {:>6.3} {:>6.2} {:>8.2} {:>7}",
            i + 1,
            r.tool,
            r.score,
            r.effectiveness,
            r.success_rate,
            r.samples
        );
    }
    Ok(())
}

pub fn print_tools(
    tools: &[ToolSpec],
    class: Option<TargetClass>,
    json: bool,
) -> Result<(), CliError> {
    if json {
        return print_json(&tools);
    }
    for t in tools {
        let rating = match class {
            Some(c) => format!("{:.2}", t.effectiveness_for(c)),
            None => t
                .effectiveness
                .iter()
                .map(|(c, v)| format!("{c}={v:.2}"))
                .collect::<Vec<_>>()
                .join(","),
        };
        println!(
            "{:<16} {:<14} {:<28} {}",
            t.name, t.category, rating, t.description
        );
    }
    Ok(())
}

pub fn describe_finding(f: &Finding) -> String {
    match &f.kind {
        FindingKind::OpenPort { port, service } => format!(
            "{} open port {}{}",
            f.target,
            port,
            service.as_deref().map(|s| format!("/{s}")).unwrap_or_default()
        ),
        FindingKind::Technology { name } => format!("{} runs {}", f.target, name),
        FindingKind::Subdomain { name } => format!("subdomain {name}"),
        FindingKind::Endpoint { url } => format!("endpoint {url}"),
        FindingKind::Vulnerability { id } => format!("{} {}", f.target, id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejected_summary_line() {
        let d = CommandDescriptor::builder("nmap", "10.0.0.1").build();
        let err = EngineError::CapacityExceeded { waited_ms: 0 };
        let s = TaskSummary::from_error(&d, &err);
        assert_eq!(s.state, "rejected");
        assert_eq!(s.error_code, Some("capacity_exceeded"));
        assert!(s.line().starts_with("[rejected] nmap -> 10.0.0.1 0ms: "));
    }

    #[test]
    fn first_attempt_timeout_summary() {
        let d = CommandDescriptor::builder("nmap", "10.0.0.1").build();
        let task_id = hexrun_core::api::TaskId::new();
        let err = EngineError::Timeout {
            task_id,
            timeout_ms: 1_000,
        };
        let s = TaskSummary::from_error(&d, &err);
        assert_eq!(s.state, "timed_out");
        assert_eq!(s.task_id, Some(task_id.to_string()));
        assert_eq!(s.attempts, 1);
        assert_eq!(s.error_code, Some("timeout"));
    }

    #[test]
    fn finding_descriptions() {
        let f = Finding::open_port("10.0.0.1", 22, Some("ssh"));
        assert_eq!(describe_finding(&f), "10.0.0.1 open port 22/ssh");
        let f = Finding::open_port("10.0.0.1", 9000, None);
        assert_eq!(describe_finding(&f), "10.0.0.1 open port 9000");
    }
}
