use std::time::Duration;

use hexrun_core::api::{CommandDescriptor, Engine, ExecutionReport, Priority, TargetProfile};
use serde_json::Value;

use super::cli::{BatchArgs, PriorityArg, RunArgs};
use crate::error::CliError;
use crate::output::{self, TaskSummary};
use crate::utils::{expand_home, parse_env_file, parse_env_pair};

impl From<PriorityArg> for Priority {
    fn from(p: PriorityArg) -> Self {
        match p {
            PriorityArg::Low => Priority::Low,
            PriorityArg::Normal => Priority::Normal,
            PriorityArg::High => Priority::High,
            PriorityArg::Critical => Priority::Critical,
        }
    }
}

#[tracing::instrument(name = "cli.run", skip_all, fields(tool = %args.tool, target = %args.target))]
pub async fn run(engine: &Engine, args: RunArgs, json: bool) -> Result<i32, CliError> {
    let descriptor = build_descriptor(engine, &args)?;
    match engine.execute(descriptor).await {
        Ok(report) => {
            output::print_report(&report, json)?;
            Ok(0)
        }
        Err(e) => {
            output::print_failure(&e, json)?;
            Err(e.into())
        }
    }
}

/// Descriptor for `run`: explicit arguments win, otherwise the catalog
/// renders tuned ones for the target.
pub fn build_descriptor(engine: &Engine, args: &RunArgs) -> Result<CommandDescriptor, CliError> {
    let pool = &engine.config().pool;
    let (argv, tuned_timeout) = if args.args.is_empty() {
        let profile = TargetProfile::analyze(&args.target);
        let params = engine.optimize(&args.tool, &profile);
        let argv = engine
            .catalog()
            .render(&args.tool, &args.target, &params)
            .ok_or_else(|| {
                CliError::Input(format!(
                    "no arguments given and the catalog has no template for '{}'",
                    args.tool
                ))
            })?;
        (argv, Some(params.timeout()))
    } else {
        (args.args.clone(), None)
    };

    let timeout = args
        .timeout_secs
        .map(Duration::from_secs)
        .or(tuned_timeout)
        .unwrap_or(Duration::from_millis(pool.default_timeout_ms));

    let mut builder = CommandDescriptor::builder(&args.tool, &args.target)
        .args(argv)
        .timeout(timeout)
        .priority(args.priority.into())
        .cacheable(!args.no_cache);

    if let Some(file) = &args.env_file {
        for (k, v) in parse_env_file(file)? {
            builder = builder.env(k, v);
        }
    }
    for raw in &args.env {
        let (k, v) = parse_env_pair(raw)?;
        builder = builder.env(k, v);
    }
    Ok(builder.build())
}

pub async fn batch(engine: &Engine, args: BatchArgs, json: bool) -> Result<i32, CliError> {
    let path = expand_home(&args.file);
    let text = std::fs::read_to_string(&path)
        .map_err(|e| CliError::Input(format!("failed to read {}: {e}", path.display())))?;
    let descriptors = parse_batch(&text, engine.config().pool.default_timeout_ms)?;
    tracing::info!(count = descriptors.len(), "running batch");

    let summaries = execute_all(engine, descriptors).await;
    let total = summaries.len();
    let mut failed = 0;
    for s in &summaries {
        if s.error.is_some() {
            failed += 1;
        }
        if json {
            output::print_json_line(s)?;
        } else {
            println!("{}", s.line());
        }
    }

    if failed > 0 {
        return Err(CliError::Incomplete { failed, total });
    }
    Ok(0)
}

/// Runs every descriptor concurrently; the pool bounds actual parallelism.
pub async fn execute_all(engine: &Engine, descriptors: Vec<CommandDescriptor>) -> Vec<TaskSummary> {
    let (summaries, _) = execute_collect(engine, descriptors).await;
    summaries
}

/// Like [`execute_all`], also returning the reports of successful runs.
pub async fn execute_collect(
    engine: &Engine,
    descriptors: Vec<CommandDescriptor>,
) -> (Vec<TaskSummary>, Vec<ExecutionReport>) {
    let handles: Vec<_> = descriptors
        .iter()
        .map(|d| engine.spawn_execute(d.clone()))
        .collect();
    let results = futures::future::join_all(handles).await;

    let mut summaries = Vec::with_capacity(results.len());
    let mut reports = Vec::new();
    for (descriptor, res) in descriptors.iter().zip(results) {
        match res {
            Ok(Ok(report)) => {
                summaries.push(TaskSummary::from_report(&report));
                reports.push(report);
            }
            Ok(Err(e)) => summaries.push(TaskSummary::from_error(descriptor, &e)),
            Err(join) => {
                tracing::error!(tool = %descriptor.tool, error = %join, "execution task panicked");
                summaries.push(TaskSummary::internal(descriptor, join.to_string()));
            }
        }
    }
    (summaries, reports)
}

/// A JSON array or JSON lines of descriptors. `timeout_ms` may be omitted.
pub fn parse_batch(text: &str, default_timeout_ms: u64) -> Result<Vec<CommandDescriptor>, CliError> {
    let trimmed = text.trim_start();
    let values: Vec<Value> = if trimmed.starts_with('[') {
        serde_json::from_str(trimmed).map_err(|e| CliError::Input(format!("invalid batch file: {e}")))?
    } else {
        trimmed
            .lines()
            .enumerate()
            .filter(|(_, l)| !l.trim().is_empty() && !l.trim_start().starts_with('#'))
            .map(|(i, l)| {
                serde_json::from_str(l)
                    .map_err(|e| CliError::Input(format!("invalid batch line {}: {e}", i + 1)))
            })
            .collect::<Result<_, _>>()?
    };

    values
        .into_iter()
        .enumerate()
        .map(|(i, mut v)| {
            if let Value::Object(map) = &mut v {
                map.entry("timeout_ms")
                    .or_insert_with(|| Value::from(default_timeout_ms));
            }
            serde_json::from_value::<CommandDescriptor>(v)
                .map_err(|e| CliError::Input(format!("invalid descriptor #{}: {e}", i + 1)))
        })
        .collect()
}
