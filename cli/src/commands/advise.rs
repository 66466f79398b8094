use std::io::Read;

use hexrun_core::api::{CommandDescriptor, Engine, Finding, TargetClass, TargetProfile};
use serde::Serialize;

use super::cli::{ChainArgs, ClassArg, PlanArgs, ProfileArgs, RecommendArgs, ToolsArgs};
use super::run::execute_collect;
use crate::error::CliError;
use crate::output;
use crate::utils::expand_home;

impl From<ClassArg> for TargetClass {
    fn from(c: ClassArg) -> Self {
        match c {
            ClassArg::Web => TargetClass::Web,
            ClassArg::Api => TargetClass::Api,
            ClassArg::Network => TargetClass::Network,
            ClassArg::Cloud => TargetClass::Cloud,
            ClassArg::Binary => TargetClass::Binary,
        }
    }
}

pub fn profile_from(args: &ProfileArgs) -> TargetProfile {
    let mut profile = TargetProfile::analyze(&args.target)
        .stealth(args.stealth)
        .aggressive(args.aggressive);
    if let Some(class) = args.class {
        profile.class = class.into();
    }
    profile
}

pub fn recommend(engine: &Engine, args: RecommendArgs, json: bool) -> Result<i32, CliError> {
    let profile = profile_from(&args.profile);
    let mut recs = engine.recommend(&profile);
    recs.truncate(args.limit);
    if recs.is_empty() && !json {
        eprintln!("no tools apply to {} ({})", profile.target, profile.class);
    }
    output::print_recommendations(&recs, json)?;
    Ok(0)
}

/// Print the plan, or run it wave by wave: each wave's findings feed the
/// next one through the catalog's follow-up rules.
pub async fn plan(engine: &Engine, args: PlanArgs, json: bool) -> Result<i32, CliError> {
    let profile = profile_from(&args.profile);
    let mut wave = engine.plan(&profile, args.limit);
    if !args.execute {
        output::print_descriptors(&wave, json)?;
        return Ok(0);
    }

    let max_depth = args.follow_depth;
    let mut depth = 0;
    let mut total = 0;
    let mut failed = 0;
    while !wave.is_empty() {
        tracing::info!(depth, commands = wave.len(), "running plan wave");
        let (summaries, reports) = execute_collect(engine, wave).await;
        for s in &summaries {
            total += 1;
            if s.error.is_some() {
                failed += 1;
            }
            if json {
                output::print_json_line(s)?;
            } else {
                println!("{}", s.line());
            }
        }
        if depth >= max_depth {
            break;
        }
        let findings: Vec<Finding> = reports.iter().flat_map(|r| engine.findings(&r.result)).collect();
        wave = engine.chain(&findings, depth, max_depth);
        depth += 1;
    }

    if failed > 0 {
        return Err(CliError::Incomplete { failed, total });
    }
    Ok(0)
}

#[derive(Serialize)]
struct ChainOutput<'a> {
    findings: &'a [Finding],
    follow_ups: &'a [CommandDescriptor],
}

pub fn chain(engine: &Engine, args: ChainArgs, json: bool) -> Result<i32, CliError> {
    let text = match &args.input {
        Some(path) => std::fs::read_to_string(expand_home(path))?,
        None => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf
        }
    };

    let findings = engine
        .decision()
        .extract_findings(&args.tool, &args.target, &text);
    let max_depth = engine.config().decision.max_chain_depth;
    let follow_ups = engine.chain(&findings, args.depth, max_depth);

    if json {
        output::print_json(&ChainOutput {
            findings: &findings,
            follow_ups: &follow_ups,
        })?;
        return Ok(0);
    }

    for f in &findings {
        eprintln!("finding: {}", output::describe_finding(f));
    }
    output::print_descriptors(&follow_ups, false)?;
    Ok(0)
}

pub fn tools(engine: &Engine, args: ToolsArgs, json: bool) -> Result<i32, CliError> {
    let class = args.class.map(TargetClass::from);
    let specs = match class {
        Some(c) => engine.catalog().tools_for(c),
        None => engine.catalog().tools(),
    };
    output::print_tools(&specs, class, json)?;
    Ok(0)
}
