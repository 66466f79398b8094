use clap::{Args as ClapArgs, Parser, Subcommand};

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriorityArg {
    Low,
    Normal,
    High,
    Critical,
}

#[derive(clap::ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClassArg {
    Web,
    Api,
    Network,
    Cloud,
    Binary,
}

#[derive(Parser, Debug)]
#[command(name = "hexrun", version, about = "Adaptive execution engine for external analysis tools")]
pub struct Args {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file; defaults to ~/.hexrun/config.toml, then ./hexrun.toml.
    #[arg(long, global = true)]
    pub config: Option<String>,

    /// Do not load or save cache and history snapshots.
    #[arg(long, global = true, default_value_t = false)]
    pub no_state: bool,

    /// Print machine-readable JSON instead of text.
    #[arg(long, global = true, default_value_t = false)]
    pub json: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RunArgs {
    pub tool: String,

    pub target: String,

    /// Full argument list for the tool (after `--`); when omitted the
    /// catalog renders one.
    #[arg(trailing_var_arg = true)]
    pub args: Vec<String>,

    #[arg(long)]
    pub timeout_secs: Option<u64>,

    #[arg(long, value_enum, default_value_t = PriorityArg::Normal)]
    pub priority: PriorityArg,

    #[arg(long, default_value_t = false)]
    pub no_cache: bool,

    /// Extra environment variables for the tool (KEY=VALUE).
    /// Can be specified multiple times.
    #[arg(long = "env", action = clap::ArgAction::Append)]
    pub env: Vec<String>,

    #[arg(long)]
    pub env_file: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct BatchArgs {
    /// JSON array or JSON-lines file of command descriptors.
    pub file: String,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ProfileArgs {
    pub target: String,

    /// Override the inferred target class.
    #[arg(long, value_enum)]
    pub class: Option<ClassArg>,

    #[arg(long, default_value_t = false, conflicts_with = "aggressive")]
    pub stealth: bool,

    #[arg(long, default_value_t = false)]
    pub aggressive: bool,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RecommendArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,

    #[arg(long, default_value_t = 10)]
    pub limit: usize,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub profile: ProfileArgs,

    #[arg(long, default_value_t = 5)]
    pub limit: usize,

    /// Run the plan instead of printing it.
    #[arg(long, default_value_t = false)]
    pub execute: bool,

    /// With --execute: chain follow-up tools from findings, up to this depth.
    #[arg(long, default_value_t = 0)]
    pub follow_depth: usize,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ChainArgs {
    /// Tool that produced the output.
    #[arg(long)]
    pub tool: String,

    #[arg(long)]
    pub target: String,

    /// Captured output to read; stdin when omitted.
    #[arg(long)]
    pub input: Option<String>,

    /// Chain depth of the run that produced the output.
    #[arg(long, default_value_t = 0)]
    pub depth: usize,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct ToolsArgs {
    #[arg(long, value_enum)]
    pub class: Option<ClassArg>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one tool invocation with recovery.
    Run(RunArgs),
    /// Run many descriptors concurrently.
    Batch(BatchArgs),
    /// Rank tools for a target.
    Recommend(RecommendArgs),
    /// Turn the top recommendations into commands.
    Plan(PlanArgs),
    /// Suggest follow-up commands from captured tool output.
    Chain(ChainArgs),
    /// List the tool catalog.
    Tools(ToolsArgs),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_keeps_hyphenated_tool_args() {
        let args = Args::parse_from([
            "hexrun", "run", "nmap", "10.0.0.1", "--timeout-secs", "30", "--", "-sV", "-p", "80",
        ]);
        let Commands::Run(run) = args.command else {
            panic!("expected run");
        };
        assert_eq!(run.tool, "nmap");
        assert_eq!(run.timeout_secs, Some(30));
        assert_eq!(run.args, vec!["-sV", "-p", "80"]);
    }

    #[test]
    fn global_flags_after_subcommand() {
        let args = Args::parse_from(["hexrun", "recommend", "example.com", "--stealth", "--json"]);
        assert!(args.json);
        let Commands::Recommend(r) = args.command else {
            panic!("expected recommend");
        };
        assert!(r.profile.stealth);
        assert_eq!(r.limit, 10);
    }

    #[test]
    fn stealth_and_aggressive_conflict() {
        let res = Args::try_parse_from(["hexrun", "plan", "t", "--stealth", "--aggressive"]);
        assert!(res.is_err());
    }
}
