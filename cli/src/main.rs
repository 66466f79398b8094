use clap::Parser;
use hexrun_cli::commands::{advise, cli, run};
use hexrun_cli::error::{exit_code_for_error, CliError};
use hexrun_cli::utils::expand_home;
use hexrun_core::api::{get_hexrun_data_dir, EngineConfig, LoggingConfig};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

static LOG_GUARD: std::sync::OnceLock<tracing_appender::non_blocking::WorkerGuard> =
    std::sync::OnceLock::new();

#[tokio::main]
async fn main() {
    let exit = match real_main().await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{e}");
            exit_code_for_error(&e)
        }
    };

    std::process::exit(exit);
}

async fn real_main() -> Result<i32, CliError> {
    let args = cli::Args::parse();
    let mut cfg = load_config(args.config.as_deref())?;
    init_tracing(&cfg.logging).map_err(CliError::Config)?;
    apply_state_paths(&mut cfg, args.no_state);

    let engine = hexrun_plugins::factory::build_engine(cfg)
        .map_err(|e| CliError::Config(format!("{e:#}")))?;
    if let Err(e) = engine.load_state() {
        tracing::warn!(error = %e, "ignoring unreadable state snapshot");
    }

    let executes = matches!(
        &args.command,
        cli::Commands::Run(_) | cli::Commands::Batch(_)
    ) || matches!(&args.command, cli::Commands::Plan(p) if p.execute);
    if executes {
        engine.start_background();
    }

    let json = args.json;
    let result = match args.command {
        cli::Commands::Run(a) => run::run(&engine, a, json).await,
        cli::Commands::Batch(a) => run::batch(&engine, a, json).await,
        cli::Commands::Recommend(a) => advise::recommend(&engine, a, json),
        cli::Commands::Plan(a) => advise::plan(&engine, a, json).await,
        cli::Commands::Chain(a) => advise::chain(&engine, a, json),
        cli::Commands::Tools(a) => advise::tools(&engine, a, json),
    };

    engine.shutdown().await;
    result
}

fn load_config(path: Option<&str>) -> Result<EngineConfig, CliError> {
    let loaded = match path {
        Some(p) => hexrun_core::api::load_explicit(&expand_home(p)),
        None => hexrun_core::api::load_default(),
    };
    loaded.map_err(|e| CliError::Config(format!("{e:#}")))
}

fn apply_state_paths(cfg: &mut EngineConfig, no_state: bool) {
    if no_state {
        cfg.cache.persist_path = None;
        cfg.decision.persist_path = None;
        return;
    }
    let Ok(dir) = get_hexrun_data_dir() else {
        tracing::warn!("no data directory; state will not persist");
        return;
    };
    let default_in = |name: &str| Some(dir.join(name).to_string_lossy().to_string());
    if cfg.cache.persist_path.is_none() {
        cfg.cache.persist_path = default_in("cache.json");
    }
    if cfg.decision.persist_path.is_none() {
        cfg.decision.persist_path = default_in("history.json");
    }
}

fn init_tracing(logging: &LoggingConfig) -> Result<(), String> {
    if !logging.enabled {
        return Ok(());
    }

    let filter = match std::env::var("RUST_LOG") {
        Ok(v) if !v.trim().is_empty() => EnvFilter::from_default_env(),
        _ => EnvFilter::try_new(logging.level.clone()).map_err(|e| e.to_string())?,
    };

    let mut maybe_writer = None;

    if logging.file {
        let dir = match logging
            .directory
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
        {
            Some(d) => std::path::PathBuf::from(d),
            None => std::env::temp_dir().join("hexrun"),
        };

        std::fs::create_dir_all(&dir).map_err(|e| format!("create log dir failed: {e}"))?;
        let file_name = format!("hexrun.{}.log", std::process::id());
        let appender = tracing_appender::rolling::never(dir, file_name);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);
        let _ = LOG_GUARD.set(guard);
        maybe_writer = Some(non_blocking);
    }

    if !logging.console && maybe_writer.is_none() {
        return Err("logging disabled for both console and file".to_string());
    }

    let console_layer = logging.console.then(|| {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_ansi(atty::is(atty::Stream::Stderr))
            .with_target(false)
    });

    let file_layer = maybe_writer.map(|w| {
        tracing_subscriber::fmt::layer()
            .with_writer(w)
            .with_ansi(false)
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .with(file_layer)
        .init();

    Ok(())
}
