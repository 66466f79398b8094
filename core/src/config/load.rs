use std::path::{Path, PathBuf};

use super::types::EngineConfig;
use crate::error::ConfigError;

/// Get the default hexrun data directory: ~/.hexrun
pub fn get_hexrun_data_dir() -> anyhow::Result<PathBuf> {
    let home = std::env::var("HOME")
        .or_else(|_| std::env::var("USERPROFILE"))
        .map_err(|_| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(PathBuf::from(home).join(".hexrun"))
}

pub fn load_from_path(path: &Path) -> Result<EngineConfig, ConfigError> {
    let s = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str::<EngineConfig>(&s).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

pub fn load_default() -> anyhow::Result<EngineConfig> {
    // Priority 1: ~/.hexrun/config.toml (highest)
    let data_dir = get_hexrun_data_dir()?;
    let user_config = data_dir.join("config.toml");

    // Priority 2: ./hexrun.toml (current directory)
    let local_config = Path::new("hexrun.toml");

    let cfg = if user_config.exists() {
        load_from_path(&user_config)?
    } else if local_config.exists() {
        load_from_path(local_config)?
    } else {
        EngineConfig::default()
    };

    finish(cfg, &data_dir)
}

/// Load an explicitly named config file. Relative persist paths still
/// resolve under the data directory.
pub fn load_explicit(path: &Path) -> anyhow::Result<EngineConfig> {
    let data_dir = get_hexrun_data_dir()?;
    let cfg = load_from_path(path)?;
    finish(cfg, &data_dir)
}

fn finish(mut cfg: EngineConfig, data_dir: &Path) -> anyhow::Result<EngineConfig> {
    resolve_paths(&mut cfg, data_dir);
    apply_env_overrides(&mut cfg, |k| std::env::var(k).ok());
    cfg.validate()?;
    Ok(cfg)
}

fn resolve_paths(cfg: &mut EngineConfig, data_dir: &Path) {
    let resolve = |p: &mut Option<String>| {
        if let Some(path) = p.as_mut() {
            if !path.trim().is_empty() && Path::new(path.as_str()).is_relative() {
                *path = data_dir.join(path.as_str()).to_string_lossy().to_string();
            }
        }
    };
    resolve(&mut cfg.cache.persist_path);
    resolve(&mut cfg.decision.persist_path);
    resolve(&mut cfg.decision.catalog_path);

    if cfg
        .logging
        .directory
        .as_ref()
        .map(|s| s.trim().is_empty())
        .unwrap_or(true)
    {
        cfg.logging.directory = Some(data_dir.join("logs").to_string_lossy().to_string());
    }
}

/// Environment variable overrides (Priority 0: highest).
fn apply_env_overrides<F>(cfg: &mut EngineConfig, var: F)
where
    F: Fn(&str) -> Option<String>,
{
    let parse = |k: &str| {
        var(k).and_then(|v| {
            let v = v.trim().to_string();
            match v.parse::<u64>() {
                Ok(n) => Some(n),
                Err(_) if v.is_empty() => None,
                Err(_) => {
                    tracing::warn!(var = k, value = %v, "ignoring non-numeric override");
                    None
                }
            }
        })
    };

    if let Some(n) = parse("HEXRUN_MAX_WORKERS") {
        cfg.pool.max_workers = n as usize;
        cfg.pool.initial_workers = cfg.pool.initial_workers.min(cfg.pool.max_workers);
    }
    if let Some(n) = parse("HEXRUN_MIN_WORKERS") {
        cfg.pool.min_workers = n as usize;
        cfg.pool.initial_workers = cfg.pool.initial_workers.max(cfg.pool.min_workers);
    }
    if let Some(n) = parse("HEXRUN_CACHE_TTL_SECS") {
        cfg.cache.default_ttl_secs = n;
    }
    if let Some(v) = var("HEXRUN_LOG_LEVEL") {
        if !v.trim().is_empty() {
            cfg.logging.level = v.trim().to_string();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_apply_and_keep_initial_in_bounds() {
        let env: HashMap<&str, &str> = [
            ("HEXRUN_MAX_WORKERS", "3"),
            ("HEXRUN_MIN_WORKERS", "2"),
            ("HEXRUN_CACHE_TTL_SECS", "42"),
            ("HEXRUN_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();

        let mut cfg = EngineConfig::default();
        cfg.pool.initial_workers = 8;
        cfg.pool.max_workers = 16;
        apply_env_overrides(&mut cfg, |k| env.get(k).map(|v| v.to_string()));

        assert_eq!(cfg.pool.max_workers, 3);
        assert_eq!(cfg.pool.min_workers, 2);
        assert_eq!(cfg.pool.initial_workers, 3);
        assert_eq!(cfg.cache.default_ttl_secs, 42);
        assert_eq!(cfg.logging.level, "debug");
        cfg.validate().unwrap();
    }

    #[test]
    fn bad_numbers_are_ignored() {
        let mut cfg = EngineConfig::default();
        let before = cfg.pool.max_workers;
        apply_env_overrides(&mut cfg, |k| {
            (k == "HEXRUN_MAX_WORKERS").then(|| "lots".to_string())
        });
        assert_eq!(cfg.pool.max_workers, before);
    }

    #[test]
    fn loads_file_and_resolves_relative_paths() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hexrun.toml");
        std::fs::write(
            &path,
            "[cache]\npersist_path = \"cache.json\"\n[decision]\npersist_path = \"/abs/history.json\"\n",
        )
        .unwrap();

        let mut cfg = load_from_path(&path).unwrap();
        resolve_paths(&mut cfg, dir.path());
        assert_eq!(
            cfg.cache.persist_path.as_deref(),
            Some(dir.path().join("cache.json").to_string_lossy().as_ref())
        );
        assert_eq!(cfg.decision.persist_path.as_deref(), Some("/abs/history.json"));
        assert!(cfg.logging.directory.is_some());
    }

    #[test]
    fn parse_errors_name_the_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[pool\n").unwrap();
        let err = load_from_path(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("bad.toml"));
    }
}
