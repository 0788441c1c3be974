// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads the master TOML file, deserializes into `MasterConfig`, and resolves
//! the per-user data directories for components that persist state.

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::types::{ConfigError, MasterConfig};

/// Load and parse the master configuration from `path`.
/// Logs at DEBUG before reading and INFO on success.
pub fn load(path: &Path) -> Result<MasterConfig, ConfigError> {
    log::debug!("Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg: MasterConfig = toml::from_str(&txt)?;
    validate(&cfg)?;
    log::info!("Loaded config from {:?}", path);
    Ok(cfg)
}

/// Load the config if the file exists, otherwise fall back to defaults.
pub fn load_or_default(path: &Path) -> Result<MasterConfig, ConfigError> {
    if path.exists() {
        load(path)
    } else {
        log::info!("No config at {:?}; using built-in defaults", path);
        Ok(MasterConfig::default())
    }
}

fn validate(cfg: &MasterConfig) -> Result<(), ConfigError> {
    if cfg.io.small_threshold >= cfg.io.large_threshold {
        return Err(ConfigError::InvalidValue(
            "io.small_threshold",
            format!(
                "{} must be below io.large_threshold ({})",
                cfg.io.small_threshold, cfg.io.large_threshold
            ),
        ));
    }
    if cfg.io.chunk_size == 0 {
        return Err(ConfigError::InvalidValue("io.chunk_size", "must be positive".into()));
    }
    if cfg.io.max_concurrent_ops == 0 {
        return Err(ConfigError::InvalidValue("io.max_concurrent_ops", "must be positive".into()));
    }
    if cfg.workers.max != 0 && cfg.workers.min > cfg.workers.max {
        return Err(ConfigError::InvalidValue(
            "workers.min",
            format!("{} exceeds workers.max ({})", cfg.workers.min, cfg.workers.max),
        ));
    }
    Ok(())
}

/// Per-user data root, e.g. `~/.local/share/vigil` on Linux.
pub fn data_dir() -> PathBuf {
    dirs::data_dir().unwrap_or_else(|| PathBuf::from(".")).join("vigil")
}

/// Per-user config file location, e.g. `~/.config/vigil/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir().unwrap_or_else(|| PathBuf::from(".")).join("vigil").join("config.toml")
}

/// Resolved cache database path, honoring the `[cache] db_path` override.
pub fn cache_db_path(cfg: &MasterConfig) -> PathBuf {
    cfg.cache
        .db_path
        .clone()
        .unwrap_or_else(|| data_dir().join("cache").join("verdict_cache.db"))
}

/// Resolved quarantine root, honoring the `[quarantine] dir` override.
pub fn quarantine_dir(cfg: &MasterConfig) -> PathBuf {
    cfg.quarantine.dir.clone().unwrap_or_else(|| data_dir().join("quarantine"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn partial_config_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        let mut f = std::fs::File::create(&path).unwrap();
        writeln!(
            f,
            "[cache]\nmax_entries = 64\n\n[scan]\nbatch_size = 10\n\n[rate_limits.background_scan]\ncalls = 10\nperiod = 60.0\nburst = 3\n"
        )
        .unwrap();

        let cfg = load(&path).unwrap();
        assert_eq!(cfg.cache.max_entries, 64);
        assert_eq!(cfg.cache.ttl_seconds, 3600);
        assert_eq!(cfg.scan.batch_size, 10);
        assert_eq!(cfg.io.small_threshold, 1024 * 1024);
        let rl = &cfg.rate_limits["background_scan"];
        assert_eq!((rl.calls, rl.burst), (10, Some(3)));
    }

    #[test]
    fn inverted_thresholds_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[io]\nsmall_threshold = 200\nlarge_threshold = 100\n").unwrap();
        assert!(load(&path).is_err());
    }
}
