// src/config/types.rs

//! Configuration structures for the scanning core.
//!
//! Mirrors the tables of `default.toml`. Every field carries a serde default
//! so a partial config file still deserializes; the defaults here are the
//! documented baseline behavior of the engine.

use std::collections::HashMap;
use std::path::PathBuf;

use serde::Deserialize;
use thiserror::Error;

/// Per-run logging settings.
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// If true, write a session log file in addition to stdout.
    #[serde(default)]
    pub enable: bool,

    /// Path for the log file, relative to the data directory.
    #[serde(default)]
    pub file: Option<String>,

    /// Log level: "ERROR", "WARN", "INFO", "DEBUG", or "TRACE"
    #[serde(default = "default_level")]
    pub level: String,
}

fn default_level() -> String {
    "INFO".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig { enable: false, file: None, level: default_level() }
    }
}

/// Verdict cache limits.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    #[serde(default = "default_cache_entries")]
    pub max_entries: usize,
    #[serde(default = "default_cache_ttl")]
    pub ttl_seconds: u64,
    /// Override for the SQLite file; defaults to the per-user data dir.
    #[serde(default)]
    pub db_path: Option<PathBuf>,
}

fn default_cache_entries() -> usize {
    1024
}
fn default_cache_ttl() -> u64 {
    3600
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            max_entries: default_cache_entries(),
            ttl_seconds: default_cache_ttl(),
            db_path: None,
        }
    }
}

/// Adaptive I/O thresholds and chunking.
#[derive(Debug, Clone, Deserialize)]
pub struct IoSection {
    #[serde(default = "default_small_threshold")]
    pub small_threshold: u64,
    #[serde(default = "default_large_threshold")]
    pub large_threshold: u64,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Raised to 2x chunk_size at construction when set lower.
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    #[serde(default = "default_max_concurrent_ops")]
    pub max_concurrent_ops: usize,
}

fn default_small_threshold() -> u64 {
    1024 * 1024 // 1 MiB
}
fn default_large_threshold() -> u64 {
    100 * 1024 * 1024 // 100 MiB
}
fn default_chunk_size() -> usize {
    256 * 1024
}
fn default_buffer_size() -> usize {
    512 * 1024
}
fn default_max_concurrent_ops() -> usize {
    20
}

impl Default for IoSection {
    fn default() -> Self {
        IoSection {
            small_threshold: default_small_threshold(),
            large_threshold: default_large_threshold(),
            chunk_size: default_chunk_size(),
            buffer_size: default_buffer_size(),
            max_concurrent_ops: default_max_concurrent_ops(),
        }
    }
}

/// Worker pool bounds. `min`/`max` of zero mean "derive from CPU count".
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkerConfig {
    #[serde(default)]
    pub min: usize,
    #[serde(default)]
    pub max: usize,
    #[serde(default = "default_adjust_interval")]
    pub interval_seconds: u64,
}

fn default_adjust_interval() -> u64 {
    5
}

/// Enumeration and scheduling limits for a scan.
#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    #[serde(default = "default_memory_mb")]
    pub memory_mb: u64,
    #[serde(default)]
    pub depth: Option<usize>,
    #[serde(default)]
    pub exclusions: Vec<String>,
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub include_hidden: bool,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    /// Per-file detection timeout.
    #[serde(default = "default_file_timeout")]
    pub file_timeout_seconds: u64,
    /// Directories scanned by the service when none are given on the command line.
    #[serde(default)]
    pub targets: Vec<PathBuf>,
}

fn default_batch_size() -> usize {
    50
}
fn default_max_files() -> usize {
    10_000
}
fn default_memory_mb() -> u64 {
    256
}
fn default_filter() -> String {
    "all".into()
}
fn default_file_timeout() -> u64 {
    300
}

impl Default for ScanConfig {
    fn default() -> Self {
        ScanConfig {
            batch_size: default_batch_size(),
            max_files: default_max_files(),
            memory_mb: default_memory_mb(),
            depth: None,
            exclusions: Vec::new(),
            filter: default_filter(),
            include_hidden: false,
            timeout_seconds: None,
            file_timeout_seconds: default_file_timeout(),
            targets: Vec::new(),
        }
    }
}

/// Quarantine policy.
#[derive(Debug, Clone, Deserialize)]
pub struct QuarantineConfig {
    #[serde(default)]
    pub auto_quarantine: bool,
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,
    /// Override for the quarantine root; defaults to the per-user data dir.
    #[serde(default)]
    pub dir: Option<PathBuf>,
}

fn default_retention_days() -> u64 {
    30
}

impl Default for QuarantineConfig {
    fn default() -> Self {
        QuarantineConfig {
            auto_quarantine: false,
            retention_days: default_retention_days(),
            dir: None,
        }
    }
}

/// Signature database update policy.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureConfig {
    #[serde(default = "default_auto_update")]
    pub auto_update: bool,
    /// "daily", "weekly", or "monthly"; consumed by the outer scheduler.
    #[serde(default = "default_update_frequency")]
    pub update_frequency: String,
    /// Scanner binary; located on PATH when not absolute.
    #[serde(default = "default_scanner")]
    pub scanner: String,
    #[serde(default = "default_updater")]
    pub updater: String,
    /// Privileged helper for updates that need root.
    #[serde(default)]
    pub helper: Option<String>,
    /// Fallback database directory writable without privileges.
    #[serde(default)]
    pub custom_db_dir: Option<PathBuf>,
}

fn default_auto_update() -> bool {
    true
}
fn default_update_frequency() -> String {
    "daily".into()
}
fn default_scanner() -> String {
    "clamscan".into()
}
fn default_updater() -> String {
    "freshclam".into()
}

impl Default for SignatureConfig {
    fn default() -> Self {
        SignatureConfig {
            auto_update: default_auto_update(),
            update_frequency: default_update_frequency(),
            scanner: default_scanner(),
            updater: default_updater(),
            helper: None,
            custom_db_dir: None,
        }
    }
}

/// One `[rate_limits.<class>]` table; omitted fields keep the built-in class
/// defaults.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitOverride {
    pub calls: u32,
    pub period: f64,
    #[serde(default)]
    pub burst: Option<u32>,
    #[serde(default)]
    pub adaptive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MasterConfig {
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub io: IoSection,
    #[serde(default)]
    pub workers: WorkerConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub quarantine: QuarantineConfig,
    #[serde(default)]
    pub signatures: SignatureConfig,
    #[serde(default)]
    pub rate_limits: HashMap<String, RateLimitOverride>,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}
