// src/main.rs

//! Service entry-point for the scanning daemon.
//!
//! 1. Parse configuration & set up structured logging
//! 2. Install the metrics recorder
//! 3. Wire up cache, quarantine, I/O, rate limits, pool, and detection
//! 4. Scan the requested targets, streaming results to the log
//! 5. Ctrl-C cancels the active scan and exits cleanly

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Local;
use fern::Dispatch;
use log::LevelFilter;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::runtime::Runtime;

use vigil::config::{self, MasterConfig};
use vigil::detect::{ClamAvEngine, DetectionEngine};
use vigil::engine::{EngineConfig, ScanEngine, ScanProgress, ScanRequest, ScanSubscriber};
use vigil::pool::AdaptiveWorkerPool;
use vigil::ratelimit::RateLimitManager;
use vigil::{FileResult, IoConfig, IoManager, QuarantineStore, SystemMonitor, Verdict, VerdictCache};

fn setup_logging(cfg: &MasterConfig) -> Result<(), fern::InitError> {
    let level = match cfg.logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };
    let log_path = cfg
        .logging
        .enable
        .then(|| config::data_dir().join("logs").join(cfg.logging.file.as_deref().unwrap_or("vigild.log")));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                std::process::id(),
                std::thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Logs results and final snapshots; the service's only UI.
struct ConsoleSubscriber;

impl ScanSubscriber for ConsoleSubscriber {
    fn on_progress(&self, snapshot: &ScanProgress) {
        log::debug!(
            "progress: {:.1}% ({}/{}) status={:?}",
            snapshot.percent_complete(),
            snapshot.completed_files,
            snapshot.total_files,
            snapshot.status
        );
    }

    fn on_result(&self, result: &FileResult) {
        match &result.verdict {
            Verdict::Infected { name, family } => log::warn!(
                "INFECTED {:?}: {} [{}] quarantine={:?}",
                result.path,
                name,
                family,
                result.quarantine_id
            ),
            Verdict::Error { kind, message } => {
                log::debug!("error {:?}: {} ({})", result.path, message, kind)
            }
            _ => {}
        }
    }
}

fn main() -> anyhow::Result<()> {
    // First positional arg overrides the config path; the rest are targets.
    let mut args = std::env::args().skip(1);
    let config_path = args
        .next()
        .map(PathBuf::from)
        .unwrap_or_else(config::default_config_path);
    let cli_targets: Vec<PathBuf> = args.map(PathBuf::from).collect();

    let cfg = config::load_or_default(&config_path).context("loading configuration")?;
    setup_logging(&cfg).expect("Logging setup failed");
    log::info!("vigild starting (config: {:?})", config_path);

    let _recorder = PrometheusBuilder::new().install();

    let rt = Runtime::new().context("Tokio runtime failed")?;
    rt.block_on(run_service(cfg, cli_targets))
}

async fn run_service(cfg: MasterConfig, cli_targets: Vec<PathBuf>) -> anyhow::Result<()> {
    let monitor = Arc::new(SystemMonitor::new());

    // Detection backend first: its signature version keys the cache.
    let scan_timeout = Duration::from_secs(cfg.scan.file_timeout_seconds);
    let detector: Arc<dyn DetectionEngine> =
        Arc::new(ClamAvEngine::new(&cfg.signatures, scan_timeout));
    let (engine_version, signature_version) = detector.engine_version().await;
    log::info!("Detection backend: {} (signatures {})", engine_version, signature_version);

    let cache = Arc::new(VerdictCache::new(
        cfg.cache.max_entries,
        cfg.cache.ttl_seconds,
        signature_version,
        config::cache_db_path(&cfg),
    ));
    {
        let cache = Arc::clone(&cache);
        tokio::task::spawn_blocking(move || cache.load_or_recover()).await?;
    }

    let quarantine_root = config::quarantine_dir(&cfg);
    let quarantine = {
        let root = quarantine_root.clone();
        Arc::new(
            tokio::task::spawn_blocking(move || QuarantineStore::open(&root))
                .await?
                .context("opening quarantine store")?,
        )
    };
    if cfg.quarantine.retention_days > 0 {
        let store = Arc::clone(&quarantine);
        let days = cfg.quarantine.retention_days;
        tokio::task::spawn_blocking(move || store.cleanup_older_than(days)).await??;
    }

    let limits = {
        let monitor = Arc::clone(&monitor);
        let limits = Arc::new(RateLimitManager::with_defaults(Arc::new(move || {
            monitor.load_fraction()
        })));
        limits.apply_overrides(&cfg.rate_limits);
        limits
    };

    let io = Arc::new(IoManager::new(
        IoConfig::from_section(&cfg.io).map_err(|e| anyhow::anyhow!(e))?,
    ));
    let pool = Arc::new(AdaptiveWorkerPool::new(
        cfg.workers.min,
        cfg.workers.max,
        Duration::from_secs(cfg.workers.interval_seconds),
        Arc::clone(&monitor),
    ));

    if cfg.signatures.auto_update && limits.acquire("signature_update", 1) {
        if detector.update_signatures().await {
            log::info!("Signature database is current");
        } else {
            log::warn!("Signature database update failed; continuing with current rules");
        }
    }

    if !detector.is_available().await {
        anyhow::bail!("detection backend unavailable; refusing to start");
    }

    let engine = ScanEngine::new(
        EngineConfig::from_master(&cfg),
        cache,
        io,
        quarantine,
        limits,
        pool,
        detector,
        monitor,
    );
    engine.subscribe(Arc::new(ConsoleSubscriber));

    let targets = if cli_targets.is_empty() { cfg.scan.targets.clone() } else { cli_targets };
    if targets.is_empty() {
        log::info!("No scan targets configured; exiting");
        return Ok(());
    }

    for target in targets {
        let scan_started = std::time::Instant::now();
        let scan_id = engine.start(ScanRequest::new(&target));
        log::info!("Dispatched {} for {:?}", scan_id, target);

        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    log::warn!("Interrupt received; cancelling {}", scan_id);
                    engine.cancel(&scan_id);
                }
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
            match engine.progress(&scan_id) {
                Some(progress) if progress.status.is_terminal() => {
                    let elapsed = std::time::Duration::from_secs(scan_started.elapsed().as_secs());
                    log::info!(
                        "{} finished: {:?} in {} - {}/{} files, {} infected, {} errors, {} bytes",
                        scan_id,
                        progress.status,
                        humantime::format_duration(elapsed),
                        progress.completed_files,
                        progress.total_files,
                        progress.infected_files,
                        progress.error_files,
                        progress.bytes_scanned
                    );
                    break;
                }
                Some(_) => {}
                None => break,
            }
        }
    }

    let stats = engine.cache().statistics();
    log::info!(
        "Cache: {} entries, {:.1}% hit rate ({} hits / {} misses)",
        stats.entries,
        stats.hit_rate_percent,
        stats.hits,
        stats.misses
    );
    log::info!("vigild stopped cleanly");
    Ok(())
}
