// src/engine/mod.rs

//! Scan engine: walks targets, schedules per-file tasks by priority, and
//! drives each file through rate limiting, cache lookup, triage, I/O,
//! detection, caching, and quarantine.
//!
//! The engine owns the progress record and the task set for every scan it
//! starts. Cancellation is cooperative: a flagged scan stops dequeuing,
//! pending tasks are dropped without touching the detection backend, and
//! active tasks finish their current stage before exiting through scoped
//! releases.

pub mod enumerate;
pub mod progress;
pub mod task;

use std::collections::{BinaryHeap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::Level;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;

use crate::cache::VerdictCache;
use crate::config::MasterConfig;
use crate::detect::{DetectionEngine, Verdict};
use crate::error::{ScanError, ScanErrorKind};
use crate::fio::IoManager;
use crate::hash;
use crate::pool::AdaptiveWorkerPool;
use crate::quarantine::QuarantineStore;
use crate::ratelimit::{RateLimitManager, ScanContext};
use crate::sysmon::SystemMonitor;
use crate::vigil_log;

pub use enumerate::FileKindFilter;
pub use progress::{Notifier, ScanProgress, ScanStatus, ScanSubscriber};
pub use task::{FileResult, FileTask, Priority};

/// Results channel depth per scan; unclaimed results beyond this are dropped
/// (subscribers still see every result).
const RESULT_CHANNEL_DEPTH: usize = 1024;

/// How often the pause gate re-checks for resume or cancel.
const PAUSE_POLL: Duration = Duration::from_millis(50);

/// The category of scan being performed; affects defaults, not the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScanProfile {
    Quick,
    Full,
    #[default]
    Custom,
}

/// A caller's request to scan a file or directory tree.
#[derive(Debug, Clone)]
pub struct ScanRequest {
    pub target: PathBuf,
    pub profile: ScanProfile,
    pub context: ScanContext,
    pub exclusions: Vec<String>,
    pub include_hidden: bool,
    /// Walk depth cap; `None` uses the configured default.
    pub depth: Option<usize>,
    pub filter: FileKindFilter,
    /// Cap on collected files; `None` uses the configured default.
    pub max_files: Option<usize>,
    /// Wall-clock budget for the whole scan.
    pub timeout: Option<Duration>,
    /// `None` follows the `[quarantine] auto_quarantine` setting.
    pub auto_quarantine: Option<bool>,
    pub allow_symlinks: bool,
    /// Force every task to one priority instead of per-file assignment.
    pub priority: Option<Priority>,
}

impl ScanRequest {
    pub fn new(target: impl Into<PathBuf>) -> Self {
        ScanRequest {
            target: target.into(),
            profile: ScanProfile::Custom,
            context: ScanContext::User,
            exclusions: Vec::new(),
            include_hidden: false,
            depth: None,
            filter: FileKindFilter::All,
            max_files: None,
            timeout: None,
            auto_quarantine: None,
            allow_symlinks: false,
            priority: None,
        }
    }
}

/// Engine-wide defaults resolved from the master config.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub batch_size: usize,
    pub max_files: usize,
    pub memory_budget_mb: u64,
    pub file_timeout: Duration,
    pub scan_timeout: Option<Duration>,
    pub default_depth: Option<usize>,
    pub default_exclusions: Vec<String>,
    pub default_filter: FileKindFilter,
    pub include_hidden: bool,
    pub auto_quarantine: bool,
}

impl EngineConfig {
    pub fn from_master(cfg: &MasterConfig) -> Self {
        EngineConfig {
            batch_size: cfg.scan.batch_size.max(1),
            max_files: cfg.scan.max_files,
            memory_budget_mb: cfg.scan.memory_mb,
            file_timeout: Duration::from_secs(cfg.scan.file_timeout_seconds),
            scan_timeout: cfg.scan.timeout_seconds.map(Duration::from_secs),
            default_depth: cfg.scan.depth,
            default_exclusions: cfg.scan.exclusions.clone(),
            default_filter: FileKindFilter::parse(&cfg.scan.filter),
            include_hidden: cfg.scan.include_hidden,
            auto_quarantine: cfg.quarantine.auto_quarantine,
        }
    }
}

/// Live state of one scan, shared between the engine and its driver task.
pub struct ScanHandle {
    pub id: String,
    cancelled: Arc<AtomicBool>,
    paused: AtomicBool,
    progress: Mutex<ScanProgress>,
    results_rx: Mutex<Option<mpsc::Receiver<FileResult>>>,
}

impl ScanHandle {
    fn new(id: String, rx: mpsc::Receiver<FileResult>) -> Self {
        ScanHandle {
            id,
            cancelled: Arc::new(AtomicBool::new(false)),
            paused: AtomicBool::new(false),
            progress: Mutex::new(ScanProgress::new()),
            results_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn cancel(&self, reason: &str) {
        if self.cancelled.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut progress = self.progress.lock().unwrap();
        if progress.reason.is_none() {
            progress.reason = Some(reason.to_string());
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    pub fn progress(&self) -> ScanProgress {
        self.progress.lock().unwrap().clone()
    }
}

struct PipelineOptions {
    context: ScanContext,
    allow_symlinks: bool,
    auto_quarantine: bool,
    file_timeout: Duration,
    /// Checked between pipeline stages; an active task finishes its current
    /// I/O but does not submit further work once this flips.
    cancel: Option<Arc<AtomicBool>>,
}

impl PipelineOptions {
    fn cancelled(&self) -> bool {
        self.cancel.as_ref().map(|flag| flag.load(Ordering::SeqCst)).unwrap_or(false)
    }
}

pub struct ScanEngine {
    cfg: EngineConfig,
    cache: Arc<VerdictCache>,
    io: Arc<IoManager>,
    quarantine: Arc<QuarantineStore>,
    limits: Arc<RateLimitManager>,
    pool: Arc<AdaptiveWorkerPool>,
    detector: Arc<dyn DetectionEngine>,
    monitor: Arc<SystemMonitor>,
    notifier: Notifier,
    scans: Mutex<HashMap<String, Arc<ScanHandle>>>,
    scan_seq: AtomicU64,
}

impl ScanEngine {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: EngineConfig,
        cache: Arc<VerdictCache>,
        io: Arc<IoManager>,
        quarantine: Arc<QuarantineStore>,
        limits: Arc<RateLimitManager>,
        pool: Arc<AdaptiveWorkerPool>,
        detector: Arc<dyn DetectionEngine>,
        monitor: Arc<SystemMonitor>,
    ) -> Arc<Self> {
        Arc::new(ScanEngine {
            cfg,
            cache,
            io,
            quarantine,
            limits,
            pool,
            detector,
            monitor,
            notifier: Notifier::new(),
            scans: Mutex::new(HashMap::new()),
            scan_seq: AtomicU64::new(0),
        })
    }

    pub fn cache(&self) -> &Arc<VerdictCache> {
        &self.cache
    }

    pub fn quarantine_store(&self) -> &Arc<QuarantineStore> {
        &self.quarantine
    }

    pub fn io_manager(&self) -> &Arc<IoManager> {
        &self.io
    }

    pub fn worker_pool(&self) -> &Arc<AdaptiveWorkerPool> {
        &self.pool
    }

    pub fn detector(&self) -> &Arc<dyn DetectionEngine> {
        &self.detector
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ScanSubscriber>) {
        self.notifier.subscribe(subscriber);
    }

    /// Start a scan; returns its id immediately. Progress arrives through
    /// subscribers, `progress(id)`, and `stream_results(id)`.
    pub fn start(self: &Arc<Self>, request: ScanRequest) -> String {
        let seq = self.scan_seq.fetch_add(1, Ordering::Relaxed);
        let id = format!("scan_{}_{:04}", chrono::Utc::now().timestamp(), seq);
        let (tx, rx) = mpsc::channel(RESULT_CHANNEL_DEPTH);
        let handle = Arc::new(ScanHandle::new(id.clone(), rx));

        self.scans.lock().unwrap().insert(id.clone(), Arc::clone(&handle));
        vigil_log!(Level::Info, "engine", "Scan {} started for {:?}", id, request.target);

        let engine = Arc::clone(self);
        tokio::spawn(async move {
            engine.run_scan(handle, request, tx).await;
        });
        id
    }

    pub fn cancel(&self, scan_id: &str) -> bool {
        match self.handle(scan_id) {
            Some(handle) => {
                handle.cancel("user");
                vigil_log!(Level::Info, "engine", "Scan {} cancellation requested", scan_id);
                true
            }
            None => false,
        }
    }

    pub fn pause(&self, scan_id: &str) -> bool {
        match self.handle(scan_id) {
            Some(handle) if !handle.progress().status.is_terminal() => {
                handle.paused.store(true, Ordering::SeqCst);
                true
            }
            _ => false,
        }
    }

    pub fn resume(&self, scan_id: &str) -> bool {
        match self.handle(scan_id) {
            Some(handle) => {
                handle.paused.store(false, Ordering::SeqCst);
                true
            }
            None => false,
        }
    }

    pub fn progress(&self, scan_id: &str) -> Option<ScanProgress> {
        self.handle(scan_id).map(|h| h.progress())
    }

    /// Claim the result stream for a scan. Each scan's stream can be taken
    /// once; results beyond the buffer are dropped if nobody reads them.
    pub fn stream_results(&self, scan_id: &str) -> Option<ReceiverStream<FileResult>> {
        let handle = self.handle(scan_id)?;
        let rx = handle.results_rx.lock().unwrap().take()?;
        Some(ReceiverStream::new(rx))
    }

    /// Scan one file synchronously with user-context limits; the convenience
    /// path around `start` for single-file callers.
    pub async fn scan_file(&self, path: &Path) -> FileResult {
        let opts = PipelineOptions {
            context: ScanContext::User,
            allow_symlinks: false,
            auto_quarantine: self.cfg.auto_quarantine,
            file_timeout: self.cfg.file_timeout,
            cancel: None,
        };
        self.scan_path(path, &opts).await
    }

    fn handle(&self, scan_id: &str) -> Option<Arc<ScanHandle>> {
        self.scans.lock().unwrap().get(scan_id).cloned()
    }

    fn set_status(&self, handle: &ScanHandle, status: ScanStatus, force_emit: bool) {
        let snapshot = {
            let mut progress = handle.progress.lock().unwrap();
            if progress.status.is_terminal() {
                return;
            }
            progress.status = status;
            progress.clone()
        };
        self.notifier.emit_progress(&snapshot, force_emit);
    }

    fn memory_pressured(&self) -> bool {
        let rss = self.monitor.process_rss_mb();
        rss > self.cfg.memory_budget_mb as f64 * 0.8
    }

    async fn run_scan(
        self: Arc<Self>,
        handle: Arc<ScanHandle>,
        request: ScanRequest,
        tx: mpsc::Sender<FileResult>,
    ) {
        let deadline = request
            .timeout
            .or(self.cfg.scan_timeout)
            .map(|t| Instant::now() + t);

        self.set_status(&handle, ScanStatus::Initializing, true);

        let files = match self.collect_files(&handle, &request).await {
            Ok(files) => files,
            Err(message) => {
                let snapshot = {
                    let mut progress = handle.progress.lock().unwrap();
                    progress.status = ScanStatus::Error;
                    progress.reason = Some(message.clone());
                    progress.clone()
                };
                log::error!("Scan {} failed during enumeration: {}", handle.id, message);
                self.notifier.emit_progress(&snapshot, true);
                return;
            }
        };

        if handle.is_cancelled() {
            self.finalize(&handle, ScanStatus::Cancelled).await;
            return;
        }

        {
            let mut progress = handle.progress.lock().unwrap();
            progress.total_files = files.len() as u64;
            progress.status = ScanStatus::Scanning;
        }
        self.notifier.emit_progress(&handle.progress(), true);

        let mut heap = BinaryHeap::with_capacity(files.len());
        for (seq, path) in files.into_iter().enumerate() {
            let priority = request.priority.unwrap_or_else(|| enumerate::assign_priority(&path));
            heap.push(FileTask::new(path, priority, seq as u64));
        }

        let remaining = Arc::new(AtomicUsize::new(heap.len()));
        let opts = Arc::new(PipelineOptions {
            context: request.context,
            allow_symlinks: request.allow_symlinks,
            auto_quarantine: request.auto_quarantine.unwrap_or(self.cfg.auto_quarantine),
            file_timeout: self.cfg.file_timeout,
            cancel: Some(Arc::clone(&handle.cancelled)),
        });

        let mut batch_size = self.cfg.batch_size;
        while !heap.is_empty() {
            self.wait_if_paused(&handle).await;
            if let Some(deadline) = deadline {
                if Instant::now() >= deadline {
                    handle.cancel("timeout");
                }
            }
            if handle.is_cancelled() {
                break;
            }

            let mut join = JoinSet::new();
            for _ in 0..batch_size {
                let Some(file_task) = heap.pop() else { break };
                let engine = Arc::clone(&self);
                let handle = Arc::clone(&handle);
                let tx = tx.clone();
                let opts = Arc::clone(&opts);
                let remaining = Arc::clone(&remaining);

                join.spawn(async move {
                    // Dropped without side effects once the scan is cancelled.
                    if handle.is_cancelled() {
                        remaining.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }
                    let permit = engine.pool.acquire().await;
                    if handle.is_cancelled() {
                        remaining.fetch_sub(1, Ordering::SeqCst);
                        return;
                    }

                    let started = Instant::now();
                    let result = engine.scan_path(&file_task.path, &opts).await;
                    drop(permit);
                    let queue_depth = remaining.fetch_sub(1, Ordering::SeqCst).saturating_sub(1);

                    if matches!(
                        result.verdict,
                        Verdict::Error { kind: ScanErrorKind::Cancelled, .. }
                    ) {
                        return;
                    }

                    engine.pool.record_task_time(started.elapsed());
                    engine.finish_file(&handle, &tx, result);
                    engine.pool.adjust_if_due(queue_depth);
                });
            }

            while join.join_next().await.is_some() {}

            // Let buffers from the finished batch drain before the next one,
            // and back off while over the memory budget.
            tokio::task::yield_now().await;
            let mut backoff = 0;
            while self.memory_pressured() && backoff < 10 && !handle.is_cancelled() {
                if backoff == 0 {
                    log::warn!("Memory pressure detected; shrinking batch size");
                    batch_size = (batch_size / 2).max(1);
                }
                tokio::time::sleep(Duration::from_millis(100)).await;
                backoff += 1;
            }
        }

        let final_status =
            if handle.is_cancelled() { ScanStatus::Cancelled } else { ScanStatus::Completed };
        self.finalize(&handle, final_status).await;
    }

    async fn collect_files(
        &self,
        handle: &Arc<ScanHandle>,
        request: &ScanRequest,
    ) -> Result<Vec<PathBuf>, String> {
        let target = request.target.clone();
        let meta = tokio::fs::metadata(&target)
            .await
            .map_err(|e| format!("target {:?}: {}", target, e))?;

        if meta.is_file() {
            return Ok(vec![target]);
        }
        if !meta.is_dir() {
            return Err(format!("target {:?} is not a file or directory", target));
        }

        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_probe = Arc::clone(&cancel);
        let handle_probe = Arc::clone(handle);

        // Mirror the handle's flag into a plain bool the blocking walker can
        // poll without touching the async handle.
        let prober = tokio::spawn(async move {
            while !cancel_probe.load(Ordering::Relaxed) {
                if handle_probe.is_cancelled() {
                    cancel_probe.store(true, Ordering::Relaxed);
                    break;
                }
                tokio::time::sleep(Duration::from_millis(50)).await;
            }
        });

        let exclusions = if request.exclusions.is_empty() {
            self.cfg.default_exclusions.clone()
        } else {
            request.exclusions.clone()
        };
        let opts = enumerate::EnumerateOptions {
            depth: request.depth.or(self.cfg.default_depth),
            include_hidden: request.include_hidden || self.cfg.include_hidden,
            filter: if request.filter != FileKindFilter::All {
                request.filter
            } else if request.profile == ScanProfile::Quick {
                // Quick scans triage the likeliest carriers only.
                FileKindFilter::Executables
            } else {
                self.cfg.default_filter
            },
            exclusions: enumerate::build_exclusions(&exclusions),
            max_files: request.max_files.unwrap_or(self.cfg.max_files),
            cancel: Arc::clone(&cancel),
            memory_pressured: Some({
                let monitor = Arc::clone(&self.monitor);
                let budget = self.cfg.memory_budget_mb;
                Box::new(move || monitor.process_rss_mb() > budget as f64 * 0.8)
            }),
        };

        let files = tokio::task::spawn_blocking(move || enumerate::enumerate(&target, &opts))
            .await
            .map_err(|e| e.to_string())?;

        cancel.store(true, Ordering::Relaxed);
        let _ = prober.await;
        Ok(files)
    }

    async fn wait_if_paused(&self, handle: &Arc<ScanHandle>) {
        if !handle.paused.load(Ordering::SeqCst) {
            return;
        }
        self.set_status(handle, ScanStatus::Paused, true);
        vigil_log!(Level::Info, "engine", "Scan {} paused", handle.id);
        while handle.paused.load(Ordering::SeqCst) && !handle.is_cancelled() {
            tokio::time::sleep(PAUSE_POLL).await;
        }
        if !handle.is_cancelled() {
            self.set_status(handle, ScanStatus::Scanning, true);
            vigil_log!(Level::Info, "engine", "Scan {} resumed", handle.id);
        }
    }

    /// Record a finished file: counters, subscribers, and the result stream.
    fn finish_file(&self, handle: &Arc<ScanHandle>, tx: &mpsc::Sender<FileResult>, result: FileResult) {
        let snapshot = {
            let mut progress = handle.progress.lock().unwrap();
            progress.completed_files += 1;
            match &result.verdict {
                Verdict::Infected { .. } => progress.infected_files += 1,
                Verdict::Error { .. } | Verdict::Timeout => progress.error_files += 1,
                Verdict::Clean => {}
            }
            if !result.from_cache {
                progress.bytes_scanned += result.file_size;
            }
            if let Some(name) = result.path.file_name() {
                progress.current_file =
                    Some(progress::truncate_for_display(&name.to_string_lossy()));
            }
            progress.clone()
        };

        counter!("scan_files_total").increment(1);
        if result.verdict.is_infected() {
            counter!("scan_infected_total").increment(1);
        }

        self.notifier.emit_result(&result);
        self.notifier.emit_progress(&snapshot, false);
        // Stream consumers that fall behind lose oldest-first delivery, not
        // the subscribers above.
        let _ = tx.try_send(result);
    }

    async fn finalize(&self, handle: &Arc<ScanHandle>, status: ScanStatus) {
        let snapshot = {
            let mut progress = handle.progress.lock().unwrap();
            if !progress.status.is_terminal() {
                progress.status = status;
            }
            progress.current_file = None;
            progress.clone()
        };
        self.notifier.emit_progress(&snapshot, true);

        vigil_log!(
            Level::Info,
            "engine",
            "Scan {} finished: {:?}, {}/{} files, {} infected, {} errors",
            handle.id,
            snapshot.status,
            snapshot.completed_files,
            snapshot.total_files,
            snapshot.infected_files,
            snapshot.error_files
        );

        if snapshot.status == ScanStatus::Completed {
            let cache = Arc::clone(&self.cache);
            let persisted = tokio::task::spawn_blocking(move || cache.persist()).await;
            match persisted {
                Ok(Ok(n)) => log::debug!("Cache persisted ({} entries)", n),
                Ok(Err(e)) => log::warn!("Cache persist failed: {}", e),
                Err(e) => log::warn!("Cache persist task failed: {}", e),
            }
        }
    }

    /// Pre-scan triage: resolve the path to the metadata the rest of the
    /// pipeline may trust. For an allowed symlink the size and permission
    /// checks apply to the link target, so the path is re-stat'ed through
    /// the link; `lstat` reports the link's own mode (0777 on Linux) and
    /// inode size, neither of which describes what gets scanned.
    fn triage(path: &Path, allow_symlinks: bool) -> Result<std::fs::Metadata, ScanError> {
        let stat_err = |e: std::io::Error| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ScanError::NotFound(path.display().to_string())
            } else {
                ScanError::Io(e)
            }
        };

        let lmeta = std::fs::symlink_metadata(path).map_err(stat_err)?;

        let meta = if lmeta.file_type().is_symlink() {
            if !allow_symlinks {
                return Err(ScanError::Policy("symlink not allowed".into()));
            }
            std::fs::metadata(path).map_err(stat_err)?
        } else {
            lmeta
        };

        if !meta.is_file() {
            return Err(ScanError::Policy("not a regular file".into()));
        }

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if meta.permissions().mode() & 0o002 != 0 {
                return Err(ScanError::Policy("world-writable file blocked".into()));
            }
        }

        Ok(meta)
    }

    /// The per-file pipeline. Every stage checks nothing more expensive than
    /// it must: rate limit, cache, triage, read, detect, cache store,
    /// quarantine.
    async fn scan_path(&self, path: &Path, opts: &PipelineOptions) -> FileResult {
        let started = Instant::now();
        let mut result = FileResult::new(path.to_path_buf(), Verdict::Clean);

        // 1. Rate limit for this scan context.
        let class = RateLimitManager::map_class("file_scan", opts.context);
        if !self.limits.acquire(&class, 1) {
            counter!("scan_rate_limited_total").increment(1);
            result.verdict = ScanError::RateLimited(self.limits.wait_time(&class)).into();
            result.scan_time = started.elapsed();
            return result;
        }

        // 2. Cache lookup against the file's current contents.
        if let Some(entry) = self.cache.get(path) {
            result.verdict = entry.verdict;
            result.file_size = entry.file_size;
            result.from_cache = true;
            result.scan_time = started.elapsed();
            return result;
        }

        // 3. Pre-scan triage.
        let meta = match Self::triage(path, opts.allow_symlinks) {
            Ok(meta) => meta,
            Err(e) => {
                result.verdict = e.into();
                result.scan_time = started.elapsed();
                return result;
            }
        };

        result.file_size = meta.len();
        if meta.len() == 0 {
            // Nothing to submit; empty files are clean by definition.
            result.scan_time = started.elapsed();
            return result;
        }

        // 4 + 5. Read and detect under the per-file budget. Cancellation is
        // re-checked between the read and the backend submission.
        let outcome = tokio::time::timeout(opts.file_timeout, async {
            let bytes = self.io.read_whole(path).await?;
            if opts.cancelled() {
                return Ok::<(Vec<u8>, Verdict), std::io::Error>((
                    Vec::new(),
                    ScanError::Cancelled.into(),
                ));
            }
            let verdict = self.detector.scan_bytes(&bytes, path).await;
            Ok((bytes, verdict))
        })
        .await;

        let (digest, verdict) = match outcome {
            Err(_) => (None, ScanError::Timeout(opts.file_timeout).into()),
            Ok(Err(e)) => {
                let err = if e.kind() == std::io::ErrorKind::NotFound {
                    ScanError::NotFound(path.display().to_string())
                } else {
                    ScanError::Io(e)
                };
                (None, err.into())
            }
            Ok(Ok((bytes, verdict))) => {
                let digest = if verdict.is_clean() || verdict.is_infected() {
                    tokio::task::spawn_blocking(move || hash::sha256_hex(&bytes)).await.ok()
                } else {
                    None
                };
                (digest, verdict)
            }
        };
        result.verdict = verdict;

        // 6. Cache definitive verdicts; transient failures are not worth a slot.
        if result.verdict.is_clean() || result.verdict.is_infected() {
            self.cache.put(path, result.verdict.clone(), self.detector.name(), digest.as_deref());
        }

        // 7. Quarantine infected files when configured.
        if opts.auto_quarantine {
            if let Verdict::Infected { name, .. } = &result.verdict {
                let store = Arc::clone(&self.quarantine);
                let q_path = path.to_path_buf();
                let threat = name.clone();
                if self.limits.acquire("quarantine_action", 1) {
                    let moved =
                        tokio::task::spawn_blocking(move || store.quarantine(&q_path, &threat))
                            .await;
                    match moved {
                        Ok(Ok(id)) => result.quarantine_id = Some(id),
                        Ok(Err(e)) => {
                            log::error!("Failed to quarantine {:?}: {}", path, e);
                            result.quarantine_error = Some(e.to_string());
                        }
                        Err(e) => result.quarantine_error = Some(e.to_string()),
                    }
                } else {
                    result.quarantine_error = Some("quarantine action rate limited".into());
                }
            }
        }

        result.scan_time = started.elapsed();
        result
    }
}
