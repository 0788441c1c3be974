// tests/engine_tests.rs

//! End-to-end scans against a scripted detection backend: clean files,
//! infections with auto-quarantine, cache hits, signature bumps, zero-byte
//! skips, and cancellation.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;

use vigil::detect::{DetectionEngine, Verdict};
use vigil::engine::{EngineConfig, ScanEngine, ScanRequest, ScanStatus};
use vigil::pool::AdaptiveWorkerPool;
use vigil::ratelimit::RateLimitManager;
use vigil::sysmon::SystemSample;
use vigil::{IoConfig, IoManager, QuarantineStore, SystemMonitor, VerdictCache};

const EICAR_MARKER: &[u8] = b"EICAR-STANDARD-ANTIVIRUS-TEST-FILE";

/// Backend that flags the EICAR marker, counts invocations, and can be
/// slowed down to exercise cancellation.
struct ScriptedEngine {
    invocations: AtomicUsize,
    delay: Duration,
}

impl ScriptedEngine {
    fn new() -> Arc<Self> {
        Arc::new(ScriptedEngine { invocations: AtomicUsize::new(0), delay: Duration::ZERO })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(ScriptedEngine { invocations: AtomicUsize::new(0), delay })
    }

    fn calls(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DetectionEngine for ScriptedEngine {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn engine_version(&self) -> (String, String) {
        ("scripted 1.0".into(), "27000".into())
    }

    async fn scan_bytes(&self, data: &[u8], _path_hint: &Path) -> Verdict {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if data.windows(EICAR_MARKER.len()).any(|w| w == EICAR_MARKER) {
            Verdict::infected("Test.EICAR")
        } else {
            Verdict::Clean
        }
    }

    async fn update_signatures(&self) -> bool {
        true
    }
}


/// Write a file with owner-only write permission so the world-writable
/// triage policy never trips regardless of the test environment's umask.
fn put_file(path: &Path, contents: &[u8]) {
    fs::write(path, contents).unwrap();
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(0o644)).unwrap();
    }
}

struct Fixture {
    _dir: TempDir,
    root: PathBuf,
    engine: Arc<ScanEngine>,
    detector: Arc<ScriptedEngine>,
}

fn fixture_with(detector: Arc<ScriptedEngine>, auto_quarantine: bool) -> Fixture {
    let dir = TempDir::new().unwrap();
    let root = dir.path().join("scanroot");
    fs::create_dir_all(&root).unwrap();

    let monitor = Arc::new(SystemMonitor::new());
    let cache = Arc::new(VerdictCache::new(
        1024,
        3600,
        "27000",
        dir.path().join("cache/verdict_cache.db"),
    ));
    let quarantine = Arc::new(QuarantineStore::open(&dir.path().join("quarantine")).unwrap());
    let limits = Arc::new(RateLimitManager::with_defaults(Arc::new(|| 0.0)));
    let io = Arc::new(IoManager::new(IoConfig::default()));
    let pool = Arc::new(AdaptiveWorkerPool::with_sampler(
        4,
        8,
        Duration::from_secs(5),
        Box::new(|| SystemSample { cpu_percent: 20.0, memory_percent: 50.0 }),
    ));

    let cfg = EngineConfig {
        batch_size: 16,
        max_files: 100_000,
        memory_budget_mb: 4096,
        file_timeout: Duration::from_secs(30),
        scan_timeout: None,
        default_depth: None,
        default_exclusions: Vec::new(),
        default_filter: vigil::FileKindFilter::All,
        include_hidden: false,
        auto_quarantine,
    };

    let engine = ScanEngine::new(
        cfg,
        cache,
        io,
        quarantine,
        limits,
        pool,
        detector.clone() as Arc<dyn DetectionEngine>,
        monitor,
    );

    Fixture { _dir: dir, root, engine, detector }
}

async fn wait_terminal(engine: &Arc<ScanEngine>, id: &str) -> vigil::ScanProgress {
    for _ in 0..600 {
        if let Some(progress) = engine.progress(id) {
            if progress.status.is_terminal() {
                return progress;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("scan {} did not reach a terminal state", id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn clean_small_file_round_trip() {
    let fx = fixture_with(ScriptedEngine::new(), false);
    put_file(&fx.root.join("hello.txt"), b"hello\n");

    let id = fx.engine.start(ScanRequest::new(&fx.root));
    let progress = wait_terminal(&fx.engine, &id).await;

    assert_eq!(progress.status, ScanStatus::Completed);
    assert_eq!(progress.total_files, 1);
    assert_eq!(progress.completed_files, 1);
    assert_eq!(progress.infected_files, 0);
    assert_eq!(progress.error_files, 0);
    assert_eq!(progress.bytes_scanned, 6);
    assert_eq!(fx.detector.calls(), 1);
    assert_eq!(fx.engine.cache().statistics().entries, 1);
    assert!(fx.engine.quarantine_store().list().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn infected_file_is_quarantined_when_configured() {
    let fx = fixture_with(ScriptedEngine::new(), true);
    let bad = fx.root.join("eicar.com");
    put_file(&bad, &[b"X5O!P%@AP[4\\PZX54(P^)7CC)7}$".as_ref(), EICAR_MARKER].concat());

    let id = fx.engine.start(ScanRequest::new(&fx.root));
    let progress = wait_terminal(&fx.engine, &id).await;

    assert_eq!(progress.status, ScanStatus::Completed);
    assert_eq!(progress.infected_files, 1);
    assert!(!bad.exists(), "infected file moved out of place");

    let records = fx.engine.quarantine_store().list();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].threat_name, "Test.EICAR");
    assert_eq!(records[0].original_path, bad);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn second_scan_hits_cache_without_backend() {
    let fx = fixture_with(ScriptedEngine::new(), false);
    put_file(&fx.root.join("stable.txt"), b"unchanged contents");

    let first = fx.engine.start(ScanRequest::new(&fx.root));
    wait_terminal(&fx.engine, &first).await;
    assert_eq!(fx.detector.calls(), 1);

    let second = fx.engine.start(ScanRequest::new(&fx.root));
    let progress = wait_terminal(&fx.engine, &second).await;

    assert_eq!(progress.status, ScanStatus::Completed);
    assert_eq!(progress.completed_files, 1);
    assert_eq!(fx.detector.calls(), 1, "cache hit must not invoke the backend");
    assert!(fx.engine.cache().statistics().hits >= 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn signature_bump_forces_rescan() {
    let fx = fixture_with(ScriptedEngine::new(), false);
    put_file(&fx.root.join("stable.txt"), b"unchanged contents");

    let first = fx.engine.start(ScanRequest::new(&fx.root));
    wait_terminal(&fx.engine, &first).await;
    assert_eq!(fx.detector.calls(), 1);

    fx.engine.cache().set_signature_version("27001");

    let second = fx.engine.start(ScanRequest::new(&fx.root));
    wait_terminal(&fx.engine, &second).await;
    assert_eq!(fx.detector.calls(), 2, "new signature version must rescan");
    assert_eq!(fx.engine.cache().statistics().entries, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn zero_byte_file_skips_detection() {
    let fx = fixture_with(ScriptedEngine::new(), false);
    put_file(&fx.root.join("empty.dat"), b"");

    let id = fx.engine.start(ScanRequest::new(&fx.root));
    let progress = wait_terminal(&fx.engine, &id).await;

    assert_eq!(progress.status, ScanStatus::Completed);
    assert_eq!(progress.completed_files, 1);
    assert_eq!(progress.error_files, 0);
    assert_eq!(fx.detector.calls(), 0, "empty files never reach the backend");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn symlinks_are_rejected_by_policy() {
    let fx = fixture_with(ScriptedEngine::new(), false);
    put_file(&fx.root.join("real.txt"), b"content");
    #[cfg(unix)]
    std::os::unix::fs::symlink(fx.root.join("real.txt"), fx.root.join("link.txt")).unwrap();

    let result = fx.engine.scan_file(&fx.root.join("real.txt")).await;
    assert!(result.verdict.is_clean());

    #[cfg(unix)]
    {
        let result = fx.engine.scan_file(&fx.root.join("link.txt")).await;
        match result.verdict {
            Verdict::Error { kind, .. } => assert_eq!(kind, vigil::ScanErrorKind::Policy),
            other => panic!("expected policy error, got {:?}", other),
        }
    }
}

#[cfg(unix)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn allowed_symlink_scans_the_target() {
    let fx = fixture_with(ScriptedEngine::new(), false);
    let target = fx.root.join("target.bin");
    put_file(&target, b"target bytes");
    let link = fx.root.join("link.bin");
    std::os::unix::fs::symlink(&target, &link).unwrap();

    // The link itself carries mode 0777 and a tiny inode size; size and
    // policy must come from the target.
    let mut request = ScanRequest::new(&link);
    request.allow_symlinks = true;
    let id = fx.engine.start(request);
    let progress = wait_terminal(&fx.engine, &id).await;

    assert_eq!(progress.status, ScanStatus::Completed);
    assert_eq!(progress.completed_files, 1);
    assert_eq!(progress.error_files, 0, "allowed symlink must not trip policy");
    assert_eq!(progress.bytes_scanned, 12, "size is the target's, not the link's");
    assert_eq!(fx.detector.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn missing_file_reports_not_found() {
    let fx = fixture_with(ScriptedEngine::new(), false);
    let result = fx.engine.scan_file(&fx.root.join("ghost.bin")).await;
    match result.verdict {
        Verdict::Error { kind, .. } => assert_eq!(kind, vigil::ScanErrorKind::NotFound),
        other => panic!("expected not-found error, got {:?}", other),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_stops_in_bounded_time() {
    let fx = fixture_with(ScriptedEngine::slow(Duration::from_millis(30)), false);
    for i in 0..200 {
        put_file(&fx.root.join(format!("file_{:04}.dat", i)), b"some payload");
    }

    let id = fx.engine.start(ScanRequest::new(&fx.root));

    // Wait for some completions, then pull the plug.
    for _ in 0..600 {
        if fx.engine.progress(&id).map(|p| p.completed_files >= 5).unwrap_or(false) {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert!(fx.engine.cancel(&id));

    let progress = wait_terminal(&fx.engine, &id).await;
    assert_eq!(progress.status, ScanStatus::Cancelled);
    assert!(progress.completed_files <= progress.total_files);
    assert!(
        (progress.completed_files as usize) < 200,
        "cancellation should leave pending work undone"
    );
    assert_eq!(progress.reason.as_deref(), Some("user"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn results_stream_delivers_completion_order() {
    let fx = fixture_with(ScriptedEngine::new(), false);
    put_file(&fx.root.join("one.txt"), b"1");
    put_file(&fx.root.join("two.txt"), b"22");

    let id = fx.engine.start(ScanRequest::new(&fx.root));
    let mut stream = fx.engine.stream_results(&id).expect("stream claimable once");
    assert!(fx.engine.stream_results(&id).is_none());

    use tokio_stream::StreamExt;
    let mut seen = Vec::new();
    while let Some(result) = stream.next().await {
        seen.push(result.path);
    }
    assert_eq!(seen.len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pause_and_resume_round_trip() {
    let fx = fixture_with(ScriptedEngine::slow(Duration::from_millis(10)), false);
    for i in 0..60 {
        put_file(&fx.root.join(format!("f{:02}.dat", i)), b"payload");
    }

    let id = fx.engine.start(ScanRequest::new(&fx.root));
    assert!(fx.engine.pause(&id));
    tokio::time::sleep(Duration::from_millis(150)).await;

    let frozen = fx.engine.progress(&id).unwrap().completed_files;
    tokio::time::sleep(Duration::from_millis(150)).await;
    let still_frozen = fx.engine.progress(&id).unwrap().completed_files;
    // At most one in-flight batch finishes after the pause lands.
    assert!(still_frozen.saturating_sub(frozen) <= 16);

    assert!(fx.engine.resume(&id));
    let progress = wait_terminal(&fx.engine, &id).await;
    assert_eq!(progress.status, ScanStatus::Completed);
    assert_eq!(progress.completed_files, 60);
}
