// src/engine/progress.rs

//! Scan status tracking and subscriber notification.
//!
//! Progress counters are monotonic within a scan. Result callbacks fire for
//! every file; progress callbacks are throttled during bursts so a subscriber
//! redrawing a UI is not flooded.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};

use super::task::FileResult;

/// Longest file name echoed in progress snapshots.
const DISPLAY_NAME_MAX: usize = 25;

/// Minimum spacing between progress callbacks during bursts.
const PROGRESS_EMIT_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanStatus {
    NotStarted,
    Initializing,
    Scanning,
    Paused,
    Completed,
    Cancelled,
    Error,
}

impl ScanStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ScanStatus::Completed | ScanStatus::Cancelled | ScanStatus::Error)
    }
}

/// Point-in-time view of a running scan.
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub total_files: u64,
    pub completed_files: u64,
    pub infected_files: u64,
    pub error_files: u64,
    pub bytes_scanned: u64,
    pub current_file: Option<String>,
    pub started_at: DateTime<Utc>,
    pub status: ScanStatus,
    /// Populated on cancellation ("user", "timeout") or error.
    pub reason: Option<String>,
}

impl ScanProgress {
    pub fn new() -> Self {
        ScanProgress {
            total_files: 0,
            completed_files: 0,
            infected_files: 0,
            error_files: 0,
            bytes_scanned: 0,
            current_file: None,
            started_at: Utc::now(),
            status: ScanStatus::NotStarted,
            reason: None,
        }
    }

    pub fn percent_complete(&self) -> f64 {
        if self.total_files == 0 {
            return 0.0;
        }
        self.completed_files as f64 / self.total_files as f64 * 100.0
    }
}

impl Default for ScanProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// Shorten a file name for progress display, keeping the tail counters
/// readable next to it.
pub fn truncate_for_display(name: &str) -> String {
    if name.chars().count() <= DISPLAY_NAME_MAX {
        return name.to_string();
    }
    let head: String = name.chars().take(DISPLAY_NAME_MAX - 3).collect();
    format!("{}...", head)
}

/// Receives scan events. Implementations must not block; the engine does not
/// retry callbacks.
pub trait ScanSubscriber: Send + Sync {
    fn on_progress(&self, snapshot: &ScanProgress);
    fn on_result(&self, result: &FileResult);
}

/// Fan-out point for subscriber callbacks with burst throttling on the
/// progress side.
pub struct Notifier {
    subscribers: Mutex<Vec<Arc<dyn ScanSubscriber>>>,
    last_progress_emit: Mutex<Instant>,
}

impl Notifier {
    pub fn new() -> Self {
        Notifier {
            subscribers: Mutex::new(Vec::new()),
            last_progress_emit: Mutex::new(Instant::now() - PROGRESS_EMIT_INTERVAL),
        }
    }

    pub fn subscribe(&self, subscriber: Arc<dyn ScanSubscriber>) {
        self.subscribers.lock().unwrap().push(subscriber);
    }

    pub fn emit_result(&self, result: &FileResult) {
        for sub in self.subscribers.lock().unwrap().iter() {
            sub.on_result(result);
        }
    }

    /// Emit a progress snapshot. Unforced emissions are dropped when the
    /// previous one is fresher than the burst interval.
    pub fn emit_progress(&self, snapshot: &ScanProgress, force: bool) {
        {
            let mut last = self.last_progress_emit.lock().unwrap();
            if !force && last.elapsed() < PROGRESS_EMIT_INTERVAL {
                return;
            }
            *last = Instant::now();
        }
        for sub in self.subscribers.lock().unwrap().iter() {
            sub.on_progress(snapshot);
        }
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSubscriber {
        progress: AtomicUsize,
        results: AtomicUsize,
    }

    impl ScanSubscriber for CountingSubscriber {
        fn on_progress(&self, _: &ScanProgress) {
            self.progress.fetch_add(1, Ordering::Relaxed);
        }
        fn on_result(&self, _: &FileResult) {
            self.results.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[test]
    fn progress_bursts_are_throttled() {
        let notifier = Notifier::new();
        let sub = Arc::new(CountingSubscriber {
            progress: AtomicUsize::new(0),
            results: AtomicUsize::new(0),
        });
        notifier.subscribe(sub.clone());

        let snapshot = ScanProgress::new();
        for _ in 0..100 {
            notifier.emit_progress(&snapshot, false);
        }
        // First emission passes, the burst is suppressed.
        assert_eq!(sub.progress.load(Ordering::Relaxed), 1);

        notifier.emit_progress(&snapshot, true);
        assert_eq!(sub.progress.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn display_names_are_bounded() {
        assert_eq!(truncate_for_display("short.txt"), "short.txt");
        let long = "a".repeat(60);
        let shown = truncate_for_display(&long);
        assert_eq!(shown.chars().count(), 25);
        assert!(shown.ends_with("..."));
    }

    #[test]
    fn terminal_states() {
        assert!(ScanStatus::Completed.is_terminal());
        assert!(ScanStatus::Cancelled.is_terminal());
        assert!(ScanStatus::Error.is_terminal());
        assert!(!ScanStatus::Paused.is_terminal());
    }
}
