// src/engine/task.rs

//! Per-file work items and their ordering.

use std::cmp::Ordering;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::detect::Verdict;

/// Dispatch priority of a file task. Higher scans earlier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Background,
    Low,
    Medium,
    High,
    Critical,
}

/// One pending per-file work item. Exactly one task exists per discovered
/// file; it is consumed when a verdict is produced or the scan is cancelled.
#[derive(Debug)]
pub struct FileTask {
    pub path: PathBuf,
    pub priority: Priority,
    pub retries: u32,
    pub enqueued_at: Instant,
    /// Enumeration order; breaks priority ties first-in-first-out.
    pub seq: u64,
}

impl FileTask {
    pub fn new(path: PathBuf, priority: Priority, seq: u64) -> Self {
        FileTask { path, priority, retries: 0, enqueued_at: Instant::now(), seq }
    }
}

impl PartialEq for FileTask {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for FileTask {}

impl PartialOrd for FileTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for FileTask {
    /// Max-heap order: higher priority first, then lower sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

/// Outcome of one file passing through the scan pipeline.
#[derive(Debug, Clone)]
pub struct FileResult {
    pub path: PathBuf,
    pub verdict: Verdict,
    pub file_size: u64,
    pub scan_time: Duration,
    pub from_cache: bool,
    pub quarantine_id: Option<String>,
    /// Set when an infected file could not be quarantined; the infection
    /// finding stands regardless.
    pub quarantine_error: Option<String>,
}

impl FileResult {
    pub fn new(path: PathBuf, verdict: Verdict) -> Self {
        FileResult {
            path,
            verdict,
            file_size: 0,
            scan_time: Duration::ZERO,
            from_cache: false,
            quarantine_id: None,
            quarantine_error: None,
        }
    }
}
