// src/quarantine/mod.rs

//! Quarantine store: relocates infected files into an isolated directory and
//! tracks them in a durable index.
//!
//! A record becomes visible only after both the file move and the index write
//! succeed. The window between the two is closed at startup: files present
//! under `files/` without a record are reported as orphans, and records whose
//! payload is gone are dropped.

pub mod index;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use log::Level;
use metrics::counter;
use thiserror::Error;

use crate::hash;
use crate::vigil_log;

pub use index::QuarantineRecord;

#[derive(Debug, Error)]
pub enum QuarantineError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("not a regular file: {0}")]
    NotRegularFile(PathBuf),

    #[error("unknown quarantine id: {0}")]
    UnknownId(String),

    #[error("quarantine index error: {0}")]
    Index(String),

    #[error("quarantine payload integrity failure: {0}")]
    Integrity(String),
}

/// What startup reconciliation found.
#[derive(Debug, Default, Clone)]
pub struct ReconcileReport {
    /// Records dropped because their stored payload no longer exists.
    pub dropped_records: Vec<String>,
    /// Files under `files/` that no record references.
    pub orphan_files: Vec<PathBuf>,
}

pub struct QuarantineStore {
    files_dir: PathBuf,
    index_path: PathBuf,
    records: Mutex<BTreeMap<String, QuarantineRecord>>,
    reconcile: ReconcileReport,
}

impl QuarantineStore {
    /// Open (or create) the store rooted at `root`, loading and reconciling
    /// the index against the files directory.
    pub fn open(root: &Path) -> Result<Self, QuarantineError> {
        let files_dir = root.join("files");
        let index_path = root.join("index.json");
        fs::create_dir_all(&files_dir)?;

        let mut records = match index::load(&index_path) {
            Ok(records) => records,
            Err(QuarantineError::Index(reason)) => {
                log::warn!("Quarantine index unreadable ({}); starting empty", reason);
                index::sideline_corrupt(&index_path);
                BTreeMap::new()
            }
            Err(e) => return Err(e),
        };

        let reconcile = Self::reconcile(&files_dir, &mut records);
        if !reconcile.dropped_records.is_empty() || !reconcile.orphan_files.is_empty() {
            index::save(&index_path, &records)?;
        }

        vigil_log!(
            Level::Info,
            "quarantine",
            "Store ready at {:?}: {} record(s), {} orphan(s)",
            root,
            records.len(),
            reconcile.orphan_files.len()
        );

        Ok(QuarantineStore {
            files_dir,
            index_path,
            records: Mutex::new(records),
            reconcile,
        })
    }

    fn reconcile(
        files_dir: &Path,
        records: &mut BTreeMap<String, QuarantineRecord>,
    ) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        records.retain(|id, rec| {
            if rec.stored_path.exists() {
                true
            } else {
                log::warn!("Index/filesystem disagreement: payload for {} missing; dropping record", id);
                report.dropped_records.push(id.clone());
                false
            }
        });

        if let Ok(entries) = fs::read_dir(files_dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                let known = path
                    .file_name()
                    .map(|name| records.contains_key(&name.to_string_lossy().to_string()))
                    .unwrap_or(false);
                if !known {
                    log::warn!("Orphan quarantine payload not in index: {:?}", path);
                    report.orphan_files.push(path);
                }
            }
        }

        report
    }

    /// Findings from the reconciliation pass run at open time.
    pub fn reconcile_report(&self) -> &ReconcileReport {
        &self.reconcile
    }

    fn generate_id(original: &Path, now: i64) -> String {
        let path_digest = hash::sha256_hex(original.to_string_lossy().as_bytes());
        format!("q_{}_{}", now, &path_digest[..16])
    }

    /// Move an infected file into quarantine and record it. Returns the new
    /// quarantine id.
    pub fn quarantine(&self, path: &Path, threat_name: &str) -> Result<String, QuarantineError> {
        let meta = fs::symlink_metadata(path)?;
        if !meta.is_file() {
            return Err(QuarantineError::NotRegularFile(path.to_path_buf()));
        }

        let sha256 = hash::sha256_file(path)?;
        let now = chrono::Utc::now().timestamp();
        let id = Self::generate_id(path, now);
        let stored_path = self.files_dir.join(&id);

        move_file(path, &stored_path)?;

        let record = QuarantineRecord {
            quarantine_id: id.clone(),
            original_path: path.to_path_buf(),
            stored_path,
            threat_name: threat_name.to_string(),
            file_size: meta.len(),
            sha256,
            quarantined_at: now,
        };

        {
            let mut records = self.records.lock().unwrap();
            records.insert(id.clone(), record);
            if let Err(e) = index::save(&self.index_path, &records) {
                // The payload already moved; drop the in-memory record so the
                // failed write is not presented as success. Startup
                // reconciliation will surface the file as an orphan.
                records.remove(&id);
                return Err(e);
            }
        }

        counter!("quarantine_files_total").increment(1);
        vigil_log!(Level::Warn, "quarantine", "Quarantined {:?} as {} ({})", path, id, threat_name);
        Ok(id)
    }

    /// All records, newest first.
    pub fn list(&self) -> Vec<QuarantineRecord> {
        let mut out: Vec<_> = self.records.lock().unwrap().values().cloned().collect();
        out.sort_by_key(|r| std::cmp::Reverse(r.quarantined_at));
        out
    }

    pub fn get(&self, id: &str) -> Option<QuarantineRecord> {
        self.records.lock().unwrap().get(id).cloned()
    }

    /// Move a payload back to `target` (or its original path), creating
    /// parent directories as needed, and drop the record. The stored bytes
    /// are re-hashed against the digest taken at quarantine time before
    /// anything moves; a mismatch leaves record and payload in place.
    pub fn restore(&self, id: &str, target: Option<&Path>) -> Result<PathBuf, QuarantineError> {
        let record = self.get(id).ok_or_else(|| QuarantineError::UnknownId(id.to_string()))?;
        let destination = target.unwrap_or(&record.original_path).to_path_buf();

        let digest = hash::sha256_file(&record.stored_path)?;
        if digest != record.sha256 {
            return Err(QuarantineError::Integrity(format!(
                "{}: stored payload digest {} does not match recorded {}",
                id, digest, record.sha256
            )));
        }

        if let Some(parent) = destination.parent() {
            fs::create_dir_all(parent)?;
        }
        move_file(&record.stored_path, &destination)?;

        let mut records = self.records.lock().unwrap();
        records.remove(id);
        index::save(&self.index_path, &records)?;

        vigil_log!(Level::Info, "quarantine", "Restored {} to {:?}", id, destination);
        Ok(destination)
    }

    /// Permanently delete a quarantined payload and its record.
    pub fn delete(&self, id: &str) -> Result<(), QuarantineError> {
        let record = self.get(id).ok_or_else(|| QuarantineError::UnknownId(id.to_string()))?;
        if record.stored_path.exists() {
            fs::remove_file(&record.stored_path)?;
        }

        let mut records = self.records.lock().unwrap();
        records.remove(id);
        index::save(&self.index_path, &records)?;

        vigil_log!(Level::Info, "quarantine", "Deleted quarantined payload {}", id);
        Ok(())
    }

    /// Delete payloads quarantined more than `days` days ago. Returns the
    /// number removed.
    pub fn cleanup_older_than(&self, days: u64) -> Result<usize, QuarantineError> {
        let cutoff = chrono::Utc::now().timestamp() - (days as i64) * 86_400;
        let old_ids: Vec<String> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| r.quarantined_at < cutoff)
            .map(|r| r.quarantine_id.clone())
            .collect();

        let mut removed = 0;
        for id in old_ids {
            match self.delete(&id) {
                Ok(()) => removed += 1,
                Err(e) => log::warn!("Cleanup of {} failed: {}", id, e),
            }
        }
        if removed > 0 {
            vigil_log!(Level::Info, "quarantine", "Cleaned up {} old payload(s)", removed);
        }
        Ok(removed)
    }
}

/// Rename within the filesystem where possible; otherwise copy, flush to
/// disk, and unlink the source.
fn move_file(src: &Path, dst: &Path) -> std::io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(_) => {
            fs::copy(src, dst)?;
            fs::OpenOptions::new().write(true).open(dst)?.sync_all()?;
            fs::remove_file(src)
        }
    }
}
