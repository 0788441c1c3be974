// src/cache/mod.rs

//! Verdict cache: LRU + TTL with signature-version invalidation and SQLite
//! persistence.
//!
//! Keys are `SHA-256(path:mtime)`, so a modified file naturally misses and
//! its stale entry ages out through TTL or LRU pressure. A signature-database
//! update invalidates everything at once. Lookup/insert are guarded by one
//! mutex; statistics counters are atomic and may be read without it.

pub mod store;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::UNIX_EPOCH;

use log::Level;
use metrics::counter;
use thiserror::Error;

use crate::detect::Verdict;
use crate::hash;
use crate::vigil_log;

/// Rough per-entry footprint used for the memory estimate.
const ENTRY_MEMORY_ESTIMATE: usize = 500;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("SQLite error: {0}")]
    Sql(#[from] rusqlite::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One cached scan outcome with the metadata needed for invalidation.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    /// Content digest of the file at scan time ("unknown" when unavailable).
    pub fingerprint: String,
    pub path: PathBuf,
    pub verdict: Verdict,
    pub engine: String,
    pub signature_version: String,
    pub file_size: u64,
    pub file_mtime: i64,
    /// Unix seconds when the entry was created; TTL anchor.
    pub created_at: i64,
    pub hits: u64,
}

/// Snapshot of cache health counters.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    pub hit_rate_percent: f64,
    pub memory_bytes: u64,
    pub entries: usize,
    pub max_entries: usize,
    pub ttl_seconds: u64,
    pub signature_version: String,
}

#[derive(Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
}

struct Slot {
    entry: CacheEntry,
    last_used: u64,
}

struct Inner {
    map: HashMap<String, Slot>,
    /// Monotonic use clock; the slot with the smallest stamp is the LRU victim.
    clock: u64,
    signature_version: String,
}

pub struct VerdictCache {
    inner: Mutex<Inner>,
    counters: Counters,
    max_entries: usize,
    ttl_seconds: u64,
    db_path: PathBuf,
}

impl VerdictCache {
    pub fn new(
        max_entries: usize,
        ttl_seconds: u64,
        signature_version: impl Into<String>,
        db_path: PathBuf,
    ) -> Self {
        let signature_version = signature_version.into();
        vigil_log!(
            Level::Info,
            "cache",
            "Verdict cache ready: max_entries={}, ttl={}s, sig_version={}, db={:?}",
            max_entries,
            ttl_seconds,
            signature_version,
            db_path
        );
        VerdictCache {
            inner: Mutex::new(Inner {
                map: HashMap::new(),
                clock: 0,
                signature_version,
            }),
            counters: Counters::default(),
            max_entries,
            ttl_seconds,
            db_path,
        }
    }

    /// Key for the file's current on-disk state, or `None` when it cannot be
    /// stat'ed (which the caller records as a miss, not an error).
    fn current_key(path: &Path) -> Option<(String, i64, u64)> {
        let meta = std::fs::metadata(path).ok()?;
        let mtime = meta.modified().ok()?.duration_since(UNIX_EPOCH).ok()?.as_secs() as i64;
        Some((hash::fingerprint(path, mtime), mtime, meta.len()))
    }

    fn now() -> i64 {
        chrono::Utc::now().timestamp()
    }

    fn expired(&self, entry: &CacheEntry, now: i64) -> bool {
        now - entry.created_at >= self.ttl_seconds as i64
    }

    /// Look up the verdict for a file's current contents.
    pub fn get(&self, path: &Path) -> Option<CacheEntry> {
        let Some((key, _, _)) = Self::current_key(path) else {
            self.counters.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        };

        let now = Self::now();
        let mut inner = self.inner.lock().unwrap();
        let sig = inner.signature_version.clone();

        let validity = inner
            .map
            .get(&key)
            .map(|slot| self.expired(&slot.entry, now) || slot.entry.signature_version != sig);

        match validity {
            None => {
                drop(inner);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(true) => {
                inner.map.remove(&key);
                drop(inner);
                self.counters.expirations.fetch_add(1, Ordering::Relaxed);
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            Some(false) => {}
        }

        inner.clock += 1;
        let clock = inner.clock;
        let slot = inner.map.get_mut(&key).unwrap();
        slot.entry.hits += 1;
        slot.last_used = clock;
        let entry = slot.entry.clone();
        drop(inner);

        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        counter!("cache_hits_total").increment(1);
        vigil_log!(Level::Debug, "cache", "Hit for {:?} (key={})", path, &key[..8]);
        Some(entry)
    }

    /// Insert a verdict for the file's current contents. Returns false when
    /// the file cannot be stat'ed anymore.
    pub fn put(
        &self,
        path: &Path,
        verdict: Verdict,
        engine: &str,
        content_sha256: Option<&str>,
    ) -> bool {
        let Some((key, mtime, size)) = Self::current_key(path) else {
            return false;
        };

        let mut inner = self.inner.lock().unwrap();
        inner.clock += 1;
        let clock = inner.clock;
        let entry = CacheEntry {
            fingerprint: content_sha256.unwrap_or("unknown").to_string(),
            path: path.to_path_buf(),
            verdict,
            engine: engine.to_string(),
            signature_version: inner.signature_version.clone(),
            file_size: size,
            file_mtime: mtime,
            created_at: Self::now(),
            hits: 0,
        };
        inner.map.insert(key.clone(), Slot { entry, last_used: clock });

        while inner.map.len() > self.max_entries {
            let victim = inner
                .map
                .iter()
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(k, _)| k.clone());
            match victim {
                Some(k) => {
                    inner.map.remove(&k);
                    self.counters.evictions.fetch_add(1, Ordering::Relaxed);
                    counter!("cache_evictions_total").increment(1);
                }
                None => break,
            }
        }
        drop(inner);

        vigil_log!(Level::Debug, "cache", "Stored verdict for {:?} (key={})", path, &key[..8]);
        true
    }

    /// Drop the entry for the file's current key, if any.
    pub fn delete(&self, path: &Path) -> bool {
        let Some((key, _, _)) = Self::current_key(path) else {
            return false;
        };
        self.inner.lock().unwrap().map.remove(&key).is_some()
    }

    pub fn clear(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.map.clear();
        vigil_log!(Level::Info, "cache", "Cache cleared");
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn signature_version(&self) -> String {
        self.inner.lock().unwrap().signature_version.clone()
    }

    /// Change the signature version. Anything cached under an older rule set
    /// is invalid, so a version change clears the whole cache.
    pub fn set_signature_version(&self, version: &str) {
        let mut inner = self.inner.lock().unwrap();
        if inner.signature_version == version {
            return;
        }
        vigil_log!(
            Level::Info,
            "cache",
            "Signature version {} -> {}; invalidating cache",
            inner.signature_version,
            version
        );
        inner.signature_version = version.to_string();
        inner.map.clear();
    }

    pub fn statistics(&self) -> CacheStats {
        let (entries, signature_version) = {
            let inner = self.inner.lock().unwrap();
            (inner.map.len(), inner.signature_version.clone())
        };
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            expirations: self.counters.expirations.load(Ordering::Relaxed),
            hit_rate_percent: if total > 0 { hits as f64 / total as f64 * 100.0 } else { 0.0 },
            memory_bytes: (entries * ENTRY_MEMORY_ESTIMATE) as u64,
            entries,
            max_entries: self.max_entries,
            ttl_seconds: self.ttl_seconds,
            signature_version,
        }
    }

    /// Serialize every non-expired entry to the database, replacing previous
    /// contents in one transaction. In-memory state is untouched on failure.
    pub fn persist(&self) -> Result<usize, CacheError> {
        let now = Self::now();
        let snapshot: Vec<(String, CacheEntry)> = {
            let inner = self.inner.lock().unwrap();
            inner
                .map
                .iter()
                .filter(|(_, slot)| !self.expired(&slot.entry, now))
                .map(|(k, slot)| (k.clone(), slot.entry.clone()))
                .collect()
        };

        let mut conn = store::open(&self.db_path)?;
        let written = store::persist_entries(&mut conn, snapshot.iter().map(|(k, e)| (k, e)))?;
        vigil_log!(Level::Info, "cache", "Persisted {} entries to {:?}", written, self.db_path);
        Ok(written)
    }

    /// Load persisted entries, discarding expired rows and rows written under
    /// a different signature version. Returns `(loaded, skipped)`.
    pub fn load(&self) -> Result<(usize, usize), CacheError> {
        if !self.db_path.exists() {
            log::debug!("No cache database at {:?}; starting fresh", self.db_path);
            return Ok((0, 0));
        }

        let conn = store::open(&self.db_path)?;
        let rows = store::load_entries(&conn)?;
        let total = rows.len();
        let now = Self::now();

        let mut inner = self.inner.lock().unwrap();
        let sig = inner.signature_version.clone();
        let mut loaded = 0usize;
        for (key, entry) in rows {
            if self.expired(&entry, now) || entry.signature_version != sig {
                continue;
            }
            inner.clock += 1;
            let clock = inner.clock;
            inner.map.insert(key, Slot { entry, last_used: clock });
            loaded += 1;
            if inner.map.len() >= self.max_entries {
                break;
            }
        }
        drop(inner);

        vigil_log!(
            Level::Info,
            "cache",
            "Loaded {} cache entries from disk (skipped {})",
            loaded,
            total - loaded
        );
        Ok((loaded, total - loaded))
    }

    /// Load, degrading to an empty cache when the database is unreadable.
    pub fn load_or_recover(&self) -> (usize, usize) {
        match self.load() {
            Ok(counts) => counts,
            Err(e) => {
                log::warn!("Cache database unreadable ({}); starting with empty cache", e);
                self.clear();
                (0, 0)
            }
        }
    }
}
