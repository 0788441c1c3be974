// tests/cache_tests.rs

//! Integration tests for the verdict cache: key behavior, TTL and signature
//! invalidation, LRU eviction, and the persist/load round trip.

use std::fs;
use std::path::PathBuf;

use tempfile::TempDir;
use vigil::{Verdict, VerdictCache};

fn write_file(dir: &TempDir, name: &str, contents: &[u8]) -> PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, contents).unwrap();
    path
}

fn cache_in(dir: &TempDir, max_entries: usize, ttl: u64, sig: &str) -> VerdictCache {
    VerdictCache::new(max_entries, ttl, sig, dir.path().join("verdict_cache.db"))
}

#[test]
fn get_returns_stored_verdict_and_counts_hit() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir, 16, 3600, "v1");
    let file = write_file(&dir, "a.txt", b"hello\n");

    assert!(cache.get(&file).is_none());
    assert!(cache.put(&file, Verdict::Clean, "clamav", Some("abc123")));

    let entry = cache.get(&file).expect("entry should be present");
    assert!(entry.verdict.is_clean());
    assert_eq!(entry.engine, "clamav");
    assert_eq!(entry.file_size, 6);
    assert_eq!(entry.hits, 1);

    let stats = cache.statistics();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.entries, 1);
}

#[test]
fn missing_file_is_a_miss_not_an_error() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir, 16, 3600, "v1");
    assert!(cache.get(&dir.path().join("never-existed")).is_none());
    assert_eq!(cache.statistics().misses, 1);
}

#[test]
fn modified_file_misses_under_new_key() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir, 16, 3600, "v1");
    let file = write_file(&dir, "a.txt", b"one");
    cache.put(&file, Verdict::Clean, "clamav", None);
    assert!(cache.get(&file).is_some());

    // Rewrite and push the mtime back: the key changes, so no hit.
    fs::write(&file, b"two").unwrap();
    let f = fs::File::options().write(true).open(&file).unwrap();
    f.set_modified(std::time::SystemTime::now() - std::time::Duration::from_secs(120)).unwrap();
    drop(f);
    assert!(cache.get(&file).is_none());
}

#[test]
fn ttl_zero_expires_immediately() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir, 16, 0, "v1");
    let file = write_file(&dir, "a.txt", b"data");
    cache.put(&file, Verdict::Clean, "clamav", None);

    assert!(cache.get(&file).is_none());
    assert_eq!(cache.statistics().expirations, 1);
    assert_eq!(cache.len(), 0);
}

#[test]
fn signature_bump_clears_everything() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir, 16, 3600, "v1");
    let a = write_file(&dir, "a.txt", b"a");
    let b = write_file(&dir, "b.txt", b"b");
    cache.put(&a, Verdict::Clean, "clamav", None);
    cache.put(&b, Verdict::infected("Test.EICAR"), "clamav", None);
    assert_eq!(cache.len(), 2);

    cache.set_signature_version("v2");
    assert!(cache.get(&a).is_none());
    assert!(cache.get(&b).is_none());
    assert_eq!(cache.len(), 0);

    // Same version again is a no-op.
    cache.put(&a, Verdict::Clean, "clamav", None);
    cache.set_signature_version("v2");
    assert_eq!(cache.len(), 1);
}

#[test]
fn lru_evicts_least_recently_used() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir, 2, 3600, "v1");
    let a = write_file(&dir, "a.txt", b"a");
    let b = write_file(&dir, "b.txt", b"b");
    let c = write_file(&dir, "c.txt", b"c");

    cache.put(&a, Verdict::Clean, "clamav", None);
    cache.put(&b, Verdict::Clean, "clamav", None);
    // Touch `a` so `b` becomes the LRU victim.
    assert!(cache.get(&a).is_some());
    cache.put(&c, Verdict::Clean, "clamav", None);

    assert_eq!(cache.len(), 2);
    assert!(cache.get(&a).is_some());
    assert!(cache.get(&b).is_none());
    assert!(cache.get(&c).is_some());
    assert_eq!(cache.statistics().evictions, 1);
}

#[test]
fn persist_then_load_preserves_matching_entries() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("verdict_cache.db");
    let a = write_file(&dir, "a.txt", b"clean bytes");
    let b = write_file(&dir, "b.bin", b"bad bytes");

    let cache = VerdictCache::new(16, 3600, "v1", db.clone());
    cache.put(&a, Verdict::Clean, "clamav", Some("aaa"));
    cache.put(&b, Verdict::infected("Win.Trojan.Agent-6"), "clamav", Some("bbb"));
    assert_eq!(cache.persist().unwrap(), 2);

    // Same signature version: both entries come back.
    let reloaded = VerdictCache::new(16, 3600, "v1", db.clone());
    assert_eq!(reloaded.load().unwrap(), (2, 0));
    let entry = reloaded.get(&b).expect("persisted entry");
    match &entry.verdict {
        Verdict::Infected { name, .. } => assert_eq!(name, "Win.Trojan.Agent-6"),
        other => panic!("expected infected, got {:?}", other),
    }

    // Different signature version: everything is skipped at load time.
    let stale = VerdictCache::new(16, 3600, "v2", db);
    assert_eq!(stale.load().unwrap(), (0, 2));
    assert!(stale.get(&a).is_none());
}

#[test]
fn corrupt_database_degrades_to_empty() {
    let dir = TempDir::new().unwrap();
    let db = dir.path().join("verdict_cache.db");
    fs::write(&db, b"this is not sqlite").unwrap();

    let cache = VerdictCache::new(16, 3600, "v1", db);
    let (loaded, skipped) = cache.load_or_recover();
    assert_eq!((loaded, skipped), (0, 0));
    assert_eq!(cache.len(), 0);
}

#[test]
fn delete_and_clear() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir, 16, 3600, "v1");
    let a = write_file(&dir, "a.txt", b"a");
    cache.put(&a, Verdict::Clean, "clamav", None);

    assert!(cache.delete(&a));
    assert!(!cache.delete(&a));
    assert!(cache.get(&a).is_none());

    cache.put(&a, Verdict::Clean, "clamav", None);
    cache.clear();
    assert!(cache.is_empty());
}
