// tests/io_tests.rs

//! Integration tests for the adaptive I/O manager: strategy selection across
//! the size thresholds, chunked streaming, and bounded parallel reads.

use std::fs;

use tempfile::TempDir;
use tokio_stream::StreamExt;
use vigil::{IoConfig, IoManager, IoStrategy};

/// Small thresholds so the tests cross strategy boundaries without writing
/// hundred-megabyte files.
fn small_manager() -> IoManager {
    IoManager::new(
        IoConfig::new(
            4 * 1024,  // small: below 4 KiB reads async
            64 * 1024, // large: above 64 KiB memory-maps
            1024,
            2048,
            4,
            IoStrategy::Auto,
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn whole_reads_across_all_strategies() {
    let dir = TempDir::new().unwrap();
    let io = small_manager();

    let tiny = dir.path().join("tiny.bin");
    fs::write(&tiny, vec![1u8; 512]).unwrap();
    let medium = dir.path().join("medium.bin");
    fs::write(&medium, vec![2u8; 16 * 1024]).unwrap();
    let big = dir.path().join("big.bin");
    fs::write(&big, vec![3u8; 128 * 1024]).unwrap();

    assert_eq!(io.read_whole(&tiny).await.unwrap().len(), 512);
    assert_eq!(io.read_whole(&medium).await.unwrap().len(), 16 * 1024);
    assert_eq!(io.read_whole(&big).await.unwrap().len(), 128 * 1024);

    let metrics = io.metrics();
    assert_eq!(metrics.total_files_read, 3);
    assert_eq!(metrics.total_bytes_read, (512 + 16 * 1024 + 128 * 1024) as u64);
    assert_eq!(metrics.async_reads, 1);
    assert_eq!(metrics.buffered_reads, 1);
    assert_eq!(metrics.mmap_reads, 1);
}

#[tokio::test]
async fn chunked_stream_reassembles_file() {
    let dir = TempDir::new().unwrap();
    let io = small_manager();

    // Buffered-strategy size; chunk size 1024 means multiple chunks.
    let path = dir.path().join("chunky.bin");
    let original: Vec<u8> = (0..32 * 1024).map(|i| (i % 251) as u8).collect();
    fs::write(&path, &original).unwrap();

    let mut stream = io.read_chunks(&path).await.unwrap();
    let mut reassembled = Vec::new();
    let mut chunks = 0;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.unwrap();
        assert!(chunk.len() <= 1024);
        reassembled.extend_from_slice(&chunk);
        chunks += 1;
    }
    assert_eq!(reassembled, original);
    assert!(chunks >= 32);
}

#[tokio::test]
async fn chunked_stream_works_over_mmap() {
    let dir = TempDir::new().unwrap();
    let io = small_manager();

    let path = dir.path().join("mapped.bin");
    let original = vec![9u8; 100 * 1024];
    fs::write(&path, &original).unwrap();

    let mut stream = io.read_chunks(&path).await.unwrap();
    let mut total = 0;
    while let Some(chunk) = stream.next().await {
        total += chunk.unwrap().len();
    }
    assert_eq!(total, original.len());
}

#[tokio::test]
async fn read_many_reports_failures_per_path() {
    let dir = TempDir::new().unwrap();
    let io = small_manager();

    let good = dir.path().join("good.bin");
    fs::write(&good, b"fine").unwrap();
    let missing = dir.path().join("missing.bin");

    let results = io.read_many(vec![good.clone(), missing.clone()]).await;
    assert_eq!(results.len(), 2);
    assert_eq!(results[&good].as_ref().unwrap(), b"fine");
    assert!(results[&missing].is_err(), "missing path fails alone");
}

#[tokio::test]
async fn missing_file_propagates_io_error() {
    let dir = TempDir::new().unwrap();
    let io = small_manager();
    let err = io.read_whole(&dir.path().join("nope")).await.unwrap_err();
    assert_eq!(err.kind(), std::io::ErrorKind::NotFound);
}
