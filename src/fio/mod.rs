// src/fio/mod.rs

//! Adaptive file I/O.
//!
//! Picks a read strategy per file from its size: small files go through the
//! async file API, large ones through a read-only memory map, everything in
//! between through plain buffered reads. The map and buffered paths are
//! synchronous under the hood and run on the blocking pool so the scheduler
//! thread never stalls on disk.

pub mod metrics;

use std::collections::HashMap;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use log::Level;
use tokio::sync::{mpsc, Semaphore};

use self::metrics::IoMetrics;
use tokio_stream::wrappers::ReceiverStream;

use crate::config::types::IoSection;
use crate::vigil_log;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoStrategy {
    Async,
    MemoryMap,
    Buffered,
    Auto,
}

/// Validated I/O configuration; construct through [`IoConfig::new`].
#[derive(Debug, Clone)]
pub struct IoConfig {
    pub small_threshold: u64,
    pub large_threshold: u64,
    pub chunk_size: usize,
    pub buffer_size: usize,
    pub max_concurrent_ops: usize,
    pub strategy: IoStrategy,
}

impl IoConfig {
    pub fn new(
        small_threshold: u64,
        large_threshold: u64,
        chunk_size: usize,
        buffer_size: usize,
        max_concurrent_ops: usize,
        strategy: IoStrategy,
    ) -> Result<Self, String> {
        if chunk_size == 0 {
            return Err("chunk_size must be positive".into());
        }
        if small_threshold >= large_threshold {
            return Err("small_threshold must be below large_threshold".into());
        }
        if max_concurrent_ops == 0 {
            return Err("max_concurrent_ops must be positive".into());
        }
        let mut buffer_size = buffer_size;
        if buffer_size < chunk_size * 2 {
            buffer_size = chunk_size * 2;
            log::warn!("buffer_size raised to {} (2x chunk_size)", buffer_size);
        }
        Ok(IoConfig {
            small_threshold,
            large_threshold,
            chunk_size,
            buffer_size,
            max_concurrent_ops,
            strategy,
        })
    }

    pub fn from_section(io: &IoSection) -> Result<Self, String> {
        Self::new(
            io.small_threshold,
            io.large_threshold,
            io.chunk_size,
            io.buffer_size,
            io.max_concurrent_ops,
            IoStrategy::Auto,
        )
    }
}

impl Default for IoConfig {
    fn default() -> Self {
        IoConfig::from_section(&IoSection::default()).unwrap()
    }
}

pub struct IoManager {
    cfg: IoConfig,
    semaphore: Arc<Semaphore>,
    metrics: Mutex<IoMetrics>,
}

impl IoManager {
    pub fn new(cfg: IoConfig) -> Self {
        vigil_log!(
            Level::Info,
            "fio",
            "I/O manager ready: chunk={}, thresholds={}/{}, max_concurrent={}",
            cfg.chunk_size,
            cfg.small_threshold,
            cfg.large_threshold,
            cfg.max_concurrent_ops
        );
        let semaphore = Arc::new(Semaphore::new(cfg.max_concurrent_ops));
        IoManager { cfg, semaphore, metrics: Mutex::new(IoMetrics::default()) }
    }

    pub fn config(&self) -> &IoConfig {
        &self.cfg
    }

    /// Resolve the strategy for a file of `size` bytes (never returns Auto).
    pub fn select_strategy(&self, size: u64) -> IoStrategy {
        if self.cfg.strategy != IoStrategy::Auto {
            return self.cfg.strategy;
        }
        if size < self.cfg.small_threshold {
            IoStrategy::Async
        } else if size > self.cfg.large_threshold {
            IoStrategy::MemoryMap
        } else {
            IoStrategy::Buffered
        }
    }

    /// Read an entire file with the strategy matching its size.
    pub async fn read_whole(&self, path: &Path) -> std::io::Result<Vec<u8>> {
        let size = tokio::fs::metadata(path).await?.len();
        let strategy = self.select_strategy(size);
        let started = Instant::now();

        let content = match strategy {
            IoStrategy::Async => tokio::fs::read(path).await?,
            IoStrategy::MemoryMap => {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || read_mmap(&path))
                    .await
                    .map_err(|e| std::io::Error::other(e))??
            }
            IoStrategy::Buffered | IoStrategy::Auto => {
                let path = path.to_path_buf();
                let buffer_size = self.cfg.buffer_size;
                tokio::task::spawn_blocking(move || read_buffered(&path, buffer_size))
                    .await
                    .map_err(|e| std::io::Error::other(e))??
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        self.metrics.lock().unwrap().record_read(content.len() as u64, elapsed_ms, strategy);
        ::metrics::histogram!("io_read_duration_seconds").record(started.elapsed().as_secs_f64());
        ::metrics::counter!("io_bytes_read_total").increment(content.len() as u64);

        vigil_log!(
            Level::Debug,
            "fio",
            "Read {:?} ({} bytes, {:?}) in {:.2}ms",
            path,
            content.len(),
            strategy,
            elapsed_ms
        );
        Ok(content)
    }

    /// Stream a file as chunks of `chunk_size` bytes. Errors mid-stream are
    /// delivered in-band; the caller decides whether to retry.
    pub async fn read_chunks(
        &self,
        path: &Path,
    ) -> std::io::Result<ReceiverStream<std::io::Result<Vec<u8>>>> {
        let size = tokio::fs::metadata(path).await?.len();
        let strategy = self.select_strategy(size);
        let chunk_size = self.cfg.chunk_size;
        let buffer_size = self.cfg.buffer_size;
        let (tx, rx) = mpsc::channel(4);

        match strategy {
            IoStrategy::Async => {
                let path = path.to_path_buf();
                tokio::spawn(async move {
                    use tokio::io::AsyncReadExt;
                    let mut file = match tokio::fs::File::open(&path).await {
                        Ok(f) => f,
                        Err(e) => {
                            let _ = tx.send(Err(e)).await;
                            return;
                        }
                    };
                    loop {
                        let mut buf = vec![0u8; chunk_size];
                        match file.read(&mut buf).await {
                            Ok(0) => break,
                            Ok(n) => {
                                buf.truncate(n);
                                if tx.send(Ok(buf)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                let _ = tx.send(Err(e)).await;
                                break;
                            }
                        }
                    }
                });
            }
            _ => {
                let path = path.to_path_buf();
                tokio::task::spawn_blocking(move || {
                    let send = |msg| tx.blocking_send(msg).is_ok();
                    if strategy == IoStrategy::MemoryMap {
                        stream_mmap_chunks(&path, chunk_size, send);
                    } else {
                        stream_buffered_chunks(&path, chunk_size, buffer_size, send);
                    }
                });
            }
        }

        Ok(ReceiverStream::new(rx))
    }

    /// Read many files concurrently, bounded by the configured semaphore.
    /// Failures are reported per path and never abort the batch.
    pub async fn read_many(
        &self,
        paths: Vec<PathBuf>,
    ) -> HashMap<PathBuf, std::io::Result<Vec<u8>>> {
        let tasks = paths.into_iter().map(|path| {
            let semaphore = Arc::clone(&self.semaphore);
            async move {
                // Semaphore is never closed, so acquire cannot fail.
                let _permit = semaphore.acquire().await.unwrap();
                let result = self.read_whole(&path).await;
                if let Err(e) = &result {
                    log::error!("Failed to read {:?}: {}", path, e);
                }
                (path, result)
            }
        });
        futures::future::join_all(tasks).await.into_iter().collect()
    }

    pub fn metrics(&self) -> IoMetrics {
        self.metrics.lock().unwrap().clone()
    }

    pub fn reset_metrics(&self) {
        *self.metrics.lock().unwrap() = IoMetrics::default();
    }
}

fn read_mmap(path: &Path) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    if file.metadata()?.len() == 0 {
        // Zero-length maps are rejected by the OS.
        return Ok(Vec::new());
    }
    // Read-only map over a file we just opened; no writable aliases exist here.
    let mmap = unsafe { memmap2::Mmap::map(&file)? };
    #[cfg(unix)]
    let _ = mmap.advise(memmap2::Advice::Sequential);
    Ok(mmap.to_vec())
}

fn read_buffered(path: &Path, buffer_size: usize) -> std::io::Result<Vec<u8>> {
    let file = std::fs::File::open(path)?;
    let mut rdr = std::io::BufReader::with_capacity(buffer_size, file);
    let mut out = Vec::new();
    rdr.read_to_end(&mut out)?;
    Ok(out)
}

fn stream_mmap_chunks(path: &Path, chunk_size: usize, send: impl Fn(std::io::Result<Vec<u8>>) -> bool) {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            send(Err(e));
            return;
        }
    };
    let len = match file.metadata() {
        Ok(m) => m.len() as usize,
        Err(e) => {
            send(Err(e));
            return;
        }
    };
    if len == 0 {
        return;
    }
    let mmap = match unsafe { memmap2::Mmap::map(&file) } {
        Ok(m) => m,
        Err(e) => {
            send(Err(e));
            return;
        }
    };
    #[cfg(unix)]
    let _ = mmap.advise(memmap2::Advice::Sequential);

    let mut offset = 0;
    while offset < len {
        let end = (offset + chunk_size).min(len);
        if !send(Ok(mmap[offset..end].to_vec())) {
            return;
        }
        offset = end;
    }
}

fn stream_buffered_chunks(
    path: &Path,
    chunk_size: usize,
    buffer_size: usize,
    send: impl Fn(std::io::Result<Vec<u8>>) -> bool,
) {
    let file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            send(Err(e));
            return;
        }
    };
    let mut rdr = std::io::BufReader::with_capacity(buffer_size.max(chunk_size * 2), file);
    loop {
        let mut buf = vec![0u8; chunk_size];
        match rdr.read(&mut buf) {
            Ok(0) => return,
            Ok(n) => {
                buf.truncate(n);
                if !send(Ok(buf)) {
                    return;
                }
            }
            Err(e) => {
                send(Err(e));
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> IoManager {
        IoManager::new(IoConfig::default())
    }

    #[test]
    fn auto_strategy_boundaries() {
        let m = manager();
        let small = m.config().small_threshold;
        let large = m.config().large_threshold;
        assert_eq!(m.select_strategy(small - 1), IoStrategy::Async);
        assert_eq!(m.select_strategy(small), IoStrategy::Buffered);
        assert_eq!(m.select_strategy(small + 1), IoStrategy::Buffered);
        assert_eq!(m.select_strategy(large), IoStrategy::Buffered);
        assert_eq!(m.select_strategy(large + 1), IoStrategy::MemoryMap);
    }

    #[test]
    fn buffer_below_twice_chunk_is_raised() {
        let cfg = IoConfig::new(1, 100, 64 * 1024, 1024, 4, IoStrategy::Auto).unwrap();
        assert_eq!(cfg.buffer_size, 128 * 1024);
    }

    #[test]
    fn invalid_configs_rejected() {
        assert!(IoConfig::new(100, 100, 1024, 2048, 4, IoStrategy::Auto).is_err());
        assert!(IoConfig::new(1, 100, 0, 2048, 4, IoStrategy::Auto).is_err());
        assert!(IoConfig::new(1, 100, 1024, 2048, 0, IoStrategy::Auto).is_err());
    }
}
