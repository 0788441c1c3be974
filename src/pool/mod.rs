// src/pool/mod.rs

//! Adaptive worker pool.
//!
//! Task dispatch is gated by a semaphore whose effective permit count tracks
//! the desired worker count; growing adds permits, shrinking forgets them.
//! Sized for I/O-bound scanning, so the ceiling allows heavy oversubscription
//! of the physical cores. Every `interval` the pool re-samples CPU, memory,
//! and queue depth and nudges the permit count:
//!
//! - memory above 85%        → down 2 (pressure override)
//! - cpu > 80% and queue < 2 → down 2 (over-threaded)
//! - cpu < 40% and queue > 20 → up 4 (under-utilized)
//! - queue > 20              → up 2
//! - queue < 2               → down 1

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::Level;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

use crate::sysmon::{SystemMonitor, SystemSample};
use crate::vigil_log;

/// Source of CPU/memory readings; injectable so sizing is testable.
pub type PoolSampler = Box<dyn Fn() -> SystemSample + Send + Sync>;

const SCALE_UP_CPU_THRESHOLD: f64 = 40.0;
const SCALE_DOWN_CPU_THRESHOLD: f64 = 80.0;
const SCALE_UP_QUEUE_THRESHOLD: usize = 20;
const SCALE_DOWN_QUEUE_THRESHOLD: usize = 2;
const MEMORY_PRESSURE_THRESHOLD: f64 = 85.0;

/// EWMA smoothing factor for the reported rolling averages.
const SMOOTHING: f64 = 0.2;

/// Task-time window; the first average over 50 samples becomes the baseline.
const TASK_TIME_WINDOW: usize = 100;
const BASELINE_SAMPLES: usize = 50;

/// Snapshot of pool sizing state and history.
#[derive(Debug, Clone, Default)]
pub struct PoolMetrics {
    pub current_workers: usize,
    pub min_workers: usize,
    pub max_workers: usize,
    pub total_adjustments: u64,
    pub scale_ups: u64,
    pub scale_downs: u64,
    pub avg_cpu_percent: f64,
    pub avg_memory_percent: f64,
    pub avg_queue_depth: f64,
    pub last_adjustment: Option<chrono::DateTime<chrono::Utc>>,
    pub performance_gain_percent: f64,
}

struct PoolState {
    current: usize,
    /// Shrink permits we could not reclaim yet because workers hold them.
    pending_shrink: usize,
    last_adjustment: Instant,
    metrics: PoolMetrics,
    task_times: VecDeque<f64>,
    baseline_secs: Option<f64>,
}

pub struct AdaptiveWorkerPool {
    semaphore: Arc<Semaphore>,
    state: Mutex<PoolState>,
    min: usize,
    max: usize,
    interval: Duration,
    sampler: PoolSampler,
}

impl AdaptiveWorkerPool {
    /// Pool sampling host load through a shared [`SystemMonitor`].
    pub fn new(min: usize, max: usize, interval: Duration, monitor: Arc<SystemMonitor>) -> Self {
        Self::with_sampler(min, max, interval, Box::new(move || monitor.sample()))
    }

    /// `min`/`max` of zero derive the bounds from the CPU count:
    /// `min = max(4, cores)`, `max = min(100, cores * 12)`.
    pub fn with_sampler(min: usize, max: usize, interval: Duration, sampler: PoolSampler) -> Self {
        let cores = std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4);
        let min = if min == 0 { cores.max(4) } else { min };
        let max = if max == 0 { (cores * 12).min(100) } else { max };
        let max = max.max(min);

        vigil_log!(
            Level::Info,
            "pool",
            "Worker pool ready: min={}, max={}, cores={}, interval={:?}",
            min,
            max,
            cores,
            interval
        );

        AdaptiveWorkerPool {
            semaphore: Arc::new(Semaphore::new(min)),
            state: Mutex::new(PoolState {
                current: min,
                pending_shrink: 0,
                last_adjustment: Instant::now(),
                metrics: PoolMetrics {
                    current_workers: min,
                    min_workers: min,
                    max_workers: max,
                    ..PoolMetrics::default()
                },
                task_times: VecDeque::with_capacity(TASK_TIME_WINDOW),
                baseline_secs: None,
            }),
            min,
            max,
            interval,
            sampler,
        }
    }

    /// Reserve a worker slot; the permit releases on drop along every exit
    /// path, including cancellation.
    pub async fn acquire(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed while the pool is alive.
        Arc::clone(&self.semaphore).acquire_owned().await.unwrap()
    }

    pub fn current_workers(&self) -> usize {
        self.state.lock().unwrap().current
    }

    pub fn bounds(&self) -> (usize, usize) {
        (self.min, self.max)
    }

    /// Pure sizing policy; exposed for tests.
    fn optimal_workers(&self, sample: SystemSample, queue_depth: usize, current: usize) -> usize {
        if sample.memory_percent > MEMORY_PRESSURE_THRESHOLD {
            return current.saturating_sub(2).max(self.min);
        }
        if sample.cpu_percent > SCALE_DOWN_CPU_THRESHOLD && queue_depth < SCALE_DOWN_QUEUE_THRESHOLD
        {
            return current.saturating_sub(2).max(self.min);
        }
        if sample.cpu_percent < SCALE_UP_CPU_THRESHOLD && queue_depth > SCALE_UP_QUEUE_THRESHOLD {
            return (current + 4).min(self.max);
        }
        if queue_depth > SCALE_UP_QUEUE_THRESHOLD {
            return (current + 2).min(self.max);
        }
        if queue_depth < SCALE_DOWN_QUEUE_THRESHOLD && current > self.min {
            return (current - 1).max(self.min);
        }
        current
    }

    /// Re-evaluate the worker count if the adjustment interval has elapsed.
    /// Returns true when the count changed.
    pub fn adjust_if_due(&self, queue_depth: usize) -> bool {
        {
            let state = self.state.lock().unwrap();
            if state.last_adjustment.elapsed() < self.interval {
                return false;
            }
        }

        let sample = (self.sampler)();
        let mut state = self.state.lock().unwrap();

        // Settle shrink debt from earlier rounds before computing anew.
        if state.pending_shrink > 0 {
            let reclaimed = self.semaphore.forget_permits(state.pending_shrink);
            state.pending_shrink -= reclaimed;
        }

        let current = state.current;
        let optimal = self.optimal_workers(sample, queue_depth, current);

        state.metrics.avg_cpu_percent =
            SMOOTHING * sample.cpu_percent + (1.0 - SMOOTHING) * state.metrics.avg_cpu_percent;
        state.metrics.avg_memory_percent = SMOOTHING * sample.memory_percent
            + (1.0 - SMOOTHING) * state.metrics.avg_memory_percent;
        state.metrics.avg_queue_depth =
            SMOOTHING * queue_depth as f64 + (1.0 - SMOOTHING) * state.metrics.avg_queue_depth;

        state.last_adjustment = Instant::now();

        if optimal == current {
            return false;
        }

        if optimal > current {
            self.semaphore.add_permits(optimal - current);
            state.metrics.scale_ups += 1;
        } else {
            let want = current - optimal;
            let reclaimed = self.semaphore.forget_permits(want);
            state.pending_shrink += want - reclaimed;
            state.metrics.scale_downs += 1;
        }

        state.current = optimal;
        state.metrics.current_workers = optimal;
        state.metrics.total_adjustments += 1;
        state.metrics.last_adjustment = Some(chrono::Utc::now());

        vigil_log!(
            Level::Info,
            "pool",
            "Workers {} -> {} (cpu {:.1}%, mem {:.1}%, queue {})",
            current,
            optimal,
            sample.cpu_percent,
            sample.memory_percent,
            queue_depth
        );
        metrics::gauge!("pool_workers").set(optimal as f64);
        true
    }

    /// Record one task's wall time; feeds the performance-gain figure.
    pub fn record_task_time(&self, duration: Duration) {
        let mut state = self.state.lock().unwrap();
        if state.task_times.len() == TASK_TIME_WINDOW {
            state.task_times.pop_front();
        }
        state.task_times.push_back(duration.as_secs_f64());

        if state.task_times.len() >= BASELINE_SAMPLES {
            let avg = state.task_times.iter().sum::<f64>() / state.task_times.len() as f64;
            match state.baseline_secs {
                None => state.baseline_secs = Some(avg),
                Some(baseline) if baseline > 0.0 => {
                    state.metrics.performance_gain_percent = (baseline - avg) / baseline * 100.0;
                }
                Some(_) => {}
            }
        }
    }

    pub fn metrics(&self) -> PoolMetrics {
        self.state.lock().unwrap().metrics.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(min: usize, max: usize) -> AdaptiveWorkerPool {
        AdaptiveWorkerPool::with_sampler(
            min,
            max,
            Duration::from_millis(0),
            Box::new(|| SystemSample { cpu_percent: 20.0, memory_percent: 50.0 }),
        )
    }

    fn sample(cpu: f64, mem: f64) -> SystemSample {
        SystemSample { cpu_percent: cpu, memory_percent: mem }
    }

    #[test]
    fn sizing_rules() {
        let p = pool(4, 32);
        // Memory pressure overrides everything.
        assert_eq!(p.optimal_workers(sample(10.0, 90.0), 100, 10), 8);
        // Over-threaded: high cpu, empty queue.
        assert_eq!(p.optimal_workers(sample(90.0, 50.0), 0, 10), 8);
        // Under-utilized: low cpu, deep queue.
        assert_eq!(p.optimal_workers(sample(20.0, 50.0), 50, 10), 14);
        // Deep queue alone scales gradually.
        assert_eq!(p.optimal_workers(sample(60.0, 50.0), 50, 10), 12);
        // Idle queue drains gradually.
        assert_eq!(p.optimal_workers(sample(60.0, 50.0), 0, 10), 9);
        // Balanced: no change.
        assert_eq!(p.optimal_workers(sample(60.0, 50.0), 10, 10), 10);
    }

    #[test]
    fn bounds_are_clamped() {
        let p = pool(4, 8);
        assert_eq!(p.optimal_workers(sample(10.0, 95.0), 0, 4), 4);
        assert_eq!(p.optimal_workers(sample(20.0, 50.0), 100, 7), 8);
    }

    #[tokio::test]
    async fn permits_follow_adjustments() {
        let p = pool(2, 16);
        assert_eq!(p.current_workers(), 2);
        // Force a deep queue so the pool scales up, then verify two more
        // permits can be held simultaneously.
        assert!(p.adjust_if_due(100));
        assert!(p.current_workers() > 2);
        let _a = p.acquire().await;
        let _b = p.acquire().await;
        let _c = p.acquire().await;
        assert!(p.current_workers() >= 3);
    }

    #[test]
    fn performance_gain_appears_after_baseline() {
        let p = pool(2, 4);
        for _ in 0..BASELINE_SAMPLES {
            p.record_task_time(Duration::from_millis(100));
        }
        assert!(p.metrics().performance_gain_percent.abs() < f64::EPSILON);
        for _ in 0..TASK_TIME_WINDOW {
            p.record_task_time(Duration::from_millis(50));
        }
        assert!(p.metrics().performance_gain_percent > 25.0);
    }
}
