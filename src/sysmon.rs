// src/sysmon.rs

//! System resource sampling shared by the worker pool, the adaptive rate
//! limiter, and the engine's memory budget checks.

use std::sync::Mutex;

use sysinfo::{Pid, System};

/// One point-in-time reading of host load.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSample {
    pub cpu_percent: f64,
    pub memory_percent: f64,
}

pub struct SystemMonitor {
    sys: Mutex<System>,
    pid: Option<Pid>,
}

impl SystemMonitor {
    pub fn new() -> Self {
        SystemMonitor {
            sys: Mutex::new(System::new()),
            pid: sysinfo::get_current_pid().ok(),
        }
    }

    /// Global CPU and memory utilization in percent.
    pub fn sample(&self) -> SystemSample {
        let mut sys = self.sys.lock().unwrap();
        sys.refresh_cpu_usage();
        sys.refresh_memory();
        let cpu_percent = sys.global_cpu_info().cpu_usage() as f64;
        let total = sys.total_memory();
        let memory_percent = if total > 0 {
            sys.used_memory() as f64 / total as f64 * 100.0
        } else {
            0.0
        };
        SystemSample { cpu_percent, memory_percent }
    }

    /// CPU utilization as a fraction in [0, 1], the adaptive limiter's load
    /// signal.
    pub fn load_fraction(&self) -> f64 {
        (self.sample().cpu_percent / 100.0).clamp(0.0, 1.0)
    }

    /// Resident set size of this process in MiB.
    pub fn process_rss_mb(&self) -> f64 {
        let Some(pid) = self.pid else { return 0.0 };
        let mut sys = self.sys.lock().unwrap();
        if !sys.refresh_process(pid) {
            return 0.0;
        }
        sys.process(pid).map(|p| p.memory() as f64 / (1024.0 * 1024.0)).unwrap_or(0.0)
    }
}

impl Default for SystemMonitor {
    fn default() -> Self {
        Self::new()
    }
}
