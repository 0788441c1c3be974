// src/ratelimit/mod.rs

//! Token-bucket rate limiting per operation class.
//!
//! Each class owns a bucket: capacity is the burst depth, refill rate the
//! sustained `calls / period`. Adaptive buckets additionally shrink their
//! effective limits when the host is loaded. `smart_acquire` maps a generic
//! operation plus a context (user / background / api) onto the concrete
//! class and phrases a denial for the caller.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use log::Level;

use crate::config::types::RateLimitOverride;
use crate::vigil_log;

/// Load sampler used by adaptive buckets; returns a fraction in [0, 1].
pub type LoadSampler = Arc<dyn Fn() -> f64 + Send + Sync>;

/// Rate limit configuration for one operation class.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RateLimit {
    pub calls: u32,
    /// Window length in seconds.
    pub period: f64,
    /// Burst depth; defaults to `calls` when unset.
    pub burst: Option<u32>,
}

impl RateLimit {
    pub const fn new(calls: u32, period: f64) -> Self {
        RateLimit { calls, period, burst: None }
    }

    pub const fn with_burst(calls: u32, period: f64, burst: u32) -> Self {
        RateLimit { calls, period, burst: Some(burst) }
    }

    fn capacity(&self) -> f64 {
        self.burst.unwrap_or(self.calls) as f64
    }

    fn refill_rate(&self) -> f64 {
        self.calls as f64 / self.period
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

/// Thread-safe token bucket.
pub struct TokenBucket {
    limit: RateLimit,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(limit: RateLimit) -> Self {
        TokenBucket {
            state: Mutex::new(BucketState { tokens: limit.capacity(), last_refill: Instant::now() }),
            limit,
        }
    }

    fn refill(limit: &RateLimit, state: &mut BucketState) {
        let now = Instant::now();
        let elapsed = now.duration_since(state.last_refill).as_secs_f64();
        state.tokens = (state.tokens + elapsed * limit.refill_rate()).min(limit.capacity());
        state.last_refill = now;
    }

    /// Take `n` tokens if available. A failed acquire consumes nothing.
    pub fn acquire(&self, n: u32) -> bool {
        let mut state = self.state.lock().unwrap();
        Self::refill(&self.limit, &mut state);
        if state.tokens >= n as f64 {
            state.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    /// Time until `n` tokens would be available.
    pub fn wait_time(&self, n: u32) -> Duration {
        let mut state = self.state.lock().unwrap();
        Self::refill(&self.limit, &mut state);
        if state.tokens >= n as f64 {
            return Duration::ZERO;
        }
        let needed = n as f64 - state.tokens;
        Duration::from_secs_f64(needed / self.limit.refill_rate())
    }

    /// Current token count; diagnostic only.
    pub fn available(&self) -> f64 {
        let mut state = self.state.lock().unwrap();
        Self::refill(&self.limit, &mut state);
        state.tokens
    }
}

/// Load tiers applied by [`AdaptiveBucket`].
const HIGH_LOAD_THRESHOLD: f64 = 0.8;
const CRITICAL_LOAD_THRESHOLD: f64 = 0.95;

/// Bucket whose effective limit degrades under host load: above the critical
/// threshold capacity drops to 10% and the period doubles; above the high
/// threshold capacity halves and the period grows by half.
pub struct AdaptiveBucket {
    base: RateLimit,
    state: Mutex<BucketState>,
    load: LoadSampler,
}

impl AdaptiveBucket {
    pub fn new(base: RateLimit, load: LoadSampler) -> Self {
        AdaptiveBucket {
            state: Mutex::new(BucketState { tokens: base.capacity(), last_refill: Instant::now() }),
            base,
            load,
        }
    }

    fn effective_limit(&self, load: f64) -> RateLimit {
        if load > CRITICAL_LOAD_THRESHOLD {
            RateLimit {
                calls: ((self.base.calls as f64 * 0.1) as u32).max(1),
                period: self.base.period * 2.0,
                burst: self.base.burst.map(|b| ((b as f64 * 0.1) as u32).max(1)),
            }
        } else if load > HIGH_LOAD_THRESHOLD {
            RateLimit {
                calls: ((self.base.calls as f64 * 0.5) as u32).max(1),
                period: self.base.period * 1.5,
                burst: self.base.burst.map(|b| ((b as f64 * 0.5) as u32).max(1)),
            }
        } else {
            self.base
        }
    }

    pub fn acquire(&self, n: u32) -> bool {
        let limit = self.effective_limit((self.load)());
        let mut state = self.state.lock().unwrap();
        TokenBucket::refill(&limit, &mut state);
        state.tokens = state.tokens.min(limit.capacity());
        if state.tokens >= n as f64 {
            state.tokens -= n as f64;
            true
        } else {
            false
        }
    }

    pub fn wait_time(&self, n: u32) -> Duration {
        let limit = self.effective_limit((self.load)());
        let mut state = self.state.lock().unwrap();
        TokenBucket::refill(&limit, &mut state);
        let tokens = state.tokens.min(limit.capacity());
        if tokens >= n as f64 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64((n as f64 - tokens) / limit.refill_rate())
    }
}

enum Limiter {
    Fixed(TokenBucket),
    Adaptive(AdaptiveBucket),
}

impl Limiter {
    fn acquire(&self, n: u32) -> bool {
        match self {
            Limiter::Fixed(b) => b.acquire(n),
            Limiter::Adaptive(b) => b.acquire(n),
        }
    }

    fn wait_time(&self, n: u32) -> Duration {
        match self {
            Limiter::Fixed(b) => b.wait_time(n),
            Limiter::Adaptive(b) => b.wait_time(n),
        }
    }
}

/// Where a scan request originated; decides which class governs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanContext {
    User,
    Background,
    Api,
    /// No context given; treated as user-initiated (permissive).
    Auto,
}

/// Per-operation-class rate limit manager.
pub struct RateLimitManager {
    limiters: Mutex<HashMap<String, Arc<Limiter>>>,
    load: LoadSampler,
}

impl RateLimitManager {
    /// Build a manager with the built-in class table.
    pub fn with_defaults(load: LoadSampler) -> Self {
        let manager = RateLimitManager { limiters: Mutex::new(HashMap::new()), load };

        // User-initiated operations: generous, bursty.
        manager.configure("user_file_scan", RateLimit::with_burst(5000, 60.0, 1000), false);
        manager.configure("user_directory_scan", RateLimit::with_burst(100, 60.0, 50), false);
        manager.configure("quick_scan", RateLimit::with_burst(1000, 60.0, 200), false);
        manager.configure("full_scan", RateLimit::with_burst(500, 60.0, 100), false);
        manager.configure("interactive_scan", RateLimit::with_burst(10000, 60.0, 2000), false);

        // Background and scheduled operations: modest, host-protective.
        manager.configure("background_scan", RateLimit::with_burst(50, 60.0, 10), true);
        manager.configure("scheduled_scan", RateLimit::with_burst(10, 60.0, 3), true);

        // Fallback classes.
        manager.configure("file_scan", RateLimit::with_burst(1000, 60.0, 200), false);
        manager.configure("directory_scan", RateLimit::with_burst(50, 60.0, 20), false);

        // System operations.
        manager.configure("signature_update", RateLimit::new(1, 3600.0), false);
        manager.configure("quarantine_action", RateLimit::with_burst(50, 60.0, 10), false);
        manager.configure("system_command", RateLimit::with_burst(10, 60.0, 3), false);

        // API operations: strict.
        manager.configure("api_scan_request", RateLimit::with_burst(20, 60.0, 5), false);

        manager
    }

    /// Install or replace the bucket for one class.
    pub fn configure(&self, class: &str, limit: RateLimit, adaptive: bool) {
        let limiter = if adaptive {
            Limiter::Adaptive(AdaptiveBucket::new(limit, Arc::clone(&self.load)))
        } else {
            Limiter::Fixed(TokenBucket::new(limit))
        };
        self.limiters.lock().unwrap().insert(class.to_string(), Arc::new(limiter));
    }

    /// Apply `[rate_limits.<class>]` overrides from the config file.
    pub fn apply_overrides(&self, overrides: &HashMap<String, RateLimitOverride>) {
        for (class, o) in overrides {
            let limit = RateLimit { calls: o.calls, period: o.period, burst: o.burst };
            self.configure(class, limit, o.adaptive);
            vigil_log!(
                Level::Info,
                "ratelimit",
                "Applied custom limit for {}: {}/{}s (burst {:?})",
                class,
                o.calls,
                o.period,
                o.burst
            );
        }
    }

    fn limiter(&self, class: &str) -> Option<Arc<Limiter>> {
        self.limiters.lock().unwrap().get(class).cloned()
    }

    /// Acquire `n` tokens for an operation class. Classes without a
    /// configured bucket are allowed through with a warning.
    pub fn acquire(&self, class: &str, n: u32) -> bool {
        match self.limiter(class) {
            Some(limiter) => limiter.acquire(n),
            None => {
                log::warn!("No rate limit configured for class: {}", class);
                true
            }
        }
    }

    /// Suggested wait before `n` tokens become available.
    pub fn wait_time(&self, class: &str) -> Duration {
        self.wait_time_n(class, 1)
    }

    pub fn wait_time_n(&self, class: &str, n: u32) -> Duration {
        self.limiter(class).map(|l| l.wait_time(n)).unwrap_or(Duration::ZERO)
    }

    /// Map `(operation, context)` to a class, try to acquire, and phrase the
    /// outcome. Returns `(allowed, message)`.
    pub fn smart_acquire(&self, operation: &str, context: ScanContext, n: u32) -> (bool, String) {
        let context = match context {
            ScanContext::Auto => ScanContext::User,
            other => other,
        };
        let class = Self::map_class(operation, context);

        if self.acquire(&class, n) {
            return (true, format!("Operation '{}' approved ({:?} context)", operation, context));
        }

        let wait = self.wait_time_n(&class, n);
        let secs = wait.as_secs_f64();
        let message = match context {
            ScanContext::User | ScanContext::Auto => format!(
                "System is busy with {}. You can continue in {:.1} seconds, or try a quick scan instead.",
                operation, secs
            ),
            ScanContext::Background => format!(
                "Background {} deferred for {:.1} seconds to prioritize user operations.",
                operation, secs
            ),
            ScanContext::Api => {
                format!("Rate limit reached for {}. Please wait {:.1} seconds.", operation, secs)
            }
        };
        (false, message)
    }

    /// Class governing a generic operation in a given context.
    pub fn map_class(operation: &str, context: ScanContext) -> String {
        let mapped = match context {
            ScanContext::User | ScanContext::Auto => match operation {
                "file_scan" => "user_file_scan",
                "directory_scan" => "user_directory_scan",
                "scan" => "interactive_scan",
                "quick_scan" => "quick_scan",
                "full_scan" => "full_scan",
                other => other,
            },
            ScanContext::Background => match operation {
                "file_scan" => "background_scan",
                "directory_scan" | "quick_scan" | "full_scan" => "scheduled_scan",
                "scan" => "background_scan",
                other => other,
            },
            ScanContext::Api => match operation {
                "file_scan" | "directory_scan" | "scan" => "api_scan_request",
                other => other,
            },
        };
        mapped.to_string()
    }

    /// Current configuration, class name → limit, for status surfaces.
    pub fn current_limits(&self) -> Vec<String> {
        self.limiters.lock().unwrap().keys().cloned().collect()
    }
}
