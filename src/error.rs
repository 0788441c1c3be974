// src/error.rs

//! Error taxonomy shared across the scanning core.
//!
//! Recoverable per-file failures become [`ScanError`] values attached to a
//! `FileResult`; they never abort the surrounding scan. Structural failures
//! (unreadable cache, quarantine index disagreement) carry their own kinds so
//! callers can decide whether to degrade or stop.

use std::time::Duration;

use thiserror::Error;

/// Per-file and per-scan failure modes.
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("blocked by policy: {0}")]
    Policy(String),

    #[error("I/O failure: {0}")]
    Io(#[from] std::io::Error),

    #[error("timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited, retry in {0:?}")]
    RateLimited(Duration),

    #[error("detection backend failure: {0}")]
    Backend(String),

    #[error("persisted cache unreadable: {0}")]
    CacheCorrupt(String),

    #[error("quarantine index and files directory disagree: {0}")]
    QuarantineConflict(String),

    #[error("scan cancelled")]
    Cancelled,
}

/// Discriminant-only view of [`ScanError`], used where a verdict records the
/// failure class without owning the underlying error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum ScanErrorKind {
    NotFound,
    Policy,
    Io,
    Timeout,
    RateLimited,
    Backend,
    CacheCorrupt,
    QuarantineConflict,
    Cancelled,
}

impl ScanError {
    pub fn kind(&self) -> ScanErrorKind {
        match self {
            ScanError::NotFound(_) => ScanErrorKind::NotFound,
            ScanError::Policy(_) => ScanErrorKind::Policy,
            ScanError::Io(_) => ScanErrorKind::Io,
            ScanError::Timeout(_) => ScanErrorKind::Timeout,
            ScanError::RateLimited(_) => ScanErrorKind::RateLimited,
            ScanError::Backend(_) => ScanErrorKind::Backend,
            ScanError::CacheCorrupt(_) => ScanErrorKind::CacheCorrupt,
            ScanError::QuarantineConflict(_) => ScanErrorKind::QuarantineConflict,
            ScanError::Cancelled => ScanErrorKind::Cancelled,
        }
    }
}

impl std::fmt::Display for ScanErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ScanErrorKind::NotFound => "not_found",
            ScanErrorKind::Policy => "policy",
            ScanErrorKind::Io => "io",
            ScanErrorKind::Timeout => "timeout",
            ScanErrorKind::RateLimited => "rate_limited",
            ScanErrorKind::Backend => "backend",
            ScanErrorKind::CacheCorrupt => "cache_corrupt",
            ScanErrorKind::QuarantineConflict => "quarantine_conflict",
            ScanErrorKind::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}
