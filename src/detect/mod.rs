// src/detect/mod.rs

//! Detection engine adapter.
//!
//! The core never implements malware matching itself; it submits file bytes
//! to a [`DetectionEngine`] and consumes the returned [`Verdict`]. Two
//! implementations ship in-tree: a wrapper around an external signature
//! scanner binary and an optional score-threshold engine. `CombinedEngine`
//! merges them: an infected verdict from either side wins.

pub mod clamav;
pub mod ml;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::{ScanError, ScanErrorKind};

pub use clamav::ClamAvEngine;
pub use ml::MlEngine;

/// Broad family of a named threat, derived from the signature name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ThreatFamily {
    Trojan,
    Virus,
    AdwarePup,
    Ransomware,
    Rootkit,
    Spyware,
    Exploit,
    Malware,
}

impl std::fmt::Display for ThreatFamily {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ThreatFamily::Trojan => "Trojan",
            ThreatFamily::Virus => "Virus",
            ThreatFamily::AdwarePup => "Adware/PUP",
            ThreatFamily::Ransomware => "Ransomware",
            ThreatFamily::Rootkit => "Rootkit",
            ThreatFamily::Spyware => "Spyware",
            ThreatFamily::Exploit => "Exploit",
            ThreatFamily::Malware => "Malware",
        };
        f.write_str(s)
    }
}

/// Classify a threat family from a signature name by substring matching.
pub fn classify_threat(threat_name: &str) -> ThreatFamily {
    let name = threat_name.to_lowercase();
    if name.contains("trojan") || name.contains("backdoor") {
        ThreatFamily::Trojan
    } else if name.contains("virus") || name.contains("worm") {
        ThreatFamily::Virus
    } else if name.contains("adware") || name.contains("pup") {
        ThreatFamily::AdwarePup
    } else if name.contains("ransomware") || name.contains("crypto") {
        ThreatFamily::Ransomware
    } else if name.contains("rootkit") {
        ThreatFamily::Rootkit
    } else if name.contains("spyware") {
        ThreatFamily::Spyware
    } else if name.contains("exploit") {
        ThreatFamily::Exploit
    } else {
        ThreatFamily::Malware
    }
}

/// The result of scanning one file. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Verdict {
    Clean,
    Infected { name: String, family: ThreatFamily },
    Error { kind: ScanErrorKind, message: String },
    Timeout,
}

impl Verdict {
    pub fn infected(name: impl Into<String>) -> Self {
        let name = name.into();
        let family = classify_threat(&name);
        Verdict::Infected { name, family }
    }

    pub fn backend_error(message: impl Into<String>) -> Self {
        Verdict::Error { kind: ScanErrorKind::Backend, message: message.into() }
    }

    pub fn is_infected(&self) -> bool {
        matches!(self, Verdict::Infected { .. })
    }

    pub fn is_clean(&self) -> bool {
        matches!(self, Verdict::Clean)
    }

    /// Short tag used by the cache table and log lines.
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::Clean => "clean",
            Verdict::Infected { .. } => "infected",
            Verdict::Error { .. } => "error",
            Verdict::Timeout => "timeout",
        }
    }
}

/// Recoverable scan failures become error verdicts attached to the file's
/// result; a timeout keeps its dedicated variant.
impl From<ScanError> for Verdict {
    fn from(e: ScanError) -> Self {
        match e {
            ScanError::Timeout(_) => Verdict::Timeout,
            other => Verdict::Error { kind: other.kind(), message: other.to_string() },
        }
    }
}

/// Abstract interface over a malware-matching backend.
#[async_trait]
pub trait DetectionEngine: Send + Sync {
    /// Short identifier used in cache entries and log lines.
    fn name(&self) -> &str;

    /// Whether the backend can currently produce verdicts.
    async fn is_available(&self) -> bool;

    /// `(engine version, signature version)` of the backend.
    async fn engine_version(&self) -> (String, String);

    /// Produce a verdict for `data`. `path_hint` is informational only; the
    /// backend must not read the path itself.
    async fn scan_bytes(&self, data: &[u8], path_hint: &Path) -> Verdict;

    /// Refresh the backend's signature database. Returns true when the
    /// database is current afterwards (including "already up to date").
    async fn update_signatures(&self) -> bool;
}

/// Signature engine plus optional second-opinion engine. An `Infected` from
/// either produces an infected verdict; backend failures from the primary
/// engine are reported as-is rather than masked by a clean secondary result.
pub struct CombinedEngine {
    primary: Arc<dyn DetectionEngine>,
    secondary: Option<Arc<dyn DetectionEngine>>,
}

impl CombinedEngine {
    pub fn new(primary: Arc<dyn DetectionEngine>, secondary: Option<Arc<dyn DetectionEngine>>) -> Self {
        CombinedEngine { primary, secondary }
    }
}

#[async_trait]
impl DetectionEngine for CombinedEngine {
    fn name(&self) -> &str {
        "hybrid"
    }

    async fn is_available(&self) -> bool {
        self.primary.is_available().await
    }

    async fn engine_version(&self) -> (String, String) {
        self.primary.engine_version().await
    }

    async fn scan_bytes(&self, data: &[u8], path_hint: &Path) -> Verdict {
        let first = self.primary.scan_bytes(data, path_hint).await;
        if first.is_infected() {
            return first;
        }
        if let Some(second) = &self.secondary {
            let opinion = second.scan_bytes(data, path_hint).await;
            if opinion.is_infected() {
                return opinion;
            }
        }
        first
    }

    async fn update_signatures(&self) -> bool {
        self.primary.update_signatures().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn families_from_names() {
        assert_eq!(classify_threat("Win.Trojan.Agent-123"), ThreatFamily::Trojan);
        assert_eq!(classify_threat("Unix.Worm.Mirai"), ThreatFamily::Virus);
        assert_eq!(classify_threat("PUA.Adware.Generic"), ThreatFamily::AdwarePup);
        assert_eq!(classify_threat("CryptoLocker.B"), ThreatFamily::Ransomware);
        assert_eq!(classify_threat("Linux.Rootkit.Azazel"), ThreatFamily::Rootkit);
        assert_eq!(classify_threat("OSX.Spyware.X"), ThreatFamily::Spyware);
        assert_eq!(classify_threat("JS.Exploit.CVE_2024"), ThreatFamily::Exploit);
        assert_eq!(classify_threat("Eicar-Test-Signature"), ThreatFamily::Malware);
    }

    #[test]
    fn verdict_labels() {
        assert_eq!(Verdict::Clean.label(), "clean");
        assert_eq!(Verdict::infected("Test.EICAR").label(), "infected");
        assert_eq!(Verdict::Timeout.label(), "timeout");
    }

    #[test]
    fn scan_errors_convert_to_verdicts() {
        use std::time::Duration;

        let v: Verdict = ScanError::Policy("symlink not allowed".into()).into();
        match v {
            Verdict::Error { kind, message } => {
                assert_eq!(kind, ScanErrorKind::Policy);
                assert!(message.contains("symlink"));
            }
            other => panic!("expected policy error, got {:?}", other),
        }

        let v: Verdict = ScanError::Timeout(Duration::from_secs(30)).into();
        assert_eq!(v, Verdict::Timeout);
    }
}
