// src/detect/clamav.rs

//! Wrapper around an external ClamAV-compatible scanner binary.
//!
//! Bytes are streamed to the scanner over stdin (`clamscan -`); the exit code
//! and stdout carry the verdict:
//!   0 = clean, 1 = infected (stdout has `<path>: <name> FOUND`), 2 = error.
//! Signature updates run `freshclam` unprivileged first, then with a custom
//! database directory, then through the configured privileged helper.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::Level;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::types::SignatureConfig;
use crate::vigil_log;

use super::{DetectionEngine, Verdict};

pub struct ClamAvEngine {
    scanner: String,
    updater: String,
    helper: Option<String>,
    custom_db_dir: Option<PathBuf>,
    scan_timeout: Duration,
}

impl ClamAvEngine {
    pub fn new(cfg: &SignatureConfig, scan_timeout: Duration) -> Self {
        ClamAvEngine {
            scanner: cfg.scanner.clone(),
            updater: cfg.updater.clone(),
            helper: cfg.helper.clone(),
            custom_db_dir: cfg.custom_db_dir.clone(),
            scan_timeout,
        }
    }

    /// Parse scanner output for a single submission.
    fn parse_output(stdout: &str, stderr: &str, code: Option<i32>) -> Verdict {
        match code {
            Some(0) => Verdict::Clean,
            Some(1) => {
                // stdout line format: "<path>: <name> FOUND"
                for line in stdout.lines() {
                    if let Some(rest) = line.strip_suffix(" FOUND") {
                        if let Some((_, name)) = rest.rsplit_once(": ") {
                            return Verdict::infected(name.trim());
                        }
                    }
                }
                Verdict::infected("Unknown")
            }
            Some(2) => Verdict::backend_error(if stderr.is_empty() {
                stdout.trim().to_string()
            } else {
                stderr.trim().to_string()
            }),
            other => Verdict::backend_error(format!("scanner exited with {:?}", other)),
        }
    }

    async fn run_scanner(&self, data: &[u8]) -> std::io::Result<Verdict> {
        let mut child = Command::new(&self.scanner)
            .args(["--no-summary", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            // The scanner may close stdin early on oversized input; that is
            // its verdict to make, not a failure here.
            let _ = stdin.write_all(data).await;
            let _ = stdin.shutdown().await;
        }

        let output = child.wait_with_output().await?;
        Ok(Self::parse_output(
            &String::from_utf8_lossy(&output.stdout),
            &String::from_utf8_lossy(&output.stderr),
            output.status.code(),
        ))
    }

    /// True when the updater's output means the database is already current.
    fn output_says_up_to_date(text: &str) -> bool {
        let lower = text.to_lowercase();
        lower.contains("is up to date") || lower.contains("database is up-to-date")
    }

    async fn run_update(&self, cmd: &mut Command) -> Option<bool> {
        let out = match cmd.output().await {
            Ok(out) => out,
            Err(e) => {
                vigil_log!(Level::Warn, "detect", "Update command failed to spawn: {}", e);
                return None;
            }
        };
        let combined = format!(
            "{}{}",
            String::from_utf8_lossy(&out.stdout),
            String::from_utf8_lossy(&out.stderr)
        );
        if out.status.success() || Self::output_says_up_to_date(&combined) {
            return Some(true);
        }
        vigil_log!(
            Level::Warn,
            "detect",
            "Update attempt failed (code {:?}): {}",
            out.status.code(),
            combined.trim()
        );
        None
    }
}

#[async_trait]
impl DetectionEngine for ClamAvEngine {
    fn name(&self) -> &str {
        "clamav"
    }

    async fn is_available(&self) -> bool {
        Command::new(&self.scanner)
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    async fn engine_version(&self) -> (String, String) {
        // `clamscan --version` prints e.g. "ClamAV 1.3.1/27284/Tue Jul 29 ..."
        let out = Command::new(&self.scanner).arg("--version").output().await;
        if let Ok(out) = out {
            if out.status.success() {
                let text = String::from_utf8_lossy(&out.stdout);
                let line = text.lines().next().unwrap_or_default();
                let mut parts = line.trim().splitn(3, '/');
                let engine = parts.next().unwrap_or("unknown").trim().to_string();
                let signatures = parts.next().unwrap_or("unknown").trim().to_string();
                return (engine, signatures);
            }
        }
        ("unknown".into(), "unknown".into())
    }

    async fn scan_bytes(&self, data: &[u8], path_hint: &Path) -> Verdict {
        let started = std::time::Instant::now();
        let verdict = match tokio::time::timeout(self.scan_timeout, self.run_scanner(data)).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => Verdict::backend_error(e.to_string()),
            Err(_) => Verdict::Timeout,
        };
        vigil_log!(
            Level::Debug,
            "detect",
            "{:?} → {} in {:?}",
            path_hint,
            verdict.label(),
            started.elapsed()
        );
        verdict
    }

    async fn update_signatures(&self) -> bool {
        vigil_log!(Level::Info, "detect", "Starting signature database update");

        // Unprivileged first.
        if let Some(ok) = self.run_update(Command::new(&self.updater).arg("--verbose")).await {
            return ok;
        }

        // User-writable database directory next.
        if let Some(dir) = &self.custom_db_dir {
            let mut cmd = Command::new(&self.updater);
            cmd.arg("--verbose").arg("--datadir").arg(dir);
            if let Some(ok) = self.run_update(&mut cmd).await {
                return ok;
            }
        }

        // Privileged helper as the last resort: `<helper> <updater> --verbose`.
        if let Some(helper) = &self.helper {
            let mut cmd = Command::new(helper);
            cmd.arg(&self.updater).arg("--verbose");
            if let Some(ok) = self.run_update(&mut cmd).await {
                return ok;
            }
        }

        log::error!("All signature update attempts failed");
        false
    }
}
