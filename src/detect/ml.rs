// src/detect/ml.rs

//! Score-threshold detection engine.
//!
//! Wraps any scorer producing a confidence in `[0, 1]`; bytes scoring at or
//! above the threshold are reported infected with the model name and score
//! embedded in the threat name. The default scorer flags high-entropy
//! payloads, a cheap stand-in until an external model is wired in.

use std::path::Path;

use async_trait::async_trait;

use super::{DetectionEngine, Verdict};

pub type Scorer = Box<dyn Fn(&[u8]) -> f64 + Send + Sync>;

pub struct MlEngine {
    model_name: String,
    model_version: String,
    threshold: f64,
    scorer: Scorer,
}

impl MlEngine {
    pub fn new(
        model_name: impl Into<String>,
        model_version: impl Into<String>,
        threshold: f64,
        scorer: Scorer,
    ) -> Self {
        MlEngine {
            model_name: model_name.into(),
            model_version: model_version.into(),
            threshold: threshold.clamp(0.0, 1.0),
            scorer,
        }
    }

    /// Built-in scorer: normalized Shannon entropy of the byte histogram.
    /// Packed or encrypted payloads sit near 1.0, text near 0.5.
    pub fn entropy(threshold: f64) -> Self {
        Self::new("entropy", "1", threshold, Box::new(shannon_entropy_normalized))
    }

    pub fn score(&self, data: &[u8]) -> f64 {
        (self.scorer)(data).clamp(0.0, 1.0)
    }
}

fn shannon_entropy_normalized(data: &[u8]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut counts = [0u64; 256];
    for &b in data {
        counts[b as usize] += 1;
    }
    let len = data.len() as f64;
    let mut bits = 0.0;
    for &c in counts.iter().filter(|&&c| c > 0) {
        let p = c as f64 / len;
        bits -= p * p.log2();
    }
    bits / 8.0
}

#[async_trait]
impl DetectionEngine for MlEngine {
    fn name(&self) -> &str {
        "ml"
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn engine_version(&self) -> (String, String) {
        (self.model_name.clone(), self.model_version.clone())
    }

    async fn scan_bytes(&self, data: &[u8], _path_hint: &Path) -> Verdict {
        let score = self.score(data);
        if score >= self.threshold {
            Verdict::infected(format!(
                "Heur.{}:{} score={:.2}",
                self.model_name, self.model_version, score
            ))
        } else {
            Verdict::Clean
        }
    }

    async fn update_signatures(&self) -> bool {
        true
    }
}
