// src/quarantine/index.rs

//! On-disk quarantine index with HMAC integrity checks.
//!
//! The index is a single JSON document rewritten atomically (temp file +
//! rename) on every mutation. Records are kept in a `BTreeMap` so the
//! serialized form is deterministic before signing.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use super::QuarantineError;

type HmacSha256 = Hmac<Sha256>;
static INDEX_HMAC_KEY: &[u8] = b"vigil_quarantine_index_v1";

/// Durable description of one quarantined payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineRecord {
    pub quarantine_id: String,
    pub original_path: PathBuf,
    pub stored_path: PathBuf,
    pub threat_name: String,
    pub file_size: u64,
    pub sha256: String,
    /// Unix seconds at quarantine time.
    pub quarantined_at: i64,
}

/// Wrapper that holds the serialized records and their signature.
#[derive(Serialize, Deserialize)]
struct IndexWrapper {
    records: BTreeMap<String, QuarantineRecord>,
    signature: String,
}

fn compute_signature(data: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(INDEX_HMAC_KEY)
        .expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Load the index, verifying the signature before trusting its contents.
pub fn load(path: &Path) -> Result<BTreeMap<String, QuarantineRecord>, QuarantineError> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let raw = fs::read_to_string(path)?;
    let wrapper: IndexWrapper = serde_json::from_str(&raw)
        .map_err(|e| QuarantineError::Index(format!("index parse failed: {}", e)))?;
    let payload = serde_json::to_string_pretty(&wrapper.records)
        .map_err(|e| QuarantineError::Index(e.to_string()))?;
    if compute_signature(&payload) != wrapper.signature {
        return Err(QuarantineError::Index("index signature mismatch".into()));
    }
    Ok(wrapper.records)
}

/// Write the index atomically: serialize + sign into a temp file in the same
/// directory, then rename over the old index.
pub fn save(path: &Path, records: &BTreeMap<String, QuarantineRecord>) -> Result<(), QuarantineError> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent)?;

    let payload = serde_json::to_string_pretty(records)
        .map_err(|e| QuarantineError::Index(e.to_string()))?;
    let wrapper = IndexWrapper { records: records.clone(), signature: compute_signature(&payload) };
    let serialized = serde_json::to_string_pretty(&wrapper)
        .map_err(|e| QuarantineError::Index(e.to_string()))?;

    let tmp = tempfile::NamedTempFile::new_in(parent)?;
    fs::write(tmp.path(), serialized.as_bytes())?;
    tmp.persist(path).map_err(|e| QuarantineError::Io(e.error))?;
    Ok(())
}

/// Set aside an unreadable index file so a fresh one can be written without
/// destroying evidence.
pub fn sideline_corrupt(path: &Path) {
    let mut corrupt = path.as_os_str().to_owned();
    corrupt.push(".corrupt");
    if let Err(e) = fs::rename(path, PathBuf::from(&corrupt)) {
        log::warn!("Could not sideline corrupt index {:?}: {}", path, e);
    } else {
        log::warn!("Corrupt quarantine index moved to {:?}", corrupt);
    }
}
