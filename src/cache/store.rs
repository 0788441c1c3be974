// src/cache/store.rs

//! SQLite persistence for the verdict cache.
//!
//! Opens the database with the same pragmas the rest of the system uses
//! (WAL, NORMAL sync, busy timeout) and rewrites the whole `cache_entries`
//! table inside one transaction on every persist, so a crash mid-write leaves
//! the previous generation intact.

use std::path::Path;

use rusqlite::{params, Connection};

use crate::detect::Verdict;
use crate::error::ScanErrorKind;

use super::{CacheEntry, CacheError};

pub fn open(path: &Path) -> Result<Connection, CacheError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.busy_timeout(std::time::Duration::from_millis(1_000))?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    conn.execute_batch(include_str!("../../resources/schema.sql"))?;
    Ok(conn)
}

/// Replace the table contents with `entries`. Returns the row count written.
pub fn persist_entries<'a>(
    conn: &mut Connection,
    entries: impl Iterator<Item = (&'a String, &'a CacheEntry)>,
) -> Result<usize, CacheError> {
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM cache_entries", [])?;

    let mut written = 0usize;
    {
        let mut stmt = tx.prepare_cached(
            "INSERT INTO cache_entries \
               (key, fingerprint, path, verdict, threat_name, threat_level, \
                engine, timestamp, signature_version, file_size, file_mtime, hits) \
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12)",
        )?;
        for (key, e) in entries {
            let (label, threat_name, threat_level) = verdict_columns(&e.verdict);
            stmt.execute(params![
                key,
                e.fingerprint,
                e.path.to_string_lossy(),
                label,
                threat_name,
                threat_level,
                e.engine,
                e.created_at,
                e.signature_version,
                e.file_size as i64,
                e.file_mtime,
                e.hits as i64,
            ])?;
            written += 1;
        }
    }

    tx.commit()?;
    Ok(written)
}

/// Read every row back as `(key, entry)` pairs, unfiltered. TTL and signature
/// filtering happens in the cache, which knows the current version.
pub fn load_entries(conn: &Connection) -> Result<Vec<(String, CacheEntry)>, CacheError> {
    let mut stmt = conn.prepare(
        "SELECT key, fingerprint, path, verdict, threat_name, threat_level, \
                engine, timestamp, signature_version, file_size, file_mtime, hits \
         FROM cache_entries",
    )?;

    let rows = stmt.query_map([], |row| {
        let key: String = row.get(0)?;
        let label: String = row.get(3)?;
        let threat_name: Option<String> = row.get(4)?;
        let entry = CacheEntry {
            fingerprint: row.get(1)?,
            path: std::path::PathBuf::from(row.get::<_, String>(2)?),
            verdict: verdict_from_columns(&label, threat_name.as_deref()),
            engine: row.get(6)?,
            created_at: row.get(7)?,
            signature_version: row.get(8)?,
            file_size: row.get::<_, i64>(9)? as u64,
            file_mtime: row.get(10)?,
            hits: row.get::<_, i64>(11)? as u64,
        };
        Ok((key, entry))
    })?;

    let mut out = Vec::new();
    for row in rows {
        out.push(row?);
    }
    Ok(out)
}

fn verdict_columns(verdict: &Verdict) -> (&'static str, Option<String>, f64) {
    match verdict {
        Verdict::Clean => ("clean", None, 0.0),
        Verdict::Infected { name, .. } => ("infected", Some(name.clone()), 1.0),
        Verdict::Error { message, .. } => ("error", Some(message.clone()), 0.0),
        Verdict::Timeout => ("timeout", None, 0.0),
    }
}

fn verdict_from_columns(label: &str, threat_name: Option<&str>) -> Verdict {
    match label {
        "infected" => Verdict::infected(threat_name.unwrap_or("Unknown")),
        "error" => Verdict::Error {
            kind: ScanErrorKind::Backend,
            message: threat_name.unwrap_or_default().to_string(),
        },
        "timeout" => Verdict::Timeout,
        _ => Verdict::Clean,
    }
}
