//! Append-only per-run audit log: JSON Lines, one event per line, with an
//! optional hash chain (each event records the previous event's hash and
//! its own, so truncation or tampering is detectable offline).

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuditEvent {
    pub seq: u64,
    pub run_id: String,
    pub ts_utc: DateTime<Utc>,
    pub event_type: String,
    pub payload: Value,
    pub hash_prev: Option<String>,
    pub hash_self: Option<String>,
}

/// Append-only audit writer for one run.
pub struct AuditLog {
    path: PathBuf,
    run_id: String,
    hash_chain: bool,
    last_hash: Option<String>,
    seq: u64,
}

impl AuditLog {
    /// Create `<dir>/<run_id>/audit.jsonl`, making parent dirs as needed.
    pub fn create(dir: impl AsRef<Path>, run_id: &str, hash_chain: bool) -> Result<Self> {
        let run_dir = dir.as_ref().join(run_id);
        fs::create_dir_all(&run_dir)
            .with_context(|| format!("create audit dir failed: {}", run_dir.display()))?;
        Ok(Self {
            path: run_dir.join("audit.jsonl"),
            run_id: run_id.to_string(),
            hash_chain,
            last_hash: None,
            seq: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Append one event. Never fails the caller's stage on its own — the
    /// orchestrator treats audit-write failures as advisory.
    pub fn append(&mut self, event_type: &str, payload: Value) -> Result<AuditEvent> {
        let mut ev = AuditEvent {
            seq: self.seq,
            run_id: self.run_id.clone(),
            ts_utc: Utc::now(),
            event_type: event_type.to_string(),
            payload,
            hash_prev: None,
            hash_self: None,
        };
        self.seq += 1;

        if self.hash_chain {
            ev.hash_prev = self.last_hash.clone();
            let hash = event_hash(&ev)?;
            ev.hash_self = Some(hash.clone());
            self.last_hash = Some(hash);
        }

        let line = serde_json::to_string(&ev).context("serialize audit event")?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("open audit log failed: {}", self.path.display()))?;
        writeln!(file, "{line}").context("append audit line failed")?;

        Ok(ev)
    }
}

/// Hash over the event with `hash_self` cleared (the field carries the
/// result and cannot participate in it).
fn event_hash(ev: &AuditEvent) -> Result<String> {
    let mut clone = ev.clone();
    clone.hash_self = None;
    let bytes = serde_json::to_vec(&clone).context("serialize for hash")?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Ok(hex::encode(hasher.finalize()))
}

/// Verify a written log's hash chain. Returns the number of verified
/// events; fails on the first broken link.
pub fn verify_chain(path: &Path) -> Result<u64> {
    let content = fs::read_to_string(path)
        .with_context(|| format!("read audit log failed: {}", path.display()))?;
    let mut prev_hash: Option<String> = None;
    let mut count = 0u64;

    for (i, line) in content.lines().enumerate() {
        let ev: AuditEvent =
            serde_json::from_str(line).with_context(|| format!("parse audit line {i}"))?;
        if ev.hash_prev != prev_hash {
            anyhow::bail!("hash chain broken at line {i}: prev mismatch");
        }
        let expected = event_hash(&ev)?;
        if ev.hash_self.as_deref() != Some(expected.as_str()) {
            anyhow::bail!("hash chain broken at line {i}: self mismatch");
        }
        prev_hash = ev.hash_self.clone();
        count += 1;
    }
    Ok(count)
}
