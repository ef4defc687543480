//! Run identity and the stage vocabulary.
//!
//! A run is the audit unit: every stage artifact is written under its
//! `run_id`, and a re-run with the same `(run_id, date)` upserts safely.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Stage
// ---------------------------------------------------------------------------

/// Pipeline stages in execution order. The orchestrator is the only place
/// that knows this ordering; everything else consumes single stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Stage {
    S0Quality,
    S1Universe,
    S2Signals,
    S3Screener,
    S4Ranker,
    S5Portfolio,
    S6Planning,
    S6RiskGate,
    S7Audit,
}

impl Stage {
    pub const ALL: [Stage; 9] = [
        Stage::S0Quality,
        Stage::S1Universe,
        Stage::S2Signals,
        Stage::S3Screener,
        Stage::S4Ranker,
        Stage::S5Portfolio,
        Stage::S6Planning,
        Stage::S6RiskGate,
        Stage::S7Audit,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::S0Quality => "S0_QUALITY",
            Stage::S1Universe => "S1_UNIVERSE",
            Stage::S2Signals => "S2_SIGNALS",
            Stage::S3Screener => "S3_SCREENER",
            Stage::S4Ranker => "S4_RANKER",
            Stage::S5Portfolio => "S5_PORTFOLIO",
            Stage::S6Planning => "S6_PLANNING",
            Stage::S6RiskGate => "S6_RISK_GATE",
            Stage::S7Audit => "S7_AUDIT",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Stage::ALL.into_iter().find(|st| st.as_str() == s)
    }

    /// S7 never aborts a run regardless of config.
    pub fn is_always_advisory(&self) -> bool {
        matches!(self, Stage::S7Audit)
    }
}

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// Monotonically sortable run identifier: `run_{YYYYMMDDhhmmss}_{6hex}`.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(String);

impl RunId {
    /// Assemble from a timestamp and a 6-hex-char suffix. The suffix comes
    /// from the orchestrator's RNG; this type only enforces the format.
    pub fn compose(ts: DateTime<Utc>, suffix: &str) -> Option<Self> {
        if suffix.len() != 6 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(RunId(format!(
            "run_{}_{}",
            ts.format("%Y%m%d%H%M%S"),
            suffix.to_ascii_lowercase()
        )))
    }

    /// Parse and validate an existing id.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix("run_")?;
        let (ts, suffix) = rest.split_once('_')?;
        if ts.len() != 14 || !ts.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        if suffix.len() != 6 || !suffix.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        Some(RunId(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// RunRecord
// ---------------------------------------------------------------------------

/// The run row: identity plus the inputs that make a run reproducible.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub run_id: RunId,
    pub date: NaiveDate,
    pub git_sha: String,
    pub feature_version: String,
    /// Total capital in integer KRW.
    pub capital: i64,
    pub dry_run: bool,
    pub started_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn compose_and_parse_round_trip() {
        let ts = Utc.with_ymd_and_hms(2025, 7, 1, 9, 30, 0).unwrap();
        let id = RunId::compose(ts, "a3f01b").unwrap();
        assert_eq!(id.as_str(), "run_20250701093000_a3f01b");
        assert_eq!(RunId::parse(id.as_str()), Some(id));
    }

    #[test]
    fn compose_rejects_bad_suffix() {
        let ts = Utc.with_ymd_and_hms(2025, 7, 1, 9, 30, 0).unwrap();
        assert!(RunId::compose(ts, "xyz").is_none());
        assert!(RunId::compose(ts, "gggggg").is_none());
    }

    #[test]
    fn parse_rejects_malformed() {
        assert!(RunId::parse("run_2025_aaaaaa").is_none());
        assert!(RunId::parse("20250701093000_a3f01b").is_none());
        assert!(RunId::parse("run_20250701093000").is_none());
    }

    #[test]
    fn ids_sort_by_timestamp() {
        let t1 = Utc.with_ymd_and_hms(2025, 7, 1, 9, 0, 0).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 7, 1, 10, 0, 0).unwrap();
        let a = RunId::compose(t1, "ffffff").unwrap();
        let b = RunId::compose(t2, "000000").unwrap();
        assert!(a < b, "later timestamp must sort after earlier");
    }

    #[test]
    fn stage_round_trip_and_order() {
        for st in Stage::ALL {
            assert_eq!(Stage::parse(st.as_str()), Some(st));
        }
        assert!(Stage::S0Quality < Stage::S7Audit);
        assert!(Stage::S7Audit.is_always_advisory());
        assert!(!Stage::S6RiskGate.is_always_advisory());
    }
}
