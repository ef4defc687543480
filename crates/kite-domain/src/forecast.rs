//! Forecast subsystem entities: events, forward performance, stats levels,
//! predictions.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    E1Surge,
    E2GapSurge,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::E1Surge => "E1_SURGE",
            EventType::E2GapSurge => "E2_GAP_SURGE",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "E1_SURGE" => Some(EventType::E1Surge),
            "E2_GAP_SURGE" => Some(EventType::E2GapSurge),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapBucket {
    Small,
    Mid,
    Large,
}

impl CapBucket {
    pub fn as_str(&self) -> &'static str {
        match self {
            CapBucket::Small => "small",
            CapBucket::Mid => "mid",
            CapBucket::Large => "large",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "small" => Some(CapBucket::Small),
            "mid" => Some(CapBucket::Mid),
            "large" => Some(CapBucket::Large),
            _ => None,
        }
    }
}

/// Aggregation levels, declared in fallback order: the predictor walks this
/// list and stops at the first level with enough samples.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StatsLevel {
    Symbol,
    Sector,
    Bucket,
    Market,
}

impl StatsLevel {
    /// Fallback order SYMBOL → SECTOR → BUCKET → MARKET.
    pub const FALLBACK: [StatsLevel; 4] = [
        StatsLevel::Symbol,
        StatsLevel::Sector,
        StatsLevel::Bucket,
        StatsLevel::Market,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StatsLevel::Symbol => "SYMBOL",
            StatsLevel::Sector => "SECTOR",
            StatsLevel::Bucket => "BUCKET",
            StatsLevel::Market => "MARKET",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        StatsLevel::FALLBACK.into_iter().find(|l| l.as_str() == s)
    }
}

// ---------------------------------------------------------------------------
// ForecastEvent
// ---------------------------------------------------------------------------

/// A detected event, unique by `(code, event_date, event_type)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastEvent {
    pub code: String,
    pub event_date: NaiveDate,
    pub event_type: EventType,
    pub day_return: f64,
    /// (close − low) / (high − low), 1.0 when the bar has no range.
    pub close_to_high: f64,
    /// (open − prev_close) / prev_close.
    pub gap_ratio: f64,
    /// 20-day volume z-score, when volume stats were available.
    pub volume_z: Option<f64>,
    pub sector: String,
    pub cap_bucket: CapBucket,
}

impl ForecastEvent {
    /// Stable identity string used as the persistence key.
    pub fn event_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.code,
            self.event_date,
            self.event_type.as_str()
        )
    }
}

// ---------------------------------------------------------------------------
// ForwardPerformance
// ---------------------------------------------------------------------------

/// Realized forward performance for one event, unique per event key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForwardPerformance {
    pub event_key: String,
    pub fwd_ret_1d: f64,
    pub fwd_ret_2d: f64,
    pub fwd_ret_3d: f64,
    pub fwd_ret_5d: f64,
    pub max_runup_5d: f64,
    pub max_drawdown_5d: f64,
    pub gap_hold_3d: bool,
}

// ---------------------------------------------------------------------------
// ForecastStats
// ---------------------------------------------------------------------------

/// Aggregated statistics for `(level, key, event_type)`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ForecastStats {
    pub level: StatsLevel,
    /// Code for SYMBOL, sector name for SECTOR, bucket for BUCKET, market
    /// for MARKET ("ALL").
    pub key: String,
    pub event_type: EventType,
    pub sample_count: u64,
    pub avg_ret_1d: f64,
    pub avg_ret_5d: f64,
    pub win_rate_1d: f64,
    pub win_rate_5d: f64,
    pub avg_runup_5d: f64,
    /// 10th percentile of max_drawdown_5d (a negative number).
    pub p10_mdd: f64,
}

// ---------------------------------------------------------------------------
// Prediction
// ---------------------------------------------------------------------------

/// Predictor output for one event under one model version.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub event_key: String,
    pub model_version: String,
    pub expected_ret_1d: f64,
    pub expected_ret_5d: f64,
    /// min(1, sample_count / 30).
    pub confidence: f64,
    pub p10_mdd: f64,
    pub expected_runup_5d: f64,
    pub fallback_level: StatsLevel,
}
