//! Hard-cut screener.
//!
//! All predicates are conjunctive; a predicate whose threshold is 0 is
//! disabled (the strategy-file convention, centralized in
//! `ScreenerConfig::is_enabled`). A code missing the data an enabled
//! predicate needs is excluded with that predicate as the reason.

use std::collections::BTreeMap;

use kite_config::ScreenerConfig;

use crate::screener::Predicate::*;

// ---------------------------------------------------------------------------
// Inputs
// ---------------------------------------------------------------------------

/// Per-code screening inputs, pre-computed by the stage from fundamentals
/// and the price window.
#[derive(Clone, Debug, PartialEq)]
pub struct ScreenInput {
    pub code: String,
    pub per: Option<f64>,
    pub pbr: Option<f64>,
    pub roe: Option<f64>,
    /// 1-day close-to-close return.
    pub day1_return: Option<f64>,
    /// 5-day close-to-close return.
    pub day5_return: Option<f64>,
    /// 20-day return volatility (sample stdev).
    pub vol_20d: Option<f64>,
}

// ---------------------------------------------------------------------------
// Predicates
// ---------------------------------------------------------------------------

/// The predicate that first rejected a code, for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Predicate {
    MaxPer,
    MinPbr,
    MinRoe,
    MinDay1Return,
    Day5ReturnRange,
    VolPercentile,
}

impl Predicate {
    pub fn as_str(&self) -> &'static str {
        match self {
            MaxPer => "MAX_PER",
            MinPbr => "MIN_PBR",
            MinRoe => "MIN_ROE",
            MinDay1Return => "MIN_DAY1_RETURN",
            Day5ReturnRange => "DAY5_RETURN_RANGE",
            VolPercentile => "VOL_PERCENTILE",
        }
    }
}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

/// Survivors in input order plus a rejection map for diagnostics.
#[derive(Clone, Debug, PartialEq)]
pub struct ScreenResult {
    pub survivors: Vec<String>,
    pub rejections: BTreeMap<String, Predicate>,
}

impl ScreenResult {
    pub fn passed(&self, code: &str) -> bool {
        self.survivors.iter().any(|c| c == code)
    }
}

// ---------------------------------------------------------------------------
// Screen
// ---------------------------------------------------------------------------

/// Apply every enabled predicate to every input.
///
/// The volatility predicate is cross-sectional: a code's 20-day volatility
/// is ranked against all *inputs* (not just prior survivors, so the
/// percentile does not depend on predicate order).
pub fn screen(inputs: &[ScreenInput], cfg: &ScreenerConfig) -> ScreenResult {
    let vol_universe: Vec<f64> = inputs.iter().filter_map(|i| i.vol_20d).collect();

    let mut survivors = Vec::new();
    let mut rejections = BTreeMap::new();

    for input in inputs {
        match first_failure(input, cfg, &vol_universe) {
            None => survivors.push(input.code.clone()),
            Some(predicate) => {
                rejections.insert(input.code.clone(), predicate);
            }
        }
    }

    ScreenResult {
        survivors,
        rejections,
    }
}

/// The first failing predicate for one code, in the documented order.
fn first_failure(
    input: &ScreenInput,
    cfg: &ScreenerConfig,
    vol_universe: &[f64],
) -> Option<Predicate> {
    let enabled = ScreenerConfig::is_enabled;

    // 1) PER > 0 AND ≤ MaxPER
    if enabled(cfg.max_per) {
        match input.per {
            Some(per) if per > 0.0 && per <= cfg.max_per => {}
            _ => return Some(MaxPer),
        }
    }

    // 2) PBR ≥ MinPBR
    if enabled(cfg.min_pbr) {
        match input.pbr {
            Some(pbr) if pbr >= cfg.min_pbr => {}
            _ => return Some(MinPbr),
        }
    }

    // 3) ROE ≥ MinROE
    if enabled(cfg.min_roe) {
        match input.roe {
            Some(roe) if roe >= cfg.min_roe => {}
            _ => return Some(MinRoe),
        }
    }

    // 4) 1-day return ≥ MinDay1
    if enabled(cfg.min_day1_return) {
        match input.day1_return {
            Some(r) if r >= cfg.min_day1_return => {}
            _ => return Some(MinDay1Return),
        }
    }

    // 5) 5-day return ∈ [MinDay5, MaxDay5] — range enabled when either
    //    bound is set; an unset bound is unbounded on that side.
    let day5_lo = enabled(cfg.min_day5_return);
    let day5_hi = enabled(cfg.max_day5_return);
    if day5_lo || day5_hi {
        match input.day5_return {
            Some(r) => {
                if (day5_lo && r < cfg.min_day5_return) || (day5_hi && r > cfg.max_day5_return) {
                    return Some(Day5ReturnRange);
                }
            }
            None => return Some(Day5ReturnRange),
        }
    }

    // 6) 20-day volatility cross-sectional percentile < MaxVolPct
    if enabled(cfg.max_vol_percentile) {
        match input.vol_20d {
            Some(vol) => {
                let below = vol_universe.iter().filter(|v| **v < vol).count();
                let pct = if vol_universe.is_empty() {
                    0.0
                } else {
                    below as f64 / vol_universe.len() as f64
                };
                if pct >= cfg.max_vol_percentile {
                    return Some(VolPercentile);
                }
            }
            None => return Some(VolPercentile),
        }
    }

    None
}
