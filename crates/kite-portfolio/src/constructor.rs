//! Tiered weighting and target-portfolio assembly.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use kite_config::PortfolioConfig;
use kite_domain::{PositionAction, RankedStock, TargetPortfolio, TargetPosition, WEIGHT_EPSILON};

use crate::projection::project;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum ConstructError {
    /// Nothing ranked — a structural failure upstream.
    EmptyRanking,
    /// Capital must be positive to size target values.
    NonPositiveCapital { capital: i64 },
}

impl std::fmt::Display for ConstructError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConstructError::EmptyRanking => write!(f, "ranking is empty"),
            ConstructError::NonPositiveCapital { capital } => {
                write!(f, "capital must be > 0, got {capital}")
            }
        }
    }
}

impl std::error::Error for ConstructError {}

// ---------------------------------------------------------------------------
// Input
// ---------------------------------------------------------------------------

/// Everything the constructor needs for one date.
#[derive(Clone, Debug)]
pub struct ConstructionInput<'a> {
    pub date: NaiveDate,
    /// Ranked candidates, rank-ascending.
    pub ranked: &'a [RankedStock],
    /// code → sector, for the sector cap.
    pub sectors: &'a BTreeMap<String, String>,
    /// Previous portfolio weights (empty on cold start). Drives actions and
    /// the turnover guard, and produces exit rows for dropped holdings.
    pub previous: &'a BTreeMap<String, f64>,
    /// Total capital in KRW.
    pub capital: i64,
}

// ---------------------------------------------------------------------------
// Construction
// ---------------------------------------------------------------------------

/// Assign tier weights down the ranking: tier i gives `weight_each` to the
/// top `count` not-yet-assigned codes, stopping when tiers or codes run out.
fn tier_weights(ranked: &[RankedStock], cfg: &PortfolioConfig) -> BTreeMap<String, f64> {
    let mut weights = BTreeMap::new();
    let mut cursor = ranked.iter();
    for tier in &cfg.tiers {
        for _ in 0..tier.count {
            let Some(stock) = cursor.next() else {
                return weights;
            };
            weights.insert(stock.code.clone(), tier.weight_each);
        }
    }
    weights
}

/// Build the target portfolio: tier weighting, constraint projection, then
/// position assembly with actions against the previous weights.
///
/// Exited holdings (in `previous`, absent from the projected weights) are
/// carried as zero-weight SELL rows so the planner can liquidate them; they
/// contribute nothing to the weight-sum invariant.
pub fn construct(
    input: ConstructionInput<'_>,
    cfg: &PortfolioConfig,
) -> Result<TargetPortfolio, ConstructError> {
    if input.ranked.is_empty() {
        return Err(ConstructError::EmptyRanking);
    }
    if input.capital <= 0 {
        return Err(ConstructError::NonPositiveCapital {
            capital: input.capital,
        });
    }

    let raw = tier_weights(input.ranked, cfg);
    let projected = project(&raw, input.sectors, input.previous, cfg);

    let mut positions = Vec::new();
    for (code, weight) in &projected.weights {
        let prev = input.previous.get(code).copied().unwrap_or(0.0);
        let (action, reason) = if prev == 0.0 {
            (PositionAction::Buy, "entered ranking".to_string())
        } else if weight > &(prev + WEIGHT_EPSILON) {
            (PositionAction::Buy, format!("weight up from {prev:.4}"))
        } else if weight < &(prev - WEIGHT_EPSILON) {
            (PositionAction::Sell, format!("weight down from {prev:.4}"))
        } else {
            (PositionAction::Hold, "unchanged".to_string())
        };
        positions.push(TargetPosition {
            code: code.clone(),
            weight: *weight,
            target_value: (*weight * input.capital as f64).round() as i64,
            action,
            reason,
        });
    }

    // Exits: held yesterday, not in today's projection.
    for (code, _prev) in input.previous {
        if !projected.weights.contains_key(code) {
            positions.push(TargetPosition {
                code: code.clone(),
                weight: 0.0,
                target_value: 0,
                action: PositionAction::Sell,
                reason: "dropped from ranking".to_string(),
            });
        }
    }

    let invested: f64 = projected.weights.values().sum();
    Ok(TargetPortfolio {
        date: input.date,
        positions,
        cash_weight: 1.0 - invested,
    })
}
