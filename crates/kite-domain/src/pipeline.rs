//! Stage artifacts: quality snapshot, universe, signals, ranking, portfolio.

use std::collections::{BTreeMap, BTreeSet};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Tolerance for the portfolio weight-sum invariant.
pub const WEIGHT_EPSILON: f64 = 1e-6;

// ---------------------------------------------------------------------------
// QualitySnapshot (S0 output)
// ---------------------------------------------------------------------------

/// Per-day data coverage by kind, plus a composite score.
///
/// A snapshot "passes" when every configured minimum is met; the pass/fail
/// decision is made against config at gate time and stored here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct QualitySnapshot {
    pub date: NaiveDate,
    /// data-kind → coverage ratio in [0, 1], e.g. "prices" → 0.997.
    pub coverage: BTreeMap<String, f64>,
    pub composite: f64,
    pub passed: bool,
}

impl QualitySnapshot {
    /// Kinds whose coverage is below the given per-kind minimums.
    pub fn failing_kinds(&self, minimums: &BTreeMap<String, f64>) -> Vec<String> {
        minimums
            .iter()
            .filter(|(kind, min)| {
                self.coverage.get(*kind).copied().unwrap_or(0.0) < **min
            })
            .map(|(kind, _)| kind.clone())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// UniverseSnapshot (S1 output)
// ---------------------------------------------------------------------------

/// The set of codes eligible for a given date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct UniverseSnapshot {
    pub date: NaiveDate,
    pub codes: BTreeSet<String>,
}

impl UniverseSnapshot {
    pub fn len(&self) -> usize {
        self.codes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.codes.is_empty()
    }

    pub fn contains(&self, code: &str) -> bool {
        self.codes.contains(code)
    }
}

// ---------------------------------------------------------------------------
// SignalSet (S2 output)
// ---------------------------------------------------------------------------

/// Six factor scores for one `(date, code)`, each in [-1, 1] when observed.
///
/// `None` means the calculator's window was insufficient; the ranker treats
/// it as neutral 0 and sets `weakly_observed`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SignalSet {
    pub date: NaiveDate,
    pub code: String,
    pub momentum: Option<f64>,
    pub technical: Option<f64>,
    pub value: Option<f64>,
    pub quality: Option<f64>,
    pub flow: Option<f64>,
    pub event: Option<f64>,
    /// Σ weight_i · factor_i with nulls as 0.
    pub total: f64,
    /// True when any factor was null at composite time.
    pub weakly_observed: bool,
}

impl SignalSet {
    /// Factors in canonical order (momentum, technical, value, quality,
    /// flow, event) — the same order ranking weights are configured in.
    pub fn factors(&self) -> [Option<f64>; 6] {
        [
            self.momentum,
            self.technical,
            self.value,
            self.quality,
            self.flow,
            self.event,
        ]
    }
}

// ---------------------------------------------------------------------------
// RankedStock (S4 output)
// ---------------------------------------------------------------------------

/// One row of the ranking. Ranks are a permutation of 1..N per date;
/// ordering is total_score descending with code-ascending tiebreak.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RankedStock {
    pub date: NaiveDate,
    pub code: String,
    pub rank: u32,
    pub total_score: f64,
    /// Factor-level detail carried for attribution.
    pub detail: SignalSet,
}

// ---------------------------------------------------------------------------
// TargetPortfolio (S5 output)
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionAction {
    Buy,
    Sell,
    Hold,
}

impl PositionAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionAction::Buy => "BUY",
            PositionAction::Sell => "SELL",
            PositionAction::Hold => "HOLD",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "BUY" => Some(PositionAction::Buy),
            "SELL" => Some(PositionAction::Sell),
            "HOLD" => Some(PositionAction::Hold),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetPosition {
    pub code: String,
    /// Fraction of capital in [0, MaxWeight].
    pub weight: f64,
    /// weight · capital, integer KRW. Quantity is computed downstream.
    pub target_value: i64,
    pub action: PositionAction,
    pub reason: String,
}

/// The constructed target portfolio for one date.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TargetPortfolio {
    pub date: NaiveDate,
    pub positions: Vec<TargetPosition>,
    pub cash_weight: f64,
}

impl TargetPortfolio {
    pub fn invested_weight(&self) -> f64 {
        self.positions.iter().map(|p| p.weight).sum()
    }

    /// `|Σ weights + cash − 1| ≤ ε` — the core portfolio invariant.
    pub fn weights_balanced(&self) -> bool {
        (self.invested_weight() + self.cash_weight - 1.0).abs() <= WEIGHT_EPSILON
    }

    pub fn weight_of(&self, code: &str) -> f64 {
        self.positions
            .iter()
            .find(|p| p.code == code)
            .map(|p| p.weight)
            .unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    #[test]
    fn quality_failing_kinds() {
        let mut coverage = BTreeMap::new();
        coverage.insert("prices".to_string(), 0.99);
        coverage.insert("flows".to_string(), 0.80);
        let snap = QualitySnapshot {
            date: d("2025-07-01"),
            coverage,
            composite: 0.9,
            passed: false,
        };
        let mut minimums = BTreeMap::new();
        minimums.insert("prices".to_string(), 0.95);
        minimums.insert("flows".to_string(), 0.90);
        minimums.insert("fundamentals".to_string(), 0.50);
        let failing = snap.failing_kinds(&minimums);
        // flows below its minimum; fundamentals absent counts as 0 coverage.
        assert_eq!(failing, vec!["flows".to_string(), "fundamentals".to_string()]);
    }

    #[test]
    fn balanced_portfolio_within_epsilon() {
        let p = TargetPortfolio {
            date: d("2025-07-01"),
            positions: vec![
                TargetPosition {
                    code: "005930".into(),
                    weight: 0.45,
                    target_value: 45_000_000,
                    action: PositionAction::Buy,
                    reason: "rank 1".into(),
                },
                TargetPosition {
                    code: "000660".into(),
                    weight: 0.45,
                    target_value: 45_000_000,
                    action: PositionAction::Buy,
                    reason: "rank 2".into(),
                },
            ],
            cash_weight: 0.10,
        };
        assert!(p.weights_balanced());
        assert!((p.invested_weight() - 0.9).abs() < 1e-12);
    }

    #[test]
    fn unbalanced_portfolio_detected() {
        let p = TargetPortfolio {
            date: d("2025-07-01"),
            positions: vec![TargetPosition {
                code: "005930".into(),
                weight: 0.5,
                target_value: 0,
                action: PositionAction::Hold,
                reason: String::new(),
            }],
            cash_weight: 0.4,
        };
        assert!(!p.weights_balanced());
    }

    #[test]
    fn signal_factor_order_is_canonical() {
        let s = SignalSet {
            date: d("2025-07-01"),
            code: "005930".into(),
            momentum: Some(0.1),
            technical: Some(0.2),
            value: Some(0.3),
            quality: Some(0.4),
            flow: Some(0.5),
            event: None,
            total: 0.0,
            weakly_observed: true,
        };
        assert_eq!(
            s.factors(),
            [Some(0.1), Some(0.2), Some(0.3), Some(0.4), Some(0.5), None]
        );
    }
}
