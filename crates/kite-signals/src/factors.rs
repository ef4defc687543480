//! The six factor calculators and the composite.

use kite_domain::{Fundamentals, InvestorFlow, PriceBar, SignalSet};

use crate::indicators::{rsi, sma, stdev};

/// Bars required by the momentum factor.
pub const MOMENTUM_WINDOW: usize = 60;
/// Bars required by the technical factor.
pub const TECHNICAL_WINDOW: usize = 120;
/// Flow rows required by the flow factor.
pub const FLOW_WINDOW: usize = 20;
/// Days of detected events the event factor looks back over.
pub const EVENT_LOOKBACK_DAYS: i64 = 20;

fn clamp_score(x: f64) -> f64 {
    x.clamp(-1.0, 1.0)
}

// ---------------------------------------------------------------------------
// Momentum (60 bars)
// ---------------------------------------------------------------------------

/// Blend of 20-day and 60-day price momentum, scaled so ±20% over 60 days
/// saturates the score.
pub fn momentum_score(bars: &[PriceBar]) -> Option<f64> {
    if bars.len() < MOMENTUM_WINDOW {
        return None;
    }
    let last = bars.last()?.close as f64;
    let c20 = bars[bars.len() - 20].close as f64;
    let c60 = bars[bars.len() - MOMENTUM_WINDOW].close as f64;
    if c20 <= 0.0 || c60 <= 0.0 {
        return None;
    }
    let r20 = last / c20 - 1.0;
    let r60 = last / c60 - 1.0;
    // Short leg weighted heavier; 0.20 return saturates.
    Some(clamp_score((0.6 * r20 + 0.4 * r60) / 0.20))
}

// ---------------------------------------------------------------------------
// Technical (120 bars)
// ---------------------------------------------------------------------------

/// Moving-average posture plus RSI positioning.
///
/// Components: price above/below MA20/MA60/MA120 (trend alignment) and
/// RSI(14) distance from midline (stretch).
pub fn technical_score(bars: &[PriceBar]) -> Option<f64> {
    if bars.len() < TECHNICAL_WINDOW {
        return None;
    }
    let last = bars.last()?.close as f64;
    let ma20 = sma(bars, 20)?;
    let ma60 = sma(bars, 60)?;
    let ma120 = sma(bars, 120)?;
    let r = rsi(bars, 14)?;

    let mut trend = 0.0;
    for ma in [ma20, ma60, ma120] {
        if last > ma {
            trend += 1.0 / 3.0;
        } else if last < ma {
            trend -= 1.0 / 3.0;
        }
    }
    // RSI 50 is neutral; ±50 saturates the stretch leg.
    let stretch = (r - 50.0) / 50.0;
    Some(clamp_score(0.7 * trend + 0.3 * stretch))
}

// ---------------------------------------------------------------------------
// Value (latest fundamentals)
// ---------------------------------------------------------------------------

/// Cheapness from PER and PBR. Requires both to be present and positive;
/// anything else is unobserved, not zero.
pub fn value_score(fundamentals: &Fundamentals) -> Option<f64> {
    let per = fundamentals.per?;
    let pbr = fundamentals.pbr?;
    if per <= 0.0 || pbr <= 0.0 {
        return None;
    }
    // PER 10 and PBR 1 are the neutral anchors; log-scaled so a halving and
    // a doubling are symmetric.
    let per_leg = -(per / 10.0).ln();
    let pbr_leg = -(pbr / 1.0).ln();
    Some(clamp_score(0.6 * per_leg + 0.4 * pbr_leg))
}

// ---------------------------------------------------------------------------
// Quality (latest fundamentals)
// ---------------------------------------------------------------------------

/// Profitability and balance-sheet quality: ROE against a 15% anchor,
/// penalized by debt ratio above 100%.
pub fn quality_score(fundamentals: &Fundamentals) -> Option<f64> {
    let roe = fundamentals.roe?;
    let roe_leg = clamp_score(roe / 0.15);
    let debt_leg = match fundamentals.debt_ratio {
        // 100% debt ratio is neutral; 300% saturates the penalty.
        Some(d) => clamp_score((1.0 - d) / 2.0),
        None => 0.0,
    };
    Some(clamp_score(0.7 * roe_leg + 0.3 * debt_leg))
}

// ---------------------------------------------------------------------------
// Flow (20 rows)
// ---------------------------------------------------------------------------

/// Net foreign + institution buying over the window, normalized by traded
/// value. Individuals are the residual side and are not double-counted.
pub fn flow_score(flows: &[InvestorFlow], bars: &[PriceBar]) -> Option<f64> {
    if flows.len() < FLOW_WINDOW || bars.len() < FLOW_WINDOW {
        return None;
    }
    let f_tail = &flows[flows.len() - FLOW_WINDOW..];
    let b_tail = &bars[bars.len() - FLOW_WINDOW..];

    let smart_net: i64 = f_tail
        .iter()
        .map(|f| f.foreign_net_value + f.institution_net_value)
        .sum();
    let traded: i64 = b_tail
        .iter()
        .map(|b| b.value.unwrap_or(b.close * b.volume))
        .sum();
    if traded <= 0 {
        return None;
    }
    // 5% of traded value in net smart-money buying saturates the score.
    Some(clamp_score(smart_net as f64 / traded as f64 / 0.05))
}

// ---------------------------------------------------------------------------
// Event (detected events in the lookback)
// ---------------------------------------------------------------------------

/// A detected event inside the lookback, pre-joined with its prediction
/// where one exists. Kept minimal so this crate stays decoupled from the
/// forecast pipeline's persistence.
#[derive(Clone, Debug, PartialEq)]
pub struct RecentEvent {
    /// Trading days since the event (0 = today).
    pub days_ago: i64,
    /// Predicted 5-day return for the event, when a prediction exists.
    pub expected_ret_5d: Option<f64>,
    /// The event-day return, used when no prediction is available.
    pub day_return: f64,
}

/// Recency-weighted expected follow-through from detected events.
///
/// An empty slice is a legitimate observation (nothing happened) and scores
/// neutral 0 — only out-of-range inputs return `None`.
pub fn event_score(events: &[RecentEvent]) -> Option<f64> {
    let mut acc = 0.0;
    for ev in events {
        if ev.days_ago < 0 || ev.days_ago > EVENT_LOOKBACK_DAYS {
            return None;
        }
        let decay = 1.0 - ev.days_ago as f64 / EVENT_LOOKBACK_DAYS as f64;
        let expected = ev.expected_ret_5d.unwrap_or(ev.day_return * 0.5);
        // 5% expected follow-through saturates one event's contribution.
        acc += decay * (expected / 0.05).clamp(-1.0, 1.0);
    }
    Some(clamp_score(acc))
}

// ---------------------------------------------------------------------------
// Composite
// ---------------------------------------------------------------------------

/// Composite result: weighted total with nulls as neutral 0.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Composite {
    pub total: f64,
    pub weakly_observed: bool,
}

/// Σ wᵢ·factorᵢ with weights normalized to sum 1 and nulls mapped to 0.
///
/// `weakly_observed` is set when any factor was null, so downstream ranking
/// can see which rows rest on partial evidence.
pub fn compose(factors: [Option<f64>; 6], weights: [f64; 6]) -> Composite {
    let weight_sum: f64 = weights.iter().sum();
    let mut total = 0.0;
    let mut weakly = false;
    for (factor, w) in factors.iter().zip(weights.iter()) {
        match factor {
            Some(score) => total += w / weight_sum * score,
            None => weakly = true,
        }
    }
    Composite {
        total,
        weakly_observed: weakly,
    }
}

/// Assemble a full [`SignalSet`] from per-factor outputs.
pub fn build_signal_set(
    date: chrono::NaiveDate,
    code: &str,
    factors: [Option<f64>; 6],
    weights: [f64; 6],
) -> SignalSet {
    let composite = compose(factors, weights);
    SignalSet {
        date,
        code: code.to_string(),
        momentum: factors[0],
        technical: factors[1],
        value: factors[2],
        quality: factors[3],
        flow: factors[4],
        event: factors[5],
        total: composite.total,
        weakly_observed: composite.weakly_observed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn bars_with_closes(closes: &[i64]) -> Vec<PriceBar> {
        closes
            .iter()
            .enumerate()
            .map(|(i, &c)| PriceBar {
                code: "005930".into(),
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + chrono::Days::new(i as u64),
                open: c,
                high: c + 5,
                low: c - 5,
                close: c,
                volume: 10_000,
                value: Some(c * 10_000),
            })
            .collect()
    }

    fn fundamentals(per: Option<f64>, pbr: Option<f64>, roe: Option<f64>) -> Fundamentals {
        Fundamentals {
            code: "005930".into(),
            period: "2025Q2".into(),
            per,
            pbr,
            roe,
            debt_ratio: Some(0.8),
            revenue: None,
            operating_profit: None,
            updated_at: None,
        }
    }

    #[test]
    fn momentum_needs_sixty_bars() {
        let bars = bars_with_closes(&vec![100; 59]);
        assert!(momentum_score(&bars).is_none());
    }

    #[test]
    fn momentum_positive_for_uptrend() {
        let closes: Vec<i64> = (0..60).map(|i| 1000 + i * 5).collect();
        let bars = bars_with_closes(&closes);
        let s = momentum_score(&bars).unwrap();
        assert!(s > 0.0 && s <= 1.0, "got {s}");
    }

    #[test]
    fn momentum_saturates_at_one() {
        let mut closes = vec![100_i64; 59];
        closes.push(100_000);
        let bars = bars_with_closes(&closes);
        assert_eq!(momentum_score(&bars), Some(1.0));
    }

    #[test]
    fn technical_needs_120_bars() {
        let bars = bars_with_closes(&vec![100; 119]);
        assert!(technical_score(&bars).is_none());
    }

    #[test]
    fn technical_uptrend_is_positive() {
        let closes: Vec<i64> = (0..120).map(|i| 1000 + i * 3).collect();
        let bars = bars_with_closes(&closes);
        let s = technical_score(&bars).unwrap();
        assert!(s > 0.0, "got {s}");
    }

    #[test]
    fn value_requires_per_and_pbr() {
        assert!(value_score(&fundamentals(None, Some(1.0), None)).is_none());
        assert!(value_score(&fundamentals(Some(10.0), None, None)).is_none());
        assert!(value_score(&fundamentals(Some(-5.0), Some(1.0), None)).is_none());
    }

    #[test]
    fn value_neutral_at_anchor() {
        let s = value_score(&fundamentals(Some(10.0), Some(1.0), None)).unwrap();
        assert!(s.abs() < 1e-12);
    }

    #[test]
    fn cheap_stock_scores_positive() {
        let s = value_score(&fundamentals(Some(5.0), Some(0.5), None)).unwrap();
        assert!(s > 0.0);
    }

    #[test]
    fn quality_requires_roe() {
        assert!(quality_score(&fundamentals(None, None, None)).is_none());
        let s = quality_score(&fundamentals(None, None, Some(0.15))).unwrap();
        assert!(s > 0.0);
    }

    #[test]
    fn flow_smart_money_buying_is_positive() {
        let bars = bars_with_closes(&vec![1000; FLOW_WINDOW]);
        let flows: Vec<InvestorFlow> = (0..FLOW_WINDOW)
            .map(|i| InvestorFlow {
                code: "005930".into(),
                date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap() + chrono::Days::new(i as u64),
                foreign_net_qty: 100,
                foreign_net_value: 200_000,
                institution_net_qty: 50,
                institution_net_value: 100_000,
                individual_net_qty: -150,
                individual_net_value: -300_000,
            })
            .collect();
        let s = flow_score(&flows, &bars).unwrap();
        assert!(s > 0.0, "got {s}");
    }

    #[test]
    fn flow_short_window_is_none() {
        let bars = bars_with_closes(&vec![1000; FLOW_WINDOW]);
        assert!(flow_score(&[], &bars).is_none());
    }

    #[test]
    fn event_empty_is_neutral_not_null() {
        assert_eq!(event_score(&[]), Some(0.0));
    }

    #[test]
    fn event_recent_positive_prediction_scores_positive() {
        let s = event_score(&[RecentEvent {
            days_ago: 1,
            expected_ret_5d: Some(0.03),
            day_return: 0.04,
        }])
        .unwrap();
        assert!(s > 0.0);
    }

    #[test]
    fn compose_normalizes_weights_and_flags_nulls() {
        let factors = [Some(1.0), None, Some(-1.0), None, None, None];
        // Weights 2/1/2/1/1/1 normalize to 0.25/0.125/0.25/...
        let c = compose(factors, [2.0, 1.0, 2.0, 1.0, 1.0, 1.0]);
        assert!(c.weakly_observed);
        assert!(c.total.abs() < 1e-12, "1 and -1 at equal weight cancel");
    }

    #[test]
    fn compose_all_observed_is_strongly_observed() {
        let factors = [Some(0.5); 6];
        let c = compose(factors, [1.0; 6]);
        assert!(!c.weakly_observed);
        assert!((c.total - 0.5).abs() < 1e-12);
    }
}
