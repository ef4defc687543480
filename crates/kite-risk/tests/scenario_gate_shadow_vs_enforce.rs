//! Gate behavior end-to-end: the same oversized portfolio through the
//! engine under shadow and enforce, plus an enforce-time VaR block.

use std::collections::BTreeMap;

use kite_config::{GateMode, RiskLimitsConfig};
use kite_risk::{
    check_limits, evaluate_gate, GateAction, LimitCheckInput, McConfig, McMethod, McMode,
    ReturnType, ViolationType,
};

fn mc_cfg() -> McConfig {
    McConfig {
        mode: McMode::PortfolioUnivariate,
        return_type: ReturnType::Simple,
        method: McMethod::HistoricalBootstrap,
        num_simulations: 2_000,
        holding_period: 5,
        confidence_levels: vec![0.95, 0.99],
        lookback_days: 200,
        seed: 42,
        min_samples: 30,
        t_dof: None,
    }
}

fn limits() -> RiskLimitsConfig {
    RiskLimitsConfig {
        mode: GateMode::Shadow,
        max_var_95: 0.50,
        max_var_99: 0.60,
        max_single_exposure: 0.15,
        max_sector_exposure: 0.60,
        max_concentration: 0.80,
        min_liquidity_score: 0.0,
    }
}

/// Portfolio with one 20% position against a 15% single-exposure limit.
fn oversized() -> (
    BTreeMap<String, f64>,
    BTreeMap<String, String>,
    BTreeMap<String, Vec<f64>>,
    BTreeMap<String, f64>,
) {
    let weights: BTreeMap<String, f64> = [
        ("005930".to_string(), 0.20),
        ("000660".to_string(), 0.10),
    ]
    .into();
    let calm: Vec<f64> = (0..120).map(|i| ((i % 9) as f64 - 4.0) * 0.002).collect();
    let returns: BTreeMap<String, Vec<f64>> =
        weights.keys().map(|c| (c.clone(), calm.clone())).collect();
    let liquidity: BTreeMap<String, f64> = weights.keys().map(|c| (c.clone(), 1.0)).collect();
    (weights, BTreeMap::new(), returns, liquidity)
}

#[test]
fn shadow_logs_would_block_but_passes() {
    let (weights, sectors, returns, liquidity) = oversized();
    let report = check_limits(
        &LimitCheckInput {
            weights: &weights,
            sectors: &sectors,
            returns: &returns,
            liquidity: &liquidity,
        },
        &limits(),
        &mc_cfg(),
    )
    .unwrap();

    let decision = evaluate_gate(GateMode::Shadow, Some(&report), &weights);
    assert_eq!(decision.action, GateAction::Pass);
    assert!(decision.passed);
    assert!(decision.would_block);
    assert_eq!(decision.violations.len(), 1);
    assert_eq!(
        decision.violations[0].violation_type,
        ViolationType::SingleExposure
    );
}

#[test]
fn enforce_reduces_the_oversized_position_to_95pct_of_limit() {
    let (weights, sectors, returns, liquidity) = oversized();
    let report = check_limits(
        &LimitCheckInput {
            weights: &weights,
            sectors: &sectors,
            returns: &returns,
            liquidity: &liquidity,
        },
        &limits(),
        &mc_cfg(),
    )
    .unwrap();

    let decision = evaluate_gate(GateMode::Enforce, Some(&report), &weights);
    assert_eq!(decision.action, GateAction::Reduce);
    assert!(decision.passed, "a reduced portfolio still trades");
    let adjusted = decision.adjusted_weights.unwrap();
    assert!(
        (adjusted["005930"] - 0.1425).abs() < 1e-12,
        "0.15 · 0.95 = 0.1425"
    );
    assert_eq!(adjusted["000660"], 0.10, "only the violator moves");
}

#[test]
fn enforce_blocks_on_var_breach() {
    let (weights, sectors, mut returns, liquidity) = oversized();
    // Violent series: 5-day VaR sails over a 1% cap.
    for series in returns.values_mut() {
        *series = (0..120)
            .map(|i| if i % 2 == 0 { 0.08 } else { -0.08 })
            .collect();
    }
    let mut lim = limits();
    lim.max_var_95 = 0.01;
    lim.max_var_99 = 0.015;

    let report = check_limits(
        &LimitCheckInput {
            weights: &weights,
            sectors: &sectors,
            returns: &returns,
            liquidity: &liquidity,
        },
        &lim,
        &mc_cfg(),
    )
    .unwrap();
    assert!(report.has_var_violation());
    assert!(report.var_99 >= report.var_95);

    let decision = evaluate_gate(GateMode::Enforce, Some(&report), &weights);
    assert_eq!(decision.action, GateAction::Block);
    assert!(!decision.passed);
    assert!(
        decision.blocked_codes.contains(&"005930".to_string()),
        "VaR blocks carry the whole holding list"
    );
}

#[test]
fn off_mode_never_computes_never_blocks() {
    let (weights, ..) = oversized();
    let decision = evaluate_gate(GateMode::Off, None, &weights);
    assert_eq!(decision.action, GateAction::Pass);
    assert!(decision.passed);
    assert!(!decision.would_block);
    assert!(decision.violations.is_empty());
}
