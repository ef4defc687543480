//! End-to-end construction scenarios: tier weighting through projection,
//! asserting the portfolio invariants hold on realistic shapes.

use std::collections::BTreeMap;

use kite_config::{PortfolioConfig, Tier};
use kite_domain::{PositionAction, RankedStock, SignalSet};
use kite_portfolio::{construct, ConstructionInput};

fn ranked(n: usize, sector_of: impl Fn(usize) -> Option<&'static str>) -> (Vec<RankedStock>, BTreeMap<String, String>) {
    let mut sectors = BTreeMap::new();
    let ranked = (0..n)
        .map(|i| {
            let code = format!("{:06}", i);
            if let Some(sector) = sector_of(i) {
                sectors.insert(code.clone(), sector.to_string());
            }
            RankedStock {
                date: "2025-07-01".parse().unwrap(),
                code: code.clone(),
                rank: (i + 1) as u32,
                total_score: 1.0 - i as f64 * 0.01,
                detail: SignalSet {
                    date: "2025-07-01".parse().unwrap(),
                    code,
                    momentum: Some(0.5),
                    technical: Some(0.4),
                    value: Some(0.3),
                    quality: Some(0.2),
                    flow: Some(0.1),
                    event: Some(0.0),
                    total: 1.0 - i as f64 * 0.01,
                    weakly_observed: false,
                },
            }
        })
        .collect();
    (ranked, sectors)
}

fn standard_cfg() -> PortfolioConfig {
    PortfolioConfig {
        tiers: vec![
            Tier { count: 5, weight_each: 0.05 },
            Tier { count: 10, weight_each: 0.045 },
            Tier { count: 5, weight_each: 0.04 },
        ],
        min_weight: 0.01,
        max_weight: 0.10,
        sector_max: 0.25,
        cash_reserve: 0.10,
        turnover_limit: 0.0,
        blacklist: vec![],
    }
}

#[test]
fn happy_path_run_produces_twenty_positions_at_ninety_percent() {
    // Ranker output of 30 with no sector pressure: projection leaves the
    // tier weights unchanged.
    let (ranked, sectors) = ranked(30, |_| None);
    let previous = BTreeMap::new();
    let portfolio = construct(
        ConstructionInput {
            date: "2025-07-01".parse().unwrap(),
            ranked: &ranked,
            sectors: &sectors,
            previous: &previous,
            capital: 1_000_000_000,
        },
        &standard_cfg(),
    )
    .unwrap();

    assert_eq!(portfolio.positions.len(), 20);
    assert!((portfolio.invested_weight() - 0.90).abs() < 1e-9);
    assert!((portfolio.cash_weight - 0.10).abs() < 1e-9);
    assert!(portfolio.weights_balanced());

    // Every weight within [0, max]; target values sized off capital.
    for position in &portfolio.positions {
        assert!(position.weight >= 0.0 && position.weight <= 0.10);
        assert_eq!(
            position.target_value,
            (position.weight * 1_000_000_000.0).round() as i64
        );
    }
}

#[test]
fn sector_cap_scales_the_crowded_sector_to_exactly_the_cap() {
    // 20 ranked codes, the even-indexed ten share sector S.
    let (ranked, sectors) = ranked(20, |i| if i % 2 == 0 { Some("S") } else { None });
    let previous = BTreeMap::new();
    let portfolio = construct(
        ConstructionInput {
            date: "2025-07-01".parse().unwrap(),
            ranked: &ranked,
            sectors: &sectors,
            previous: &previous,
            capital: 1_000_000_000,
        },
        &standard_cfg(),
    )
    .unwrap();

    let s_sum: f64 = portfolio
        .positions
        .iter()
        .filter(|p| sectors.contains_key(&p.code))
        .map(|p| p.weight)
        .sum();
    assert!((s_sum - 0.25).abs() < 1e-9, "sector sum {s_sum} != cap");

    // Members scaled proportionally: rank-1 (tier 1) stays the largest
    // member; non-members keep their tier weights.
    let rank1 = portfolio.weight_of("000000");
    let rank3 = portfolio.weight_of("000002");
    assert!(rank1 > rank3);
    assert!((portfolio.weight_of("000001") - 0.05).abs() < 1e-12);

    assert!(portfolio.weights_balanced());
}

#[test]
fn rebalance_emits_buys_sells_holds_and_exits() {
    let (ranked, sectors) = ranked(30, |_| None);
    // Previous book: rank-1 unchanged, rank-2 overweight, one name gone.
    let previous: BTreeMap<String, f64> = [
        ("000000".to_string(), 0.05),
        ("000001".to_string(), 0.08),
        ("GONE00".to_string(), 0.04),
    ]
    .into();

    let portfolio = construct(
        ConstructionInput {
            date: "2025-07-01".parse().unwrap(),
            ranked: &ranked,
            sectors: &sectors,
            previous: &previous,
            capital: 1_000_000_000,
        },
        &standard_cfg(),
    )
    .unwrap();

    let action_of = |code: &str| {
        portfolio
            .positions
            .iter()
            .find(|p| p.code == code)
            .map(|p| p.action)
    };
    assert_eq!(action_of("000000"), Some(PositionAction::Hold));
    assert_eq!(action_of("000001"), Some(PositionAction::Sell));
    assert_eq!(action_of("000005"), Some(PositionAction::Buy));
    assert_eq!(action_of("GONE00"), Some(PositionAction::Sell));

    let exit = portfolio
        .positions
        .iter()
        .find(|p| p.code == "GONE00")
        .unwrap();
    assert_eq!(exit.weight, 0.0);
    assert_eq!(exit.target_value, 0);
    assert!(portfolio.weights_balanced());
}

#[test]
fn turnover_guard_bounds_aggregate_movement() {
    let (ranked, sectors) = ranked(30, |_| None);
    // Previous book matches today's targets except two names.
    let mut previous: BTreeMap<String, f64> = BTreeMap::new();
    for (i, r) in ranked.iter().take(20).enumerate() {
        let w = if i < 5 {
            0.05
        } else if i < 15 {
            0.045
        } else {
            0.04
        };
        previous.insert(r.code.clone(), w);
    }
    previous.insert("000000".to_string(), 0.02); // will want to buy up
    previous.insert("000019".to_string(), 0.09); // will want to sell down

    let mut cfg = standard_cfg();
    cfg.turnover_limit = 0.04;
    let portfolio = construct(
        ConstructionInput {
            date: "2025-07-01".parse().unwrap(),
            ranked: &ranked,
            sectors: &sectors,
            previous: &previous,
            capital: 1_000_000_000,
        },
        &cfg,
    )
    .unwrap();

    let movement: f64 = portfolio
        .positions
        .iter()
        .filter(|p| p.weight > 0.0)
        .map(|p| (p.weight - previous.get(&p.code).copied().unwrap_or(0.0)).abs())
        .sum();
    assert!(movement <= 0.04 + 1e-9, "movement {movement} over limit");
    assert!(portfolio.weights_balanced());
}
