//! Deterministic stress scenarios over a target portfolio.
//!
//! A scenario is a set of per-group shocks applied to current weights; the
//! result is the instantaneous portfolio P&L under that shock. No
//! simulation here — stress answers "what if tomorrow is 2020-03-19", the
//! Monte Carlo engine answers "what does the distribution look like".

use std::collections::BTreeMap;

use serde::Serialize;

/// One stress scenario: a uniform market shock plus optional per-sector
/// overrides (override replaces, not stacks).
#[derive(Clone, Debug, PartialEq)]
pub struct StressScenario {
    pub name: &'static str,
    /// Return applied to every holding, e.g. -0.10.
    pub market_shock: f64,
    /// sector → return, replacing the market shock for members.
    pub sector_shocks: BTreeMap<String, f64>,
}

impl StressScenario {
    pub fn uniform(name: &'static str, market_shock: f64) -> Self {
        Self {
            name,
            market_shock,
            sector_shocks: BTreeMap::new(),
        }
    }

    pub fn with_sector(mut self, sector: &str, shock: f64) -> Self {
        self.sector_shocks.insert(sector.to_string(), shock);
        self
    }
}

/// The canned scenario book run by the audit reporter.
pub fn standard_scenarios() -> Vec<StressScenario> {
    vec![
        StressScenario::uniform("market_down_5", -0.05),
        StressScenario::uniform("market_down_10", -0.10),
        StressScenario::uniform("crash_down_20", -0.20),
    ]
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StressResult {
    pub name: &'static str,
    /// Portfolio return under the scenario (negative = loss).
    pub portfolio_return: f64,
    /// The single worst holding contribution (code, weighted return).
    pub worst_holding: Option<(String, f64)>,
}

/// Apply one scenario to a weight map.
pub fn apply_scenario(
    weights: &BTreeMap<String, f64>,
    sectors: &BTreeMap<String, String>,
    scenario: &StressScenario,
) -> StressResult {
    let mut portfolio_return = 0.0;
    let mut worst: Option<(String, f64)> = None;

    for (code, weight) in weights {
        let shock = sectors
            .get(code)
            .and_then(|s| scenario.sector_shocks.get(s))
            .copied()
            .unwrap_or(scenario.market_shock);
        let contribution = weight * shock;
        portfolio_return += contribution;
        if worst.as_ref().map(|(_, w)| contribution < *w).unwrap_or(true) {
            worst = Some((code.clone(), contribution));
        }
    }

    StressResult {
        name: scenario.name,
        portfolio_return,
        worst_holding: worst,
    }
}

/// Run the whole scenario book.
pub fn run_stress(
    weights: &BTreeMap<String, f64>,
    sectors: &BTreeMap<String, String>,
    scenarios: &[StressScenario],
) -> Vec<StressResult> {
    scenarios
        .iter()
        .map(|s| apply_scenario(weights, sectors, s))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn wmap(items: &[(&str, f64)]) -> BTreeMap<String, f64> {
        items.iter().map(|(c, w)| (c.to_string(), *w)).collect()
    }

    fn smap(items: &[(&str, &str)]) -> BTreeMap<String, String> {
        items
            .iter()
            .map(|(c, s)| (c.to_string(), s.to_string()))
            .collect()
    }

    #[test]
    fn uniform_shock_scales_with_invested_weight() {
        let weights = wmap(&[("A", 0.45), ("B", 0.45)]);
        let result = apply_scenario(
            &weights,
            &smap(&[]),
            &StressScenario::uniform("down_10", -0.10),
        );
        assert!((result.portfolio_return - (-0.09)).abs() < 1e-12);
    }

    #[test]
    fn sector_override_replaces_market_shock() {
        let weights = wmap(&[("TECH1", 0.30), ("UTIL1", 0.30)]);
        let sectors = smap(&[("TECH1", "IT"), ("UTIL1", "UTIL")]);
        let scenario = StressScenario::uniform("tech_rout", -0.02).with_sector("IT", -0.25);
        let result = apply_scenario(&weights, &sectors, &scenario);
        // 0.30·(−0.25) + 0.30·(−0.02)
        assert!((result.portfolio_return - (-0.081)).abs() < 1e-12);
        let (code, contribution) = result.worst_holding.unwrap();
        assert_eq!(code, "TECH1");
        assert!((contribution - (-0.075)).abs() < 1e-12);
    }

    #[test]
    fn empty_portfolio_is_unshockable() {
        let result = apply_scenario(
            &wmap(&[]),
            &smap(&[]),
            &StressScenario::uniform("down_20", -0.20),
        );
        assert_eq!(result.portfolio_return, 0.0);
        assert!(result.worst_holding.is_none());
    }

    #[test]
    fn standard_book_orders_by_severity() {
        let weights = wmap(&[("A", 0.90)]);
        let results = run_stress(&weights, &smap(&[]), &standard_scenarios());
        assert_eq!(results.len(), 3);
        assert!(results[0].portfolio_return > results[2].portfolio_return);
    }
}
