//! Constraint projection over a raw weight map.
//!
//! Steps run in a fixed order:
//! 1. Cap each position at `max_weight`; drop positions below `min_weight`.
//! 2. Sector cap: scale every member of an over-cap sector proportionally so
//!    the sector sum equals `sector_max` exactly.
//! 3. Single-exposure cap again (sector scaling never raises a weight, but
//!    the cap is re-asserted after it by contract).
//! 4. Blacklist filter, unconditional.
//! 5. Renormalize down to `1 − cash_reserve` when the total exceeds it.
//!    When a cap pushed the total *below* the target, weights are left
//!    untouched and cash absorbs the remainder — the projection never
//!    levers positions back up after a risk cap (decision recorded in
//!    DESIGN.md).
//! 6. Turnover guard: trim the largest movers against the previous weights
//!    until aggregate one-way movement fits the limit.

use std::collections::BTreeMap;

use kite_config::PortfolioConfig;

/// What the projection did, for diagnostics and audit.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ProjectionOutcome {
    pub weights: BTreeMap<String, f64>,
    /// Codes removed with the step that removed them.
    pub dropped: Vec<(String, &'static str)>,
    /// Sectors that were scaled to the cap.
    pub capped_sectors: Vec<String>,
    /// True when the turnover guard trimmed anything.
    pub turnover_trimmed: bool,
}

/// Project `raw` onto the constraint set.
///
/// `sectors` maps code → sector; unmapped codes belong to no sector.
/// `previous` is the prior portfolio's weight map (empty for a cold start).
pub fn project(
    raw: &BTreeMap<String, f64>,
    sectors: &BTreeMap<String, String>,
    previous: &BTreeMap<String, f64>,
    cfg: &PortfolioConfig,
) -> ProjectionOutcome {
    let mut out = ProjectionOutcome::default();
    let mut weights = raw.clone();

    // 1) Per-position cap and floor.
    for w in weights.values_mut() {
        if *w > cfg.max_weight {
            *w = cfg.max_weight;
        }
    }
    weights.retain(|code, w| {
        if *w < cfg.min_weight {
            out.dropped.push((code.clone(), "below_min_weight"));
            false
        } else {
            true
        }
    });

    // 2) Sector caps.
    if cfg.sector_max > 0.0 {
        let mut sector_sums: BTreeMap<&str, f64> = BTreeMap::new();
        for (code, w) in &weights {
            if let Some(sector) = sectors.get(code) {
                *sector_sums.entry(sector.as_str()).or_insert(0.0) += *w;
            }
        }
        let over: Vec<(String, f64)> = sector_sums
            .iter()
            .filter(|(_, sum)| **sum > cfg.sector_max)
            .map(|(s, sum)| (s.to_string(), *sum))
            .collect();
        for (sector, sum) in over {
            let scale = cfg.sector_max / sum;
            for (code, w) in weights.iter_mut() {
                if sectors.get(code) == Some(&sector) {
                    *w *= scale;
                }
            }
            out.capped_sectors.push(sector);
        }
    }

    // 3) Single-exposure cap after sector scaling.
    for w in weights.values_mut() {
        if *w > cfg.max_weight {
            *w = cfg.max_weight;
        }
    }

    // 4) Blacklist, unconditional.
    weights.retain(|code, _| {
        if cfg.blacklist.iter().any(|b| b == code) {
            out.dropped.push((code.clone(), "blacklisted"));
            false
        } else {
            true
        }
    });

    // 5) Renormalize down to the invested target.
    let invested_target = 1.0 - cfg.cash_reserve;
    let total: f64 = weights.values().sum();
    if total > invested_target && total > 0.0 {
        let scale = invested_target / total;
        for w in weights.values_mut() {
            *w *= scale;
        }
    }

    // 6) Turnover guard.
    if cfg.turnover_limit > 0.0 {
        out.turnover_trimmed = trim_turnover(&mut weights, previous, cfg.turnover_limit);
    }

    out.weights = weights;
    out
}

/// Aggregate one-way weight movement between `previous` and `weights`,
/// counting exits (codes present only in `previous`) as movement.
pub fn weight_movement(weights: &BTreeMap<String, f64>, previous: &BTreeMap<String, f64>) -> f64 {
    let mut movement = 0.0;
    for (code, w) in weights {
        movement += (w - previous.get(code).copied().unwrap_or(0.0)).abs();
    }
    for (code, prev_w) in previous {
        if !weights.contains_key(code) {
            movement += prev_w.abs();
        }
    }
    movement
}

/// Trim the largest movers until aggregate movement ≤ `limit`.
///
/// Each trim pulls the biggest mover's weight toward its previous weight by
/// the current excess (bounded so the delta never flips sign), so the loop
/// strictly reduces movement and terminates.
fn trim_turnover(
    weights: &mut BTreeMap<String, f64>,
    previous: &BTreeMap<String, f64>,
    limit: f64,
) -> bool {
    let mut trimmed = false;
    loop {
        let movement = weight_movement(weights, previous);
        let excess = movement - limit;
        if excess <= 1e-12 {
            return trimmed;
        }

        // Largest mover among codes we still hold (exits are not revivable).
        let largest = weights
            .iter()
            .map(|(code, w)| {
                let delta = w - previous.get(code).copied().unwrap_or(0.0);
                (code.clone(), delta)
            })
            .max_by(|a, b| {
                a.1.abs()
                    .partial_cmp(&b.1.abs())
                    .unwrap_or(std::cmp::Ordering::Equal)
            });

        let Some((code, delta)) = largest else {
            return trimmed;
        };
        if delta.abs() <= 1e-12 {
            // Movement is all in exits; nothing left to trim.
            return trimmed;
        }

        let take = excess.min(delta.abs());
        let w = weights.get_mut(&code).expect("largest mover exists");
        *w -= delta.signum() * take;
        trimmed = true;
    }
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

    fn cfg() -> PortfolioConfig {
        PortfolioConfig {
            tiers: vec![],
            min_weight: 0.01,
            max_weight: 0.10,
            sector_max: 0.25,
            cash_reserve: 0.10,
            turnover_limit: 0.0,
            blacklist: vec![],
        }
    }

    #[test]
    fn cap_and_floor_applied() {
        let raw = wmap(&[("A", 0.15), ("B", 0.005), ("C", 0.05)]);
        let out = project(&raw, &smap(&[]), &BTreeMap::new(), &cfg());
        assert_eq!(out.weights.get("A"), Some(&0.10));
        assert!(!out.weights.contains_key("B"));
        assert_eq!(out.weights.get("C"), Some(&0.05));
        assert!(out
            .dropped
            .iter()
            .any(|(c, why)| c == "B" && *why == "below_min_weight"));
    }

    #[test]
    fn sector_scaled_to_cap_exactly() {
        // Sector S holds 0.40 across four codes; cap is 0.25.
        let raw = wmap(&[("S1", 0.10), ("S2", 0.10), ("S3", 0.10), ("S4", 0.10), ("X", 0.05)]);
        let sectors = smap(&[("S1", "S"), ("S2", "S"), ("S3", "S"), ("S4", "S"), ("X", "T")]);
        let out = project(&raw, &sectors, &BTreeMap::new(), &cfg());
        let s_sum: f64 = ["S1", "S2", "S3", "S4"]
            .iter()
            .map(|c| out.weights[*c])
            .sum();
        assert!((s_sum - 0.25).abs() < 1e-9, "sector sum {s_sum}");
        // Proportional: every member scaled equally.
        assert!((out.weights["S1"] - 0.0625).abs() < 1e-9);
        // Non-sector member untouched.
        assert_eq!(out.weights.get("X"), Some(&0.05));
        assert_eq!(out.capped_sectors, vec!["S".to_string()]);
    }

    #[test]
    fn blacklist_removes_unconditionally() {
        let raw = wmap(&[("A", 0.05), ("B", 0.05)]);
        let mut c = cfg();
        c.blacklist = vec!["B".to_string()];
        let out = project(&raw, &smap(&[]), &BTreeMap::new(), &c);
        assert!(!out.weights.contains_key("B"));
        assert!(out
            .dropped
            .iter()
            .any(|(code, why)| code == "B" && *why == "blacklisted"));
    }

    #[test]
    fn renormalizes_down_to_invested_target() {
        // Ten codes at 0.10 = 1.0 total; target is 0.90.
        let raw: BTreeMap<String, f64> =
            (0..10).map(|i| (format!("{:06}", i), 0.10)).collect();
        let out = project(&raw, &smap(&[]), &BTreeMap::new(), &cfg());
        let total: f64 = out.weights.values().sum();
        assert!((total - 0.90).abs() < 1e-9, "total {total}");
    }

    #[test]
    fn does_not_lever_up_after_sector_cap() {
        // One sector capped hard: total falls below 0.90 and stays there.
        let raw = wmap(&[("S1", 0.10), ("S2", 0.10), ("S3", 0.10), ("S4", 0.10)]);
        let sectors = smap(&[("S1", "S"), ("S2", "S"), ("S3", "S"), ("S4", "S")]);
        let out = project(&raw, &sectors, &BTreeMap::new(), &cfg());
        let total: f64 = out.weights.values().sum();
        assert!((total - 0.25).abs() < 1e-9);
    }

    #[test]
    fn turnover_guard_trims_largest_mover() {
        let previous = wmap(&[("A", 0.05), ("B", 0.05)]);
        let raw = wmap(&[("A", 0.09), ("B", 0.05)]);
        let mut c = cfg();
        c.turnover_limit = 0.02;
        let out = project(&raw, &smap(&[]), &previous, &c);
        assert!(out.turnover_trimmed);
        let movement = weight_movement(&out.weights, &previous);
        assert!(movement <= 0.02 + 1e-9, "movement {movement}");
        // A was the only mover; it was pulled back toward its previous weight.
        assert!((out.weights["A"] - 0.07).abs() < 1e-9);
    }

    #[test]
    fn turnover_counts_exits_as_movement() {
        let previous = wmap(&[("GONE", 0.05)]);
        let weights = wmap(&[("NEW", 0.05)]);
        assert!((weight_movement(&weights, &previous) - 0.10).abs() < 1e-12);
    }

    #[test]
    fn zero_turnover_limit_disables_guard() {
        let previous = wmap(&[]);
        let raw = wmap(&[("A", 0.09)]);
        let out = project(&raw, &smap(&[]), &previous, &cfg());
        assert!(!out.turnover_trimmed);
        assert_eq!(out.weights.get("A"), Some(&0.09));
    }
}
