//! Portfolio limit checks backed by the Monte Carlo engine.
//!
//! Given target holdings and per-code historical returns, derive the
//! portfolio return series via weighted sum, simulate, then evaluate each
//! configured limit. Violations carry the limit, the observed value, the
//! offending codes, and a severity; the gate maps them to actions.

use std::collections::BTreeMap;

use kite_config::RiskLimitsConfig;

use crate::montecarlo::{simulate, McConfig, McError, McResult};

/// A violation at this multiple of its limit is CRITICAL.
const CRITICAL_RATIO: f64 = 1.5;

// ---------------------------------------------------------------------------
// Violation vocabulary
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ViolationType {
    SingleExposure,
    SectorExposure,
    Concentration,
    Var95,
    Var99,
    Liquidity,
}

impl ViolationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationType::SingleExposure => "SINGLE_EXPOSURE_LIMIT",
            ViolationType::SectorExposure => "SECTOR_EXPOSURE_LIMIT",
            ViolationType::Concentration => "CONCENTRATION_LIMIT",
            ViolationType::Var95 => "VAR_95_LIMIT",
            ViolationType::Var99 => "VAR_99_LIMIT",
            ViolationType::Liquidity => "LIQUIDITY_LIMIT",
        }
    }

    pub fn is_var(&self) -> bool {
        matches!(self, ViolationType::Var95 | ViolationType::Var99)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Critical,
}

impl Severity {
    /// Severity from how far past the limit the observation sits.
    /// `higher_is_worse` is false for floor-style limits (liquidity).
    fn grade(limit: f64, actual: f64, higher_is_worse: bool) -> Severity {
        let ratio = if higher_is_worse {
            if limit <= 0.0 {
                f64::INFINITY
            } else {
                actual / limit
            }
        } else if actual <= 0.0 {
            f64::INFINITY
        } else {
            limit / actual
        };
        if ratio >= CRITICAL_RATIO {
            Severity::Critical
        } else {
            Severity::Warning
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Critical => "CRITICAL",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Violation {
    pub violation_type: ViolationType,
    pub limit: f64,
    pub actual: f64,
    pub severity: Severity,
    /// The holdings driving the violation (whole portfolio for VaR).
    pub codes: Vec<String>,
}

// ---------------------------------------------------------------------------
// Input / report
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct LimitCheckInput<'a> {
    /// Target holdings: code → weight.
    pub weights: &'a BTreeMap<String, f64>,
    /// code → sector.
    pub sectors: &'a BTreeMap<String, String>,
    /// code → historical daily returns (aligned newest-last).
    pub returns: &'a BTreeMap<String, Vec<f64>>,
    /// code → liquidity score in [0, 1].
    pub liquidity: &'a BTreeMap<String, f64>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct LimitReport {
    pub violations: Vec<Violation>,
    pub var_95: f64,
    pub var_99: f64,
    pub mc: McResult,
}

impl LimitReport {
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    pub fn has_critical(&self) -> bool {
        self.violations
            .iter()
            .any(|v| v.severity == Severity::Critical)
    }

    pub fn has_var_violation(&self) -> bool {
        self.violations.iter().any(|v| v.violation_type.is_var())
    }
}

// ---------------------------------------------------------------------------
// Check
// ---------------------------------------------------------------------------

/// Derive portfolio returns, simulate, and evaluate every configured limit.
///
/// The portfolio series length is the shortest code series (codes with no
/// return history contribute nothing and are skipped from the weighted sum,
/// but still count toward exposure limits).
pub fn check_limits(
    input: &LimitCheckInput<'_>,
    limits: &RiskLimitsConfig,
    mc_cfg: &McConfig,
) -> Result<LimitReport, McError> {
    let portfolio_returns = weighted_portfolio_returns(input.weights, input.returns);
    let mc = simulate(mc_cfg, &portfolio_returns)?;

    let var_95 = mc.var_at(0.95).unwrap_or(0.0);
    let var_99 = mc.var_at(0.99).unwrap_or(0.0);

    let mut violations = Vec::new();

    // Max single weight.
    if let Some((code, weight)) = input
        .weights
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
    {
        if *weight > limits.max_single_exposure {
            violations.push(Violation {
                violation_type: ViolationType::SingleExposure,
                limit: limits.max_single_exposure,
                actual: *weight,
                severity: Severity::grade(limits.max_single_exposure, *weight, true),
                codes: vec![code.clone()],
            });
        }
    }

    // Sector sums.
    let mut sector_sums: BTreeMap<&str, (f64, Vec<String>)> = BTreeMap::new();
    for (code, w) in input.weights {
        if let Some(sector) = input.sectors.get(code) {
            let entry = sector_sums.entry(sector.as_str()).or_default();
            entry.0 += *w;
            entry.1.push(code.clone());
        }
    }
    for (_sector, (sum, codes)) in &sector_sums {
        if *sum > limits.max_sector_exposure {
            violations.push(Violation {
                violation_type: ViolationType::SectorExposure,
                limit: limits.max_sector_exposure,
                actual: *sum,
                severity: Severity::grade(limits.max_sector_exposure, *sum, true),
                codes: codes.clone(),
            });
        }
    }

    // Top-5 concentration.
    let mut sorted: Vec<(&String, &f64)> = input.weights.iter().collect();
    sorted.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
    let top5: Vec<(&String, &f64)> = sorted.into_iter().take(5).collect();
    let top5_sum: f64 = top5.iter().map(|(_, w)| **w).sum();
    if top5_sum > limits.max_concentration {
        violations.push(Violation {
            violation_type: ViolationType::Concentration,
            limit: limits.max_concentration,
            actual: top5_sum,
            severity: Severity::grade(limits.max_concentration, top5_sum, true),
            codes: top5.iter().map(|(c, _)| (*c).clone()).collect(),
        });
    }

    // VaR limits.
    if var_95 > limits.max_var_95 {
        violations.push(Violation {
            violation_type: ViolationType::Var95,
            limit: limits.max_var_95,
            actual: var_95,
            severity: Severity::grade(limits.max_var_95, var_95, true),
            codes: input.weights.keys().cloned().collect(),
        });
    }
    if var_99 > limits.max_var_99 {
        violations.push(Violation {
            violation_type: ViolationType::Var99,
            limit: limits.max_var_99,
            actual: var_99,
            severity: Severity::grade(limits.max_var_99, var_99, true),
            codes: input.weights.keys().cloned().collect(),
        });
    }

    // Minimum liquidity across holdings.
    if limits.min_liquidity_score > 0.0 {
        let worst = input
            .weights
            .keys()
            .map(|code| {
                (
                    code.clone(),
                    input.liquidity.get(code).copied().unwrap_or(0.0),
                )
            })
            .min_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        if let Some((code, score)) = worst {
            if score < limits.min_liquidity_score {
                violations.push(Violation {
                    violation_type: ViolationType::Liquidity,
                    limit: limits.min_liquidity_score,
                    actual: score,
                    severity: Severity::grade(limits.min_liquidity_score, score, false),
                    codes: vec![code],
                });
            }
        }
    }

    Ok(LimitReport {
        violations,
        var_95,
        var_99,
        mc,
    })
}

/// Portfolio return per time index = Σ weight_i · return_i, over the common
/// trailing window of all codes that have history.
pub fn weighted_portfolio_returns(
    weights: &BTreeMap<String, f64>,
    returns: &BTreeMap<String, Vec<f64>>,
) -> Vec<f64> {
    let with_history: Vec<(&String, &f64)> = weights
        .iter()
        .filter(|(code, _)| returns.get(*code).map(|r| !r.is_empty()).unwrap_or(false))
        .collect();
    let Some(n) = with_history
        .iter()
        .map(|(code, _)| returns[*code].len())
        .min()
    else {
        return Vec::new();
    };

    (0..n)
        .map(|t| {
            with_history
                .iter()
                .map(|(code, w)| {
                    let series = &returns[*code];
                    let start = series.len() - n;
                    **w * series[start + t]
                })
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::montecarlo::{McMethod, McMode, ReturnType};

    fn mc_cfg() -> McConfig {
        McConfig {
            mode: McMode::PortfolioUnivariate,
            return_type: ReturnType::Simple,
            method: McMethod::HistoricalBootstrap,
            num_simulations: 1_000,
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
            max_single_exposure: 0.15,
            max_sector_exposure: 0.30,
            max_concentration: 0.50,
            max_var_95: 0.50,
            max_var_99: 0.60,
            min_liquidity_score: 0.20,
            ..RiskLimitsConfig::default()
        }
    }

    fn calm_returns() -> Vec<f64> {
        (0..100).map(|i| ((i % 9) as f64 - 4.0) * 0.002).collect()
    }

    fn input_maps(
        weights: &[(&str, f64)],
    ) -> (
        BTreeMap<String, f64>,
        BTreeMap<String, String>,
        BTreeMap<String, Vec<f64>>,
        BTreeMap<String, f64>,
    ) {
        let w: BTreeMap<String, f64> =
            weights.iter().map(|(c, x)| (c.to_string(), *x)).collect();
        let sectors = BTreeMap::new();
        let returns: BTreeMap<String, Vec<f64>> =
            w.keys().map(|c| (c.clone(), calm_returns())).collect();
        let liquidity: BTreeMap<String, f64> = w.keys().map(|c| (c.clone(), 0.9)).collect();
        (w, sectors, returns, liquidity)
    }

    #[test]
    fn clean_portfolio_passes() {
        let (w, sectors, returns, liquidity) = input_maps(&[("A", 0.10), ("B", 0.10)]);
        let report = check_limits(
            &LimitCheckInput {
                weights: &w,
                sectors: &sectors,
                returns: &returns,
                liquidity: &liquidity,
            },
            &limits(),
            &mc_cfg(),
        )
        .unwrap();
        assert!(report.passed(), "violations: {:?}", report.violations);
    }

    #[test]
    fn single_exposure_violation_names_the_code() {
        let (w, sectors, returns, liquidity) = input_maps(&[("BIG", 0.20), ("B", 0.05)]);
        let report = check_limits(
            &LimitCheckInput {
                weights: &w,
                sectors: &sectors,
                returns: &returns,
                liquidity: &liquidity,
            },
            &limits(),
            &mc_cfg(),
        )
        .unwrap();
        let v = report
            .violations
            .iter()
            .find(|v| v.violation_type == ViolationType::SingleExposure)
            .unwrap();
        assert_eq!(v.codes, vec!["BIG".to_string()]);
        assert_eq!(v.severity, Severity::Warning, "0.20/0.15 < 1.5x");
    }

    #[test]
    fn severity_turns_critical_past_ratio() {
        let (w, sectors, returns, liquidity) = input_maps(&[("HUGE", 0.30)]);
        let report = check_limits(
            &LimitCheckInput {
                weights: &w,
                sectors: &sectors,
                returns: &returns,
                liquidity: &liquidity,
            },
            &limits(),
            &mc_cfg(),
        )
        .unwrap();
        let v = report
            .violations
            .iter()
            .find(|v| v.violation_type == ViolationType::SingleExposure)
            .unwrap();
        assert_eq!(v.severity, Severity::Critical, "0.30/0.15 = 2x");
    }

    #[test]
    fn sector_violation_lists_members() {
        let (w, _, returns, liquidity) = input_maps(&[("S1", 0.14), ("S2", 0.14), ("S3", 0.14)]);
        let sectors: BTreeMap<String, String> = w
            .keys()
            .map(|c| (c.clone(), "SEMI".to_string()))
            .collect();
        let report = check_limits(
            &LimitCheckInput {
                weights: &w,
                sectors: &sectors,
                returns: &returns,
                liquidity: &liquidity,
            },
            &limits(),
            &mc_cfg(),
        )
        .unwrap();
        let v = report
            .violations
            .iter()
            .find(|v| v.violation_type == ViolationType::SectorExposure)
            .unwrap();
        assert_eq!(v.codes.len(), 3);
        assert!((v.actual - 0.42).abs() < 1e-12);
    }

    #[test]
    fn concentration_counts_top_five() {
        let (w, sectors, returns, liquidity) = input_maps(&[
            ("A", 0.12),
            ("B", 0.12),
            ("C", 0.12),
            ("D", 0.12),
            ("E", 0.12),
            ("F", 0.01),
        ]);
        let report = check_limits(
            &LimitCheckInput {
                weights: &w,
                sectors: &sectors,
                returns: &returns,
                liquidity: &liquidity,
            },
            &limits(),
            &mc_cfg(),
        )
        .unwrap();
        let v = report
            .violations
            .iter()
            .find(|v| v.violation_type == ViolationType::Concentration)
            .unwrap();
        assert_eq!(v.codes.len(), 5);
        assert!((v.actual - 0.60).abs() < 1e-12);
        assert!(!v.codes.contains(&"F".to_string()));
    }

    #[test]
    fn low_liquidity_flags_worst_code() {
        let (w, sectors, returns, mut liquidity) = input_maps(&[("A", 0.10), ("ILLQ", 0.05)]);
        liquidity.insert("ILLQ".to_string(), 0.05);
        let report = check_limits(
            &LimitCheckInput {
                weights: &w,
                sectors: &sectors,
                returns: &returns,
                liquidity: &liquidity,
            },
            &limits(),
            &mc_cfg(),
        )
        .unwrap();
        let v = report
            .violations
            .iter()
            .find(|v| v.violation_type == ViolationType::Liquidity)
            .unwrap();
        assert_eq!(v.codes, vec!["ILLQ".to_string()]);
        assert_eq!(v.severity, Severity::Critical, "0.05 is far below 0.20");
    }

    #[test]
    fn var_violation_when_limits_are_tight() {
        let (w, sectors, mut returns, liquidity) = input_maps(&[("WILD", 0.90)]);
        // ±10% daily swings make 5-day VaR blow through a 1% cap.
        returns.insert(
            "WILD".to_string(),
            (0..100).map(|i| if i % 2 == 0 { 0.10 } else { -0.10 }).collect(),
        );
        let mut lim = limits();
        lim.max_var_95 = 0.01;
        lim.max_var_99 = 0.02;
        let report = check_limits(
            &LimitCheckInput {
                weights: &w,
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
    }

    #[test]
    fn weighted_returns_use_common_tail() {
        let mut weights = BTreeMap::new();
        weights.insert("A".to_string(), 0.5);
        weights.insert("B".to_string(), 0.5);
        let mut returns = BTreeMap::new();
        returns.insert("A".to_string(), vec![0.01, 0.02, 0.03]);
        returns.insert("B".to_string(), vec![0.03, 0.02]);
        let pr = weighted_portfolio_returns(&weights, &returns);
        // Common tail length 2: A uses [0.02, 0.03], B uses [0.03, 0.02].
        assert_eq!(pr.len(), 2);
        assert!((pr[0] - 0.025).abs() < 1e-12);
        assert!((pr[1] - 0.025).abs() < 1e-12);
    }

    #[test]
    fn no_history_fails_closed_via_min_samples() {
        let weights: BTreeMap<String, f64> = [("A".to_string(), 0.5)].into();
        let returns = BTreeMap::new();
        let sectors = BTreeMap::new();
        let liquidity = BTreeMap::new();
        let err = check_limits(
            &LimitCheckInput {
                weights: &weights,
                sectors: &sectors,
                returns: &returns,
                liquidity: &liquidity,
            },
            &limits(),
            &mc_cfg(),
        )
        .unwrap_err();
        assert!(matches!(err, McError::InsufficientSamples { .. }));
    }
}
