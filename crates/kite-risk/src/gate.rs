//! The pre-trade risk gate: a mode switch over the shared engine.
//!
//! Modes:
//! - **off**     — pass without computing.
//! - **shadow**  — compute; always pass; record a would-block flag.
//! - **enforce** — compute; pass, reduce, or block.
//!
//! Enforce action tree (first match wins):
//! 1. engine passed                          ⇒ PASS
//! 2. any CRITICAL violation or any VaR one  ⇒ BLOCK
//! 3. every violation reducible              ⇒ REDUCE
//!    - SINGLE_EXPOSURE: cap the max-weight holding at 0.95·limit
//!    - CONCENTRATION:   trim the largest top-5 holding by 10%
//! 4. any non-reducible violation            ⇒ BLOCK
//!    (SECTOR_EXPOSURE and LIQUIDITY have no reducer yet)
//!
//! Every evaluation becomes a [`GateEvent`] so shadow mode accumulates the
//! analytics (block rate, VaR distribution) that justify flipping to
//! enforce.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use kite_config::GateMode;
use serde::{Deserialize, Serialize};

use crate::limits::{LimitReport, Severity, Violation, ViolationType};

// ---------------------------------------------------------------------------
// Decision
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateAction {
    Pass,
    Reduce,
    Block,
}

impl GateAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateAction::Pass => "PASS",
            GateAction::Reduce => "REDUCE",
            GateAction::Block => "BLOCK",
        }
    }
}

/// The gate's verdict for one target portfolio.
#[derive(Clone, Debug, PartialEq)]
pub struct GateDecision {
    pub mode: GateMode,
    pub action: GateAction,
    /// False only on enforce-mode BLOCK.
    pub passed: bool,
    /// True whenever the engine found anything, regardless of mode.
    pub would_block: bool,
    pub violations: Vec<Violation>,
    pub var_95: f64,
    pub var_99: f64,
    /// Present on REDUCE: the weights after reduction.
    pub adjusted_weights: Option<BTreeMap<String, f64>>,
    /// Present on BLOCK: the codes behind the blocking violations.
    pub blocked_codes: Vec<String>,
    pub message: String,
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// Map an engine report to a gate decision under the given mode.
///
/// `off` mode short-circuits before the engine runs, so callers pass `None`
/// for the report there.
pub fn evaluate_gate(
    mode: GateMode,
    report: Option<&LimitReport>,
    weights: &BTreeMap<String, f64>,
) -> GateDecision {
    let Some(report) = report else {
        return GateDecision {
            mode,
            action: GateAction::Pass,
            passed: true,
            would_block: false,
            violations: Vec::new(),
            var_95: 0.0,
            var_99: 0.0,
            adjusted_weights: None,
            blocked_codes: Vec::new(),
            message: "gate off".to_string(),
        };
    };

    let would_block = !report.passed();

    match mode {
        GateMode::Off => GateDecision {
            mode,
            action: GateAction::Pass,
            passed: true,
            would_block: false,
            violations: Vec::new(),
            var_95: report.var_95,
            var_99: report.var_99,
            adjusted_weights: None,
            blocked_codes: Vec::new(),
            message: "gate off".to_string(),
        },
        GateMode::Shadow => GateDecision {
            mode,
            action: GateAction::Pass,
            passed: true,
            would_block,
            violations: report.violations.clone(),
            var_95: report.var_95,
            var_99: report.var_99,
            adjusted_weights: None,
            blocked_codes: Vec::new(),
            message: if would_block {
                format!(
                    "shadow: would block ({} violation(s))",
                    report.violations.len()
                )
            } else {
                "shadow: clean".to_string()
            },
        },
        GateMode::Enforce => enforce(report, weights),
    }
}

fn enforce(report: &LimitReport, weights: &BTreeMap<String, f64>) -> GateDecision {
    if report.passed() {
        return GateDecision {
            mode: GateMode::Enforce,
            action: GateAction::Pass,
            passed: true,
            would_block: false,
            violations: Vec::new(),
            var_95: report.var_95,
            var_99: report.var_99,
            adjusted_weights: None,
            blocked_codes: Vec::new(),
            message: "enforce: clean".to_string(),
        };
    }

    // Hard stops first: criticals and VaR breaches are never reduced.
    if report.has_critical() || report.has_var_violation() {
        return block(report, "critical or VaR violation");
    }

    // Attempt reduction; any violation without a reducer blocks.
    let mut adjusted = weights.clone();
    for v in &report.violations {
        match v.violation_type {
            ViolationType::SingleExposure => reduce_single_exposure(&mut adjusted, v),
            ViolationType::Concentration => reduce_concentration(&mut adjusted),
            // No reducer implemented for these; fail closed.
            ViolationType::SectorExposure | ViolationType::Liquidity => {
                return block(report, "violation type not reducible");
            }
            ViolationType::Var95 | ViolationType::Var99 => {
                unreachable!("VaR violations block above")
            }
        }
    }

    GateDecision {
        mode: GateMode::Enforce,
        action: GateAction::Reduce,
        passed: true,
        would_block: true,
        violations: report.violations.clone(),
        var_95: report.var_95,
        var_99: report.var_99,
        adjusted_weights: Some(adjusted),
        blocked_codes: Vec::new(),
        message: format!("enforce: reduced {} violation(s)", report.violations.len()),
    }
}

fn block(report: &LimitReport, why: &str) -> GateDecision {
    let mut blocked: Vec<String> = report
        .violations
        .iter()
        .filter(|v| v.severity == Severity::Critical || v.violation_type.is_var())
        .flat_map(|v| v.codes.iter().cloned())
        .collect();
    if blocked.is_empty() {
        blocked = report
            .violations
            .iter()
            .flat_map(|v| v.codes.iter().cloned())
            .collect();
    }
    blocked.sort();
    blocked.dedup();

    GateDecision {
        mode: GateMode::Enforce,
        action: GateAction::Block,
        passed: false,
        would_block: true,
        violations: report.violations.clone(),
        var_95: report.var_95,
        var_99: report.var_99,
        adjusted_weights: None,
        blocked_codes: blocked,
        message: format!("enforce: blocked ({why})"),
    }
}

/// SINGLE_EXPOSURE reducer: cap the max-weight holding at 0.95 · limit.
fn reduce_single_exposure(weights: &mut BTreeMap<String, f64>, v: &Violation) {
    let target = v.limit * 0.95;
    if let Some((code, _)) = weights
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, w)| (c.clone(), *w))
    {
        if let Some(w) = weights.get_mut(&code) {
            if *w > target {
                *w = target;
            }
        }
    }
}

/// CONCENTRATION reducer: trim the largest top-5 holding by 10%.
fn reduce_concentration(weights: &mut BTreeMap<String, f64>) {
    if let Some((code, _)) = weights
        .iter()
        .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(c, w)| (c.clone(), *w))
    {
        if let Some(w) = weights.get_mut(&code) {
            *w *= 0.90;
        }
    }
}

// ---------------------------------------------------------------------------
// GateEvent — the persisted trail
// ---------------------------------------------------------------------------

/// One gate evaluation, persisted per run for shadow-mode analytics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GateEvent {
    pub run_id: String,
    pub mode: String,
    pub action: String,
    pub passed: bool,
    pub would_block: bool,
    pub violation_count: usize,
    pub var_95: f64,
    pub var_99: f64,
    pub message: String,
    pub created_at: DateTime<Utc>,
}

impl GateEvent {
    pub fn from_decision(run_id: &str, decision: &GateDecision, at: DateTime<Utc>) -> Self {
        Self {
            run_id: run_id.to_string(),
            mode: decision.mode.as_str().to_string(),
            action: decision.action.as_str().to_string(),
            passed: decision.passed,
            would_block: decision.would_block,
            violation_count: decision.violations.len(),
            var_95: decision.var_95,
            var_99: decision.var_99,
            message: decision.message.clone(),
            created_at: at,
        }
    }
}

/// Shadow-mode analytics over a window of gate events.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct GateStats {
    pub total: usize,
    pub would_block_count: usize,
    pub block_rate: f64,
    pub avg_var_95: f64,
    pub max_var_95: f64,
    pub avg_var_99: f64,
    pub max_var_99: f64,
}

impl GateStats {
    pub fn from_events(events: &[GateEvent]) -> Self {
        let total = events.len();
        if total == 0 {
            return Self {
                total: 0,
                would_block_count: 0,
                block_rate: 0.0,
                avg_var_95: 0.0,
                max_var_95: 0.0,
                avg_var_99: 0.0,
                max_var_99: 0.0,
            };
        }
        let would_block_count = events.iter().filter(|e| e.would_block).count();
        let n = total as f64;
        Self {
            total,
            would_block_count,
            block_rate: would_block_count as f64 / n,
            avg_var_95: events.iter().map(|e| e.var_95).sum::<f64>() / n,
            max_var_95: events.iter().map(|e| e.var_95).fold(0.0, f64::max),
            avg_var_99: events.iter().map(|e| e.var_99).sum::<f64>() / n,
            max_var_99: events.iter().map(|e| e.var_99).fold(0.0, f64::max),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::montecarlo::{McConfig, McMethod, McMode, McResult, ReturnType};

    fn mc_result() -> McResult {
        // Hand-built result; the gate only reads var fields off the report.
        let cfg = McConfig {
            mode: McMode::PortfolioUnivariate,
            return_type: ReturnType::Simple,
            method: McMethod::HistoricalBootstrap,
            num_simulations: 10,
            holding_period: 5,
            confidence_levels: vec![0.95, 0.99],
            lookback_days: 200,
            seed: 1,
            min_samples: 1,
            t_dof: None,
        };
        crate::montecarlo::simulate(&cfg, &[0.0; 30]).unwrap()
    }

    fn report(violations: Vec<Violation>) -> LimitReport {
        LimitReport {
            violations,
            var_95: 0.02,
            var_99: 0.03,
            mc: mc_result(),
        }
    }

    fn single_exposure(actual: f64, severity: Severity) -> Violation {
        Violation {
            violation_type: ViolationType::SingleExposure,
            limit: 0.15,
            actual,
            severity,
            codes: vec!["BIG".to_string()],
        }
    }

    fn weights(items: &[(&str, f64)]) -> BTreeMap<String, f64> {
        items.iter().map(|(c, w)| (c.to_string(), *w)).collect()
    }

    #[test]
    fn off_mode_passes_without_report() {
        let d = evaluate_gate(GateMode::Off, None, &weights(&[]));
        assert_eq!(d.action, GateAction::Pass);
        assert!(d.passed);
        assert!(!d.would_block);
    }

    #[test]
    fn shadow_passes_but_records_would_block() {
        let r = report(vec![single_exposure(0.20, Severity::Warning)]);
        let d = evaluate_gate(GateMode::Shadow, Some(&r), &weights(&[("BIG", 0.20)]));
        assert_eq!(d.action, GateAction::Pass);
        assert!(d.passed);
        assert!(d.would_block);
        assert_eq!(d.violations.len(), 1);
    }

    #[test]
    fn enforce_clean_passes() {
        let r = report(vec![]);
        let d = evaluate_gate(GateMode::Enforce, Some(&r), &weights(&[("A", 0.05)]));
        assert_eq!(d.action, GateAction::Pass);
        assert!(d.passed);
    }

    #[test]
    fn enforce_reduces_single_exposure_to_95pct_of_limit() {
        let r = report(vec![single_exposure(0.20, Severity::Warning)]);
        let w = weights(&[("BIG", 0.20), ("B", 0.05)]);
        let d = evaluate_gate(GateMode::Enforce, Some(&r), &w);
        assert_eq!(d.action, GateAction::Reduce);
        assert!(d.passed);
        let adjusted = d.adjusted_weights.unwrap();
        assert!((adjusted["BIG"] - 0.1425).abs() < 1e-12, "0.15 · 0.95");
        assert_eq!(adjusted["B"], 0.05);
    }

    #[test]
    fn enforce_blocks_on_critical() {
        let r = report(vec![single_exposure(0.40, Severity::Critical)]);
        let d = evaluate_gate(GateMode::Enforce, Some(&r), &weights(&[("BIG", 0.40)]));
        assert_eq!(d.action, GateAction::Block);
        assert!(!d.passed);
        assert_eq!(d.blocked_codes, vec!["BIG".to_string()]);
    }

    #[test]
    fn enforce_blocks_on_var_violation() {
        let v = Violation {
            violation_type: ViolationType::Var99,
            limit: 0.08,
            actual: 0.09,
            severity: Severity::Warning,
            codes: vec!["A".to_string(), "B".to_string()],
        };
        let r = report(vec![v]);
        let d = evaluate_gate(GateMode::Enforce, Some(&r), &weights(&[("A", 0.1), ("B", 0.1)]));
        assert_eq!(d.action, GateAction::Block);
        assert!(!d.passed);
        assert_eq!(d.blocked_codes.len(), 2);
    }

    #[test]
    fn enforce_blocks_on_non_reducible_type() {
        let v = Violation {
            violation_type: ViolationType::SectorExposure,
            limit: 0.30,
            actual: 0.35,
            severity: Severity::Warning,
            codes: vec!["S1".to_string()],
        };
        let r = report(vec![v]);
        let d = evaluate_gate(GateMode::Enforce, Some(&r), &weights(&[("S1", 0.35)]));
        assert_eq!(d.action, GateAction::Block);
    }

    #[test]
    fn concentration_reducer_trims_largest_by_ten_pct() {
        let v = Violation {
            violation_type: ViolationType::Concentration,
            limit: 0.50,
            actual: 0.55,
            severity: Severity::Warning,
            codes: vec!["A".to_string()],
        };
        let r = report(vec![v]);
        let w = weights(&[("A", 0.12), ("B", 0.11)]);
        let d = evaluate_gate(GateMode::Enforce, Some(&r), &w);
        assert_eq!(d.action, GateAction::Reduce);
        let adjusted = d.adjusted_weights.unwrap();
        assert!((adjusted["A"] - 0.108).abs() < 1e-12);
        assert_eq!(adjusted["B"], 0.11);
    }

    #[test]
    fn gate_event_carries_decision_fields() {
        let r = report(vec![single_exposure(0.20, Severity::Warning)]);
        let d = evaluate_gate(GateMode::Shadow, Some(&r), &weights(&[("BIG", 0.20)]));
        let ev = GateEvent::from_decision("run_20250701093000_a3f01b", &d, Utc::now());
        assert_eq!(ev.mode, "shadow");
        assert_eq!(ev.action, "PASS");
        assert!(ev.would_block);
        assert_eq!(ev.violation_count, 1);
    }

    #[test]
    fn stats_over_events() {
        let now = Utc::now();
        let mk = |would_block: bool, var_95: f64| GateEvent {
            run_id: "r".to_string(),
            mode: "shadow".to_string(),
            action: "PASS".to_string(),
            passed: true,
            would_block,
            violation_count: usize::from(would_block),
            var_95,
            var_99: var_95 + 0.01,
            message: String::new(),
            created_at: now,
        };
        let stats = GateStats::from_events(&[mk(true, 0.04), mk(false, 0.02), mk(true, 0.06)]);
        assert_eq!(stats.total, 3);
        assert_eq!(stats.would_block_count, 2);
        assert!((stats.block_rate - 2.0 / 3.0).abs() < 1e-12);
        assert!((stats.avg_var_95 - 0.04).abs() < 1e-12);
        assert!((stats.max_var_95 - 0.06).abs() < 1e-12);
    }

    #[test]
    fn stats_of_empty_window() {
        let stats = GateStats::from_events(&[]);
        assert_eq!(stats.total, 0);
        assert_eq!(stats.block_rate, 0.0);
    }
}
