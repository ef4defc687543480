//! Typed strategy configuration.
//!
//! Every knob the pipeline reads lives here, with serde defaults matching
//! the shipped base strategy file. `StrategyConfig::validate` rejects
//! configurations that would make a stage structurally unsound; per the
//! screener convention, a threshold of 0 means "predicate disabled" and is
//! always accepted.

use anyhow::{bail, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Quality (S0)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityConfig {
    /// Minimum coverage per data kind, ratio in [0, 1].
    pub min_price_coverage: f64,
    pub min_flow_coverage: f64,
    pub min_fundamentals_coverage: f64,
    /// Dry-run escape hatch: pass S0 failures through with a warning.
    pub allow_low_quality: bool,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_price_coverage: 0.95,
            min_flow_coverage: 0.90,
            min_fundamentals_coverage: 0.50,
            allow_low_quality: false,
        }
    }
}

impl QualityConfig {
    /// kind → minimum, in the shape `QualitySnapshot::failing_kinds` takes.
    pub fn minimums(&self) -> std::collections::BTreeMap<String, f64> {
        [
            ("prices".to_string(), self.min_price_coverage),
            ("flows".to_string(), self.min_flow_coverage),
            ("fundamentals".to_string(), self.min_fundamentals_coverage),
        ]
        .into_iter()
        .collect()
    }
}

// ---------------------------------------------------------------------------
// Universe (S1)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UniverseConfig {
    /// Minimum 20-day average daily trading value in KRW (0 disables).
    /// Size/liquidity proxy; the reference data carries no share counts.
    pub min_avg_trading_value: i64,
    /// Minimum 20-day average volume in shares (0 disables).
    pub min_avg_volume: i64,
    /// Minimum calendar days since listing.
    pub min_listing_days: i64,
}

impl Default for UniverseConfig {
    fn default() -> Self {
        Self {
            min_avg_trading_value: 1_000_000_000,
            min_avg_volume: 10_000,
            min_listing_days: 180,
        }
    }
}

// ---------------------------------------------------------------------------
// Signals (S2) + ranking weights (S4)
// ---------------------------------------------------------------------------

/// Factor weights in canonical order. Normalized to sum 1 at ranking time,
/// so they can be expressed in any positive scale here.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SignalWeights {
    pub momentum: f64,
    pub technical: f64,
    pub value: f64,
    pub quality: f64,
    pub flow: f64,
    pub event: f64,
}

impl Default for SignalWeights {
    fn default() -> Self {
        Self {
            momentum: 0.25,
            technical: 0.15,
            value: 0.20,
            quality: 0.15,
            flow: 0.15,
            event: 0.10,
        }
    }
}

impl SignalWeights {
    pub fn as_array(&self) -> [f64; 6] {
        [
            self.momentum,
            self.technical,
            self.value,
            self.quality,
            self.flow,
            self.event,
        ]
    }

    pub fn sum(&self) -> f64 {
        self.as_array().iter().sum()
    }
}

// ---------------------------------------------------------------------------
// Screener (S3)
// ---------------------------------------------------------------------------

/// Hard-cut thresholds. The value 0 disables a predicate; `is_enabled`
/// centralizes the check so a future schema can split explicit-disable
/// from accidental zero in one place.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScreenerConfig {
    pub max_per: f64,
    pub min_pbr: f64,
    pub min_roe: f64,
    /// e.g. -0.09 for "not down more than 9% on the day".
    pub min_day1_return: f64,
    pub min_day5_return: f64,
    pub max_day5_return: f64,
    /// Cross-sectional 20-day volatility percentile cap in (0, 1].
    pub max_vol_percentile: f64,
}

impl Default for ScreenerConfig {
    fn default() -> Self {
        Self {
            max_per: 60.0,
            min_pbr: 0.2,
            min_roe: 0.03,
            min_day1_return: -0.09,
            min_day5_return: -0.25,
            max_day5_return: 0.40,
            max_vol_percentile: 0.95,
        }
    }
}

impl ScreenerConfig {
    /// The 0-disables convention, in one place.
    pub fn is_enabled(threshold: f64) -> bool {
        threshold != 0.0
    }
}

// ---------------------------------------------------------------------------
// Portfolio (S5)
// ---------------------------------------------------------------------------

/// One weighting tier: the top `count` not-yet-assigned codes each get
/// `weight_each`.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Tier {
    pub count: usize,
    pub weight_each: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PortfolioConfig {
    pub tiers: Vec<Tier>,
    pub min_weight: f64,
    pub max_weight: f64,
    pub sector_max: f64,
    pub cash_reserve: f64,
    /// Aggregate one-way weight movement cap vs the previous portfolio
    /// (0 disables).
    pub turnover_limit: f64,
    pub blacklist: Vec<String>,
}

impl Default for PortfolioConfig {
    fn default() -> Self {
        Self {
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
            blacklist: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution (S6)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Limit-order price adjustment, basis points.
    pub slippage_bps: i64,
    /// Use market orders (price 0) instead of adjusted limits.
    pub use_market_orders: bool,
    /// Orders at or above this notional (KRW) are split.
    pub split_threshold: i64,
    /// Maximum per-chunk notional (KRW) when splitting.
    pub max_order_size: i64,
    /// Broker call deadline in seconds.
    pub broker_timeout_secs: u64,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage_bps: 30,
            use_market_orders: false,
            split_threshold: 50_000_000,
            max_order_size: 10_000_000,
            broker_timeout_secs: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Risk gate (S6.5) + engine limits
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateMode {
    Off,
    Shadow,
    Enforce,
}

impl GateMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateMode::Off => "off",
            GateMode::Shadow => "shadow",
            GateMode::Enforce => "enforce",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskLimitsConfig {
    pub mode: GateMode,
    pub max_var_95: f64,
    pub max_var_99: f64,
    pub max_single_exposure: f64,
    pub max_sector_exposure: f64,
    /// Top-5 concentration cap.
    pub max_concentration: f64,
    pub min_liquidity_score: f64,
}

impl Default for RiskLimitsConfig {
    fn default() -> Self {
        Self {
            mode: GateMode::Shadow,
            max_var_95: 0.05,
            max_var_99: 0.08,
            max_single_exposure: 0.15,
            max_sector_exposure: 0.30,
            max_concentration: 0.50,
            min_liquidity_score: 0.20,
        }
    }
}

// ---------------------------------------------------------------------------
// Monte Carlo defaults
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloDefaults {
    /// "portfolio_univariate" | "asset_multivariate"
    pub mode: String,
    /// "simple" | "log"
    pub return_type: String,
    /// "historical_bootstrap" | "normal" | "t"
    pub method: String,
    pub num_simulations: u32,
    pub holding_period: u32,
    pub confidence_levels: Vec<f64>,
    pub lookback_days: u32,
    /// 0 ⇒ entropy-seeded; non-zero ⇒ deterministic.
    pub seed: u64,
    pub min_samples: usize,
}

impl Default for MonteCarloDefaults {
    fn default() -> Self {
        Self {
            mode: "portfolio_univariate".to_string(),
            return_type: "simple".to_string(),
            method: "historical_bootstrap".to_string(),
            num_simulations: 10_000,
            holding_period: 5,
            confidence_levels: vec![0.95, 0.99],
            lookback_days: 200,
            seed: 0,
            min_samples: 30,
        }
    }
}

// ---------------------------------------------------------------------------
// Position monitor
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    pub atr_window: usize,
    pub poll_interval_secs: u64,
    /// ATR multipliers for the three take-profit triggers.
    pub tp1_mult: f64,
    pub tp2_mult: f64,
    pub tp3_mult: f64,
    /// Clamp bands for each trigger distance, as fractions of entry.
    pub tp1_min: f64,
    pub tp1_max: f64,
    pub tp2_min: f64,
    pub tp2_max: f64,
    pub tp3_min: f64,
    pub tp3_max: f64,
    /// Fraction of remaining quantity sold at each take-profit.
    pub tp1_sell_pct: f64,
    pub tp2_sell_pct: f64,
    pub tp3_sell_pct: f64,
    /// First stop: loss threshold (negative) and fraction sold, once.
    pub first_stop_pct: f64,
    pub first_stop_sell_pct: f64,
    /// Second stop: sell everything.
    pub second_stop_pct: f64,
    /// Post-TP1 floor above entry, e.g. 0.006 = breakeven + 0.6%.
    pub stop_floor_buffer: f64,
    /// HWM trail: ATR multiplier and clamp band.
    pub trail_mult: f64,
    pub trail_min: f64,
    pub trail_max: f64,
    /// Duplicate-suppression window in seconds.
    pub dedup_window_secs: i64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            atr_window: 14,
            poll_interval_secs: 10,
            tp1_mult: 1.5,
            tp2_mult: 2.5,
            tp3_mult: 3.5,
            tp1_min: 0.06,
            tp1_max: 0.08,
            tp2_min: 0.10,
            tp2_max: 0.12,
            tp3_min: 0.15,
            tp3_max: 0.18,
            tp1_sell_pct: 0.25,
            tp2_sell_pct: 0.25,
            tp3_sell_pct: 0.25,
            first_stop_pct: -0.03,
            first_stop_sell_pct: 0.50,
            second_stop_pct: -0.05,
            stop_floor_buffer: 0.006,
            trail_mult: 1.0,
            trail_min: 0.03,
            trail_max: 0.05,
            dedup_window_secs: 60,
        }
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastConfig {
    pub e1_min_day_return: f64,
    pub e1_min_close_to_high: f64,
    pub e2_min_gap_ratio: f64,
    /// Minimum samples for a fallback level to win.
    pub min_samples: u64,
    /// Bayesian shrinkage constant K.
    pub shrinkage_k: f64,
    /// Confidence normalizer: confidence = min(1, n / this).
    pub confidence_norm: f64,
    pub model_version: String,
    pub calibration_bins: usize,
}

impl Default for ForecastConfig {
    fn default() -> Self {
        Self {
            e1_min_day_return: 0.035,
            e1_min_close_to_high: 0.4,
            e2_min_gap_ratio: 0.015,
            min_samples: 5,
            shrinkage_k: 10.0,
            confidence_norm: 30.0,
            model_version: "fc-v2".to_string(),
            calibration_bins: 5,
        }
    }
}

// ---------------------------------------------------------------------------
// Data housekeeping
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DataConfig {
    /// Investor-flow rows strictly before this date are deleted by `cleanup`
    /// (historical units change; see the cleanup command).
    pub flow_units_cutoff: Option<NaiveDate>,
}

impl Default for DataConfig {
    fn default() -> Self {
        Self {
            flow_units_cutoff: None,
        }
    }
}

// ---------------------------------------------------------------------------
// StrategyConfig (root)
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StrategyConfig {
    pub quality: QualityConfig,
    pub universe: UniverseConfig,
    pub weights: SignalWeights,
    pub screener: ScreenerConfig,
    pub portfolio: PortfolioConfig,
    pub execution: ExecutionConfig,
    pub gate: RiskLimitsConfig,
    pub monte_carlo: MonteCarloDefaults,
    pub monitor: MonitorConfig,
    pub forecast: ForecastConfig,
    pub data: DataConfig,
    pub feature_version: FeatureVersion,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVersion(pub String);

impl Default for FeatureVersion {
    fn default() -> Self {
        FeatureVersion("v4.0".to_string())
    }
}

impl StrategyConfig {
    /// Reject configurations a stage could not run under. Screener zeros are
    /// fine (disabled); structural nonsense is not.
    pub fn validate(&self) -> Result<()> {
        if self.weights.sum() <= 0.0 {
            bail!("signal weights must sum to a positive value");
        }
        if self.portfolio.tiers.is_empty() {
            bail!("portfolio.tiers must not be empty");
        }
        for (i, t) in self.portfolio.tiers.iter().enumerate() {
            if t.count == 0 || t.weight_each <= 0.0 {
                bail!("portfolio.tiers[{i}] must have count > 0 and weight_each > 0");
            }
        }
        if !(0.0..1.0).contains(&self.portfolio.cash_reserve) {
            bail!("portfolio.cash_reserve must be in [0, 1)");
        }
        if self.portfolio.max_weight < self.portfolio.min_weight {
            bail!("portfolio.max_weight must be >= min_weight");
        }
        if self.monte_carlo.num_simulations == 0 || self.monte_carlo.holding_period == 0 {
            bail!("monte_carlo.num_simulations and holding_period must be > 0");
        }
        for c in &self.monte_carlo.confidence_levels {
            if !(0.0 < *c && *c < 1.0) {
                bail!("monte_carlo.confidence_levels must be in (0, 1), got {c}");
            }
        }
        let m = &self.monitor;
        for (name, lo, hi) in [
            ("tp1", m.tp1_min, m.tp1_max),
            ("tp2", m.tp2_min, m.tp2_max),
            ("tp3", m.tp3_min, m.tp3_max),
            ("trail", m.trail_min, m.trail_max),
        ] {
            if lo > hi {
                bail!("monitor.{name} clamp band inverted: {lo} > {hi}");
            }
        }
        if m.first_stop_pct >= 0.0 || m.second_stop_pct >= 0.0 {
            bail!("monitor stop thresholds must be negative");
        }
        if m.second_stop_pct >= m.first_stop_pct {
            bail!("monitor.second_stop_pct must be below first_stop_pct");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        StrategyConfig::default().validate().unwrap();
    }

    #[test]
    fn default_tiers_cover_twenty_names_at_ninety_pct() {
        let p = PortfolioConfig::default();
        let total: f64 = p
            .tiers
            .iter()
            .map(|t| t.count as f64 * t.weight_each)
            .sum();
        let count: usize = p.tiers.iter().map(|t| t.count).sum();
        assert_eq!(count, 20);
        assert!((total - 0.90).abs() < 1e-12);
        assert!((total + p.cash_reserve - 1.0).abs() < 1e-12);
    }

    #[test]
    fn zero_weight_sum_rejected() {
        let mut cfg = StrategyConfig::default();
        cfg.weights = SignalWeights {
            momentum: 0.0,
            technical: 0.0,
            value: 0.0,
            quality: 0.0,
            flow: 0.0,
            event: 0.0,
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn inverted_clamp_band_rejected() {
        let mut cfg = StrategyConfig::default();
        cfg.monitor.tp1_min = 0.09;
        cfg.monitor.tp1_max = 0.06;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn positive_stop_threshold_rejected() {
        let mut cfg = StrategyConfig::default();
        cfg.monitor.first_stop_pct = 0.03;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn screener_zero_means_disabled() {
        assert!(!ScreenerConfig::is_enabled(0.0));
        assert!(ScreenerConfig::is_enabled(60.0));
        assert!(ScreenerConfig::is_enabled(-0.09));
    }
}
