//! Monte Carlo simulation over return series.
//!
//! # Determinism contract
//!
//! The RNG is a `ChaCha8Rng` seeded from `McConfig::seed` inside this
//! module. Equal seed + equal config + equal input ⇒ bit-identical results
//! across runs and hosts. A seed of 0 requests entropy seeding; the seed
//! actually used is reported in the result so any run can be replayed.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use statrs::distribution::{Normal, StudentsT};

use kite_config::MonteCarloDefaults;

use crate::var::{historical_cvar, historical_var};

/// Percentiles reported for the simulated distribution.
pub const REPORT_PERCENTILES: [u8; 9] = [1, 5, 10, 25, 50, 75, 90, 95, 99];

// ---------------------------------------------------------------------------
// Config enums
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum McMode {
    PortfolioUnivariate,
    AssetMultivariate,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReturnType {
    Simple,
    Log,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum McMethod {
    HistoricalBootstrap,
    Normal,
    T,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct McConfig {
    pub mode: McMode,
    pub return_type: ReturnType,
    pub method: McMethod,
    pub num_simulations: u32,
    pub holding_period: u32,
    pub confidence_levels: Vec<f64>,
    pub lookback_days: u32,
    /// 0 ⇒ entropy-seeded; non-zero ⇒ deterministic.
    pub seed: u64,
    pub min_samples: usize,
    /// Student-t degrees of freedom; `None` ⇒ estimated from the sample.
    pub t_dof: Option<f64>,
}

impl McConfig {
    /// Parse the stringly-typed strategy-file defaults into the typed config.
    pub fn from_defaults(d: &MonteCarloDefaults) -> Result<Self, McError> {
        let mode = match d.mode.as_str() {
            "portfolio_univariate" => McMode::PortfolioUnivariate,
            "asset_multivariate" => McMode::AssetMultivariate,
            other => return Err(McError::InvalidConfig(format!("unknown mode '{other}'"))),
        };
        let return_type = match d.return_type.as_str() {
            "simple" => ReturnType::Simple,
            "log" => ReturnType::Log,
            other => {
                return Err(McError::InvalidConfig(format!(
                    "unknown return_type '{other}'"
                )))
            }
        };
        let method = match d.method.as_str() {
            "historical_bootstrap" => McMethod::HistoricalBootstrap,
            "normal" => McMethod::Normal,
            "t" => McMethod::T,
            other => return Err(McError::InvalidConfig(format!("unknown method '{other}'"))),
        };
        Ok(Self {
            mode,
            return_type,
            method,
            num_simulations: d.num_simulations,
            holding_period: d.holding_period,
            confidence_levels: d.confidence_levels.clone(),
            lookback_days: d.lookback_days,
            seed: d.seed,
            min_samples: d.min_samples,
            t_dof: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub enum McError {
    /// Fail-closed: fewer input observations than `min_samples`.
    InsufficientSamples { needed: usize, got: usize },
    InvalidConfig(String),
}

impl std::fmt::Display for McError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McError::InsufficientSamples { needed, got } => {
                write!(f, "insufficient samples: needed {needed}, got {got}")
            }
            McError::InvalidConfig(detail) => write!(f, "invalid monte carlo config: {detail}"),
        }
    }
}

impl std::error::Error for McError {}

// ---------------------------------------------------------------------------
// Result
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq)]
pub struct McResult {
    pub mean: f64,
    pub std: f64,
    /// percentile → simulated holding-period return.
    pub percentiles: Vec<(u8, f64)>,
    /// confidence → VaR (positive loss fraction).
    pub var: Vec<(f64, f64)>,
    /// confidence → CVaR (positive loss fraction).
    pub cvar: Vec<(f64, f64)>,
    pub num_simulations: u32,
    /// The seed the RNG actually ran with (echoes config seed, or the
    /// entropy draw when the config seed was 0).
    pub seed_used: u64,
    pub input_samples: usize,
}

impl McResult {
    pub fn var_at(&self, confidence: f64) -> Option<f64> {
        self.var
            .iter()
            .find(|(c, _)| (c - confidence).abs() < 1e-9)
            .map(|(_, v)| *v)
    }

    pub fn cvar_at(&self, confidence: f64) -> Option<f64> {
        self.cvar
            .iter()
            .find(|(c, _)| (c - confidence).abs() < 1e-9)
            .map(|(_, v)| *v)
    }
}

// ---------------------------------------------------------------------------
// Simulation
// ---------------------------------------------------------------------------

/// Simulate holding-period returns for one (portfolio-level) return series.
///
/// The input is truncated to the trailing `lookback_days` observations
/// before anything else, then checked against `min_samples`.
pub fn simulate(cfg: &McConfig, returns: &[f64]) -> Result<McResult, McError> {
    let input = tail(returns, cfg.lookback_days as usize);
    check_samples(cfg, input.len())?;

    let seed_used = resolve_seed(cfg.seed);
    let mut rng = ChaCha8Rng::seed_from_u64(seed_used);

    let sampler = PathSampler::prepare(cfg, input)?;
    let mut outcomes = Vec::with_capacity(cfg.num_simulations as usize);
    for _ in 0..cfg.num_simulations {
        let mut path = Vec::with_capacity(cfg.holding_period as usize);
        for _ in 0..cfg.holding_period {
            path.push(sampler.draw(&mut rng, input));
        }
        outcomes.push(compound(&path, cfg.return_type));
    }

    Ok(summarize(cfg, outcomes, seed_used, input.len()))
}

/// Multivariate simulation: joint bootstrap over asset rows, weighted into a
/// portfolio outcome per path. Preserves the cross-sectional structure of
/// the input by resampling whole time indexes.
///
/// Parametric methods need a covariance model this engine does not carry;
/// only `historical_bootstrap` is accepted in this mode.
pub fn simulate_assets(
    cfg: &McConfig,
    weights: &[f64],
    asset_returns: &[Vec<f64>],
) -> Result<McResult, McError> {
    if cfg.method != McMethod::HistoricalBootstrap {
        return Err(McError::InvalidConfig(
            "asset_multivariate supports historical_bootstrap only".to_string(),
        ));
    }
    if weights.len() != asset_returns.len() || weights.is_empty() {
        return Err(McError::InvalidConfig(format!(
            "weights ({}) and asset series ({}) must match and be non-empty",
            weights.len(),
            asset_returns.len()
        )));
    }

    // Common sample length = shortest series, truncated to lookback.
    let common = asset_returns.iter().map(|r| r.len()).min().unwrap_or(0);
    let n = common.min(cfg.lookback_days as usize);
    check_samples(cfg, n)?;

    let seed_used = resolve_seed(cfg.seed);
    let mut rng = ChaCha8Rng::seed_from_u64(seed_used);

    let mut outcomes = Vec::with_capacity(cfg.num_simulations as usize);
    for _ in 0..cfg.num_simulations {
        let mut path = Vec::with_capacity(cfg.holding_period as usize);
        for _ in 0..cfg.holding_period {
            let t = rng.gen_range(0..n);
            let mut r = 0.0;
            for (w, series) in weights.iter().zip(asset_returns.iter()) {
                let tail_start = series.len() - n;
                r += w * series[tail_start + t];
            }
            path.push(r);
        }
        outcomes.push(compound(&path, cfg.return_type));
    }

    Ok(summarize(cfg, outcomes, seed_used, n))
}

// ---------------------------------------------------------------------------
// Internals
// ---------------------------------------------------------------------------

fn tail(returns: &[f64], lookback: usize) -> &[f64] {
    if lookback == 0 || returns.len() <= lookback {
        returns
    } else {
        &returns[returns.len() - lookback..]
    }
}

fn check_samples(cfg: &McConfig, got: usize) -> Result<(), McError> {
    if got < cfg.min_samples {
        return Err(McError::InsufficientSamples {
            needed: cfg.min_samples,
            got,
        });
    }
    Ok(())
}

fn resolve_seed(config_seed: u64) -> u64 {
    if config_seed != 0 {
        config_seed
    } else {
        rand::thread_rng().gen::<u64>().max(1)
    }
}

/// Per-method draw state, prepared once per simulation.
enum PathSampler {
    Bootstrap,
    Normal(Normal),
    /// (standardized t, mean, scale to sample std).
    StudentT(StudentsT, f64, f64),
}

impl PathSampler {
    fn prepare(cfg: &McConfig, input: &[f64]) -> Result<Self, McError> {
        match cfg.method {
            McMethod::HistoricalBootstrap => Ok(PathSampler::Bootstrap),
            McMethod::Normal => {
                let (mean, std) = mean_std(input);
                let dist = Normal::new(mean, std.max(1e-12))
                    .map_err(|e| McError::InvalidConfig(format!("normal fit: {e}")))?;
                Ok(PathSampler::Normal(dist))
            }
            McMethod::T => {
                let (mean, std) = mean_std(input);
                let dof = cfg.t_dof.unwrap_or_else(|| estimate_dof(input));
                let dist = StudentsT::new(0.0, 1.0, dof)
                    .map_err(|e| McError::InvalidConfig(format!("t fit: {e}")))?;
                // A standard t with ν dof has variance ν/(ν−2); rescale so
                // the simulated draws carry the sample std.
                let scale = std.max(1e-12) / (dof / (dof - 2.0)).sqrt();
                Ok(PathSampler::StudentT(dist, mean, scale))
            }
        }
    }

    fn draw(&self, rng: &mut ChaCha8Rng, input: &[f64]) -> f64 {
        match self {
            PathSampler::Bootstrap => input[rng.gen_range(0..input.len())],
            PathSampler::Normal(dist) => rng.sample(*dist),
            PathSampler::StudentT(dist, mean, scale) => mean + scale * rng.sample(*dist),
        }
    }
}

fn mean_std(xs: &[f64]) -> (f64, f64) {
    let n = xs.len() as f64;
    let mean = xs.iter().sum::<f64>() / n;
    let var = xs.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0).max(1.0);
    (mean, var.sqrt())
}

/// Method-of-moments ν from excess kurtosis, clamped to [3, 30].
/// Excess kurtosis κ of a t-distribution is 6/(ν−4) for ν > 4.
fn estimate_dof(xs: &[f64]) -> f64 {
    let (mean, std) = mean_std(xs);
    if std <= 1e-12 {
        return 30.0;
    }
    let n = xs.len() as f64;
    let kurt = xs.iter().map(|x| ((x - mean) / std).powi(4)).sum::<f64>() / n - 3.0;
    if kurt <= 0.0 {
        return 30.0;
    }
    (4.0 + 6.0 / kurt).clamp(3.0, 30.0)
}

fn compound(path: &[f64], return_type: ReturnType) -> f64 {
    match return_type {
        ReturnType::Simple => path.iter().fold(1.0, |acc, r| acc * (1.0 + r)) - 1.0,
        ReturnType::Log => path.iter().sum(),
    }
}

fn summarize(cfg: &McConfig, outcomes: Vec<f64>, seed_used: u64, input_samples: usize) -> McResult {
    let (mean, std) = mean_std(&outcomes);

    let mut sorted = outcomes;
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = sorted.len();
    let percentiles = REPORT_PERCENTILES
        .iter()
        .map(|p| {
            let idx = ((*p as f64 / 100.0) * (n - 1) as f64).round() as usize;
            (*p, sorted[idx])
        })
        .collect();

    let var = cfg
        .confidence_levels
        .iter()
        .map(|c| (*c, historical_var(&sorted, *c).unwrap_or(0.0)))
        .collect();
    let cvar = cfg
        .confidence_levels
        .iter()
        .map(|c| (*c, historical_cvar(&sorted, *c).unwrap_or(0.0)))
        .collect();

    McResult {
        mean,
        std,
        percentiles,
        var,
        cvar,
        num_simulations: cfg.num_simulations,
        seed_used,
        input_samples,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(seed: u64) -> McConfig {
        McConfig {
            mode: McMode::PortfolioUnivariate,
            return_type: ReturnType::Simple,
            method: McMethod::HistoricalBootstrap,
            num_simulations: 2_000,
            holding_period: 5,
            confidence_levels: vec![0.95, 0.99],
            lookback_days: 200,
            seed,
            min_samples: 30,
            t_dof: None,
        }
    }

    /// Deterministic pseudo-returns fixture: 487 observations in ±3%.
    fn fixture_returns() -> Vec<f64> {
        (0..487)
            .map(|i| {
                let x = (i as f64 * 0.7).sin() * 0.02 + (i as f64 * 0.13).cos() * 0.01;
                x
            })
            .collect()
    }

    #[test]
    fn equal_seed_is_bit_identical() {
        let returns = fixture_returns();
        let a = simulate(&cfg(42), &returns).unwrap();
        let b = simulate(&cfg(42), &returns).unwrap();
        assert_eq!(a, b, "same seed + config + input must be bit-identical");
    }

    #[test]
    fn different_seeds_differ() {
        let returns = fixture_returns();
        let a = simulate(&cfg(42), &returns).unwrap();
        let b = simulate(&cfg(43), &returns).unwrap();
        assert_ne!(a.var_at(0.95), b.var_at(0.95));
    }

    #[test]
    fn zero_seed_reports_entropy_seed() {
        let returns = fixture_returns();
        let r = simulate(&cfg(0), &returns).unwrap();
        assert_ne!(r.seed_used, 0);
        // Replaying with the reported seed reproduces the run.
        let mut replay_cfg = cfg(0);
        replay_cfg.seed = r.seed_used;
        let replay = simulate(&replay_cfg, &returns).unwrap();
        assert_eq!(r, replay);
    }

    #[test]
    fn insufficient_samples_fails_closed() {
        let returns = vec![0.01; 29];
        let err = simulate(&cfg(42), &returns).unwrap_err();
        assert_eq!(
            err,
            McError::InsufficientSamples {
                needed: 30,
                got: 29
            }
        );
    }

    #[test]
    fn lookback_truncates_before_sample_check() {
        let mut c = cfg(42);
        c.lookback_days = 50;
        let returns = fixture_returns();
        let r = simulate(&c, &returns).unwrap();
        assert_eq!(r.input_samples, 50);
    }

    #[test]
    fn var_monotone_in_confidence() {
        let returns = fixture_returns();
        let r = simulate(&cfg(42), &returns).unwrap();
        let v95 = r.var_at(0.95).unwrap();
        let v99 = r.var_at(0.99).unwrap();
        assert!(v99 >= v95, "VaR99 {v99} < VaR95 {v95}");
    }

    #[test]
    fn percentile_grid_is_monotone() {
        let returns = fixture_returns();
        let r = simulate(&cfg(42), &returns).unwrap();
        assert_eq!(r.percentiles.len(), REPORT_PERCENTILES.len());
        for pair in r.percentiles.windows(2) {
            assert!(pair[0].1 <= pair[1].1, "percentiles must be sorted");
        }
    }

    #[test]
    fn normal_method_is_deterministic_too() {
        let mut c = cfg(7);
        c.method = McMethod::Normal;
        let returns = fixture_returns();
        let a = simulate(&c, &returns).unwrap();
        let b = simulate(&c, &returns).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn t_method_runs_with_estimated_dof() {
        let mut c = cfg(7);
        c.method = McMethod::T;
        let returns = fixture_returns();
        let r = simulate(&c, &returns).unwrap();
        assert!(r.std > 0.0);
    }

    #[test]
    fn log_compounding_sums_path() {
        assert!((compound(&[0.01, 0.02, -0.01], ReturnType::Log) - 0.02).abs() < 1e-12);
        let simple = compound(&[0.10, 0.10], ReturnType::Simple);
        assert!((simple - 0.21).abs() < 1e-12);
    }

    #[test]
    fn multivariate_bootstrap_preserves_weighting() {
        // Two perfectly offsetting assets at equal weight ⇒ zero portfolio
        // return on every path.
        let a: Vec<f64> = (0..100).map(|i| ((i % 7) as f64 - 3.0) * 0.01).collect();
        let b: Vec<f64> = a.iter().map(|x| -x).collect();
        let r = simulate_assets(&cfg(42), &[0.5, 0.5], &[a, b]).unwrap();
        assert!(r.mean.abs() < 1e-12);
        assert!(r.std.abs() < 1e-12);
    }

    #[test]
    fn multivariate_rejects_parametric_methods() {
        let mut c = cfg(42);
        c.method = McMethod::Normal;
        let err = simulate_assets(&c, &[1.0], &[fixture_returns()]).unwrap_err();
        assert!(matches!(err, McError::InvalidConfig(_)));
    }

    #[test]
    fn from_defaults_parses_strings() {
        let d = MonteCarloDefaults::default();
        let c = McConfig::from_defaults(&d).unwrap();
        assert_eq!(c.mode, McMode::PortfolioUnivariate);
        assert_eq!(c.method, McMethod::HistoricalBootstrap);
        assert_eq!(c.num_simulations, 10_000);

        let mut bad = MonteCarloDefaults::default();
        bad.method = "quantum".to_string();
        assert!(McConfig::from_defaults(&bad).is_err());
    }
}
