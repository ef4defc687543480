//! kite-risk: the shared risk engine and the pre-trade gate.
//!
//! The engine side (VaR/CVaR, Monte Carlo, limit checks) is pure and
//! deterministic: the RNG is parameter-seeded inside the Monte Carlo
//! engine, never a process global, so equal (config, seed, input) produces
//! bit-identical results across runs and hosts.
//!
//! The gate side wraps the engine with a mode switch (off / shadow /
//! enforce); the mode controls only the action mapping, never the
//! computation.

pub mod gate;
pub mod limits;
pub mod montecarlo;
pub mod stress;
pub mod var;

pub use gate::{evaluate_gate, GateAction, GateDecision, GateEvent, GateStats};
pub use limits::{check_limits, LimitCheckInput, LimitReport, Severity, Violation, ViolationType};
pub use montecarlo::{
    simulate, simulate_assets, McConfig, McError, McMethod, McMode, McResult, ReturnType,
};
pub use stress::{apply_scenario, run_stress, standard_scenarios, StressResult, StressScenario};
pub use var::{historical_cvar, historical_var};
