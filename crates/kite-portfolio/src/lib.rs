//! kite-portfolio: tiered weighting and constraint projection.
//!
//! Responsibilities (pure, no IO, no broker):
//! - Assign tier weights down the ranking.
//! - Project the raw weights onto the constraint set (position caps, sector
//!   caps, blacklist, cash reserve, turnover limit).
//! - Assemble the `TargetPortfolio` with per-position actions against the
//!   previous day's weights.
//!
//! Weights are dimensionless fractions of capital; rounding to integer
//! share quantities happens downstream in the execution planner.

pub mod constructor;
pub mod projection;

pub use constructor::{construct, ConstructError, ConstructionInput};
pub use projection::{project, ProjectionOutcome};
