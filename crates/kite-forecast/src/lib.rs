//! kite-forecast: event detection, forward tracking, hierarchical
//! aggregation, prediction with fallback, and validation.
//!
//! Every module is pure over slices and maps; persistence and joins live in
//! the repositories. The fallback hierarchy is the ordered
//! `StatsLevel::FALLBACK` list — the predictor walks it and stops at the
//! first level with enough samples.

pub mod aggregator;
pub mod detector;
pub mod predictor;
pub mod tracker;
pub mod validator;

pub use aggregator::{aggregate, stats_key};
pub use detector::{detect, DetectInput};
pub use predictor::{predict, StatsMap};
pub use tracker::track_forward;
pub use validator::{CalibrationBin, ValidationReport};
