//! kite-selection: the S3 hard-cut screener and the S4 ranker.
//!
//! Both are pure: slices in, decisions out. The screener removes codes that
//! fail any enabled predicate and reports the first failing predicate per
//! rejected code; the ranker orders the survivors' signal sets into a stable
//! 1..N ranking.

pub mod ranker;
pub mod screener;

pub use ranker::rank;
pub use screener::{screen, Predicate, ScreenInput, ScreenResult};
