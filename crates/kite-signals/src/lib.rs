//! kite-signals: the six factor calculators.
//!
//! Each calculator is a pure function over a per-code historical slice
//! (bars ascending by date, ending at the evaluation date) plus optional
//! cross-sectional context. Output is a score in [-1, 1], or `None` when
//! the data window is insufficient — never a silent 0. The composite maps
//! nulls to neutral 0 and records the set as weakly observed.
//!
//! Required windows: momentum 60 bars, technical 120 bars, flow 20 bars;
//! value/quality consume the latest fundamentals; event consumes detected
//! events inside a lookback window.

pub mod factors;
pub mod indicators;

pub use factors::{
    build_signal_set, compose, event_score, flow_score, momentum_score, quality_score,
    technical_score, value_score, Composite, RecentEvent, EVENT_LOOKBACK_DAYS, FLOW_WINDOW,
    MOMENTUM_WINDOW, TECHNICAL_WINDOW,
};
pub use indicators::{atr_percent, percentile_rank, rsi, sma, stdev};
