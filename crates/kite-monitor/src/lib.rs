//! kite-monitor: per-position ATR exit state machine and background sweep.
//!
//! One process runs one sweep task; the position map is the single
//! authority and every state transition happens under its write lock, so
//! signals for the same position can never interleave. The decision tree
//! itself is pure (`exit::evaluate`) and unit-tested without any runtime.

pub mod book;
pub mod exit;
pub mod sweep;

pub use book::{PositionBook, SignalRing};
pub use exit::{evaluate, ExitReason, ExitSignal, MonitoredPosition, PositionState};
pub use sweep::run_monitor;
