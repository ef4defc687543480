//! The ATR-driven exit state machine.
//!
//! Lifecycle: OPEN → TP1_DONE → TP2_DONE → TP3_DONE, with CLOSED reachable
//! from anywhere through the stops. Trigger prices are fixed at entry from
//! the ATR%; the stop floor arms at TP1 and the HWM trail arms at TP3.
//!
//! Decision order per poll (first match wins):
//! 1. second stop (sell all)
//! 2. first stop, once (sell a fraction)
//! 3. stop floor after TP1 (sell all)
//! 4. HWM trail after TP3 (sell all)
//! 5. take-profits by state

use chrono::{DateTime, Utc};
use kite_config::MonitorConfig;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PositionState {
    Open,
    Tp1Done,
    Tp2Done,
    Tp3Done,
    Closed,
}

impl PositionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PositionState::Open => "OPEN",
            PositionState::Tp1Done => "TP1_DONE",
            PositionState::Tp2Done => "TP2_DONE",
            PositionState::Tp3Done => "TP3_DONE",
            PositionState::Closed => "CLOSED",
        }
    }
}

// ---------------------------------------------------------------------------
// Exit reasons and signals
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExitReason {
    SecondStop,
    FirstStop,
    StopFloor,
    TrailStop,
    Tp1,
    Tp2,
    Tp3,
}

impl ExitReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExitReason::SecondStop => "SECOND_STOP",
            ExitReason::FirstStop => "FIRST_STOP",
            ExitReason::StopFloor => "STOP_FLOOR",
            ExitReason::TrailStop => "TRAIL_STOP",
            ExitReason::Tp1 => "TP1",
            ExitReason::Tp2 => "TP2",
            ExitReason::Tp3 => "TP3",
        }
    }
}

/// A partial- or full-exit instruction emitted by one poll evaluation.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ExitSignal {
    pub code: String,
    pub reason: ExitReason,
    pub sell_qty: i64,
    /// The price that triggered the signal.
    pub price: i64,
    pub state_after: PositionState,
}

// ---------------------------------------------------------------------------
// MonitoredPosition
// ---------------------------------------------------------------------------

/// One monitored long position. Added on buy fill, removed when CLOSED or
/// the remaining quantity reaches zero.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct MonitoredPosition {
    pub code: String,
    pub entry_price: i64,
    pub entry_time: DateTime<Utc>,
    pub initial_qty: i64,
    pub remaining_qty: i64,
    /// Highest watermark; non-decreasing over the position's lifetime.
    pub highest_price: i64,
    /// ATR as a fraction of entry (e.g. 0.02 = 2%).
    pub atr_pct: f64,
    pub tp1_price: i64,
    pub tp2_price: i64,
    pub tp3_price: i64,
    /// Armed at TP1; 0 while unarmed.
    pub stop_floor_price: i64,
    /// Armed at TP3; 0 while unarmed. Non-decreasing once armed.
    pub trail_stop_price: i64,
    pub first_stop_triggered: bool,
    pub state: PositionState,
}

impl MonitoredPosition {
    /// Open a position: fix the take-profit triggers from the ATR%.
    ///
    /// Trigger distance n = clamp(ATR · multₙ, bandₙ), price = entry·(1+n).
    pub fn open(
        code: &str,
        entry_price: i64,
        qty: i64,
        atr_pct: f64,
        entry_time: DateTime<Utc>,
        cfg: &MonitorConfig,
    ) -> Self {
        let tp = |mult: f64, lo: f64, hi: f64| {
            let dist = (atr_pct * mult).clamp(lo, hi);
            (entry_price as f64 * (1.0 + dist)).round() as i64
        };
        Self {
            code: code.to_string(),
            entry_price,
            entry_time,
            initial_qty: qty,
            remaining_qty: qty,
            highest_price: entry_price,
            atr_pct,
            tp1_price: tp(cfg.tp1_mult, cfg.tp1_min, cfg.tp1_max),
            tp2_price: tp(cfg.tp2_mult, cfg.tp2_min, cfg.tp2_max),
            tp3_price: tp(cfg.tp3_mult, cfg.tp3_min, cfg.tp3_max),
            stop_floor_price: 0,
            trail_stop_price: 0,
            first_stop_triggered: false,
            state: PositionState::Open,
        }
    }

    /// Unrealized PnL fraction at `price`.
    pub fn pnl_pct(&self, price: i64) -> f64 {
        if self.entry_price == 0 {
            return 0.0;
        }
        (price - self.entry_price) as f64 / self.entry_price as f64
    }

    fn trail_candidate(&self, cfg: &MonitorConfig) -> i64 {
        let dist = (self.atr_pct * cfg.trail_mult).clamp(cfg.trail_min, cfg.trail_max);
        (self.highest_price as f64 * (1.0 - dist)).round() as i64
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

/// One poll step: update the HWM (and the trail once armed), then walk the
/// decision tree. Mutates the position in place and returns the signal to
/// act on, if any.
pub fn evaluate(
    pos: &mut MonitoredPosition,
    price: i64,
    cfg: &MonitorConfig,
) -> Option<ExitSignal> {
    if pos.state == PositionState::Closed || pos.remaining_qty <= 0 {
        return None;
    }

    // HWM first; the trail rides it and never comes back down.
    if price > pos.highest_price {
        pos.highest_price = price;
        if pos.state == PositionState::Tp3Done {
            pos.trail_stop_price = pos.trail_stop_price.max(pos.trail_candidate(cfg));
        }
    }

    let entry = pos.entry_price as f64;
    let second_stop = (entry * (1.0 + cfg.second_stop_pct)).round() as i64;
    let first_stop = (entry * (1.0 + cfg.first_stop_pct)).round() as i64;

    // 1) Second stop: dump everything.
    if price <= second_stop {
        return Some(close_all(pos, ExitReason::SecondStop, price));
    }

    // 2) First stop, once.
    if price <= first_stop && !pos.first_stop_triggered {
        pos.first_stop_triggered = true;
        let qty = sell_fraction(pos.remaining_qty, cfg.first_stop_sell_pct);
        return Some(partial(pos, ExitReason::FirstStop, price, qty, pos.state));
    }

    // 3) Stop floor, armed at TP1.
    if pos.state >= PositionState::Tp1Done && price <= pos.stop_floor_price {
        return Some(close_all(pos, ExitReason::StopFloor, price));
    }

    // 4) HWM trail, armed at TP3.
    if pos.state == PositionState::Tp3Done && price <= pos.trail_stop_price {
        return Some(close_all(pos, ExitReason::TrailStop, price));
    }

    // 5) Take-profits by state.
    match pos.state {
        PositionState::Open if price >= pos.tp1_price => {
            pos.stop_floor_price = (entry * (1.0 + cfg.stop_floor_buffer)).round() as i64;
            let qty = sell_fraction(pos.remaining_qty, cfg.tp1_sell_pct);
            Some(partial(pos, ExitReason::Tp1, price, qty, PositionState::Tp1Done))
        }
        PositionState::Tp1Done if price >= pos.tp2_price => {
            let qty = sell_fraction(pos.remaining_qty, cfg.tp2_sell_pct);
            Some(partial(pos, ExitReason::Tp2, price, qty, PositionState::Tp2Done))
        }
        PositionState::Tp2Done if price >= pos.tp3_price => {
            let qty = sell_fraction(pos.remaining_qty, cfg.tp3_sell_pct);
            let signal = partial(pos, ExitReason::Tp3, price, qty, PositionState::Tp3Done);
            // Arm the trail off the current HWM.
            pos.trail_stop_price = pos.trail_candidate(cfg);
            Some(signal)
        }
        _ => None,
    }
}

fn sell_fraction(remaining: i64, pct: f64) -> i64 {
    ((remaining as f64 * pct).floor() as i64).clamp(1, remaining)
}

fn close_all(pos: &mut MonitoredPosition, reason: ExitReason, price: i64) -> ExitSignal {
    let qty = pos.remaining_qty;
    pos.remaining_qty = 0;
    pos.state = PositionState::Closed;
    ExitSignal {
        code: pos.code.clone(),
        reason,
        sell_qty: qty,
        price,
        state_after: PositionState::Closed,
    }
}

fn partial(
    pos: &mut MonitoredPosition,
    reason: ExitReason,
    price: i64,
    qty: i64,
    state_after: PositionState,
) -> ExitSignal {
    pos.remaining_qty -= qty;
    pos.state = if pos.remaining_qty == 0 {
        PositionState::Closed
    } else {
        state_after
    };
    ExitSignal {
        code: pos.code.clone(),
        reason,
        sell_qty: qty,
        price,
        state_after: pos.state,
    }
}
