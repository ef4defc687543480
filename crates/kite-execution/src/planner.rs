//! Execution planner: target values → sized orders.
//!
//! Per target position the planner quotes the current price through the
//! broker port, diffs the target quantity against current holdings, and
//! emits an order. Contract points:
//!
//! - qty = floor(target_value / price); a fresh position that floors to
//!   zero shares is skipped and logged, never rounded up.
//! - Market orders carry price 0; limit orders carry
//!   price · (1 ± slippage_bps/10000) for buy/sell.
//! - All SELL orders are emitted before any BUY (sells free the capital the
//!   buys spend).
//! - Orders at or above the split threshold are partitioned into chunks of
//!   `max_order_size / price` shares; splitting is refused when the quote
//!   is 0 or the chunk would be 0 shares.
//! - A planner-level error on one position drops that position only.

use std::collections::BTreeMap;

use kite_config::ExecutionConfig;
use kite_domain::{OrderSide, OrderType, PositionAction, TargetPortfolio};
use tracing::warn;

use crate::broker::{Broker, BrokerError};

// ---------------------------------------------------------------------------
// Output shapes
// ---------------------------------------------------------------------------

/// One planned (not yet submitted) order.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannedOrder {
    pub code: String,
    pub side: OrderSide,
    pub quantity: i64,
    /// KRW; 0 for market orders.
    pub price: i64,
    pub order_type: OrderType,
    pub reason: String,
}

/// Why a position produced no order.
#[derive(Clone, Debug, PartialEq)]
pub enum SkipReason {
    /// Delta floors below one share.
    TooSmall { target_value: i64, price: i64 },
    /// Target already held.
    NoChange,
    /// HOLD action positions are not traded.
    Hold,
    /// The broker failed for this code after retries.
    Broker(BrokerError),
    /// Quote came back non-positive.
    BadQuote { price: i64 },
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct PlanReport {
    /// Sells first, then buys; stable code order within each side.
    pub orders: Vec<PlannedOrder>,
    pub skipped: Vec<(String, SkipReason)>,
}

/// Structural planner failure: every single position failed, which means
/// the broker is down rather than individual codes being bad.
#[derive(Clone, Debug, PartialEq)]
pub struct PlannerError {
    pub detail: String,
}

impl std::fmt::Display for PlannerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "planner failed structurally: {}", self.detail)
    }
}

impl std::error::Error for PlannerError {}

// ---------------------------------------------------------------------------
// Planning
// ---------------------------------------------------------------------------

/// Plan orders for a target portfolio against current holdings.
///
/// `holdings` maps code → held quantity (from the broker's holdings
/// capability; empty on a cold start, in which case the planned quantity is
/// exactly floor(target_value / price)).
pub async fn plan_orders(
    portfolio: &TargetPortfolio,
    holdings: &BTreeMap<String, i64>,
    broker: &dyn Broker,
    cfg: &ExecutionConfig,
) -> Result<PlanReport, PlannerError> {
    let mut sells: Vec<PlannedOrder> = Vec::new();
    let mut buys: Vec<PlannedOrder> = Vec::new();
    let mut skipped: Vec<(String, SkipReason)> = Vec::new();
    let mut broker_failures = 0usize;
    let mut tradable = 0usize;

    for position in &portfolio.positions {
        if position.action == PositionAction::Hold {
            skipped.push((position.code.clone(), SkipReason::Hold));
            continue;
        }
        tradable += 1;

        let price = match broker.current_price(&position.code).await {
            Ok(p) => p,
            Err(e) => {
                warn!(code = %position.code, error = %e, "quote failed; dropping position");
                broker_failures += 1;
                skipped.push((position.code.clone(), SkipReason::Broker(e)));
                continue;
            }
        };
        if price <= 0 {
            skipped.push((position.code.clone(), SkipReason::BadQuote { price }));
            continue;
        }

        let held = holdings.get(&position.code).copied().unwrap_or(0);
        let target_qty = position.target_value / price;
        let delta = target_qty - held;

        let (side, qty) = match delta.cmp(&0) {
            std::cmp::Ordering::Greater => (OrderSide::Buy, delta),
            std::cmp::Ordering::Less => (OrderSide::Sell, -delta),
            std::cmp::Ordering::Equal => {
                let reason = if held == 0 {
                    SkipReason::TooSmall {
                        target_value: position.target_value,
                        price,
                    }
                } else {
                    SkipReason::NoChange
                };
                skipped.push((position.code.clone(), reason));
                continue;
            }
        };

        let (order_type, order_price) = if cfg.use_market_orders {
            (OrderType::Market, 0)
        } else {
            (OrderType::Limit, limit_price(price, side, cfg.slippage_bps))
        };

        let chunks = split_quantity(qty, price, cfg);
        let target = if side == OrderSide::Sell { &mut sells } else { &mut buys };
        for chunk_qty in chunks {
            target.push(PlannedOrder {
                code: position.code.clone(),
                side,
                quantity: chunk_qty,
                price: order_price,
                order_type,
                reason: position.reason.clone(),
            });
        }
    }

    if tradable > 0 && broker_failures == tradable {
        return Err(PlannerError {
            detail: format!("all {tradable} quote(s) failed"),
        });
    }

    let mut orders = sells;
    orders.extend(buys);
    Ok(PlanReport { orders, skipped })
}

/// Limit price with slippage applied away from the quote: buys pay up,
/// sells give back.
fn limit_price(quote: i64, side: OrderSide, slippage_bps: i64) -> i64 {
    let adj = quote as f64 * slippage_bps as f64 / 10_000.0;
    match side {
        OrderSide::Buy => (quote as f64 + adj).round() as i64,
        OrderSide::Sell => (quote as f64 - adj).round() as i64,
    }
}

/// Partition `qty` into chunks when the notional crosses the split
/// threshold. Splitting is refused (whole quantity in one order) when the
/// quote is 0 or a chunk would floor to 0 shares.
fn split_quantity(qty: i64, quote: i64, cfg: &ExecutionConfig) -> Vec<i64> {
    if cfg.split_threshold <= 0 || quote <= 0 {
        return vec![qty];
    }
    if qty * quote < cfg.split_threshold {
        return vec![qty];
    }
    let chunk = cfg.max_order_size / quote;
    if chunk <= 0 {
        return vec![qty];
    }

    let mut chunks = Vec::new();
    let mut remaining = qty;
    while remaining > 0 {
        let take = remaining.min(chunk);
        chunks.push(take);
        remaining -= take;
    }
    chunks
}
