//! kite-execution: the broker port and the order planner.
//!
//! The broker is a capability set, not a wire protocol: anything that can
//! quote a price, place/cancel/inspect orders, and report balance and
//! holdings can sit behind [`Broker`]. The production adapter, the backtest
//! sim broker, and the test mocks all implement the same trait; the planner
//! and the position monitor depend only on the port.

pub mod broker;
pub mod planner;
pub mod retry;

pub use broker::{Balance, Broker, BrokerError, Holding, OrderAck, OrderRequest};
pub use planner::{plan_orders, PlanReport, PlannedOrder, PlannerError, SkipReason};
pub use retry::with_retry;
