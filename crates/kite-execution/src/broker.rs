//! The broker capability port.

use async_trait::async_trait;
use kite_domain::{OrderSide, OrderStatus, OrderType};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker understood and refused (bad symbol, closed market, funds).
    Rejected { detail: String },
    /// Transport-level failure; retryable.
    Unavailable { detail: String },
    /// Unknown order id.
    NotFound { order_id: String },
    /// Call exceeded its deadline; retryable.
    Timeout,
}

impl BrokerError {
    /// Transient errors worth another attempt at the adapter boundary.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Unavailable { .. } | BrokerError::Timeout)
    }
}

impl std::fmt::Display for BrokerError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BrokerError::Rejected { detail } => write!(f, "broker rejected: {detail}"),
            BrokerError::Unavailable { detail } => write!(f, "broker unavailable: {detail}"),
            BrokerError::NotFound { order_id } => write!(f, "order not found: {order_id}"),
            BrokerError::Timeout => write!(f, "broker call timed out"),
        }
    }
}

impl std::error::Error for BrokerError {}

// ---------------------------------------------------------------------------
// Request / response shapes
// ---------------------------------------------------------------------------

/// Broker-agnostic order submission request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub code: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: i64,
    /// KRW; 0 for market orders.
    pub price: i64,
}

/// Submission acknowledgment.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub order_id: String,
    pub status: OrderStatus,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    /// Free cash in KRW.
    pub cash: i64,
    /// Cash + marked holdings in KRW.
    pub total_value: i64,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub code: String,
    pub quantity: i64,
    pub avg_price: i64,
}

// ---------------------------------------------------------------------------
// Port
// ---------------------------------------------------------------------------

/// The capability set required by the planner, monitor, and audit reporter.
///
/// Implementations: the production adapter (out of tree), the backtest sim
/// broker, and in-test mocks. Every method is a suspension point; callers
/// own deadlines and retries (see [`crate::retry::with_retry`]).
#[async_trait]
pub trait Broker: Send + Sync {
    /// Current price for a code, integer KRW.
    async fn current_price(&self, code: &str) -> Result<i64, BrokerError>;

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck, BrokerError>;

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError>;

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, BrokerError>;

    async fn balance(&self) -> Result<Balance, BrokerError>;

    async fn holdings(&self) -> Result<Vec<Holding>, BrokerError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_split() {
        assert!(BrokerError::Timeout.is_retryable());
        assert!(BrokerError::Unavailable {
            detail: "conn reset".into()
        }
        .is_retryable());
        assert!(!BrokerError::Rejected {
            detail: "unknown code".into()
        }
        .is_retryable());
        assert!(!BrokerError::NotFound {
            order_id: "x".into()
        }
        .is_retryable());
    }
}
