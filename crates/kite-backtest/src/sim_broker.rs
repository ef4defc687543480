//! Deterministic sim broker for backtests.
//!
//! Implements the full broker port: quotes come from the daily bar store
//! at the current simulated date, fills are immediate at the quoted close,
//! cash and holdings are tracked in memory. No randomness anywhere — the
//! same run over the same data produces the same fills.

use std::collections::BTreeMap;

use anyhow::Result;
use async_trait::async_trait;
use chrono::NaiveDate;
use parking_lot::Mutex;
use sqlx::PgPool;

use kite_domain::{OrderSide, OrderStatus};
use kite_execution::{Balance, Broker, BrokerError, Holding, OrderAck, OrderRequest};

// ---------------------------------------------------------------------------
// Price source
// ---------------------------------------------------------------------------

/// Daily close lookup, pluggable so tests run without a database.
#[async_trait]
pub trait DailyPrices: Send + Sync {
    /// Close on `date`, or the most recent close before it.
    async fn close_on_or_before(&self, code: &str, date: NaiveDate) -> Result<Option<i64>>;
}

/// Production source: the `data.price_bars` table.
pub struct DbPrices {
    pool: PgPool,
}

impl DbPrices {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DailyPrices for DbPrices {
    async fn close_on_or_before(&self, code: &str, date: NaiveDate) -> Result<Option<i64>> {
        let bars = kite_db::market::fetch_bars_window(&self.pool, code, date, 1).await?;
        Ok(bars.last().map(|b| b.close))
    }
}

/// In-memory source for tests and fixtures.
#[derive(Default)]
pub struct FixedPrices {
    closes: BTreeMap<String, BTreeMap<NaiveDate, i64>>,
}

impl FixedPrices {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, code: &str, date: NaiveDate, close: i64) {
        self.closes
            .entry(code.to_string())
            .or_default()
            .insert(date, close);
    }
}

#[async_trait]
impl DailyPrices for FixedPrices {
    async fn close_on_or_before(&self, code: &str, date: NaiveDate) -> Result<Option<i64>> {
        Ok(self
            .closes
            .get(code)
            .and_then(|series| series.range(..=date).next_back())
            .map(|(_, close)| *close))
    }
}

// ---------------------------------------------------------------------------
// SimBroker
// ---------------------------------------------------------------------------

struct SimState {
    date: NaiveDate,
    cash: i64,
    /// code → (quantity, avg price).
    holdings: BTreeMap<String, (i64, i64)>,
    order_seq: u64,
    /// order id → terminal status (everything fills or rejects instantly).
    orders: BTreeMap<String, (OrderStatus, i64, i64)>,
}

pub struct SimBroker<P: DailyPrices> {
    prices: P,
    state: Mutex<SimState>,
}

impl<P: DailyPrices> SimBroker<P> {
    pub fn new(prices: P, start_date: NaiveDate, initial_cash: i64) -> Self {
        Self {
            prices,
            state: Mutex::new(SimState {
                date: start_date,
                cash: initial_cash,
                holdings: BTreeMap::new(),
                order_seq: 0,
                orders: BTreeMap::new(),
            }),
        }
    }

    /// Advance the simulated clock. The driver calls this once per day.
    pub fn set_date(&self, date: NaiveDate) {
        self.state.lock().date = date;
    }

    pub fn cash(&self) -> i64 {
        self.state.lock().cash
    }

    async fn quote(&self, code: &str) -> Result<i64, BrokerError> {
        let date = self.state.lock().date;
        match self.prices.close_on_or_before(code, date).await {
            Ok(Some(close)) if close > 0 => Ok(close),
            Ok(_) => Err(BrokerError::Rejected {
                detail: format!("no bar for {code} on or before {date}"),
            }),
            Err(e) => Err(BrokerError::Unavailable {
                detail: e.to_string(),
            }),
        }
    }

    /// Mark all holdings at current quotes.
    pub async fn marked_value(&self) -> Result<i64, BrokerError> {
        let (cash, holdings) = {
            let st = self.state.lock();
            (st.cash, st.holdings.clone())
        };
        let mut total = cash;
        for (code, (qty, _avg)) in holdings {
            let price = self.quote(&code).await?;
            total += qty * price;
        }
        Ok(total)
    }
}

#[async_trait]
impl<P: DailyPrices> Broker for SimBroker<P> {
    async fn current_price(&self, code: &str) -> Result<i64, BrokerError> {
        self.quote(code).await
    }

    async fn place_order(&self, req: &OrderRequest) -> Result<OrderAck, BrokerError> {
        if req.quantity <= 0 {
            return Err(BrokerError::Rejected {
                detail: format!("non-positive quantity {}", req.quantity),
            });
        }
        let fill_price = self.quote(&req.code).await?;

        let mut st = self.state.lock();
        st.order_seq += 1;
        let order_id = format!("sim-{:06}", st.order_seq);

        match req.side {
            OrderSide::Buy => {
                let cost = fill_price * req.quantity;
                if cost > st.cash {
                    st.orders
                        .insert(order_id.clone(), (OrderStatus::Rejected, 0, 0));
                    return Err(BrokerError::Rejected {
                        detail: format!("insufficient cash: need {cost}, have {}", st.cash),
                    });
                }
                st.cash -= cost;
                let entry = st.holdings.entry(req.code.clone()).or_insert((0, 0));
                let total_cost = entry.0 * entry.1 + cost;
                entry.0 += req.quantity;
                entry.1 = total_cost / entry.0;
            }
            OrderSide::Sell => {
                let held = st.holdings.get(&req.code).map(|(q, _)| *q).unwrap_or(0);
                if held < req.quantity {
                    st.orders
                        .insert(order_id.clone(), (OrderStatus::Rejected, 0, 0));
                    return Err(BrokerError::Rejected {
                        detail: format!("insufficient holdings: have {held}, sell {}", req.quantity),
                    });
                }
                st.cash += fill_price * req.quantity;
                let entry = st.holdings.get_mut(&req.code).expect("held checked");
                entry.0 -= req.quantity;
                if entry.0 == 0 {
                    st.holdings.remove(&req.code);
                }
            }
        }

        st.orders.insert(
            order_id.clone(),
            (OrderStatus::Filled, req.quantity, fill_price),
        );
        Ok(OrderAck {
            order_id,
            status: OrderStatus::Filled,
        })
    }

    async fn cancel_order(&self, order_id: &str) -> Result<(), BrokerError> {
        // Fills are instant; there is never anything to cancel.
        let st = self.state.lock();
        if st.orders.contains_key(order_id) {
            Ok(())
        } else {
            Err(BrokerError::NotFound {
                order_id: order_id.to_string(),
            })
        }
    }

    async fn order_status(&self, order_id: &str) -> Result<OrderStatus, BrokerError> {
        let st = self.state.lock();
        st.orders
            .get(order_id)
            .map(|(status, _, _)| *status)
            .ok_or_else(|| BrokerError::NotFound {
                order_id: order_id.to_string(),
            })
    }

    async fn balance(&self) -> Result<Balance, BrokerError> {
        let cash = self.state.lock().cash;
        let total_value = self.marked_value().await?;
        Ok(Balance { cash, total_value })
    }

    async fn holdings(&self) -> Result<Vec<Holding>, BrokerError> {
        let st = self.state.lock();
        Ok(st
            .holdings
            .iter()
            .map(|(code, (qty, avg))| Holding {
                code: code.clone(),
                quantity: *qty,
                avg_price: *avg,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_domain::OrderType;

    fn d(s: &str) -> NaiveDate {
        s.parse().unwrap()
    }

    fn broker() -> SimBroker<FixedPrices> {
        let mut prices = FixedPrices::new();
        prices.set("005930", d("2025-07-01"), 70_000);
        prices.set("005930", d("2025-07-02"), 71_000);
        SimBroker::new(prices, d("2025-07-01"), 10_000_000)
    }

    fn buy(qty: i64) -> OrderRequest {
        OrderRequest {
            code: "005930".into(),
            side: OrderSide::Buy,
            order_type: OrderType::Market,
            quantity: qty,
            price: 0,
        }
    }

    #[tokio::test]
    async fn buy_fills_at_close_and_debits_cash() {
        let b = broker();
        let ack = b.place_order(&buy(100)).await.unwrap();
        assert_eq!(ack.status, OrderStatus::Filled);
        assert_eq!(b.cash(), 10_000_000 - 7_000_000);
        let holdings = b.holdings().await.unwrap();
        assert_eq!(holdings[0].quantity, 100);
        assert_eq!(holdings[0].avg_price, 70_000);
    }

    #[tokio::test]
    async fn overspend_is_rejected() {
        let b = broker();
        let err = b.place_order(&buy(1_000)).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
        assert_eq!(b.cash(), 10_000_000, "rejected order must not move cash");
    }

    #[tokio::test]
    async fn sell_more_than_held_is_rejected() {
        let b = broker();
        b.place_order(&buy(10)).await.unwrap();
        let sell = OrderRequest {
            side: OrderSide::Sell,
            quantity: 20,
            ..buy(0)
        };
        let err = b.place_order(&sell).await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
    }

    #[tokio::test]
    async fn round_trip_at_higher_close_gains() {
        let b = broker();
        b.place_order(&buy(100)).await.unwrap();
        b.set_date(d("2025-07-02"));
        let sell = OrderRequest {
            side: OrderSide::Sell,
            quantity: 100,
            ..buy(0)
        };
        b.place_order(&sell).await.unwrap();
        assert_eq!(b.cash(), 10_000_000 + 100 * 1_000);
        assert!(b.holdings().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn quotes_fall_back_to_prior_close() {
        let b = broker();
        b.set_date(d("2025-07-04"));
        assert_eq!(b.current_price("005930").await.unwrap(), 71_000);
    }

    #[tokio::test]
    async fn unknown_code_rejects() {
        let b = broker();
        let err = b.current_price("999999").await.unwrap_err();
        assert!(matches!(err, BrokerError::Rejected { .. }));
    }

    #[tokio::test]
    async fn balance_marks_holdings_at_current_close() {
        let b = broker();
        b.place_order(&buy(100)).await.unwrap();
        b.set_date(d("2025-07-02"));
        let balance = b.balance().await.unwrap();
        assert_eq!(balance.cash, 3_000_000);
        assert_eq!(balance.total_value, 3_000_000 + 100 * 71_000);
    }

    #[tokio::test]
    async fn order_status_tracks_fills() {
        let b = broker();
        let ack = b.place_order(&buy(1)).await.unwrap();
        assert_eq!(b.order_status(&ack.order_id).await.unwrap(), OrderStatus::Filled);
        assert!(b.order_status("sim-999999").await.is_err());
        assert!(b.cancel_order(&ack.order_id).await.is_ok());
    }
}
