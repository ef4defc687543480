//! Repositories for orders and gate events.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};

use kite_domain::{Order, OrderSide, OrderStatus, OrderType, RunId};
use kite_risk::GateEvent;

// ---------------------------------------------------------------------------
// Orders
// ---------------------------------------------------------------------------

pub async fn upsert_orders(pool: &PgPool, run_id: &RunId, orders: &[Order]) -> Result<u64> {
    let mut written = 0u64;
    for o in orders {
        sqlx::query(
            r#"
            insert into execution.orders (
              order_id, run_id, code, side, quantity, price, order_type,
              status, filled_quantity, filled_price, created_at, updated_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            on conflict (order_id) do update
              set status = excluded.status,
                  filled_quantity = excluded.filled_quantity,
                  filled_price = excluded.filled_price,
                  updated_at = excluded.updated_at
            "#,
        )
        .bind(&o.order_id)
        .bind(run_id.as_str())
        .bind(&o.code)
        .bind(o.side.as_str())
        .bind(o.quantity)
        .bind(o.price)
        .bind(o.order_type.as_str())
        .bind(o.status.as_str())
        .bind(o.filled_quantity)
        .bind(o.filled_price)
        .bind(o.created_at)
        .bind(o.updated_at)
        .execute(pool)
        .await
        .with_context(|| format!("upsert_orders failed for {}", o.order_id))?;
        written += 1;
    }
    Ok(written)
}

/// Status update only — the rest of an order is immutable after submission.
pub async fn update_order_status(
    pool: &PgPool,
    order_id: &str,
    status: OrderStatus,
    filled_quantity: i64,
    filled_price: i64,
) -> Result<()> {
    let result = sqlx::query(
        r#"
        update execution.orders
        set status = $2,
            filled_quantity = $3,
            filled_price = $4,
            updated_at = now()
        where order_id = $1
        "#,
    )
    .bind(order_id)
    .bind(status.as_str())
    .bind(filled_quantity)
    .bind(filled_price)
    .execute(pool)
    .await
    .context("update_order_status failed")?;

    if result.rows_affected() == 0 {
        return Err(anyhow!("order not found: {order_id}"));
    }
    Ok(())
}

pub async fn fetch_orders(pool: &PgPool, run_id: &RunId) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        select order_id, code, side, quantity, price, order_type,
               status, filled_quantity, filled_price, created_at, updated_at
        from execution.orders
        where run_id = $1
        order by created_at asc, order_id asc
        "#,
    )
    .bind(run_id.as_str())
    .fetch_all(pool)
    .await
    .context("fetch_orders failed")?;

    rows.into_iter().map(|row| row_to_order(&row)).collect()
}

/// Orders still working at the broker (PENDING / SUBMITTED / PARTIAL).
pub async fn fetch_unfilled_orders(pool: &PgPool) -> Result<Vec<Order>> {
    let rows = sqlx::query(
        r#"
        select order_id, code, side, quantity, price, order_type,
               status, filled_quantity, filled_price, created_at, updated_at
        from execution.orders
        where status in ('PENDING', 'SUBMITTED', 'PARTIAL')
        order by created_at asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("fetch_unfilled_orders failed")?;

    rows.into_iter().map(|row| row_to_order(&row)).collect()
}

fn row_to_order(row: &sqlx::postgres::PgRow) -> Result<Order> {
    let side_s: String = row.try_get("side")?;
    let type_s: String = row.try_get("order_type")?;
    let status_s: String = row.try_get("status")?;
    Ok(Order {
        order_id: row.try_get("order_id")?,
        code: row.try_get("code")?,
        side: OrderSide::parse(&side_s).ok_or_else(|| anyhow!("bad side: {side_s}"))?,
        quantity: row.try_get("quantity")?,
        price: row.try_get("price")?,
        order_type: OrderType::parse(&type_s).ok_or_else(|| anyhow!("bad type: {type_s}"))?,
        status: OrderStatus::parse(&status_s)
            .ok_or_else(|| anyhow!("bad status: {status_s}"))?,
        filled_quantity: row.try_get("filled_quantity")?,
        filled_price: row.try_get("filled_price")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

// ---------------------------------------------------------------------------
// Gate events
// ---------------------------------------------------------------------------

pub async fn insert_gate_event(pool: &PgPool, event: &GateEvent) -> Result<()> {
    sqlx::query(
        r#"
        insert into audit.gate_events (
          run_id, mode, action, passed, would_block, violation_count,
          var_95, var_99, message, created_at
        ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
        "#,
    )
    .bind(&event.run_id)
    .bind(&event.mode)
    .bind(&event.action)
    .bind(event.passed)
    .bind(event.would_block)
    .bind(event.violation_count as i64)
    .bind(event.var_95)
    .bind(event.var_99)
    .bind(&event.message)
    .bind(event.created_at)
    .execute(pool)
    .await
    .context("insert_gate_event failed")?;
    Ok(())
}

/// The most recent `limit` gate events, newest first — the shadow
/// analytics window.
pub async fn fetch_gate_events(pool: &PgPool, limit: i64) -> Result<Vec<GateEvent>> {
    let rows = sqlx::query(
        r#"
        select run_id, mode, action, passed, would_block, violation_count,
               var_95, var_99, message, created_at
        from audit.gate_events
        order by created_at desc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("fetch_gate_events failed")?;

    rows.into_iter()
        .map(|row| {
            let violation_count: i64 = row.try_get("violation_count")?;
            Ok(GateEvent {
                run_id: row.try_get("run_id")?,
                mode: row.try_get("mode")?,
                action: row.try_get("action")?,
                passed: row.try_get("passed")?,
                would_block: row.try_get("would_block")?,
                violation_count: violation_count as usize,
                var_95: row.try_get("var_95")?,
                var_99: row.try_get("var_99")?,
                message: row.try_get("message")?,
                created_at: row.try_get("created_at")?,
            })
        })
        .collect()
}
