//! Repositories for reference data and raw time series: stocks, price
//! bars, investor flows, fundamentals, plus the coverage counts the S0
//! quality gate reads.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};

use kite_domain::{Fundamentals, InvestorFlow, Market, PriceBar, Stock, StockStatus};

// ---------------------------------------------------------------------------
// Stocks
// ---------------------------------------------------------------------------

pub async fn upsert_stocks(pool: &PgPool, stocks: &[Stock]) -> Result<u64> {
    let mut written = 0u64;
    for s in stocks {
        sqlx::query(
            r#"
            insert into data.stocks (code, name, market, sector, listing_date, status)
            values ($1, $2, $3, $4, $5, $6)
            on conflict (code) do update
              set name = excluded.name,
                  market = excluded.market,
                  sector = excluded.sector,
                  listing_date = excluded.listing_date,
                  status = excluded.status
            "#,
        )
        .bind(&s.code)
        .bind(&s.name)
        .bind(s.market.as_str())
        .bind(&s.sector)
        .bind(s.listing_date)
        .bind(s.status.as_str())
        .execute(pool)
        .await
        .with_context(|| format!("upsert_stocks failed for {}", s.code))?;
        written += 1;
    }
    Ok(written)
}

pub async fn fetch_stocks(pool: &PgPool) -> Result<Vec<Stock>> {
    let rows = sqlx::query(
        r#"
        select code, name, market, sector, listing_date, status
        from data.stocks
        order by code
        "#,
    )
    .fetch_all(pool)
    .await
    .context("fetch_stocks failed")?;

    rows.into_iter().map(|row| row_to_stock(&row)).collect()
}

fn row_to_stock(row: &sqlx::postgres::PgRow) -> Result<Stock> {
    let market_s: String = row.try_get("market")?;
    let status_s: String = row.try_get("status")?;
    Ok(Stock {
        code: row.try_get("code")?,
        name: row.try_get("name")?,
        market: Market::parse(&market_s).ok_or_else(|| anyhow!("bad market: {market_s}"))?,
        sector: row.try_get("sector")?,
        listing_date: row.try_get("listing_date")?,
        status: StockStatus::parse(&status_s).ok_or_else(|| anyhow!("bad status: {status_s}"))?,
    })
}

// ---------------------------------------------------------------------------
// Price bars
// ---------------------------------------------------------------------------

pub async fn upsert_price_bars(pool: &PgPool, bars: &[PriceBar]) -> Result<u64> {
    let mut written = 0u64;
    for b in bars {
        sqlx::query(
            r#"
            insert into data.price_bars (code, date, open, high, low, close, volume, value)
            values ($1, $2, $3, $4, $5, $6, $7, $8)
            on conflict (code, date) do update
              set open = excluded.open,
                  high = excluded.high,
                  low = excluded.low,
                  close = excluded.close,
                  volume = excluded.volume,
                  value = excluded.value
            "#,
        )
        .bind(&b.code)
        .bind(b.date)
        .bind(b.open)
        .bind(b.high)
        .bind(b.low)
        .bind(b.close)
        .bind(b.volume)
        .bind(b.value)
        .execute(pool)
        .await
        .with_context(|| format!("upsert_price_bars failed for {} {}", b.code, b.date))?;
        written += 1;
    }
    Ok(written)
}

/// The trailing `limit` bars for a code ending at `date`, ascending.
pub async fn fetch_bars_window(
    pool: &PgPool,
    code: &str,
    date: NaiveDate,
    limit: i64,
) -> Result<Vec<PriceBar>> {
    let rows = sqlx::query(
        r#"
        select code, date, open, high, low, close, volume, value
        from (
          select * from data.price_bars
          where code = $1 and date <= $2
          order by date desc
          limit $3
        ) w
        order by date asc
        "#,
    )
    .bind(code)
    .bind(date)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("fetch_bars_window failed for {code}"))?;

    rows.into_iter().map(|row| row_to_bar(&row)).collect()
}

/// The first `limit` bars strictly after `date`, ascending — the forecast
/// tracker's forward window.
pub async fn fetch_bars_after(
    pool: &PgPool,
    code: &str,
    date: NaiveDate,
    limit: i64,
) -> Result<Vec<PriceBar>> {
    let rows = sqlx::query(
        r#"
        select code, date, open, high, low, close, volume, value
        from data.price_bars
        where code = $1 and date > $2
        order by date asc
        limit $3
        "#,
    )
    .bind(code)
    .bind(date)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("fetch_bars_after failed for {code}"))?;

    rows.into_iter().map(|row| row_to_bar(&row)).collect()
}

fn row_to_bar(row: &sqlx::postgres::PgRow) -> Result<PriceBar> {
    Ok(PriceBar {
        code: row.try_get("code")?,
        date: row.try_get("date")?,
        open: row.try_get("open")?,
        high: row.try_get("high")?,
        low: row.try_get("low")?,
        close: row.try_get("close")?,
        volume: row.try_get("volume")?,
        value: row.try_get("value")?,
    })
}

// ---------------------------------------------------------------------------
// Investor flows
// ---------------------------------------------------------------------------

pub async fn upsert_investor_flows(pool: &PgPool, flows: &[InvestorFlow]) -> Result<u64> {
    let mut written = 0u64;
    for f in flows {
        sqlx::query(
            r#"
            insert into data.investor_flows (
              code, date,
              foreign_net_qty, foreign_net_value,
              institution_net_qty, institution_net_value,
              individual_net_qty, individual_net_value
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            on conflict (code, date) do update
              set foreign_net_qty = excluded.foreign_net_qty,
                  foreign_net_value = excluded.foreign_net_value,
                  institution_net_qty = excluded.institution_net_qty,
                  institution_net_value = excluded.institution_net_value,
                  individual_net_qty = excluded.individual_net_qty,
                  individual_net_value = excluded.individual_net_value
            "#,
        )
        .bind(&f.code)
        .bind(f.date)
        .bind(f.foreign_net_qty)
        .bind(f.foreign_net_value)
        .bind(f.institution_net_qty)
        .bind(f.institution_net_value)
        .bind(f.individual_net_qty)
        .bind(f.individual_net_value)
        .execute(pool)
        .await
        .with_context(|| format!("upsert_investor_flows failed for {} {}", f.code, f.date))?;
        written += 1;
    }
    Ok(written)
}

/// The trailing `limit` flow rows for a code ending at `date`, ascending.
pub async fn fetch_flows_window(
    pool: &PgPool,
    code: &str,
    date: NaiveDate,
    limit: i64,
) -> Result<Vec<InvestorFlow>> {
    let rows = sqlx::query(
        r#"
        select code, date,
               foreign_net_qty, foreign_net_value,
               institution_net_qty, institution_net_value,
               individual_net_qty, individual_net_value
        from (
          select * from data.investor_flows
          where code = $1 and date <= $2
          order by date desc
          limit $3
        ) w
        order by date asc
        "#,
    )
    .bind(code)
    .bind(date)
    .bind(limit)
    .fetch_all(pool)
    .await
    .with_context(|| format!("fetch_flows_window failed for {code}"))?;

    rows.into_iter()
        .map(|row| {
            Ok(InvestorFlow {
                code: row.try_get("code")?,
                date: row.try_get("date")?,
                foreign_net_qty: row.try_get("foreign_net_qty")?,
                foreign_net_value: row.try_get("foreign_net_value")?,
                institution_net_qty: row.try_get("institution_net_qty")?,
                institution_net_value: row.try_get("institution_net_value")?,
                individual_net_qty: row.try_get("individual_net_qty")?,
                individual_net_value: row.try_get("individual_net_value")?,
            })
        })
        .collect()
}

/// Cleanup for the historical units change: delete flow rows strictly
/// before the cutoff. Returns rows deleted.
pub async fn delete_flows_before(pool: &PgPool, cutoff: NaiveDate) -> Result<u64> {
    let result = sqlx::query("delete from data.investor_flows where date < $1")
        .bind(cutoff)
        .execute(pool)
        .await
        .context("delete_flows_before failed")?;
    Ok(result.rows_affected())
}

// ---------------------------------------------------------------------------
// Fundamentals
// ---------------------------------------------------------------------------

pub async fn upsert_fundamentals(pool: &PgPool, rows: &[Fundamentals]) -> Result<u64> {
    let mut written = 0u64;
    for f in rows {
        sqlx::query(
            r#"
            insert into data.fundamentals (
              code, period, per, pbr, roe, debt_ratio, revenue, operating_profit, updated_at
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            on conflict (code, period) do update
              set per = excluded.per,
                  pbr = excluded.pbr,
                  roe = excluded.roe,
                  debt_ratio = excluded.debt_ratio,
                  revenue = excluded.revenue,
                  operating_profit = excluded.operating_profit,
                  updated_at = excluded.updated_at
            "#,
        )
        .bind(&f.code)
        .bind(&f.period)
        .bind(f.per)
        .bind(f.pbr)
        .bind(f.roe)
        .bind(f.debt_ratio)
        .bind(f.revenue)
        .bind(f.operating_profit)
        .bind(f.updated_at)
        .execute(pool)
        .await
        .with_context(|| format!("upsert_fundamentals failed for {} {}", f.code, f.period))?;
        written += 1;
    }
    Ok(written)
}

/// Most recent fundamentals row per code (period descending).
pub async fn fetch_latest_fundamentals(pool: &PgPool, code: &str) -> Result<Option<Fundamentals>> {
    let row = sqlx::query(
        r#"
        select code, period, per, pbr, roe, debt_ratio, revenue, operating_profit, updated_at
        from data.fundamentals
        where code = $1
        order by period desc
        limit 1
        "#,
    )
    .bind(code)
    .fetch_optional(pool)
    .await
    .with_context(|| format!("fetch_latest_fundamentals failed for {code}"))?;

    row.map(|row| {
        Ok(Fundamentals {
            code: row.try_get("code")?,
            period: row.try_get("period")?,
            per: row.try_get("per")?,
            pbr: row.try_get("pbr")?,
            roe: row.try_get("roe")?,
            debt_ratio: row.try_get("debt_ratio")?,
            revenue: row.try_get("revenue")?,
            operating_profit: row.try_get("operating_profit")?,
            updated_at: row.try_get("updated_at")?,
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Coverage (S0 inputs)
// ---------------------------------------------------------------------------

/// Raw counts behind the S0 coverage ratios for one date.
#[derive(Clone, Debug, PartialEq)]
pub struct CoverageCounts {
    pub active_stocks: i64,
    pub bars: i64,
    pub flows: i64,
    pub fundamentals: i64,
}

impl CoverageCounts {
    fn ratio(&self, n: i64) -> f64 {
        if self.active_stocks == 0 {
            0.0
        } else {
            n as f64 / self.active_stocks as f64
        }
    }

    pub fn price_coverage(&self) -> f64 {
        self.ratio(self.bars)
    }

    pub fn flow_coverage(&self) -> f64 {
        self.ratio(self.flows)
    }

    pub fn fundamentals_coverage(&self) -> f64 {
        self.ratio(self.fundamentals)
    }
}

pub async fn coverage_counts(pool: &PgPool, date: NaiveDate) -> Result<CoverageCounts> {
    let (active_stocks,): (i64,) = sqlx::query_as(
        "select count(*)::bigint from data.stocks where status = 'ACTIVE'",
    )
    .fetch_one(pool)
    .await
    .context("coverage: stock count failed")?;

    let (bars,): (i64,) =
        sqlx::query_as("select count(*)::bigint from data.price_bars where date = $1")
            .bind(date)
            .fetch_one(pool)
            .await
            .context("coverage: bar count failed")?;

    let (flows,): (i64,) =
        sqlx::query_as("select count(*)::bigint from data.investor_flows where date = $1")
            .bind(date)
            .fetch_one(pool)
            .await
            .context("coverage: flow count failed")?;

    let (fundamentals,): (i64,) = sqlx::query_as(
        r#"
        select count(distinct f.code)::bigint
        from data.fundamentals f
        join data.stocks s on s.code = f.code and s.status = 'ACTIVE'
        "#,
    )
    .fetch_one(pool)
    .await
    .context("coverage: fundamentals count failed")?;

    Ok(CoverageCounts {
        active_stocks,
        bars,
        flows,
        fundamentals,
    })
}

/// Table counts and date spans for the data-check command.
#[derive(Clone, Debug, PartialEq)]
pub struct DataStats {
    pub stocks: i64,
    pub bars: i64,
    pub flows: i64,
    pub fundamentals: i64,
    pub first_bar_date: Option<NaiveDate>,
    pub last_bar_date: Option<NaiveDate>,
}

pub async fn data_stats(pool: &PgPool) -> Result<DataStats> {
    let (stocks,): (i64,) = sqlx::query_as("select count(*)::bigint from data.stocks")
        .fetch_one(pool)
        .await?;
    let (bars,): (i64,) = sqlx::query_as("select count(*)::bigint from data.price_bars")
        .fetch_one(pool)
        .await?;
    let (flows,): (i64,) = sqlx::query_as("select count(*)::bigint from data.investor_flows")
        .fetch_one(pool)
        .await?;
    let (fundamentals,): (i64,) = sqlx::query_as("select count(*)::bigint from data.fundamentals")
        .fetch_one(pool)
        .await?;
    let (first_bar_date, last_bar_date): (Option<NaiveDate>, Option<NaiveDate>) =
        sqlx::query_as("select min(date), max(date) from data.price_bars")
            .fetch_one(pool)
            .await?;

    Ok(DataStats {
        stocks,
        bars,
        flows,
        fundamentals,
        first_bar_date,
        last_bar_date,
    })
}
