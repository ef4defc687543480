//! Repositories for per-run stage artifacts: quality snapshots, universe,
//! signal sets, screens, rankings, target portfolios.
//!
//! Everything here upserts on its natural key — (run_id, code) or plain
//! run_id — so re-running a stage for the same run overwrites safely.

use anyhow::{anyhow, Context, Result};
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, BTreeSet};

use kite_domain::{
    QualitySnapshot, RankedStock, RunId, SignalSet, TargetPortfolio, UniverseSnapshot,
};

// ---------------------------------------------------------------------------
// Quality snapshots (keyed by date — one gate verdict per trading day)
// ---------------------------------------------------------------------------

pub async fn upsert_quality_snapshot(pool: &PgPool, snap: &QualitySnapshot) -> Result<()> {
    sqlx::query(
        r#"
        insert into data.quality_snapshots (date, coverage, composite, passed)
        values ($1, $2, $3, $4)
        on conflict (date) do update
          set coverage = excluded.coverage,
              composite = excluded.composite,
              passed = excluded.passed
        "#,
    )
    .bind(snap.date)
    .bind(serde_json::to_value(&snap.coverage).context("serialize coverage")?)
    .bind(snap.composite)
    .bind(snap.passed)
    .execute(pool)
    .await
    .context("upsert_quality_snapshot failed")?;
    Ok(())
}

pub async fn fetch_quality_snapshot(
    pool: &PgPool,
    date: NaiveDate,
) -> Result<Option<QualitySnapshot>> {
    let row = sqlx::query(
        "select date, coverage, composite, passed from data.quality_snapshots where date = $1",
    )
    .bind(date)
    .fetch_optional(pool)
    .await
    .context("fetch_quality_snapshot failed")?;

    row.map(|row| {
        let coverage: serde_json::Value = row.try_get("coverage")?;
        Ok(QualitySnapshot {
            date: row.try_get("date")?,
            coverage: serde_json::from_value(coverage).context("parse coverage")?,
            composite: row.try_get("composite")?,
            passed: row.try_get("passed")?,
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Universe
// ---------------------------------------------------------------------------

pub async fn upsert_universe(
    pool: &PgPool,
    run_id: &RunId,
    snap: &UniverseSnapshot,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into selection.universe_snapshots (run_id, date, codes)
        values ($1, $2, $3)
        on conflict (run_id) do update
          set date = excluded.date,
              codes = excluded.codes
        "#,
    )
    .bind(run_id.as_str())
    .bind(snap.date)
    .bind(serde_json::to_value(&snap.codes).context("serialize universe codes")?)
    .execute(pool)
    .await
    .context("upsert_universe failed")?;
    Ok(())
}

pub async fn fetch_universe(pool: &PgPool, run_id: &RunId) -> Result<Option<UniverseSnapshot>> {
    let row = sqlx::query(
        "select date, codes from selection.universe_snapshots where run_id = $1",
    )
    .bind(run_id.as_str())
    .fetch_optional(pool)
    .await
    .context("fetch_universe failed")?;

    row.map(|row| {
        let codes: serde_json::Value = row.try_get("codes")?;
        Ok(UniverseSnapshot {
            date: row.try_get("date")?,
            codes: serde_json::from_value::<BTreeSet<String>>(codes)
                .context("parse universe codes")?,
        })
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Signal sets
// ---------------------------------------------------------------------------

pub async fn upsert_signal_sets(
    pool: &PgPool,
    run_id: &RunId,
    sets: &[SignalSet],
) -> Result<u64> {
    let mut written = 0u64;
    for s in sets {
        sqlx::query(
            r#"
            insert into signals.signal_sets (
              run_id, date, code,
              momentum, technical, value, quality, flow, event,
              total, weakly_observed
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            on conflict (run_id, code) do update
              set date = excluded.date,
                  momentum = excluded.momentum,
                  technical = excluded.technical,
                  value = excluded.value,
                  quality = excluded.quality,
                  flow = excluded.flow,
                  event = excluded.event,
                  total = excluded.total,
                  weakly_observed = excluded.weakly_observed
            "#,
        )
        .bind(run_id.as_str())
        .bind(s.date)
        .bind(&s.code)
        .bind(s.momentum)
        .bind(s.technical)
        .bind(s.value)
        .bind(s.quality)
        .bind(s.flow)
        .bind(s.event)
        .bind(s.total)
        .bind(s.weakly_observed)
        .execute(pool)
        .await
        .with_context(|| format!("upsert_signal_sets failed for {}", s.code))?;
        written += 1;
    }
    Ok(written)
}

pub async fn fetch_signal_sets(pool: &PgPool, run_id: &RunId) -> Result<Vec<SignalSet>> {
    let rows = sqlx::query(
        r#"
        select date, code, momentum, technical, value, quality, flow, event,
               total, weakly_observed
        from signals.signal_sets
        where run_id = $1
        order by code
        "#,
    )
    .bind(run_id.as_str())
    .fetch_all(pool)
    .await
    .context("fetch_signal_sets failed")?;

    rows.into_iter()
        .map(|row| {
            Ok(SignalSet {
                date: row.try_get("date")?,
                code: row.try_get("code")?,
                momentum: row.try_get("momentum")?,
                technical: row.try_get("technical")?,
                value: row.try_get("value")?,
                quality: row.try_get("quality")?,
                flow: row.try_get("flow")?,
                event: row.try_get("event")?,
                total: row.try_get("total")?,
                weakly_observed: row.try_get("weakly_observed")?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Screens
// ---------------------------------------------------------------------------

/// Screen output: survivors plus code → first-failing-predicate.
pub async fn upsert_screen(
    pool: &PgPool,
    run_id: &RunId,
    date: NaiveDate,
    survivors: &[String],
    rejections: &BTreeMap<String, String>,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into selection.screens (run_id, date, survivors, rejections)
        values ($1, $2, $3, $4)
        on conflict (run_id) do update
          set date = excluded.date,
              survivors = excluded.survivors,
              rejections = excluded.rejections
        "#,
    )
    .bind(run_id.as_str())
    .bind(date)
    .bind(serde_json::to_value(survivors).context("serialize survivors")?)
    .bind(serde_json::to_value(rejections).context("serialize rejections")?)
    .execute(pool)
    .await
    .context("upsert_screen failed")?;
    Ok(())
}

pub async fn fetch_screen(
    pool: &PgPool,
    run_id: &RunId,
) -> Result<Option<(Vec<String>, BTreeMap<String, String>)>> {
    let row = sqlx::query("select survivors, rejections from selection.screens where run_id = $1")
        .bind(run_id.as_str())
        .fetch_optional(pool)
        .await
        .context("fetch_screen failed")?;

    row.map(|row| {
        let survivors: serde_json::Value = row.try_get("survivors")?;
        let rejections: serde_json::Value = row.try_get("rejections")?;
        Ok((
            serde_json::from_value(survivors).context("parse survivors")?,
            serde_json::from_value(rejections).context("parse rejections")?,
        ))
    })
    .transpose()
}

// ---------------------------------------------------------------------------
// Rankings
// ---------------------------------------------------------------------------

pub async fn upsert_rankings(
    pool: &PgPool,
    run_id: &RunId,
    ranked: &[RankedStock],
) -> Result<u64> {
    let mut written = 0u64;
    for r in ranked {
        sqlx::query(
            r#"
            insert into selection.rankings (run_id, date, code, rank, total_score, detail)
            values ($1, $2, $3, $4, $5, $6)
            on conflict (run_id, code) do update
              set date = excluded.date,
                  rank = excluded.rank,
                  total_score = excluded.total_score,
                  detail = excluded.detail
            "#,
        )
        .bind(run_id.as_str())
        .bind(r.date)
        .bind(&r.code)
        .bind(r.rank as i32)
        .bind(r.total_score)
        .bind(serde_json::to_value(&r.detail).context("serialize ranking detail")?)
        .execute(pool)
        .await
        .with_context(|| format!("upsert_rankings failed for {}", r.code))?;
        written += 1;
    }
    Ok(written)
}

pub async fn fetch_rankings(pool: &PgPool, run_id: &RunId) -> Result<Vec<RankedStock>> {
    let rows = sqlx::query(
        r#"
        select date, code, rank, total_score, detail
        from selection.rankings
        where run_id = $1
        order by rank asc
        "#,
    )
    .bind(run_id.as_str())
    .fetch_all(pool)
    .await
    .context("fetch_rankings failed")?;

    rows.into_iter()
        .map(|row| {
            let rank: i32 = row.try_get("rank")?;
            let detail: serde_json::Value = row.try_get("detail")?;
            Ok(RankedStock {
                date: row.try_get("date")?,
                code: row.try_get("code")?,
                rank: u32::try_from(rank).map_err(|_| anyhow!("negative rank {rank}"))?,
                total_score: row.try_get("total_score")?,
                detail: serde_json::from_value(detail).context("parse ranking detail")?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Target portfolios
// ---------------------------------------------------------------------------

pub async fn upsert_portfolio(
    pool: &PgPool,
    run_id: &RunId,
    portfolio: &TargetPortfolio,
) -> Result<()> {
    sqlx::query(
        r#"
        insert into portfolio.target_portfolios (run_id, date, positions, cash_weight)
        values ($1, $2, $3, $4)
        on conflict (run_id) do update
          set date = excluded.date,
              positions = excluded.positions,
              cash_weight = excluded.cash_weight
        "#,
    )
    .bind(run_id.as_str())
    .bind(portfolio.date)
    .bind(serde_json::to_value(&portfolio.positions).context("serialize positions")?)
    .bind(portfolio.cash_weight)
    .execute(pool)
    .await
    .context("upsert_portfolio failed")?;
    Ok(())
}

pub async fn fetch_portfolio(pool: &PgPool, run_id: &RunId) -> Result<Option<TargetPortfolio>> {
    let row = sqlx::query(
        "select date, positions, cash_weight from portfolio.target_portfolios where run_id = $1",
    )
    .bind(run_id.as_str())
    .fetch_optional(pool)
    .await
    .context("fetch_portfolio failed")?;

    row.map(|row| row_to_portfolio(&row)).transpose()
}

/// The most recent portfolio strictly before `date` — the previous weights
/// for the turnover guard and action mapping.
pub async fn fetch_latest_portfolio_before(
    pool: &PgPool,
    date: NaiveDate,
) -> Result<Option<TargetPortfolio>> {
    let row = sqlx::query(
        r#"
        select date, positions, cash_weight
        from portfolio.target_portfolios
        where date < $1
        order by date desc, run_id desc
        limit 1
        "#,
    )
    .bind(date)
    .fetch_optional(pool)
    .await
    .context("fetch_latest_portfolio_before failed")?;

    row.map(|row| row_to_portfolio(&row)).transpose()
}

fn row_to_portfolio(row: &sqlx::postgres::PgRow) -> Result<TargetPortfolio> {
    let positions: serde_json::Value = row.try_get("positions")?;
    Ok(TargetPortfolio {
        date: row.try_get("date")?,
        positions: serde_json::from_value(positions).context("parse positions")?,
        cash_weight: row.try_get("cash_weight")?,
    })
}
