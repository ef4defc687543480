//! Repositories for the forecast subsystem: events, forward performance,
//! aggregated stats, predictions, and the validation join.

use anyhow::{anyhow, Context, Result};
use sqlx::{PgPool, Row};

use kite_domain::{
    CapBucket, EventType, ForecastEvent, ForecastStats, ForwardPerformance, Prediction,
    StatsLevel,
};

// ---------------------------------------------------------------------------
// Events
// ---------------------------------------------------------------------------

pub async fn upsert_events(pool: &PgPool, events: &[ForecastEvent]) -> Result<u64> {
    let mut written = 0u64;
    for e in events {
        sqlx::query(
            r#"
            insert into analytics.forecast_events (
              code, event_date, event_type, day_return, close_to_high,
              gap_ratio, volume_z, sector, cap_bucket
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            on conflict (code, event_date, event_type) do update
              set day_return = excluded.day_return,
                  close_to_high = excluded.close_to_high,
                  gap_ratio = excluded.gap_ratio,
                  volume_z = excluded.volume_z,
                  sector = excluded.sector,
                  cap_bucket = excluded.cap_bucket
            "#,
        )
        .bind(&e.code)
        .bind(e.event_date)
        .bind(e.event_type.as_str())
        .bind(e.day_return)
        .bind(e.close_to_high)
        .bind(e.gap_ratio)
        .bind(e.volume_z)
        .bind(&e.sector)
        .bind(e.cap_bucket.as_str())
        .execute(pool)
        .await
        .with_context(|| format!("upsert_events failed for {}", e.event_key()))?;
        written += 1;
    }
    Ok(written)
}

pub async fn fetch_events_for(pool: &PgPool, code: &str) -> Result<Vec<ForecastEvent>> {
    let rows = sqlx::query(
        r#"
        select code, event_date, event_type, day_return, close_to_high,
               gap_ratio, volume_z, sector, cap_bucket
        from analytics.forecast_events
        where code = $1
        order by event_date desc
        "#,
    )
    .bind(code)
    .fetch_all(pool)
    .await
    .with_context(|| format!("fetch_events_for failed for {code}"))?;

    rows.iter().map(row_to_event).collect()
}

/// Events that do not yet have a forward-performance row — the fill-forward
/// job's work queue.
pub async fn fetch_untracked_events(pool: &PgPool, limit: i64) -> Result<Vec<ForecastEvent>> {
    let rows = sqlx::query(
        r#"
        select e.code, e.event_date, e.event_type, e.day_return, e.close_to_high,
               e.gap_ratio, e.volume_z, e.sector, e.cap_bucket
        from analytics.forecast_events e
        left join analytics.forward_performance fp
          on fp.event_key = e.code || ':' || e.event_date::text || ':' || e.event_type
        where fp.event_key is null
        order by e.event_date asc
        limit $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("fetch_untracked_events failed")?;

    rows.iter().map(row_to_event).collect()
}

fn row_to_event(row: &sqlx::postgres::PgRow) -> Result<ForecastEvent> {
    let type_s: String = row.try_get("event_type")?;
    let bucket_s: String = row.try_get("cap_bucket")?;
    Ok(ForecastEvent {
        code: row.try_get("code")?,
        event_date: row.try_get("event_date")?,
        event_type: EventType::parse(&type_s)
            .ok_or_else(|| anyhow!("bad event_type: {type_s}"))?,
        day_return: row.try_get("day_return")?,
        close_to_high: row.try_get("close_to_high")?,
        gap_ratio: row.try_get("gap_ratio")?,
        volume_z: row.try_get("volume_z")?,
        sector: row.try_get("sector")?,
        cap_bucket: CapBucket::parse(&bucket_s)
            .ok_or_else(|| anyhow!("bad cap_bucket: {bucket_s}"))?,
    })
}

// ---------------------------------------------------------------------------
// Forward performance
// ---------------------------------------------------------------------------

pub async fn upsert_forward(pool: &PgPool, rows: &[ForwardPerformance]) -> Result<u64> {
    let mut written = 0u64;
    for fp in rows {
        sqlx::query(
            r#"
            insert into analytics.forward_performance (
              event_key, fwd_ret_1d, fwd_ret_2d, fwd_ret_3d, fwd_ret_5d,
              max_runup_5d, max_drawdown_5d, gap_hold_3d
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            on conflict (event_key) do update
              set fwd_ret_1d = excluded.fwd_ret_1d,
                  fwd_ret_2d = excluded.fwd_ret_2d,
                  fwd_ret_3d = excluded.fwd_ret_3d,
                  fwd_ret_5d = excluded.fwd_ret_5d,
                  max_runup_5d = excluded.max_runup_5d,
                  max_drawdown_5d = excluded.max_drawdown_5d,
                  gap_hold_3d = excluded.gap_hold_3d
            "#,
        )
        .bind(&fp.event_key)
        .bind(fp.fwd_ret_1d)
        .bind(fp.fwd_ret_2d)
        .bind(fp.fwd_ret_3d)
        .bind(fp.fwd_ret_5d)
        .bind(fp.max_runup_5d)
        .bind(fp.max_drawdown_5d)
        .bind(fp.gap_hold_3d)
        .execute(pool)
        .await
        .with_context(|| format!("upsert_forward failed for {}", fp.event_key))?;
        written += 1;
    }
    Ok(written)
}

/// All events joined with their realized forward performance — the
/// aggregator's input.
pub async fn fetch_tracked(pool: &PgPool) -> Result<Vec<(ForecastEvent, ForwardPerformance)>> {
    let rows = sqlx::query(
        r#"
        select e.code, e.event_date, e.event_type, e.day_return, e.close_to_high,
               e.gap_ratio, e.volume_z, e.sector, e.cap_bucket,
               fp.event_key, fp.fwd_ret_1d, fp.fwd_ret_2d, fp.fwd_ret_3d, fp.fwd_ret_5d,
               fp.max_runup_5d, fp.max_drawdown_5d, fp.gap_hold_3d
        from analytics.forecast_events e
        join analytics.forward_performance fp
          on fp.event_key = e.code || ':' || e.event_date::text || ':' || e.event_type
        order by e.event_date asc, e.code asc
        "#,
    )
    .fetch_all(pool)
    .await
    .context("fetch_tracked failed")?;

    rows.iter()
        .map(|row| {
            let event = row_to_event(row)?;
            let perf = ForwardPerformance {
                event_key: row.try_get("event_key")?,
                fwd_ret_1d: row.try_get("fwd_ret_1d")?,
                fwd_ret_2d: row.try_get("fwd_ret_2d")?,
                fwd_ret_3d: row.try_get("fwd_ret_3d")?,
                fwd_ret_5d: row.try_get("fwd_ret_5d")?,
                max_runup_5d: row.try_get("max_runup_5d")?,
                max_drawdown_5d: row.try_get("max_drawdown_5d")?,
                gap_hold_3d: row.try_get("gap_hold_3d")?,
            };
            Ok((event, perf))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Stats
// ---------------------------------------------------------------------------

pub async fn upsert_stats(pool: &PgPool, stats: &[ForecastStats]) -> Result<u64> {
    let mut written = 0u64;
    for s in stats {
        sqlx::query(
            r#"
            insert into analytics.forecast_stats (
              level, key, event_type, sample_count, avg_ret_1d, avg_ret_5d,
              win_rate_1d, win_rate_5d, avg_runup_5d, p10_mdd
            ) values ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            on conflict (level, key, event_type) do update
              set sample_count = excluded.sample_count,
                  avg_ret_1d = excluded.avg_ret_1d,
                  avg_ret_5d = excluded.avg_ret_5d,
                  win_rate_1d = excluded.win_rate_1d,
                  win_rate_5d = excluded.win_rate_5d,
                  avg_runup_5d = excluded.avg_runup_5d,
                  p10_mdd = excluded.p10_mdd
            "#,
        )
        .bind(s.level.as_str())
        .bind(&s.key)
        .bind(s.event_type.as_str())
        .bind(s.sample_count as i64)
        .bind(s.avg_ret_1d)
        .bind(s.avg_ret_5d)
        .bind(s.win_rate_1d)
        .bind(s.win_rate_5d)
        .bind(s.avg_runup_5d)
        .bind(s.p10_mdd)
        .execute(pool)
        .await
        .with_context(|| format!("upsert_stats failed for {}/{}", s.level.as_str(), s.key))?;
        written += 1;
    }
    Ok(written)
}

pub async fn fetch_all_stats(pool: &PgPool) -> Result<Vec<ForecastStats>> {
    let rows = sqlx::query(
        r#"
        select level, key, event_type, sample_count, avg_ret_1d, avg_ret_5d,
               win_rate_1d, win_rate_5d, avg_runup_5d, p10_mdd
        from analytics.forecast_stats
        order by level, key, event_type
        "#,
    )
    .fetch_all(pool)
    .await
    .context("fetch_all_stats failed")?;

    rows.into_iter()
        .map(|row| {
            let level_s: String = row.try_get("level")?;
            let type_s: String = row.try_get("event_type")?;
            let sample_count: i64 = row.try_get("sample_count")?;
            Ok(ForecastStats {
                level: StatsLevel::parse(&level_s)
                    .ok_or_else(|| anyhow!("bad level: {level_s}"))?,
                key: row.try_get("key")?,
                event_type: EventType::parse(&type_s)
                    .ok_or_else(|| anyhow!("bad event_type: {type_s}"))?,
                sample_count: sample_count as u64,
                avg_ret_1d: row.try_get("avg_ret_1d")?,
                avg_ret_5d: row.try_get("avg_ret_5d")?,
                win_rate_1d: row.try_get("win_rate_1d")?,
                win_rate_5d: row.try_get("win_rate_5d")?,
                avg_runup_5d: row.try_get("avg_runup_5d")?,
                p10_mdd: row.try_get("p10_mdd")?,
            })
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Predictions + validation join
// ---------------------------------------------------------------------------

pub async fn upsert_predictions(pool: &PgPool, predictions: &[Prediction]) -> Result<u64> {
    let mut written = 0u64;
    for p in predictions {
        sqlx::query(
            r#"
            insert into analytics.predictions (
              event_key, model_version, expected_ret_1d, expected_ret_5d,
              confidence, p10_mdd, expected_runup_5d, fallback_level
            ) values ($1, $2, $3, $4, $5, $6, $7, $8)
            on conflict (event_key, model_version) do update
              set expected_ret_1d = excluded.expected_ret_1d,
                  expected_ret_5d = excluded.expected_ret_5d,
                  confidence = excluded.confidence,
                  p10_mdd = excluded.p10_mdd,
                  expected_runup_5d = excluded.expected_runup_5d,
                  fallback_level = excluded.fallback_level
            "#,
        )
        .bind(&p.event_key)
        .bind(&p.model_version)
        .bind(p.expected_ret_1d)
        .bind(p.expected_ret_5d)
        .bind(p.confidence)
        .bind(p.p10_mdd)
        .bind(p.expected_runup_5d)
        .bind(p.fallback_level.as_str())
        .execute(pool)
        .await
        .with_context(|| format!("upsert_predictions failed for {}", p.event_key))?;
        written += 1;
    }
    Ok(written)
}

/// (predicted, actual) pairs per horizon for one model version.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidationPairs {
    pub one_day: Vec<(f64, f64)>,
    pub five_day: Vec<(f64, f64)>,
}

/// Join predictions with realized forward performance for the validator.
/// A/B runs call this once per model version.
pub async fn fetch_validation_pairs(
    pool: &PgPool,
    model_version: &str,
) -> Result<ValidationPairs> {
    let rows = sqlx::query(
        r#"
        select p.expected_ret_1d, p.expected_ret_5d, fp.fwd_ret_1d, fp.fwd_ret_5d
        from analytics.predictions p
        join analytics.forward_performance fp on fp.event_key = p.event_key
        where p.model_version = $1
        order by p.event_key
        "#,
    )
    .bind(model_version)
    .fetch_all(pool)
    .await
    .context("fetch_validation_pairs failed")?;

    let mut pairs = ValidationPairs {
        one_day: Vec::with_capacity(rows.len()),
        five_day: Vec::with_capacity(rows.len()),
    };
    for row in rows {
        pairs
            .one_day
            .push((row.try_get("expected_ret_1d")?, row.try_get("fwd_ret_1d")?));
        pairs
            .five_day
            .push((row.try_get("expected_ret_5d")?, row.try_get("fwd_ret_5d")?));
    }
    Ok(pairs)
}
