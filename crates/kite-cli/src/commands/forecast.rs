//! `kite forecast {detect|fill-forward|aggregate|run|predict|validate}`.

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::Subcommand;
use tracing::warn;

use kite_db::{forecast as repo, market};
use kite_domain::{CapBucket, ForecastEvent};
use kite_forecast::{aggregate, detect, predict, track_forward, DetectInput, StatsMap,
    ValidationReport};

use super::{context, CliContext};

#[derive(Subcommand)]
pub enum ForecastCmd {
    /// Detect events for one date across the active stocks.
    Detect {
        #[arg(long)]
        date: Option<NaiveDate>,
    },
    /// Backfill forward performance for events with 5 bars available.
    FillForward,
    /// Rebuild the hierarchical stats.
    Aggregate,
    /// Detect + fill-forward + aggregate for today.
    Run,
    /// Predict for a code's detected events.
    Predict {
        #[arg(long)]
        code: String,
    },
    /// Error metrics and calibration for a model version.
    Validate {
        #[arg(long)]
        model: Option<String>,
    },
}

pub async fn run(cmd: ForecastCmd, config_paths: &[String]) -> Result<()> {
    let ctx = context(config_paths).await?;
    match cmd {
        ForecastCmd::Detect { date } => {
            let date = date.unwrap_or_else(|| Utc::now().date_naive());
            let detected = detect_for_date(&ctx, date).await?;
            println!("date={date}");
            println!("events_detected={detected}");
        }
        ForecastCmd::FillForward => {
            let filled = fill_forward(&ctx).await?;
            println!("forward_rows_written={filled}");
        }
        ForecastCmd::Aggregate => {
            let rows = aggregate_all(&ctx).await?;
            println!("stats_rows_written={rows}");
        }
        ForecastCmd::Run => {
            let date = Utc::now().date_naive();
            let detected = detect_for_date(&ctx, date).await?;
            let filled = fill_forward(&ctx).await?;
            let rows = aggregate_all(&ctx).await?;
            println!("events_detected={detected}");
            println!("forward_rows_written={filled}");
            println!("stats_rows_written={rows}");
        }
        ForecastCmd::Predict { code } => {
            let count = predict_for_code(&ctx, &code).await?;
            println!("code={code}");
            println!("predictions_written={count}");
        }
        ForecastCmd::Validate { model } => {
            let model = model.unwrap_or_else(|| ctx.cfg.forecast.model_version.clone());
            let pairs = repo::fetch_validation_pairs(&ctx.pool, &model).await?;
            println!("model_version={model}");
            for (horizon, data) in [("1d", &pairs.one_day), ("5d", &pairs.five_day)] {
                match ValidationReport::compute(data, ctx.cfg.forecast.calibration_bins) {
                    Some(report) => {
                        println!(
                            "horizon={horizon} n={} mae={:.5} rmse={:.5} hit_rate={:.3} mean_error={:.5}",
                            report.count, report.mae, report.rmse, report.hit_rate, report.mean_error
                        );
                        for (i, bin) in report.bins.iter().enumerate() {
                            println!(
                                "horizon={horizon} bin={i} n={} avg_pred={:.5} avg_actual={:.5} hit_rate={:.3}",
                                bin.count, bin.avg_predicted, bin.avg_actual, bin.hit_rate
                            );
                        }
                    }
                    None => println!("horizon={horizon} n=0 (nothing to validate)"),
                }
            }
        }
    }
    Ok(())
}

/// Detect events across the active universe for one date.
pub async fn detect_for_date(ctx: &CliContext, date: NaiveDate) -> Result<usize> {
    let stocks = market::fetch_stocks(&ctx.pool).await?;
    let mut events: Vec<ForecastEvent> = Vec::new();

    for stock in stocks.iter().filter(|s| s.is_tradable()) {
        // 22 bars: today, yesterday, and a 20-day volume history.
        let bars = market::fetch_bars_window(&ctx.pool, &stock.code, date, 22).await?;
        let n = bars.len();
        if n < 2 || bars[n - 1].date != date {
            continue;
        }
        let volume_history: Vec<i64> = bars[..n - 1].iter().map(|b| b.volume).collect();
        let detected = detect(
            &DetectInput {
                bar: &bars[n - 1],
                prev: &bars[n - 2],
                volume_history: &volume_history,
                sector: &stock.sector,
                cap_bucket: cap_bucket_for(&bars),
            },
            &ctx.cfg.forecast,
        );
        events.extend(detected);
    }

    repo::upsert_events(&ctx.pool, &events).await?;
    Ok(events.len())
}

/// Size bucket from average daily trading value — the reference data
/// carries no share counts, so value traded stands in for market cap.
fn cap_bucket_for(bars: &[kite_domain::PriceBar]) -> CapBucket {
    if bars.is_empty() {
        return CapBucket::Small;
    }
    let avg_value = bars
        .iter()
        .map(|b| b.value.unwrap_or(b.close * b.volume))
        .sum::<i64>()
        / bars.len() as i64;
    if avg_value >= 10_000_000_000 {
        CapBucket::Large
    } else if avg_value >= 1_000_000_000 {
        CapBucket::Mid
    } else {
        CapBucket::Small
    }
}

/// Track forward performance for untracked events with 5 bars available.
pub async fn fill_forward(ctx: &CliContext) -> Result<usize> {
    let untracked = repo::fetch_untracked_events(&ctx.pool, 1_000).await?;
    let mut rows = Vec::new();

    for event in &untracked {
        let base = market::fetch_bars_window(&ctx.pool, &event.code, event.event_date, 1).await?;
        let Some(base_close) = base.last().map(|b| b.close) else {
            warn!(code = %event.code, date = %event.event_date, "event has no base bar");
            continue;
        };
        let forward =
            market::fetch_bars_after(&ctx.pool, &event.code, event.event_date, 5).await?;
        if let Some(fp) = track_forward(event, base_close, &forward) {
            rows.push(fp);
        }
    }

    repo::upsert_forward(&ctx.pool, &rows).await?;
    Ok(rows.len())
}

/// Rebuild every stats level from the tracked events.
pub async fn aggregate_all(ctx: &CliContext) -> Result<usize> {
    let tracked = repo::fetch_tracked(&ctx.pool).await?;
    let stats = aggregate(&tracked);
    repo::upsert_stats(&ctx.pool, &stats).await?;
    Ok(stats.len())
}

async fn predict_for_code(ctx: &CliContext, code: &str) -> Result<usize> {
    let events = repo::fetch_events_for(&ctx.pool, code).await?;
    let stats_rows = repo::fetch_all_stats(&ctx.pool).await?;
    let stats: StatsMap = stats_rows
        .into_iter()
        .map(|s| ((s.level, s.key.clone(), s.event_type), s))
        .collect();

    let predictions: Vec<_> = events
        .iter()
        .filter_map(|event| predict(event, &stats, &ctx.cfg.forecast))
        .collect();
    repo::upsert_predictions(&ctx.pool, &predictions).await?;

    for p in &predictions {
        println!(
            "event={} level={} e1d={:.5} e5d={:.5} confidence={:.2} p10_mdd={:.4}",
            p.event_key,
            p.fallback_level.as_str(),
            p.expected_ret_1d,
            p.expected_ret_5d,
            p.confidence,
            p.p10_mdd
        );
    }
    Ok(predictions.len())
}
