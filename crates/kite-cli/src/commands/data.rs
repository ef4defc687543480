//! `kite data-check`, `kite cleanup`, `kite db {status|migrate}`.

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use tracing::info;

use kite_db::market;

use super::{context, CliContext};

#[derive(Subcommand)]
pub enum DbCmd {
    Status,
    Migrate,
}

pub async fn db(cmd: DbCmd) -> Result<()> {
    let pool = kite_db::connect_from_env().await?;
    match cmd {
        DbCmd::Status => {
            let status = kite_db::status(&pool).await?;
            println!("db_ok={} has_runs_table={}", status.ok, status.has_runs_table);
        }
        DbCmd::Migrate => {
            kite_db::migrate(&pool).await?;
            println!("migrations_applied=true");
        }
    }
    Ok(())
}

pub async fn data_check(config_paths: &[String]) -> Result<()> {
    let ctx = context(config_paths).await?;
    let stats = market::data_stats(&ctx.pool).await?;
    println!("stocks={}", stats.stocks);
    println!("price_bars={}", stats.bars);
    println!("investor_flows={}", stats.flows);
    println!("fundamentals={}", stats.fundamentals);
    println!(
        "bar_range={}..{}",
        stats
            .first_bar_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".into()),
        stats
            .last_bar_date
            .map(|d| d.to_string())
            .unwrap_or_else(|| "none".into())
    );

    let date = Utc::now().date_naive();
    let coverage = market::coverage_counts(&ctx.pool, date).await?;
    println!("date={date}");
    println!("active_stocks={}", coverage.active_stocks);
    println!("price_coverage={:.3}", coverage.price_coverage());
    println!("flow_coverage={:.3}", coverage.flow_coverage());
    println!("fundamentals_coverage={:.3}", coverage.fundamentals_coverage());

    let minimums = ctx.cfg.quality.minimums();
    let pass = coverage.price_coverage() >= minimums["prices"]
        && coverage.flow_coverage() >= minimums["flows"]
        && coverage.fundamentals_coverage() >= minimums["fundamentals"];
    println!("quality_pass={pass}");
    Ok(())
}

pub async fn cleanup(config_paths: &[String]) -> Result<()> {
    let ctx = context(config_paths).await?;
    let deleted = cleanup_flows(&ctx).await?;
    println!("flows_deleted={deleted}");
    Ok(())
}

/// Delete investor-flow rows from before the units-change cutoff.
/// No cutoff configured means nothing to do.
pub async fn cleanup_flows(ctx: &CliContext) -> Result<u64> {
    let Some(cutoff) = ctx.cfg.data.flow_units_cutoff else {
        info!("no flow_units_cutoff configured; nothing to clean");
        return Ok(0);
    };
    let deleted = market::delete_flows_before(&ctx.pool, cutoff).await?;
    info!(%cutoff, deleted, "pre-cutoff investor flows removed");
    Ok(deleted)
}
