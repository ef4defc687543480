//! `kite scheduler {start|list|run|status}`.
//!
//! The job table is fixed here: the daily pipeline run, the nightly
//! forecast sweep, and weekly housekeeping. Expressions are cron with
//! seconds, evaluated in Asia/Seoul.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;

use kite_backtest::{DbPrices, SimBroker};
use kite_scheduler::{FnJob, Scheduler};

use super::{context, orchestrator, shutdown_flag, CliContext};

/// (name, schedule) of every standing job.
const BRAIN_SCHEDULE: &str = "0 30 8 * * Mon-Fri *";
const FORECAST_SCHEDULE: &str = "0 10 18 * * Mon-Fri *";
const CLEANUP_SCHEDULE: &str = "0 0 3 * * Sun *";

#[derive(Subcommand)]
pub enum SchedulerCmd {
    /// Run all jobs until ctrl-c.
    Start {
        /// Capital handed to the scheduled pipeline runs, KRW.
        #[arg(long, default_value_t = 100_000_000)]
        capital: i64,
    },
    /// Print the job table.
    List,
    /// Trigger one job immediately.
    Run { name: String },
    /// Print per-job statistics (for a live scheduler use the API; this
    /// shows the table with zeroed counters).
    Status,
}

fn build(ctx: Arc<CliContext>, capital: i64) -> Result<Scheduler> {
    let mut scheduler = Scheduler::new();

    let brain_ctx = Arc::clone(&ctx);
    scheduler.register(
        "brain",
        BRAIN_SCHEDULE,
        Arc::new(FnJob(move || {
            let ctx = Arc::clone(&brain_ctx);
            async move {
                let date = Utc::now().date_naive();
                let broker = Arc::new(SimBroker::new(
                    DbPrices::new(ctx.pool.clone()),
                    date,
                    capital,
                ));
                let orch = orchestrator(&ctx, broker);
                let (_, rx) = tokio::sync::watch::channel(false);
                orch.run(
                    kite_pipeline::RunConfig {
                        date,
                        capital,
                        dry_run: false,
                    },
                    rx,
                )
                .await?;
                Ok(())
            }
        })),
    )?;

    let forecast_ctx = Arc::clone(&ctx);
    scheduler.register(
        "forecast",
        FORECAST_SCHEDULE,
        Arc::new(FnJob(move || {
            let ctx = Arc::clone(&forecast_ctx);
            async move {
                let date = Utc::now().date_naive();
                super::forecast::detect_for_date(&ctx, date).await?;
                super::forecast::fill_forward(&ctx).await?;
                super::forecast::aggregate_all(&ctx).await?;
                Ok(())
            }
        })),
    )?;

    let cleanup_ctx = Arc::clone(&ctx);
    scheduler.register(
        "cleanup",
        CLEANUP_SCHEDULE,
        Arc::new(FnJob(move || {
            let ctx = Arc::clone(&cleanup_ctx);
            async move {
                super::data::cleanup_flows(&ctx).await?;
                Ok(())
            }
        })),
    )?;

    Ok(scheduler)
}

pub async fn run(cmd: SchedulerCmd, config_paths: &[String]) -> Result<()> {
    match cmd {
        SchedulerCmd::Start { capital } => {
            let ctx = Arc::new(context(config_paths).await?);
            let scheduler = build(ctx, capital)?;
            for (name, expr) in scheduler.list() {
                println!("job={name} schedule=\"{expr}\"");
            }

            let mut shutdown = shutdown_flag();
            let handles = scheduler.start(shutdown.clone());
            let _ = shutdown.changed().await;
            for handle in handles {
                let _ = handle.await;
            }
            println!("scheduler_stopped=true");
            Ok(())
        }
        SchedulerCmd::List => {
            let ctx = Arc::new(context(config_paths).await?);
            let scheduler = build(ctx, 0)?;
            for (name, expr) in scheduler.list() {
                println!("job={name} schedule=\"{expr}\"");
            }
            Ok(())
        }
        SchedulerCmd::Run { name } => {
            let ctx = Arc::new(context(config_paths).await?);
            let scheduler = build(ctx, 100_000_000)?;
            let ran = scheduler.trigger(&name).await?;
            println!("job={name} ran={ran}");
            Ok(())
        }
        SchedulerCmd::Status => {
            let ctx = Arc::new(context(config_paths).await?);
            let scheduler = build(ctx, 0)?;
            for (name, stats) in scheduler.stats() {
                println!(
                    "job={name} runs={} successes={} failures={} last_run={:?}",
                    stats.runs, stats.successes, stats.failures, stats.last_run
                );
            }
            Ok(())
        }
    }
}
