//! `kite brain run` — one full pipeline run.

use std::sync::Arc;

use anyhow::Result;
use chrono::{NaiveDate, Utc};
use clap::Subcommand;

use kite_backtest::{DbPrices, SimBroker};

use super::{context, orchestrator, shutdown_flag};

#[derive(Subcommand)]
pub enum BrainCmd {
    /// Run S0→S7 for a date.
    Run {
        /// Target date (defaults to today).
        #[arg(long)]
        date: Option<NaiveDate>,

        /// Total capital in KRW.
        #[arg(long, default_value_t = 100_000_000)]
        capital: i64,

        /// Plan but never submit; quality failures pass through when
        /// configured.
        #[arg(long)]
        dry_run: bool,
    },
}

pub async fn run(cmd: BrainCmd, config_paths: &[String]) -> Result<()> {
    match cmd {
        BrainCmd::Run {
            date,
            capital,
            dry_run,
        } => {
            let ctx = context(config_paths).await?;
            let date = date.unwrap_or_else(|| Utc::now().date_naive());

            // Paper wiring: quotes and fills come from the bar store.
            let broker = Arc::new(SimBroker::new(
                DbPrices::new(ctx.pool.clone()),
                date,
                capital,
            ));
            let orch = orchestrator(&ctx, broker);

            let result = orch
                .run(
                    kite_pipeline::RunConfig {
                        date,
                        capital,
                        dry_run,
                    },
                    shutdown_flag(),
                )
                .await?;

            println!("run_id={}", result.run_id);
            println!("date={date}");
            println!(
                "stages_completed={}",
                result
                    .completed
                    .iter()
                    .map(|s| s.as_str())
                    .collect::<Vec<_>>()
                    .join(",")
            );
            println!("orders_planned={}", result.orders_planned);
            if let Some(passed) = result.gate_passed {
                println!("gate_passed={passed}");
                println!("gate_would_block={}", result.gate_would_block.unwrap_or(false));
            }
            if let Some(path) = &result.audit_log_path {
                println!("audit_log={}", path.display());
            }
            Ok(())
        }
    }
}
