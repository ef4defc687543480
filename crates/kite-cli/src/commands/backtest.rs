//! `kite backtest run` — calendar loop with the sim broker.

use std::sync::Arc;

use anyhow::Result;
use chrono::NaiveDate;
use clap::Subcommand;

use kite_backtest::{run_backtest, BacktestConfig, DbPrices, SimBroker};

use super::{context, orchestrator, shutdown_flag};

#[derive(Subcommand)]
pub enum BacktestCmd {
    Run {
        #[arg(long)]
        from: NaiveDate,

        #[arg(long)]
        to: NaiveDate,

        /// Starting capital in KRW.
        #[arg(long, default_value_t = 100_000_000)]
        capital: i64,
    },
}

pub async fn run(cmd: BacktestCmd, config_paths: &[String]) -> Result<()> {
    match cmd {
        BacktestCmd::Run { from, to, capital } => {
            let ctx = context(config_paths).await?;
            let broker = Arc::new(SimBroker::new(
                DbPrices::new(ctx.pool.clone()),
                from,
                capital,
            ));
            let orch = orchestrator(&ctx, Arc::clone(&broker) as Arc<dyn kite_execution::Broker>);

            let report = run_backtest(
                &orch,
                &broker,
                &BacktestConfig { from, to, capital },
                shutdown_flag(),
            )
            .await?;

            println!("days={}", report.days.len());
            println!("failed_days={}", report.failed_days);
            println!("final_equity={}", report.final_equity);
            println!("total_return={:.4}", report.total_return(capital));
            Ok(())
        }
    }
}
