//! `kite worker start` — the background position monitor.

use std::sync::Arc;

use anyhow::Result;
use chrono::Utc;
use clap::Subcommand;
use tokio::sync::mpsc;
use tracing::{info, warn};

use kite_backtest::{DbPrices, SimBroker};
use kite_db::market;
use kite_execution::Broker;
use kite_monitor::{run_monitor, ExitSignal, MonitoredPosition, PositionBook};
use kite_signals::atr_percent;

use super::{context, shutdown_flag, CliContext};

#[derive(Subcommand)]
pub enum WorkerCmd {
    /// Run the exit-monitor sweep until ctrl-c.
    Start,
}

pub async fn run(cmd: WorkerCmd, config_paths: &[String]) -> Result<()> {
    match cmd {
        WorkerCmd::Start => {
            let ctx = context(config_paths).await?;
            let book = Arc::new(PositionBook::new());
            // Paper wiring: prices come from the bar store; the production
            // broker adapter plugs in through the same port.
            let broker: Arc<dyn Broker> = Arc::new(SimBroker::new(
                DbPrices::new(ctx.pool.clone()),
                Utc::now().date_naive(),
                0,
            ));

            seed_from_holdings(&ctx, &book, broker.as_ref()).await?;
            println!("positions_monitored={}", book.len().await);

            let (signal_tx, mut signal_rx) = mpsc::unbounded_channel::<ExitSignal>();
            let consumer = tokio::spawn(async move {
                while let Some(signal) = signal_rx.recv().await {
                    info!(
                        code = %signal.code,
                        reason = signal.reason.as_str(),
                        sell_qty = signal.sell_qty,
                        price = signal.price,
                        "exit signal received"
                    );
                }
            });

            run_monitor(
                Arc::clone(&book),
                broker,
                ctx.cfg.monitor.clone(),
                signal_tx,
                shutdown_flag(),
            )
            .await;

            consumer.abort();
            println!("worker_stopped=true");
            Ok(())
        }
    }
}

/// Seed the book from current broker holdings: entry = average price, ATR%
/// from the trailing bars. Holdings with no bar history are skipped.
async fn seed_from_holdings(
    ctx: &CliContext,
    book: &PositionBook,
    broker: &dyn Broker,
) -> Result<()> {
    let window = ctx.cfg.monitor.atr_window;
    let today = Utc::now().date_naive();

    for holding in broker.holdings().await? {
        if holding.quantity <= 0 {
            continue;
        }
        let bars =
            market::fetch_bars_window(&ctx.pool, &holding.code, today, window as i64 + 1).await?;
        let Some(atr) = atr_percent(&bars, window) else {
            warn!(code = %holding.code, "not enough bars for ATR; holding not monitored");
            continue;
        };
        book.add(MonitoredPosition::open(
            &holding.code,
            holding.avg_price,
            holding.quantity,
            atr,
            Utc::now(),
            &ctx.cfg.monitor,
        ))
        .await;
        info!(code = %holding.code, qty = holding.quantity, atr_pct = atr, "position monitored");
    }
    Ok(())
}
