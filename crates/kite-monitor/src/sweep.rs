//! The background sweep task.
//!
//! One task per process. Each tick takes the position map's write lock for
//! the full sweep, quotes every open position through the broker port,
//! walks the exit decision tree, and emits admitted signals on the channel.
//! Closed or emptied positions are removed at the end of the sweep.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use kite_config::MonitorConfig;
use kite_execution::Broker;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::book::PositionBook;
use crate::exit::{evaluate, ExitSignal};

/// Run the monitor until the shutdown flag flips.
///
/// Emitted signals are partial/full sell instructions; the consumer places
/// the orders. The monitor itself never talks to the order side of the
/// broker.
pub async fn run_monitor(
    book: Arc<PositionBook>,
    broker: Arc<dyn Broker>,
    cfg: MonitorConfig,
    signals: mpsc::UnboundedSender<ExitSignal>,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(
        interval_secs = cfg.poll_interval_secs,
        "position monitor started"
    );

    let mut ticker = tokio::time::interval(Duration::from_secs(cfg.poll_interval_secs.max(1)));
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = ticker.tick() => {}
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    break;
                }
            }
        }

        sweep_once(&book, broker.as_ref(), &cfg, &signals).await;
    }

    info!("position monitor stopped");
}

/// One full sweep under the write lock.
pub async fn sweep_once(
    book: &PositionBook,
    broker: &dyn Broker,
    cfg: &MonitorConfig,
    signals: &mpsc::UnboundedSender<ExitSignal>,
) {
    let mut positions = book.positions().write().await;
    if positions.is_empty() {
        debug!("monitor sweep: no open positions");
        return;
    }

    let mut to_remove: Vec<String> = Vec::new();

    for (code, position) in positions.iter_mut() {
        // Price calls block inside the critical section; counts are O(tens).
        let price = match broker.current_price(code).await {
            Ok(p) => p,
            Err(e) => {
                warn!(code = %code, error = %e, "price fetch failed; skipping position");
                continue;
            }
        };

        if let Some(signal) = evaluate(position, price, cfg) {
            let now = Utc::now();
            if book.admit_signal(code, signal.reason, now, cfg.dedup_window_secs) {
                info!(
                    code = %code,
                    reason = signal.reason.as_str(),
                    sell_qty = signal.sell_qty,
                    price,
                    state = signal.state_after.as_str(),
                    "exit signal"
                );
                let _ = signals.send(signal);
            } else {
                debug!(code = %code, reason = signal.reason.as_str(), "duplicate signal suppressed");
            }
        }

        if position.remaining_qty <= 0 {
            to_remove.push(code.clone());
        }
    }

    for code in to_remove {
        positions.remove(&code);
        debug!(code = %code, "position closed and removed");
    }
}
