//! The backtest driver: run the orchestrator once per trading day.

use chrono::NaiveDate;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{info, warn};

use kite_domain::EngineError;
use kite_pipeline::{Orchestrator, RunConfig};

use crate::calendar::trading_days;
use crate::sim_broker::{DailyPrices, SimBroker};

#[derive(Clone, Debug)]
pub struct BacktestConfig {
    pub from: NaiveDate,
    pub to: NaiveDate,
    /// Starting capital in KRW.
    pub capital: i64,
}

#[derive(Clone, Debug)]
pub struct DayOutcome {
    pub date: NaiveDate,
    pub ok: bool,
    pub detail: String,
    /// Marked equity at the end of the day.
    pub equity: i64,
}

#[derive(Clone, Debug)]
pub struct BacktestReport {
    pub days: Vec<DayOutcome>,
    pub final_equity: i64,
    pub failed_days: usize,
}

impl BacktestReport {
    pub fn total_return(&self, initial_capital: i64) -> f64 {
        if initial_capital <= 0 {
            return 0.0;
        }
        (self.final_equity - initial_capital) as f64 / initial_capital as f64
    }
}

/// Drive the orchestrator across the calendar with the sim broker.
///
/// A failed day (quality gate, thin data) is recorded and skipped — the
/// loop is the thin part, the pipeline already owns failure semantics.
/// Each day's run sizes against the marked equity of the previous close.
pub async fn run_backtest<P: DailyPrices>(
    orchestrator: &Orchestrator,
    broker: &Arc<SimBroker<P>>,
    cfg: &BacktestConfig,
    shutdown: watch::Receiver<bool>,
) -> Result<BacktestReport, EngineError> {
    let calendar = trading_days(cfg.from, cfg.to);
    if calendar.is_empty() {
        return Err(EngineError::InvalidInput {
            detail: format!("no trading days in [{}, {}]", cfg.from, cfg.to),
        });
    }

    info!(from = %cfg.from, to = %cfg.to, days = calendar.len(), "backtest started");

    let mut days = Vec::with_capacity(calendar.len());
    let mut failed_days = 0usize;
    let mut equity = cfg.capital;

    for date in calendar {
        if *shutdown.borrow() {
            return Err(EngineError::Canceled);
        }
        broker.set_date(date);

        let outcome = orchestrator
            .run(
                RunConfig {
                    date,
                    capital: equity,
                    dry_run: false,
                },
                shutdown.clone(),
            )
            .await;

        equity = broker.marked_value().await.unwrap_or(equity);
        match outcome {
            Ok(result) => {
                days.push(DayOutcome {
                    date,
                    ok: true,
                    detail: format!("{} stages", result.completed.len()),
                    equity,
                });
            }
            Err(EngineError::Canceled) => return Err(EngineError::Canceled),
            Err(e) => {
                warn!(date = %date, kind = e.kind(), "backtest day failed; skipping");
                failed_days += 1;
                days.push(DayOutcome {
                    date,
                    ok: false,
                    detail: e.kind().to_string(),
                    equity,
                });
            }
        }
    }

    info!(final_equity = equity, failed_days, "backtest finished");
    Ok(BacktestReport {
        days,
        final_equity: equity,
        failed_days,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn total_return_against_initial_capital() {
        let report = BacktestReport {
            days: vec![],
            final_equity: 110_000_000,
            failed_days: 0,
        };
        assert!((report.total_return(100_000_000) - 0.10).abs() < 1e-12);
        assert_eq!(report.total_return(0), 0.0);
    }
}
