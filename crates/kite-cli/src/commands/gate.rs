//! `kite gate {status|test|stats}`.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use clap::Subcommand;

use kite_db::{artifacts, orders as orders_repo, runs};
use kite_risk::{evaluate_gate, GateStats};

use super::{auditcmd::latest_limit_report, context};

#[derive(Subcommand)]
pub enum GateCmd {
    /// Mode, limits, and the last decision.
    Status,
    /// Evaluate the gate against the latest portfolio without persisting.
    Test,
    /// Shadow analytics over the recent event window.
    Stats {
        #[arg(long, default_value_t = 500)]
        window: i64,
    },
}

pub async fn run(cmd: GateCmd, config_paths: &[String]) -> Result<()> {
    let ctx = context(config_paths).await?;
    match cmd {
        GateCmd::Status => {
            println!("mode={}", ctx.cfg.gate.mode.as_str());
            println!("max_var_95={}", ctx.cfg.gate.max_var_95);
            println!("max_var_99={}", ctx.cfg.gate.max_var_99);
            println!("max_single_exposure={}", ctx.cfg.gate.max_single_exposure);
            println!("max_sector_exposure={}", ctx.cfg.gate.max_sector_exposure);
            println!("max_concentration={}", ctx.cfg.gate.max_concentration);
            println!("min_liquidity_score={}", ctx.cfg.gate.min_liquidity_score);
            if let Some(last) = orders_repo::fetch_gate_events(&ctx.pool, 1)
                .await?
                .into_iter()
                .next()
            {
                println!(
                    "last_event: run_id={} action={} passed={} would_block={} at={}",
                    last.run_id, last.action, last.passed, last.would_block, last.created_at
                );
            }
            Ok(())
        }
        GateCmd::Test => {
            let latest = runs::fetch_recent_runs(&ctx.pool, 1)
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| anyhow!("no runs yet"))?;
            let portfolio = artifacts::fetch_portfolio(&ctx.pool, &latest.record.run_id)
                .await?
                .ok_or_else(|| anyhow!("no portfolio for {}", latest.record.run_id))?;
            let weights: BTreeMap<String, f64> = portfolio
                .positions
                .iter()
                .filter(|p| p.weight > 0.0)
                .map(|p| (p.code.clone(), p.weight))
                .collect();

            let report = latest_limit_report(&ctx).await?;
            let decision = evaluate_gate(ctx.cfg.gate.mode, Some(&report), &weights);

            println!("mode={}", decision.mode.as_str());
            println!("action={}", decision.action.as_str());
            println!("passed={}", decision.passed);
            println!("would_block={}", decision.would_block);
            println!("var_95={:.6}", decision.var_95);
            println!("var_99={:.6}", decision.var_99);
            println!("message={}", decision.message);
            for v in &decision.violations {
                println!(
                    "violation={} severity={} limit={:.4} actual={:.4}",
                    v.violation_type.as_str(),
                    v.severity.as_str(),
                    v.limit,
                    v.actual
                );
            }
            Ok(())
        }
        GateCmd::Stats { window } => {
            let events = orders_repo::fetch_gate_events(&ctx.pool, window).await?;
            let stats = GateStats::from_events(&events);
            println!("{}", serde_json::to_string_pretty(&stats)?);
            Ok(())
        }
    }
}
