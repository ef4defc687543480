//! `kite audit {montecarlo|risk-report}`.

use std::collections::BTreeMap;

use anyhow::{anyhow, Result};
use chrono::Utc;
use clap::Subcommand;

use kite_db::{artifacts, market, runs};
use kite_risk::{check_limits, simulate, LimitCheckInput, McConfig};

use super::{context, CliContext};

#[derive(Subcommand)]
pub enum AuditCmd {
    /// Monte Carlo over one code's return history.
    Montecarlo {
        #[arg(long)]
        code: String,

        /// 0 = entropy; non-zero reproduces exactly.
        #[arg(long)]
        seed: Option<u64>,

        #[arg(long)]
        simulations: Option<u32>,
    },
    /// Limit check against the latest target portfolio.
    RiskReport,
}

pub async fn run(cmd: AuditCmd, config_paths: &[String]) -> Result<()> {
    let ctx = context(config_paths).await?;
    match cmd {
        AuditCmd::Montecarlo {
            code,
            seed,
            simulations,
        } => {
            let mut mc_cfg = McConfig::from_defaults(&ctx.cfg.monte_carlo)?;
            if let Some(seed) = seed {
                mc_cfg.seed = seed;
            }
            if let Some(n) = simulations {
                mc_cfg.num_simulations = n;
            }

            let date = Utc::now().date_naive();
            let bars = market::fetch_bars_window(
                &ctx.pool,
                &code,
                date,
                mc_cfg.lookback_days as i64 + 1,
            )
            .await?;
            let returns: Vec<f64> = bars
                .windows(2)
                .filter_map(|pair| pair[1].return_from(&pair[0]))
                .collect();

            let result = simulate(&mc_cfg, &returns)?;
            println!("code={code}");
            println!("samples={}", result.input_samples);
            println!("simulations={}", result.num_simulations);
            println!("seed_used={}", result.seed_used);
            println!("mean={:.6}", result.mean);
            println!("std={:.6}", result.std);
            for (c, v) in &result.var {
                println!("var_{:02}={:.6}", (c * 100.0) as u32, v);
            }
            for (c, v) in &result.cvar {
                println!("cvar_{:02}={:.6}", (c * 100.0) as u32, v);
            }
            for (p, v) in &result.percentiles {
                println!("p{p:02}={v:.6}");
            }
            Ok(())
        }
        AuditCmd::RiskReport => {
            let report = latest_limit_report(&ctx).await?;
            println!("var_95={:.6}", report.var_95);
            println!("var_99={:.6}", report.var_99);
            println!("passed={}", report.passed());
            for v in &report.violations {
                println!(
                    "violation={} severity={} limit={:.4} actual={:.4} codes={}",
                    v.violation_type.as_str(),
                    v.severity.as_str(),
                    v.limit,
                    v.actual,
                    v.codes.join(",")
                );
            }
            Ok(())
        }
    }
}

/// Limit report for the latest run's portfolio, shared with `gate test`.
pub async fn latest_limit_report(ctx: &CliContext) -> Result<kite_risk::LimitReport> {
    let latest = runs::fetch_recent_runs(&ctx.pool, 1)
        .await?
        .into_iter()
        .next()
        .ok_or_else(|| anyhow!("no runs yet"))?;
    let run_id = latest.record.run_id;
    let portfolio = artifacts::fetch_portfolio(&ctx.pool, &run_id)
        .await?
        .ok_or_else(|| anyhow!("no portfolio for {run_id}"))?;

    let weights: BTreeMap<String, f64> = portfolio
        .positions
        .iter()
        .filter(|p| p.weight > 0.0)
        .map(|p| (p.code.clone(), p.weight))
        .collect();

    let mc_cfg = McConfig::from_defaults(&ctx.cfg.monte_carlo)?;
    let mut returns = BTreeMap::new();
    let mut liquidity = BTreeMap::new();
    for code in weights.keys() {
        let bars = market::fetch_bars_window(
            &ctx.pool,
            code,
            portfolio.date,
            mc_cfg.lookback_days as i64 + 1,
        )
        .await?;
        let rets: Vec<f64> = bars
            .windows(2)
            .filter_map(|pair| pair[1].return_from(&pair[0]))
            .collect();
        let adv = if bars.is_empty() {
            0
        } else {
            bars.iter()
                .map(|b| b.value.unwrap_or(b.close * b.volume))
                .sum::<i64>()
                / bars.len() as i64
        };
        returns.insert(code.clone(), rets);
        liquidity.insert(code.clone(), (adv as f64 / 1_000_000_000.0).min(1.0));
    }

    let sectors: BTreeMap<String, String> = market::fetch_stocks(&ctx.pool)
        .await?
        .into_iter()
        .map(|s| (s.code, s.sector))
        .collect();

    Ok(check_limits(
        &LimitCheckInput {
            weights: &weights,
            sectors: &sectors,
            returns: &returns,
            liquidity: &liquidity,
        },
        &ctx.cfg.gate,
        &mc_cfg,
    )?)
}
