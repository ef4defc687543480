//! The staged orchestrator: one `run()` drives S0→S7 for a target date.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result as AnyResult;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rand::Rng;
use serde_json::json;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{error, info, warn};

use kite_config::{GateMode, StrategyConfig};
use kite_db::{artifacts, market, orders as orders_repo, runs as runs_repo};
use kite_domain::{
    EngineError, Order, OrderStatus, PriceBar, QualitySnapshot, RankedStock, RunId, RunRecord,
    SignalSet, Stage, TargetPortfolio, UniverseSnapshot,
};
use kite_execution::{plan_orders, with_retry, Broker, PlanReport};
use kite_risk::{check_limits, evaluate_gate, GateDecision, GateEvent, LimitCheckInput, McConfig};
use kite_selection::{rank, screen, ScreenInput};
use kite_signals::{
    build_signal_set, event_score, flow_score, momentum_score, quality_score, stdev,
    technical_score, value_score, RecentEvent, EVENT_LOOKBACK_DAYS, TECHNICAL_WINDOW,
};

use crate::audit_log::AuditLog;

/// Bars fetched per code: enough for the 120-bar technical window plus the
/// return lookbacks that hang off the end of it.
const BAR_FETCH: i64 = (TECHNICAL_WINDOW as i64) + 10;

/// Average daily trading value (KRW) treated as fully liquid (score 1.0).
const LIQUIDITY_FULL_ADV: i64 = 1_000_000_000;

// ---------------------------------------------------------------------------
// Run config / result
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct RunConfig {
    pub date: NaiveDate,
    /// Total capital in KRW.
    pub capital: i64,
    pub dry_run: bool,
}

#[derive(Clone, Debug)]
pub struct StageOutcome {
    pub stage: Stage,
    pub status: &'static str,
    pub detail: String,
    pub artifact_count: i64,
}

#[derive(Clone, Debug)]
pub struct RunResult {
    pub run_id: RunId,
    pub date: NaiveDate,
    pub completed: Vec<Stage>,
    pub outcomes: Vec<StageOutcome>,
    /// None when the gate mode is off.
    pub gate_passed: Option<bool>,
    pub gate_would_block: Option<bool>,
    pub orders_planned: usize,
    pub audit_log_path: Option<PathBuf>,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct Orchestrator {
    pool: PgPool,
    cfg: StrategyConfig,
    config_hash: String,
    git_sha: String,
    broker: Arc<dyn Broker>,
    audit_dir: PathBuf,
    /// Guards against two concurrent runs minting or reusing one run_id.
    active_runs: Mutex<BTreeSet<String>>,
}

impl Orchestrator {
    pub fn new(
        pool: PgPool,
        cfg: StrategyConfig,
        config_hash: String,
        git_sha: String,
        broker: Arc<dyn Broker>,
        audit_dir: PathBuf,
    ) -> Self {
        Self {
            pool,
            cfg,
            config_hash,
            git_sha,
            broker,
            audit_dir,
            active_runs: Mutex::new(BTreeSet::new()),
        }
    }

    pub fn strategy(&self) -> &StrategyConfig {
        &self.cfg
    }

    /// Mint `run_{YYYYMMDDhhmmss}_{6hex}`.
    fn mint_run_id(&self) -> RunId {
        let suffix: String = {
            let mut rng = rand::thread_rng();
            (0..6)
                .map(|_| char::from_digit(rng.gen_range(0..16u32), 16).unwrap())
                .collect()
        };
        RunId::compose(Utc::now(), &suffix).expect("minted suffix is valid hex")
    }

    /// Execute the full pipeline for one date.
    pub async fn run(
        &self,
        run_cfg: RunConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunResult, EngineError> {
        let run_id = self.mint_run_id();

        // In-process duplicate guard; the DB insert is the cross-process one.
        if !self.active_runs.lock().insert(run_id.as_str().to_string()) {
            return Err(EngineError::DuplicateRun {
                run_id: run_id.as_str().to_string(),
            });
        }
        let result = self.run_inner(&run_id, run_cfg, shutdown).await;
        self.active_runs.lock().remove(run_id.as_str());
        result
    }

    async fn run_inner(
        &self,
        run_id: &RunId,
        run_cfg: RunConfig,
        shutdown: watch::Receiver<bool>,
    ) -> Result<RunResult, EngineError> {
        let record = RunRecord {
            run_id: run_id.clone(),
            date: run_cfg.date,
            git_sha: self.git_sha.clone(),
            feature_version: self.cfg.feature_version.0.clone(),
            capital: run_cfg.capital,
            dry_run: run_cfg.dry_run,
            started_at: Utc::now(),
        };
        runs_repo::insert_run(&self.pool, &record, &self.config_hash)
            .await
            .map_err(|e| {
                if e.to_string().contains("already exists") {
                    EngineError::DuplicateRun {
                        run_id: run_id.as_str().to_string(),
                    }
                } else {
                    stage_err(Stage::S0Quality, &e.to_string())
                }
            })?;

        info!(run_id = %run_id, date = %run_cfg.date, dry_run = run_cfg.dry_run, "run started");

        let mut audit = match AuditLog::create(&self.audit_dir, run_id.as_str(), true) {
            Ok(log) => Some(log),
            Err(e) => {
                warn!(error = %e, "audit log unavailable; continuing without");
                None
            }
        };
        if let Some(log) = audit.as_mut() {
            let _ = log.append(
                "run_start",
                json!({
                    "date": run_cfg.date,
                    "capital": run_cfg.capital,
                    "dry_run": run_cfg.dry_run,
                    "config_hash": self.config_hash,
                    "git_sha": self.git_sha,
                }),
            );
        }

        let mut result = RunResult {
            run_id: run_id.clone(),
            date: run_cfg.date,
            completed: Vec::new(),
            outcomes: Vec::new(),
            gate_passed: None,
            gate_would_block: None,
            orders_planned: 0,
            audit_log_path: audit.as_ref().map(|l| l.path().to_path_buf()),
        };

        let run_status = self
            .run_stages(run_id, &run_cfg, &shutdown, &mut audit, &mut result)
            .await;

        let status = if run_status.is_ok() {
            runs_repo::RUN_COMPLETED
        } else {
            runs_repo::RUN_FAILED
        };
        if let Err(e) = runs_repo::finish_run(&self.pool, run_id, status).await {
            warn!(error = %e, "finish_run write failed");
        }
        if let Some(log) = audit.as_mut() {
            let _ = log.append(
                "run_finish",
                json!({
                    "status": status,
                    "completed_stages": result.completed.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                }),
            );
        }
        info!(run_id = %run_id, status, "run finished");

        run_status.map(|_| result)
    }

    async fn run_stages(
        &self,
        run_id: &RunId,
        run_cfg: &RunConfig,
        shutdown: &watch::Receiver<bool>,
        audit: &mut Option<AuditLog>,
        result: &mut RunResult,
    ) -> Result<(), EngineError> {
        // S0 — quality gate.
        let quality = self
            .execute_stage(run_id, Stage::S0Quality, shutdown, audit, result, async {
                self.stage_quality(run_cfg.date, run_cfg.dry_run).await
            })
            .await?;

        // S1 — universe.
        let universe = self
            .execute_stage(run_id, Stage::S1Universe, shutdown, audit, result, async {
                self.stage_universe(run_id, run_cfg.date, &quality).await
            })
            .await?;

        // S2 — signals.
        let signal_sets = self
            .execute_stage(run_id, Stage::S2Signals, shutdown, audit, result, async {
                self.stage_signals(run_id, run_cfg.date, &universe).await
            })
            .await?;

        // S3 — screener.
        let survivors = self
            .execute_stage(run_id, Stage::S3Screener, shutdown, audit, result, async {
                self.stage_screen(run_id, run_cfg.date, &signal_sets).await
            })
            .await?;

        // S4 — ranker.
        let ranked = self
            .execute_stage(run_id, Stage::S4Ranker, shutdown, audit, result, async {
                self.stage_rank(run_id, run_cfg.date, &signal_sets, &survivors)
                    .await
            })
            .await?;

        // S5 — portfolio.
        let portfolio = self
            .execute_stage(run_id, Stage::S5Portfolio, shutdown, audit, result, async {
                self.stage_portfolio(run_id, run_cfg, &ranked).await
            })
            .await?;

        // S6 — execution planning.
        let plan = self
            .execute_stage(run_id, Stage::S6Planning, shutdown, audit, result, async {
                self.stage_plan(run_id, &portfolio).await
            })
            .await?;
        result.orders_planned = plan.orders.len();

        // S6.5 — risk gate + submission.
        let decision = self
            .execute_stage(run_id, Stage::S6RiskGate, shutdown, audit, result, async {
                self.stage_gate(run_id, run_cfg, &portfolio, &plan).await
            })
            .await?;
        if let Some(d) = &decision {
            result.gate_passed = Some(d.passed);
            result.gate_would_block = Some(d.would_block);
        }

        // S7 — audit, always advisory.
        let summary = audit_payload(result);
        let audit_outcome = self
            .execute_stage(run_id, Stage::S7Audit, shutdown, audit, result, async {
                self.stage_audit(run_cfg, &portfolio, &decision, summary).await
            })
            .await;
        if let Err(e) = audit_outcome {
            warn!(error = %e, "audit stage failed (advisory)");
        }

        Ok(())
    }

    /// Wrap one stage: cancellation check, stage log rows, audit events,
    /// advisory handling.
    async fn execute_stage<T: StageArtifacts>(
        &self,
        run_id: &RunId,
        stage: Stage,
        shutdown: &watch::Receiver<bool>,
        audit: &mut Option<AuditLog>,
        result: &mut RunResult,
        body: impl std::future::Future<Output = Result<T, EngineError>>,
    ) -> Result<T, EngineError> {
        if *shutdown.borrow() {
            return Err(EngineError::Canceled);
        }

        if let Err(e) = runs_repo::stage_started(&self.pool, run_id, stage).await {
            warn!(stage = stage.as_str(), error = %e, "stage log write failed");
        }
        if let Some(log) = audit.as_mut() {
            let _ = log.append("stage_start", json!({ "stage": stage.as_str() }));
        }

        match body.await {
            Ok(artifact) => {
                let count = artifact.artifact_count();
                let _ = runs_repo::stage_finished(
                    &self.pool, run_id, stage, "COMPLETED", "", count,
                )
                .await;
                if let Some(log) = audit.as_mut() {
                    let _ = log.append(
                        "stage_complete",
                        json!({ "stage": stage.as_str(), "artifacts": count }),
                    );
                }
                info!(run_id = %run_id, stage = stage.as_str(), artifacts = count, "stage complete");
                result.completed.push(stage);
                result.outcomes.push(StageOutcome {
                    stage,
                    status: "COMPLETED",
                    detail: String::new(),
                    artifact_count: count,
                });
                Ok(artifact)
            }
            Err(e) => {
                let _ = runs_repo::stage_finished(
                    &self.pool,
                    run_id,
                    stage,
                    "FAILED",
                    e.kind(),
                    0,
                )
                .await;
                if let Some(log) = audit.as_mut() {
                    let _ = log.append(
                        "stage_failed",
                        json!({ "stage": stage.as_str(), "kind": e.kind(), "error": e.to_string() }),
                    );
                }
                error!(run_id = %run_id, stage = stage.as_str(), kind = e.kind(), error = %e, "stage failed");
                result.outcomes.push(StageOutcome {
                    stage,
                    status: "FAILED",
                    detail: e.to_string(),
                    artifact_count: 0,
                });
                // The stage error keeps its own kind (DATA_QUALITY_FAIL,
                // BROKER_UNAVAILABLE, ...); structural failures already
                // arrive as StageFailed from the stage bodies.
                Err(e)
            }
        }
    }

    // -----------------------------------------------------------------------
    // S0 — quality gate
    // -----------------------------------------------------------------------

    async fn stage_quality(
        &self,
        date: NaiveDate,
        dry_run: bool,
    ) -> Result<QualitySnapshot, EngineError> {
        let counts = market::coverage_counts(&self.pool, date)
            .await
            .map_err(|e| stage_err(Stage::S0Quality, &e.to_string()))?;

        let mut coverage = BTreeMap::new();
        coverage.insert("prices".to_string(), counts.price_coverage());
        coverage.insert("flows".to_string(), counts.flow_coverage());
        coverage.insert("fundamentals".to_string(), counts.fundamentals_coverage());
        let composite = coverage.values().sum::<f64>() / coverage.len() as f64;

        let minimums = self.cfg.quality.minimums();
        let mut snapshot = QualitySnapshot {
            date,
            coverage,
            composite,
            passed: true,
        };
        let failing = snapshot.failing_kinds(&minimums);
        snapshot.passed = failing.is_empty();

        artifacts::upsert_quality_snapshot(&self.pool, &snapshot)
            .await
            .map_err(|e| stage_err(Stage::S0Quality, &e.to_string()))?;

        if !snapshot.passed {
            if dry_run && self.cfg.quality.allow_low_quality {
                warn!(?failing, "quality gate failed; passing through (dry run)");
            } else {
                return Err(EngineError::DataQualityFail {
                    detail: format!("coverage below minimum for: {}", failing.join(", ")),
                });
            }
        }
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // S1 — universe
    // -----------------------------------------------------------------------

    async fn stage_universe(
        &self,
        run_id: &RunId,
        date: NaiveDate,
        _quality: &QualitySnapshot,
    ) -> Result<UniverseSnapshot, EngineError> {
        let stocks = market::fetch_stocks(&self.pool)
            .await
            .map_err(|e| stage_err(Stage::S1Universe, &e.to_string()))?;

        let rules = &self.cfg.universe;
        let mut codes = BTreeSet::new();
        for stock in &stocks {
            if !stock.is_tradable() {
                continue;
            }
            if stock.listed_days(date) < rules.min_listing_days {
                continue;
            }
            let bars = market::fetch_bars_window(&self.pool, &stock.code, date, 20)
                .await
                .map_err(|e| stage_err(Stage::S1Universe, &e.to_string()))?;
            if bars.len() < 20 {
                continue;
            }
            let avg_volume = bars.iter().map(|b| b.volume).sum::<i64>() / bars.len() as i64;
            let avg_value = average_trading_value(&bars);
            if rules.min_avg_volume > 0 && avg_volume < rules.min_avg_volume {
                continue;
            }
            if rules.min_avg_trading_value > 0 && avg_value < rules.min_avg_trading_value {
                continue;
            }
            codes.insert(stock.code.clone());
        }

        let snapshot = UniverseSnapshot { date, codes };
        if snapshot.is_empty() {
            return Err(stage_err(Stage::S1Universe, "universe is empty"));
        }
        artifacts::upsert_universe(&self.pool, run_id, &snapshot)
            .await
            .map_err(|e| stage_err(Stage::S1Universe, &e.to_string()))?;
        Ok(snapshot)
    }

    // -----------------------------------------------------------------------
    // S2 — signals
    // -----------------------------------------------------------------------

    async fn stage_signals(
        &self,
        run_id: &RunId,
        date: NaiveDate,
        universe: &UniverseSnapshot,
    ) -> Result<Vec<SignalSet>, EngineError> {
        let weights = self.cfg.weights.as_array();
        let mut sets = Vec::with_capacity(universe.len());
        let mut dropped = 0usize;

        for code in &universe.codes {
            match self.signals_for(code, date, weights).await {
                Ok(set) => sets.push(set),
                Err(e) => {
                    // Per-code failure: drop the code, keep the stage.
                    warn!(code = %code, error = %e, "signal computation failed; dropping code");
                    dropped += 1;
                }
            }
        }
        if sets.is_empty() {
            return Err(stage_err(
                Stage::S2Signals,
                &format!("no signal sets computed ({dropped} codes dropped)"),
            ));
        }

        artifacts::upsert_signal_sets(&self.pool, run_id, &sets)
            .await
            .map_err(|e| stage_err(Stage::S2Signals, &e.to_string()))?;
        Ok(sets)
    }

    async fn signals_for(
        &self,
        code: &str,
        date: NaiveDate,
        weights: [f64; 6],
    ) -> AnyResult<SignalSet> {
        let bars = market::fetch_bars_window(&self.pool, code, date, BAR_FETCH).await?;
        let flows = market::fetch_flows_window(&self.pool, code, date, 20).await?;
        let fundamentals = market::fetch_latest_fundamentals(&self.pool, code).await?;

        let events = kite_db::forecast::fetch_events_for(&self.pool, code).await?;
        let recent: Vec<RecentEvent> = events
            .iter()
            .filter(|e| {
                let days = (date - e.event_date).num_days();
                (0..=EVENT_LOOKBACK_DAYS).contains(&days)
            })
            .map(|e| RecentEvent {
                days_ago: (date - e.event_date).num_days(),
                expected_ret_5d: None,
                day_return: e.day_return,
            })
            .collect();

        let value = fundamentals.as_ref().and_then(value_score);
        let quality = fundamentals.as_ref().and_then(quality_score);
        let factors = [
            momentum_score(&bars),
            technical_score(&bars),
            value,
            quality,
            flow_score(&flows, &bars),
            event_score(&recent),
        ];
        Ok(build_signal_set(date, code, factors, weights))
    }

    // -----------------------------------------------------------------------
    // S3 — screener
    // -----------------------------------------------------------------------

    async fn stage_screen(
        &self,
        run_id: &RunId,
        date: NaiveDate,
        signal_sets: &[SignalSet],
    ) -> Result<Vec<String>, EngineError> {
        let mut inputs = Vec::with_capacity(signal_sets.len());
        for set in signal_sets {
            let bars = market::fetch_bars_window(&self.pool, &set.code, date, 30)
                .await
                .map_err(|e| stage_err(Stage::S3Screener, &e.to_string()))?;
            let fundamentals = market::fetch_latest_fundamentals(&self.pool, &set.code)
                .await
                .map_err(|e| stage_err(Stage::S3Screener, &e.to_string()))?;

            inputs.push(ScreenInput {
                code: set.code.clone(),
                per: fundamentals.as_ref().and_then(|f| f.per),
                pbr: fundamentals.as_ref().and_then(|f| f.pbr),
                roe: fundamentals.as_ref().and_then(|f| f.roe),
                day1_return: trailing_return(&bars, 1),
                day5_return: trailing_return(&bars, 5),
                vol_20d: stdev(&bars, 20),
            });
        }

        let outcome = screen(&inputs, &self.cfg.screener);
        let rejections: BTreeMap<String, String> = outcome
            .rejections
            .iter()
            .map(|(code, p)| (code.clone(), p.as_str().to_string()))
            .collect();
        artifacts::upsert_screen(&self.pool, run_id, date, &outcome.survivors, &rejections)
            .await
            .map_err(|e| stage_err(Stage::S3Screener, &e.to_string()))?;

        if outcome.survivors.is_empty() {
            return Err(stage_err(Stage::S3Screener, "screener rejected every code"));
        }
        Ok(outcome.survivors)
    }

    // -----------------------------------------------------------------------
    // S4 — ranker
    // -----------------------------------------------------------------------

    async fn stage_rank(
        &self,
        run_id: &RunId,
        date: NaiveDate,
        signal_sets: &[SignalSet],
        survivors: &[String],
    ) -> Result<Vec<RankedStock>, EngineError> {
        let surviving: Vec<SignalSet> = signal_sets
            .iter()
            .filter(|s| survivors.iter().any(|code| code == &s.code))
            .cloned()
            .collect();

        let ranked = rank(date, surviving);
        if ranked.is_empty() {
            return Err(stage_err(Stage::S4Ranker, "nothing to rank"));
        }
        artifacts::upsert_rankings(&self.pool, run_id, &ranked)
            .await
            .map_err(|e| stage_err(Stage::S4Ranker, &e.to_string()))?;
        Ok(ranked)
    }

    // -----------------------------------------------------------------------
    // S5 — portfolio
    // -----------------------------------------------------------------------

    async fn stage_portfolio(
        &self,
        run_id: &RunId,
        run_cfg: &RunConfig,
        ranked: &[RankedStock],
    ) -> Result<TargetPortfolio, EngineError> {
        let sectors = self
            .sector_map()
            .await
            .map_err(|e| stage_err(Stage::S5Portfolio, &e.to_string()))?;

        let previous = artifacts::fetch_latest_portfolio_before(&self.pool, run_cfg.date)
            .await
            .map_err(|e| stage_err(Stage::S5Portfolio, &e.to_string()))?
            .map(|p| {
                p.positions
                    .iter()
                    .filter(|pos| pos.weight > 0.0)
                    .map(|pos| (pos.code.clone(), pos.weight))
                    .collect::<BTreeMap<String, f64>>()
            })
            .unwrap_or_default();

        let portfolio = kite_portfolio::construct(
            kite_portfolio::ConstructionInput {
                date: run_cfg.date,
                ranked,
                sectors: &sectors,
                previous: &previous,
                capital: run_cfg.capital,
            },
            &self.cfg.portfolio,
        )
        .map_err(|e| stage_err(Stage::S5Portfolio, &e.to_string()))?;

        artifacts::upsert_portfolio(&self.pool, run_id, &portfolio)
            .await
            .map_err(|e| stage_err(Stage::S5Portfolio, &e.to_string()))?;
        Ok(portfolio)
    }

    // -----------------------------------------------------------------------
    // S6 — execution planning
    // -----------------------------------------------------------------------

    async fn stage_plan(
        &self,
        run_id: &RunId,
        portfolio: &TargetPortfolio,
    ) -> Result<PlanReport, EngineError> {
        let holdings = self.broker_holdings().await?;

        let plan = plan_orders(portfolio, &holdings, self.broker.as_ref(), &self.cfg.execution)
            .await
            .map_err(|e| stage_err(Stage::S6Planning, &e.to_string()))?;

        let orders = planned_to_orders(run_id, &plan, "");
        orders_repo::upsert_orders(&self.pool, run_id, &orders)
            .await
            .map_err(|e| stage_err(Stage::S6Planning, &e.to_string()))?;
        Ok(plan)
    }

    async fn broker_holdings(&self) -> Result<BTreeMap<String, i64>, EngineError> {
        Ok(
            with_retry("holdings", 3, Duration::from_millis(300), || {
                self.broker.holdings()
            })
            .await
            .map_err(|e| EngineError::BrokerUnavailable {
                detail: e.to_string(),
            })?
            .into_iter()
            .map(|h| (h.code, h.quantity))
            .collect(),
        )
    }

    /// Mark every order of a persisted plan as canceled.
    async fn cancel_planned(&self, run_id: &RunId, plan: &PlanReport, prefix: &str) {
        for i in 0..plan.orders.len() {
            let _ = orders_repo::update_order_status(
                &self.pool,
                &order_id_for(run_id, prefix, i),
                OrderStatus::Canceled,
                0,
                0,
            )
            .await;
        }
    }

    // -----------------------------------------------------------------------
    // S6.5 — risk gate + submission
    // -----------------------------------------------------------------------

    async fn stage_gate(
        &self,
        run_id: &RunId,
        run_cfg: &RunConfig,
        portfolio: &TargetPortfolio,
        plan: &PlanReport,
    ) -> Result<Option<GateDecision>, EngineError> {
        let mode = self.cfg.gate.mode;

        let weights: BTreeMap<String, f64> = portfolio
            .positions
            .iter()
            .filter(|p| p.weight > 0.0)
            .map(|p| (p.code.clone(), p.weight))
            .collect();

        let decision = if mode == GateMode::Off {
            evaluate_gate(mode, None, &weights)
        } else {
            match self.limit_report(run_cfg.date, &weights).await {
                Ok(report) => evaluate_gate(mode, Some(&report), &weights),
                Err(e) if mode == GateMode::Shadow => {
                    // Shadow never fails a run, engine errors included.
                    warn!(error = %e, "risk engine failed in shadow mode; passing");
                    evaluate_gate(GateMode::Off, None, &weights)
                }
                Err(e) => {
                    // Enforce fails closed: treat an engine error as a block.
                    let mut d = evaluate_gate(GateMode::Off, None, &weights);
                    d.mode = GateMode::Enforce;
                    d.action = kite_risk::GateAction::Block;
                    d.passed = false;
                    d.would_block = true;
                    d.message = format!("engine error, failing closed: {e}");
                    d
                }
            }
        };

        let event = GateEvent::from_decision(run_id.as_str(), &decision, Utc::now());
        if let Err(e) = orders_repo::insert_gate_event(&self.pool, &event).await {
            warn!(error = %e, "gate event write failed");
        }

        // The plan that actually goes to the broker: the original on PASS,
        // a re-plan against the reduced portfolio on REDUCE, nothing on BLOCK.
        let mut effective: Option<(PlanReport, &'static str)> = Some((plan.clone(), ""));

        match decision.action {
            kite_risk::GateAction::Block => {
                self.cancel_planned(run_id, plan, "").await;
                warn!(run_id = %run_id, blocked = ?decision.blocked_codes, "gate blocked the run's orders");
                effective = None;
            }
            kite_risk::GateAction::Reduce => {
                info!(run_id = %run_id, "gate reduced the target portfolio");
                if let Some(adjusted) = &decision.adjusted_weights {
                    let reduced = apply_adjusted_weights(portfolio, adjusted, run_cfg.capital);
                    artifacts::upsert_portfolio(&self.pool, run_id, &reduced)
                        .await
                        .map_err(|e| stage_err(Stage::S6RiskGate, &e.to_string()))?;

                    // Supersede the original orders with a re-plan.
                    self.cancel_planned(run_id, plan, "").await;
                    let holdings = self.broker_holdings().await?;
                    let replanned = plan_orders(
                        &reduced,
                        &holdings,
                        self.broker.as_ref(),
                        &self.cfg.execution,
                    )
                    .await
                    .map_err(|e| stage_err(Stage::S6RiskGate, &e.to_string()))?;
                    let orders = planned_to_orders(run_id, &replanned, "r");
                    orders_repo::upsert_orders(&self.pool, run_id, &orders)
                        .await
                        .map_err(|e| stage_err(Stage::S6RiskGate, &e.to_string()))?;
                    effective = Some((replanned, "r"));
                }
            }
            kite_risk::GateAction::Pass => {}
        }

        // Submission: only a passing, non-dry run reaches the broker.
        if decision.passed && !run_cfg.dry_run {
            if let Some((plan, prefix)) = &effective {
                self.submit_orders(run_id, plan, prefix).await;
            }
        }

        Ok(Some(decision))
    }

    async fn limit_report(
        &self,
        date: NaiveDate,
        weights: &BTreeMap<String, f64>,
    ) -> Result<kite_risk::LimitReport, kite_risk::McError> {
        let mc_cfg = McConfig::from_defaults(&self.cfg.monte_carlo)?;

        let mut returns = BTreeMap::new();
        let mut liquidity = BTreeMap::new();
        for code in weights.keys() {
            let bars = market::fetch_bars_window(
                &self.pool,
                code,
                date,
                self.cfg.monte_carlo.lookback_days as i64 + 1,
            )
            .await
            .map_err(|e| kite_risk::McError::InvalidConfig(e.to_string()))?;
            returns.insert(code.clone(), daily_returns(&bars));
            liquidity.insert(code.clone(), liquidity_score(&bars));
        }
        let sectors = self
            .sector_map()
            .await
            .map_err(|e| kite_risk::McError::InvalidConfig(e.to_string()))?;

        check_limits(
            &LimitCheckInput {
                weights,
                sectors: &sectors,
                returns: &returns,
                liquidity: &liquidity,
            },
            &self.cfg.gate,
            &mc_cfg,
        )
    }

    async fn submit_orders(&self, run_id: &RunId, plan: &PlanReport, prefix: &str) {
        for (i, planned) in plan.orders.iter().enumerate() {
            let order_id = order_id_for(run_id, prefix, i);
            let request = kite_execution::OrderRequest {
                code: planned.code.clone(),
                side: planned.side,
                order_type: planned.order_type,
                quantity: planned.quantity,
                price: planned.price,
            };
            let outcome = with_retry("place_order", 3, Duration::from_millis(300), || {
                self.broker.place_order(&request)
            })
            .await;
            let status = match outcome {
                Ok(ack) => {
                    info!(order_id = %order_id, broker_order = %ack.order_id, "order submitted");
                    OrderStatus::Submitted
                }
                Err(e) => {
                    error!(order_id = %order_id, error = %e, "order submission failed");
                    OrderStatus::Rejected
                }
            };
            let _ = orders_repo::update_order_status(&self.pool, &order_id, status, 0, 0).await;
        }
    }

    // -----------------------------------------------------------------------
    // S7 — audit (advisory)
    // -----------------------------------------------------------------------

    async fn stage_audit(
        &self,
        run_cfg: &RunConfig,
        portfolio: &TargetPortfolio,
        decision: &Option<GateDecision>,
        summary: serde_json::Value,
    ) -> Result<i64, EngineError> {
        let weights: BTreeMap<String, f64> = portfolio
            .positions
            .iter()
            .filter(|p| p.weight > 0.0)
            .map(|p| (p.code.clone(), p.weight))
            .collect();

        // Post-run risk attribution; reuse the gate's numbers when it ran.
        let (var_95, var_99) = match decision {
            Some(d) if d.mode != GateMode::Off => (d.var_95, d.var_99),
            _ => match self.limit_report(run_cfg.date, &weights).await {
                Ok(report) => (report.var_95, report.var_99),
                Err(e) => {
                    warn!(error = %e, "audit risk report unavailable");
                    (0.0, 0.0)
                }
            },
        };

        let sectors = self
            .sector_map()
            .await
            .map_err(|e| stage_err(Stage::S7Audit, &e.to_string()))?;
        let stress = kite_risk::run_stress(&weights, &sectors, &kite_risk::standard_scenarios());
        for s in &stress {
            info!(scenario = s.name, portfolio_return = s.portfolio_return, "stress");
        }

        info!(
            invested = portfolio.invested_weight(),
            cash = portfolio.cash_weight,
            var_95,
            var_99,
            summary = %summary,
            "run audit"
        );
        Ok(1 + stress.len() as i64)
    }

    async fn sector_map(&self) -> AnyResult<BTreeMap<String, String>> {
        Ok(market::fetch_stocks(&self.pool)
            .await?
            .into_iter()
            .map(|s| (s.code, s.sector))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Artifact counting for the stage log, per artifact type.
trait StageArtifacts {
    fn artifact_count(&self) -> i64;
}

impl StageArtifacts for QualitySnapshot {
    fn artifact_count(&self) -> i64 {
        1
    }
}
impl StageArtifacts for UniverseSnapshot {
    fn artifact_count(&self) -> i64 {
        self.len() as i64
    }
}
impl StageArtifacts for Vec<SignalSet> {
    fn artifact_count(&self) -> i64 {
        self.len() as i64
    }
}
impl StageArtifacts for Vec<String> {
    fn artifact_count(&self) -> i64 {
        self.len() as i64
    }
}
impl StageArtifacts for Vec<RankedStock> {
    fn artifact_count(&self) -> i64 {
        self.len() as i64
    }
}
impl StageArtifacts for TargetPortfolio {
    fn artifact_count(&self) -> i64 {
        self.positions.len() as i64
    }
}
impl StageArtifacts for PlanReport {
    fn artifact_count(&self) -> i64 {
        self.orders.len() as i64
    }
}
impl StageArtifacts for Option<GateDecision> {
    fn artifact_count(&self) -> i64 {
        1
    }
}
impl StageArtifacts for i64 {
    fn artifact_count(&self) -> i64 {
        *self
    }
}

fn stage_err(stage: Stage, detail: &str) -> EngineError {
    EngineError::StageFailed {
        stage,
        detail: detail.to_string(),
    }
}

fn audit_payload(result: &RunResult) -> serde_json::Value {
    json!({
        "run_id": result.run_id.as_str(),
        "completed": result.completed.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        "orders_planned": result.orders_planned,
        "gate_passed": result.gate_passed,
    })
}

/// Close-to-close return over the trailing `days` bars.
fn trailing_return(bars: &[PriceBar], days: usize) -> Option<f64> {
    if bars.len() < days + 1 {
        return None;
    }
    let last = bars.last()?.close;
    let base = bars[bars.len() - 1 - days].close;
    if base <= 0 {
        return None;
    }
    Some((last - base) as f64 / base as f64)
}

fn daily_returns(bars: &[PriceBar]) -> Vec<f64> {
    bars.windows(2)
        .filter_map(|pair| pair[1].return_from(&pair[0]))
        .collect()
}

fn average_trading_value(bars: &[PriceBar]) -> i64 {
    if bars.is_empty() {
        return 0;
    }
    bars.iter()
        .map(|b| b.value.unwrap_or(b.close * b.volume))
        .sum::<i64>()
        / bars.len() as i64
}

/// Liquidity score in [0, 1] from average daily trading value.
fn liquidity_score(bars: &[PriceBar]) -> f64 {
    (average_trading_value(bars) as f64 / LIQUIDITY_FULL_ADV as f64).min(1.0)
}

/// Run-scoped order id; `prefix` distinguishes a gate re-plan ("r") from
/// the original plan ("").
fn order_id_for(run_id: &RunId, prefix: &str, index: usize) -> String {
    format!("{}-{}{:03}", run_id.as_str(), prefix, index)
}

fn planned_to_orders(run_id: &RunId, plan: &PlanReport, prefix: &str) -> Vec<Order> {
    let now = Utc::now();
    plan.orders
        .iter()
        .enumerate()
        .map(|(i, p)| Order {
            order_id: order_id_for(run_id, prefix, i),
            code: p.code.clone(),
            side: p.side,
            quantity: p.quantity,
            price: p.price,
            order_type: p.order_type,
            status: OrderStatus::Pending,
            filled_quantity: 0,
            filled_price: 0,
            created_at: now,
            updated_at: now,
        })
        .collect()
}

/// Rebuild a portfolio from gate-adjusted weights, keeping actions and
/// reasons, resizing target values.
fn apply_adjusted_weights(
    portfolio: &TargetPortfolio,
    adjusted: &BTreeMap<String, f64>,
    capital: i64,
) -> TargetPortfolio {
    let mut out = portfolio.clone();
    for position in out.positions.iter_mut() {
        if let Some(w) = adjusted.get(&position.code) {
            position.weight = *w;
            position.target_value = (*w * capital as f64).round() as i64;
        }
    }
    out.cash_weight = 1.0 - out.invested_weight();
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use kite_domain::{PositionAction, TargetPosition};

    fn bar(date: &str, close: i64, volume: i64) -> PriceBar {
        PriceBar {
            code: "005930".into(),
            date: date.parse().unwrap(),
            open: close,
            high: close + 10,
            low: close - 10,
            close,
            volume,
            value: None,
        }
    }

    #[test]
    fn trailing_return_needs_days_plus_one() {
        let bars = vec![bar("2025-07-01", 100, 1), bar("2025-07-02", 103, 1)];
        assert!((trailing_return(&bars, 1).unwrap() - 0.03).abs() < 1e-12);
        assert!(trailing_return(&bars, 5).is_none());
    }

    #[test]
    fn liquidity_score_caps_at_one() {
        let thin = vec![bar("2025-07-01", 1_000, 100)];
        assert!(liquidity_score(&thin) < 0.01);
        let thick = vec![bar("2025-07-01", 100_000, 1_000_000)];
        assert!((liquidity_score(&thick) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn average_trading_value_prefers_explicit_value() {
        let mut b = bar("2025-07-01", 100, 10);
        b.value = Some(5_000);
        assert_eq!(average_trading_value(&[b]), 5_000);
        let b2 = bar("2025-07-01", 100, 10);
        assert_eq!(average_trading_value(&[b2]), 1_000);
    }

    #[test]
    fn adjusted_weights_resize_values_and_cash() {
        let portfolio = TargetPortfolio {
            date: "2025-07-01".parse().unwrap(),
            positions: vec![
                TargetPosition {
                    code: "BIG".into(),
                    weight: 0.20,
                    target_value: 20_000_000,
                    action: PositionAction::Buy,
                    reason: "entered ranking".into(),
                },
                TargetPosition {
                    code: "SMALL".into(),
                    weight: 0.05,
                    target_value: 5_000_000,
                    action: PositionAction::Buy,
                    reason: "entered ranking".into(),
                },
            ],
            cash_weight: 0.75,
        };
        let adjusted: BTreeMap<String, f64> =
            [("BIG".to_string(), 0.1425), ("SMALL".to_string(), 0.05)].into();
        let reduced = apply_adjusted_weights(&portfolio, &adjusted, 100_000_000);
        assert_eq!(reduced.positions[0].target_value, 14_250_000);
        assert!((reduced.cash_weight - 0.8075).abs() < 1e-9);
        assert!(reduced.weights_balanced());
    }

    #[test]
    fn order_ids_are_run_scoped_and_stable() {
        let run_id = RunId::parse("run_20250701093000_a3f01b").unwrap();
        assert_eq!(order_id_for(&run_id, "", 0), "run_20250701093000_a3f01b-000");
        assert_eq!(
            order_id_for(&run_id, "r", 12),
            "run_20250701093000_a3f01b-r012"
        );
    }

    #[test]
    fn daily_returns_skip_zero_bases() {
        let mut bars = vec![
            bar("2025-07-01", 100, 1),
            bar("2025-07-02", 110, 1),
            bar("2025-07-03", 121, 1),
        ];
        bars[1].close = 110;
        let rets = daily_returns(&bars);
        assert_eq!(rets.len(), 2);
        assert!((rets[0] - 0.10).abs() < 1e-12);
    }
}
