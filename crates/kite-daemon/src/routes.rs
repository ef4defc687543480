//! Axum router and all HTTP handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    response::Response,
    routing::get,
    Router,
};
use chrono::{NaiveDate, Utc};
use serde::Deserialize;
use serde_json::json;

use kite_db::{artifacts, forecast as forecast_repo, market, orders as orders_repo, runs};
use kite_domain::{EngineError, RunId};
use kite_forecast::{predict, StatsMap};
use kite_risk::GateStats;

use crate::api_types::{fail, fail_internal, ok, HealthData};
use crate::state::{uptime_secs, AppState};

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Build the application router. Middleware (CORS, trace) is attached by
/// `main.rs` so tests can use the bare router.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/data/quality", get(data_quality))
        .route("/api/data/universe", get(pipeline_universe))
        .route("/api/data/stats", get(data_stats))
        .route("/api/v1/pipeline/universe", get(pipeline_universe))
        .route("/api/v1/pipeline/signals", get(pipeline_signals))
        .route("/api/v1/pipeline/screened", get(pipeline_screened))
        .route("/api/v1/pipeline/ranking", get(pipeline_ranking))
        .route("/api/v1/pipeline/portfolio", get(pipeline_portfolio))
        .route("/api/forecast/events/:code", get(forecast_events))
        .route("/api/forecast/analyze/:code", get(forecast_analyze))
        .route("/api/trading/positions", get(trading_positions))
        .route("/api/trading/orders", get(trading_orders))
        .route(
            "/api/trading/positions/:code/exit-monitoring",
            get(exit_monitoring),
        )
        .route("/api/gate/status", get(gate_status))
        .route("/api/gate/stats", get(gate_stats))
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Query shapes
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub(crate) struct RunQuery {
    run_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct DateQuery {
    date: Option<NaiveDate>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct LimitQuery {
    limit: Option<i64>,
}

/// Resolve an explicit run id or fall back to the most recent run.
async fn resolve_run(state: &AppState, run_id: Option<String>) -> Result<RunId, Response> {
    match run_id {
        Some(s) => RunId::parse(&s).ok_or_else(|| {
            fail(EngineError::InvalidInput {
                detail: format!("malformed run_id: {s}"),
            })
        }),
        None => {
            let recent = runs::fetch_recent_runs(&state.pool, 1)
                .await
                .map_err(fail_internal)?;
            recent
                .into_iter()
                .next()
                .map(|r| r.record.run_id)
                .ok_or_else(|| {
                    fail(EngineError::NotFound {
                        what: "no runs yet".to_string(),
                    })
                })
        }
    }
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

pub(crate) async fn health(State(st): State<Arc<AppState>>) -> Response {
    let db_ok = kite_db::status(&st.pool).await.map(|s| s.ok).unwrap_or(false);
    ok(HealthData {
        ok: true,
        service: st.build.service,
        version: st.build.version,
        uptime_secs: uptime_secs(),
        db_ok,
    })
}

// ---------------------------------------------------------------------------
// Data
// ---------------------------------------------------------------------------

pub(crate) async fn data_quality(
    State(st): State<Arc<AppState>>,
    Query(q): Query<DateQuery>,
) -> Response {
    let date = q.date.unwrap_or_else(|| Utc::now().date_naive());
    match artifacts::fetch_quality_snapshot(&st.pool, date).await {
        Ok(Some(snapshot)) => ok(snapshot),
        Ok(None) => fail(EngineError::NotFound {
            what: format!("quality snapshot for {date}"),
        }),
        Err(e) => fail_internal(e),
    }
}

pub(crate) async fn data_stats(State(st): State<Arc<AppState>>) -> Response {
    match market::data_stats(&st.pool).await {
        Ok(stats) => ok(json!({
            "stocks": stats.stocks,
            "price_bars": stats.bars,
            "investor_flows": stats.flows,
            "fundamentals": stats.fundamentals,
            "first_bar_date": stats.first_bar_date,
            "last_bar_date": stats.last_bar_date,
        })),
        Err(e) => fail_internal(e),
    }
}

// ---------------------------------------------------------------------------
// Pipeline artifacts
// ---------------------------------------------------------------------------

pub(crate) async fn pipeline_universe(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RunQuery>,
) -> Response {
    let run_id = match resolve_run(&st, q.run_id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match artifacts::fetch_universe(&st.pool, &run_id).await {
        Ok(Some(universe)) => ok(json!({
            "run_id": run_id.as_str(),
            "date": universe.date,
            "count": universe.len(),
            "codes": universe.codes,
        })),
        Ok(None) => fail(EngineError::NotFound {
            what: format!("universe for {run_id}"),
        }),
        Err(e) => fail_internal(e),
    }
}

pub(crate) async fn pipeline_signals(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RunQuery>,
) -> Response {
    let run_id = match resolve_run(&st, q.run_id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match artifacts::fetch_signal_sets(&st.pool, &run_id).await {
        Ok(sets) if !sets.is_empty() => ok(sets),
        Ok(_) => fail(EngineError::NotFound {
            what: format!("signals for {run_id}"),
        }),
        Err(e) => fail_internal(e),
    }
}

pub(crate) async fn pipeline_screened(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RunQuery>,
) -> Response {
    let run_id = match resolve_run(&st, q.run_id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match artifacts::fetch_screen(&st.pool, &run_id).await {
        Ok(Some((survivors, rejections))) => ok(json!({
            "run_id": run_id.as_str(),
            "survivors": survivors,
            "rejections": rejections,
        })),
        Ok(None) => fail(EngineError::NotFound {
            what: format!("screen result for {run_id}"),
        }),
        Err(e) => fail_internal(e),
    }
}

pub(crate) async fn pipeline_ranking(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RunQuery>,
) -> Response {
    let run_id = match resolve_run(&st, q.run_id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match artifacts::fetch_rankings(&st.pool, &run_id).await {
        Ok(ranked) if !ranked.is_empty() => ok(ranked),
        Ok(_) => fail(EngineError::NotFound {
            what: format!("ranking for {run_id}"),
        }),
        Err(e) => fail_internal(e),
    }
}

pub(crate) async fn pipeline_portfolio(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RunQuery>,
) -> Response {
    let run_id = match resolve_run(&st, q.run_id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match artifacts::fetch_portfolio(&st.pool, &run_id).await {
        Ok(Some(portfolio)) => ok(portfolio),
        Ok(None) => fail(EngineError::NotFound {
            what: format!("portfolio for {run_id}"),
        }),
        Err(e) => fail_internal(e),
    }
}

// ---------------------------------------------------------------------------
// Forecast
// ---------------------------------------------------------------------------

pub(crate) async fn forecast_events(
    State(st): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    match forecast_repo::fetch_events_for(&st.pool, &code).await {
        Ok(events) => ok(events),
        Err(e) => fail_internal(e),
    }
}

/// Events for the code plus a prediction for each, using current stats.
pub(crate) async fn forecast_analyze(
    State(st): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    let events = match forecast_repo::fetch_events_for(&st.pool, &code).await {
        Ok(events) => events,
        Err(e) => return fail_internal(e),
    };
    let stats_rows = match forecast_repo::fetch_all_stats(&st.pool).await {
        Ok(rows) => rows,
        Err(e) => return fail_internal(e),
    };
    let stats: StatsMap = stats_rows
        .into_iter()
        .map(|s| ((s.level, s.key.clone(), s.event_type), s))
        .collect();

    let analyzed: Vec<serde_json::Value> = events
        .iter()
        .map(|event| {
            let prediction = predict(event, &stats, &st.cfg.forecast);
            json!({ "event": event, "prediction": prediction })
        })
        .collect();
    ok(json!({ "code": code, "events": analyzed }))
}

// ---------------------------------------------------------------------------
// Trading / monitoring
// ---------------------------------------------------------------------------

pub(crate) async fn trading_positions(State(st): State<Arc<AppState>>) -> Response {
    ok(st.monitor.snapshot().await)
}

pub(crate) async fn trading_orders(
    State(st): State<Arc<AppState>>,
    Query(q): Query<RunQuery>,
) -> Response {
    let run_id = match resolve_run(&st, q.run_id).await {
        Ok(id) => id,
        Err(resp) => return resp,
    };
    match orders_repo::fetch_orders(&st.pool, &run_id).await {
        Ok(orders) => ok(orders),
        Err(e) => fail_internal(e),
    }
}

pub(crate) async fn exit_monitoring(
    State(st): State<Arc<AppState>>,
    Path(code): Path<String>,
) -> Response {
    match st.monitor.get(&code).await {
        Some(position) => ok(position),
        None => fail(EngineError::NotFound {
            what: format!("monitored position for {code}"),
        }),
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub(crate) async fn gate_status(State(st): State<Arc<AppState>>) -> Response {
    let latest = match orders_repo::fetch_gate_events(&st.pool, 1).await {
        Ok(events) => events.into_iter().next(),
        Err(e) => return fail_internal(e),
    };
    ok(json!({
        "mode": st.cfg.gate.mode.as_str(),
        "limits": {
            "max_var_95": st.cfg.gate.max_var_95,
            "max_var_99": st.cfg.gate.max_var_99,
            "max_single_exposure": st.cfg.gate.max_single_exposure,
            "max_sector_exposure": st.cfg.gate.max_sector_exposure,
            "max_concentration": st.cfg.gate.max_concentration,
            "min_liquidity_score": st.cfg.gate.min_liquidity_score,
        },
        "last_event": latest,
    }))
}

pub(crate) async fn gate_stats(
    State(st): State<Arc<AppState>>,
    Query(q): Query<LimitQuery>,
) -> Response {
    let limit = q.limit.unwrap_or(500).clamp(1, 10_000);
    match orders_repo::fetch_gate_events(&st.pool, limit).await {
        Ok(events) => ok(GateStats::from_events(&events)),
        Err(e) => fail_internal(e),
    }
}
