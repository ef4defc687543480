//! Command implementations and shared bootstrap.

pub mod auditcmd;
pub mod backtest;
pub mod brain;
pub mod data;
pub mod forecast;
pub mod gate;
pub mod scheduler;
pub mod worker;

use std::process::Command;
use std::sync::Arc;

use anyhow::Result;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::info;

use kite_config::{LoadedConfig, StrategyConfig};
use kite_pipeline::Orchestrator;

/// Everything most commands need.
pub struct CliContext {
    pub pool: PgPool,
    pub cfg: StrategyConfig,
    pub loaded: LoadedConfig,
}

pub async fn context(config_paths: &[String]) -> Result<CliContext> {
    let pool = kite_db::connect_from_env().await?;
    let paths: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    let (cfg, loaded) = kite_config::load_strategy(&paths)?;
    Ok(CliContext { pool, cfg, loaded })
}

/// Orchestrator wired with the given broker (paper/sim for CLI use — the
/// production broker adapter plugs in the same port out of tree).
pub fn orchestrator(
    ctx: &CliContext,
    broker: Arc<dyn kite_execution::Broker>,
) -> Orchestrator {
    Orchestrator::new(
        ctx.pool.clone(),
        ctx.cfg.clone(),
        ctx.loaded.config_hash.clone(),
        git_sha(),
        broker,
        std::path::PathBuf::from("exports"),
    )
}

/// Best-effort short git hash for run attribution.
pub fn git_sha() -> String {
    Command::new("git")
        .args(["rev-parse", "--short", "HEAD"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .unwrap_or_else(|| "UNKNOWN".to_string())
}

/// Shutdown flag that flips on ctrl-c.
pub fn shutdown_flag() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        let _ = tx.send(true);
    });
    rx
}

pub async fn api(config_paths: &[String]) -> Result<()> {
    let paths: Vec<&str> = config_paths.iter().map(|s| s.as_str()).collect();
    kite_daemon::server::serve(&paths).await
}

pub fn test_logger() {
    tracing::trace!("logger check: trace");
    tracing::debug!("logger check: debug");
    info!("logger check: info");
    tracing::warn!("logger check: warn");
    tracing::error!("logger check: error");
    println!("logger_ok=true");
}
