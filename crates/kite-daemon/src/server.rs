//! Bootstrapping shared by the daemon binary and `kite api`.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::info;

use kite_monitor::PositionBook;

use crate::routes::build_router;
use crate::state::{spawn_heartbeat, AppState};

pub const DEFAULT_BIND: &str = "0.0.0.0:8089";

/// Connect, migrate, load config, and serve until SIGINT.
pub async fn serve(config_paths: &[&str]) -> Result<()> {
    let pool = kite_db::connect_from_env().await?;
    kite_db::migrate(&pool).await?;

    let (cfg, loaded) = kite_config::load_strategy(config_paths)?;
    info!(config_hash = %loaded.config_hash, "strategy config loaded");

    let monitor = Arc::new(PositionBook::new());
    let state = Arc::new(AppState::new(pool, cfg, monitor));
    spawn_heartbeat(state.bus.clone(), Duration::from_secs(5));

    let app = build_router(Arc::clone(&state))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let bind = std::env::var("KITE_BIND").unwrap_or_else(|_| DEFAULT_BIND.to_string());
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("bind failed: {bind}"))?;
    info!(%bind, "kite-daemon listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("shutdown signal received");
        })
        .await
        .context("server error")?;

    info!("kite-daemon stopped");
    Ok(())
}
