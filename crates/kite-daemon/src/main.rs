use anyhow::Result;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config_paths = std::env::var("KITE_CONFIG")
        .unwrap_or_else(|_| "config/strategy.yaml".to_string());
    let paths: Vec<&str> = config_paths.split(',').collect();
    kite_daemon::server::serve(&paths).await
}
