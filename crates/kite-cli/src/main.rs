use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use kite_domain::EngineError;

mod commands;

#[derive(Parser)]
#[command(name = "kite")]
#[command(about = "Kite equity pipeline CLI", long_about = None)]
struct Cli {
    /// Strategy config paths in merge order (base first).
    #[arg(long = "config", global = true, default_value = "config/strategy.yaml")]
    config: Vec<String>,

    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Serve the HTTP API (alias for the kite-daemon binary).
    Api,

    /// Pipeline runs
    Brain {
        #[command(subcommand)]
        cmd: commands::brain::BrainCmd,
    },

    /// Backtests
    Backtest {
        #[command(subcommand)]
        cmd: commands::backtest::BacktestCmd,
    },

    /// Background position monitor
    Worker {
        #[command(subcommand)]
        cmd: commands::worker::WorkerCmd,
    },

    /// Scheduled jobs
    Scheduler {
        #[command(subcommand)]
        cmd: commands::scheduler::SchedulerCmd,
    },

    /// Forecast subsystem
    Forecast {
        #[command(subcommand)]
        cmd: commands::forecast::ForecastCmd,
    },

    /// Risk reports
    Audit {
        #[command(subcommand)]
        cmd: commands::auditcmd::AuditCmd,
    },

    /// Risk gate inspection
    Gate {
        #[command(subcommand)]
        cmd: commands::gate::GateCmd,
    },

    /// Data coverage and table counts
    DataCheck,

    /// Housekeeping (investor-flow units cutoff)
    Cleanup,

    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: commands::data::DbCmd,
    },

    /// Emit sample log lines at every level
    TestLogger,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let cli = Cli::parse();
    if let Err(err) = dispatch(cli).await {
        let kind = err
            .downcast_ref::<EngineError>()
            .map(|e| e.kind())
            .unwrap_or("INTERNAL");
        eprintln!("error: {err:#}");
        eprintln!("kind={kind}");
        std::process::exit(1);
    }
}

async fn dispatch(cli: Cli) -> Result<()> {
    let config_paths = cli.config;
    match cli.cmd {
        Commands::Api => commands::api(&config_paths).await,
        Commands::Brain { cmd } => commands::brain::run(cmd, &config_paths).await,
        Commands::Backtest { cmd } => commands::backtest::run(cmd, &config_paths).await,
        Commands::Worker { cmd } => commands::worker::run(cmd, &config_paths).await,
        Commands::Scheduler { cmd } => commands::scheduler::run(cmd, &config_paths).await,
        Commands::Forecast { cmd } => commands::forecast::run(cmd, &config_paths).await,
        Commands::Audit { cmd } => commands::auditcmd::run(cmd, &config_paths).await,
        Commands::Gate { cmd } => commands::gate::run(cmd, &config_paths).await,
        Commands::DataCheck => commands::data::data_check(&config_paths).await,
        Commands::Cleanup => commands::data::cleanup(&config_paths).await,
        Commands::Db { cmd } => commands::data::db(cmd).await,
        Commands::TestLogger => {
            commands::test_logger();
            Ok(())
        }
    }
}
