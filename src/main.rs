use anyhow::Context;
use clap::Parser;
use database::{DbRepository, connect, run_migrations};
use exchange::{ClientFactory, ExchangeApi, OkxClient};
use executor::{LiveClientFactory, TradeExecutor};
use scheduler::{Scheduler, SystemClock};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};
use valuation::PortfolioValuator;
use vault::CredentialVault;
use web_server::AppState;

/// Scheduled DCA trade execution engine for crypto spot markets.
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to a TOML configuration file; defaults and CADENCE_* environment
    /// variables apply either way.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Overrides the configured listen port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    let mut settings = configuration::load_config(cli.config.as_deref())
        .context("failed to load configuration")?;
    if let Some(port) = cli.port {
        settings.server.port = port;
    }
    let settings = Arc::new(settings);

    let pool = connect(&settings.database.url)
        .await
        .context("failed to connect to the database")?;
    run_migrations(&pool)
        .await
        .context("failed to run database migrations")?;
    let repo = DbRepository::new(pool);

    let vault = Arc::new(
        CredentialVault::open(settings.vault.key_path.as_ref())
            .context("failed to open the credential vault")?,
    );

    let factory: Arc<dyn ClientFactory> = Arc::new(LiveClientFactory::new(
        settings.clone(),
        repo.clone(),
        vault.clone(),
    ));
    let public_client: Arc<dyn ExchangeApi> = Arc::new(OkxClient::public(&settings.exchange));

    // Execution queue: every timer and catch-up funnels into one worker.
    let (tx, rx) = mpsc::channel(64);
    let scheduler = Arc::new(Scheduler::new(&settings, Arc::new(SystemClock), tx)?);
    let executor = Arc::new(TradeExecutor::new(
        settings.clone(),
        repo.clone(),
        factory.clone(),
    )?);
    let valuator = Arc::new(PortfolioValuator::new(
        settings.clone(),
        repo.clone(),
        public_client.clone(),
    ));

    tokio::spawn(executor::run_worker(executor.clone(), rx));
    tokio::spawn(valuation::run_snapshot_recorder(valuator.clone()));

    // Re-arm timers for every stored plan; catch-up handles anything missed
    // while the process was down.
    for plan in repo.list_plans().await? {
        if let Err(e) = scheduler.sync(&plan).await {
            warn!(plan_id = plan.id, error = %e, "plan failed to schedule");
        }
    }
    info!("schedules restored");

    let state = Arc::new(AppState {
        settings: settings.clone(),
        repo,
        vault,
        scheduler,
        executor,
        valuator,
        factory,
        public_client,
    });

    let addr = SocketAddr::new(settings.server.host.parse()?, settings.server.port);
    web_server::run_server(state, addr).await
}
