use clap::Parser;
use sqlx::migrate::Migrator;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fareflow::adapters::postgres::{create_pool, PostgresPaymentRepository};
use fareflow::adapters::redis_lock::RedisPaymentLock;
use fareflow::cli::{Cli, Commands, DbCommands};
use fareflow::config::Config;
use fareflow::gateway::kashier::KashierClient;
use fareflow::ports::{PaymentGateway, PaymentLock, PaymentNotifier, PaymentRepository};
use fareflow::services::{LogNotifier, PaymentService, ReconciliationService};
use fareflow::{create_app, startup, workers, AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = Config::from_env()?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => serve(config).await,
        Commands::Reconcile => {
            let engine = Engine::connect(&config).await?;
            let count = engine.reconciliation.reconcile_due(chrono::Utc::now()).await?;
            println!("✓ Reconciled {} payment(s)", count);
            Ok(())
        }
        Commands::Retry => {
            let engine = Engine::connect(&config).await?;
            let count = engine.payments.retry_stale(chrono::Utc::now()).await?;
            println!("✓ Retried {} payment(s)", count);
            Ok(())
        }
        Commands::Db(DbCommands::Migrate) => fareflow::cli::handle_db_migrate(&config).await,
        Commands::Config => fareflow::cli::handle_config_validate(&config),
    }
}

/// The wired-up engine: services plus the pool they run against.
struct Engine {
    payments: Arc<PaymentService>,
    reconciliation: Arc<ReconciliationService>,
    pool: sqlx::PgPool,
}

impl Engine {
    async fn connect(config: &Config) -> anyhow::Result<Self> {
        let pool = create_pool(&config.database_url).await?;

        let repo: Arc<dyn PaymentRepository> =
            Arc::new(PostgresPaymentRepository::new(pool.clone()));
        let lock: Arc<dyn PaymentLock> = Arc::new(RedisPaymentLock::new(&config.redis_url)?);
        let gateway: Arc<dyn PaymentGateway> = Arc::new(KashierClient::new(&config.gateway));
        let notifier: Arc<dyn PaymentNotifier> = Arc::new(LogNotifier);

        let payments = Arc::new(PaymentService::new(
            repo.clone(),
            gateway.clone(),
            lock.clone(),
            notifier.clone(),
            config.payment.clone(),
            config.gateway.currency.clone(),
        ));
        let reconciliation = Arc::new(ReconciliationService::new(
            repo,
            gateway,
            lock,
            notifier,
            config.payment.clone(),
        ));

        Ok(Engine {
            payments,
            reconciliation,
            pool,
        })
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    let engine = Engine::connect(&config).await?;

    let migrator = Migrator::new(Path::new("./migrations")).await?;
    migrator.run(&engine.pool).await?;
    tracing::info!("Database migrations completed");

    let report = startup::validate_environment(&config, &engine.pool).await?;
    report.print();
    if !report.is_valid() {
        anyhow::bail!("startup validation failed");
    }

    tokio::spawn(workers::run_reconciliation_sweeper(
        engine.reconciliation.clone(),
        Duration::from_secs(config.payment.reconciliation_sweep_interval_secs),
    ));
    tokio::spawn(workers::run_retry_sweeper(
        engine.payments.clone(),
        Duration::from_secs(config.payment.retry_sweep_interval_secs),
    ));

    let state = AppState {
        payments: engine.payments.clone(),
        webhook_secret: config.gateway.secret_key.clone(),
        db: Some(engine.pool.clone()),
    };
    let app = create_app(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server_port));
    tracing::info!("listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
