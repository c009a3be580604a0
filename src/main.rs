mod config;
mod db;
mod dtos;
mod error;
mod handler;
mod middleware;
mod models;
mod routes;
mod service;
mod utils;

use std::sync::Arc;

use anyhow::Context;
use axum::http::{
    header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    HeaderValue, Method,
};
use config::{Config, StorageBackend};
use db::{db::{DBClient, Store}, memorydb::MemoryDb};
use dotenv::dotenv;
use routes::create_router;
use service::{
    application_service::ApplicationService,
    contract_service::ContractService,
    identity_provider::{IdentityProvider, JwtIdentityProvider},
    job_service::JobService,
    ledger_service::{LedgerService, RetryPolicy},
    notification_service::{EventNotifier, LogNotifier, NotificationService, WebhookNotifier},
    payout_scheduler::{PayoutScheduler, PayoutSettings},
    timesheet_service::TimesheetService,
};
use sqlx::postgres::PgPoolOptions;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone)]
pub struct AppState {
    pub env: Config,
    pub db_client: Store,
    pub identity: Arc<dyn IdentityProvider>,
    pub notifications: Arc<NotificationService>,
    pub ledger_service: Arc<LedgerService>,
    pub job_service: Arc<JobService>,
    pub application_service: Arc<ApplicationService>,
    pub contract_service: Arc<ContractService>,
    pub timesheet_service: Arc<TimesheetService>,
}

impl AppState {
    pub fn new(
        env: Config,
        db_client: Store,
        identity: Arc<dyn IdentityProvider>,
        notifier: Arc<dyn EventNotifier>,
    ) -> Self {
        let notifications = Arc::new(NotificationService::new(notifier));
        let ledger_service = Arc::new(LedgerService::new(
            db_client.clone(),
            RetryPolicy::from_config(&env),
            env.default_currency.clone(),
        ));

        Self {
            job_service: Arc::new(JobService::new(db_client.clone())),
            application_service: Arc::new(ApplicationService::new(db_client.clone(), notifications.clone())),
            contract_service: Arc::new(ContractService::new(
                db_client.clone(),
                ledger_service.clone(),
                notifications.clone(),
                env.contract_budget_periods,
            )),
            timesheet_service: Arc::new(TimesheetService::new(
                db_client.clone(),
                ledger_service.clone(),
                notifications.clone(),
            )),
            ledger_service,
            notifications,
            identity,
            db_client,
            env,
        }
    }

    pub fn payout_scheduler(&self) -> PayoutScheduler {
        PayoutScheduler::new(
            self.db_client.clone(),
            self.timesheet_service.clone(),
            self.contract_service.clone(),
            self.notifications.clone(),
            PayoutSettings::from_config(&self.env),
        )
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug")),
        )
        .init();

    let config = Config::init()?;

    let db_client: Store = match config.storage_backend {
        StorageBackend::Postgres => {
            let database_url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set for the postgres backend")?;
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await
                .context("failed to connect to the database")?;
            tracing::info!("✅ Connection to the database is successful!");

            let client = DBClient::new(pool);
            client.run_migrations().await.context("failed to run migrations")?;
            Arc::new(client)
        }
        StorageBackend::Memory => {
            tracing::warn!("using the in-memory store; state is lost on restart");
            Arc::new(MemoryDb::new())
        }
    };

    let notifier: Arc<dyn EventNotifier> = match &config.notifier_webhook_url {
        Some(url) => Arc::new(WebhookNotifier::new(url.clone(), config.notifier_webhook_secret.clone())),
        None => Arc::new(LogNotifier),
    };

    let identity = Arc::new(JwtIdentityProvider::new(&config.jwt_secret));
    let app_state = Arc::new(AppState::new(config.clone(), db_client, identity, notifier));

    let scheduler = Arc::new(app_state.payout_scheduler());
    let _scheduler_handle = scheduler.start();

    let allowed_origins: Vec<HeaderValue> = config
        .cors_allowed_origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(%origin, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed_origins))
        .allow_headers([AUTHORIZATION, ACCEPT, CONTENT_TYPE])
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::PUT]);

    let app = create_router(app_state).layer(cors);

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", config.port))
        .await
        .with_context(|| format!("failed to bind port {}", config.port))?;
    tracing::info!("🚀 Server is running on http://localhost:{}", config.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
