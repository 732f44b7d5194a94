//! # Investment Ledger Backend Service
//!
//! Entry point for the balance and ledger service. It provides:
//!
//! - REST API for registration, deposits, withdrawals, investments and rewards
//! - Optional background accrual loop
//! - PostgreSQL storage (or an in-memory store for local runs)
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Export `DATABASE_URL` (or set `LEDGER_STORE=memory`)
//! 3. Start the server: `cargo run`
//!
//! Migrations run automatically at startup.

use std::io;
use std::sync::Arc;

use actix_web::{middleware, web, App, HttpServer};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use ledger_backend::api::{self, AppState};
use ledger_backend::config::{AppConfig, StoreBackend};
use ledger_backend::db::{Database, LedgerStore, MemoryStore, PgStore};
use ledger_backend::services::notifier;

fn startup_error(context: &str, e: impl std::fmt::Display) -> io::Error {
    error!("{}: {}", context, e);
    io::Error::new(io::ErrorKind::Other, format!("{}: {}", context, e))
}

#[actix_web::main]
async fn main() -> io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| startup_error("Failed to set tracing subscriber", e))?;

    info!("🚀 Starting Investment Ledger Backend Service");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().map_err(|e| startup_error("Failed to load configuration", e))?;

    info!("📋 Configuration loaded");
    info!("   Store: {:?}", config.store_backend);
    info!("   Admins: {}", config.admin_identities.len());

    // =========================================
    // STEP 3: Initialize Store
    // =========================================
    match config.store_backend {
        StoreBackend::Postgres => {
            let url = config
                .require_database_url()
                .map_err(|e| startup_error("Invalid configuration", e))?;
            let db = Database::connect(url, config.database_pool_size)
                .await
                .map_err(|e| startup_error("Failed to connect to database", e))?;
            info!("🗄️  Database connected");

            db.run_migrations()
                .await
                .map_err(|e| startup_error("Failed to run migrations", e))?;
            info!("📦 Database migrations complete");

            serve(PgStore::new(db), config).await
        }
        StoreBackend::Memory => {
            info!("🧪 Using in-memory store, data is lost on exit");
            serve(MemoryStore::new(), config).await
        }
    }
}

async fn serve<S: LedgerStore>(store: S, config: AppConfig) -> io::Result<()> {
    // =========================================
    // STEP 4: Initialize Services
    // =========================================
    let notifier = notifier::from_settings(config.email.as_ref())
        .map_err(|e| startup_error("Failed to build notifier", e))?;

    let server_host = config.server_host.clone();
    let server_port = config.server_port;
    let accrual_interval = config.accrual_interval;

    let app_state = Arc::new(AppState::new(store, config, notifier));
    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Start Background Services
    // =========================================
    if accrual_interval > 0 {
        let accruals = app_state.accruals.clone();
        tokio::spawn(async move {
            accruals.start_accrual_loop(accrual_interval).await;
        });
        info!("📈 Accrual loop started (every {}s)", accrual_interval);
    }

    // =========================================
    // STEP 6: Start HTTP Server
    // =========================================
    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .wrap(middleware::Logger::default())
            .configure(api::configure_routes::<S>)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
