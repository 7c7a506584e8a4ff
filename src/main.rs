//! Cloud credits server
//!
//! Serves the credit API and runs the reconciliation and signal sweeps.

use actix_cors::Cors;
use actix_web::{http::header, web, App, HttpResponse, HttpServer};
use anyhow::Context;
use credits_clients::Collaborators;
use credits_core::AppConfig;
use credits_db::{create_pool, run_migrations, PgCreditStateLog, PgLedgerStore};
use credits_services::{Scheduler, ServiceContext, ServiceDeps};
use std::env;
use std::sync::Arc;
use tracing::info;
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize tracing/logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,cloud_credits=debug,credits_services=debug,sqlx=warn")
    });

    let json = env::var("LOG_FORMAT").map(|f| f == "json").unwrap_or(false);
    let registry = tracing_subscriber::registry().with(env_filter);

    if json {
        registry
            .with(fmt::layer().json().with_current_span(true))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(true)
                    .with_line_number(true),
            )
            .init();
    }
}

/// Error body for malformed query strings and JSON payloads
fn bad_request(kind: &str, err: impl std::fmt::Display) -> HttpResponse {
    HttpResponse::BadRequest().json(serde_json::json!({
        "error": kind,
        "message": err.to_string(),
        "status": 400,
    }))
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_tracing();

    info!("Starting cloud credits v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load().context("failed to load configuration")?;

    info!("Connecting to database...");
    let pool = create_pool(&config.database)
        .await
        .context("failed to create database pool")?;
    if config.database.run_migrations {
        run_migrations(&pool)
            .await
            .context("failed to apply migrations")?;
    }

    let clients = Collaborators::from_config(&config.services)
        .context("failed to build collaborator clients")?;

    let ctx = ServiceContext::new(
        ServiceDeps {
            ledger: Arc::new(PgLedgerStore::new(pool.clone())),
            state_log: Arc::new(PgCreditStateLog::new(pool.clone())),
            directory: Arc::new(clients.directory),
            rates: Arc::new(clients.rates),
            publisher: Arc::new(clients.publisher),
            usage: Arc::new(clients.usage),
            remote_billing: Arc::new(clients.remote_billing),
        },
        config.credits.clone(),
    );

    let scheduler = Scheduler::new();
    ctx.spawn_sweeps(&scheduler, &config.scheduler)
        .context("failed to start periodic sweeps")?;

    let bind_addr = config.server_addr();
    let workers = config.server.workers;
    info!(
        "Starting HTTP server on {} with {} workers",
        bind_addr, workers
    );

    let data = web::Data::new(ctx);
    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allowed_methods(vec!["GET", "POST", "OPTIONS"])
            .allowed_headers(vec![header::ACCEPT, header::CONTENT_TYPE])
            .max_age(3600);

        App::new()
            .app_data(data.clone())
            .app_data(web::QueryConfig::default().error_handler(|err, _req| {
                let response = bad_request("invalid_query", &err);
                actix_web::error::InternalError::from_response(err, response).into()
            }))
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                let response = bad_request("invalid_json", &err);
                actix_web::error::InternalError::from_response(err, response).into()
            }))
            .wrap(cors)
            .wrap(TracingLogger::default())
            .service(web::scope("/api/v1").configure(credits_api::configure))
    })
    .workers(workers)
    .bind(&bind_addr)
    .with_context(|| format!("failed to bind {}", bind_addr))?
    .run();

    let served = server.await;

    info!("HTTP server stopped, stopping sweeps");
    scheduler.stop().await;
    pool.close().await;

    served.context("HTTP server failed")
}
