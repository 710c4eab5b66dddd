use std::sync::Arc;
use std::time::Duration;

use actix_web::middleware::{Compress, Logger};
use actix_web::{web, App, HttpResponse, HttpServer};
use sqlx::postgres::PgPoolOptions;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stockledger::config::Config;
use stockledger::handlers::{configure_movement_routes, configure_product_routes};
use stockledger::middleware::AdmissionControl;
use stockledger::services::counter_store::{CounterStore, MemoryCounterStore, RedisCounterStore};
use stockledger::services::{
    BanRecorder, BanReportJob, BanReportJobConfig, IdentityResolver, LogNotifier, Notifier,
    RateLimitConfig, RateLimiterService,
};
use stockledger::AppState;

async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({ "status": "ok" }))
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "stockledger=debug,actix_web=info".into()
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env().map_err(|e| {
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(config.database_max_connections)
        .acquire_timeout(Duration::from_secs(config.database_acquire_timeout_secs))
        .connect(&config.database_url)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string()))?;

    info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))?;

    // Counter store: Redis when configured, else a single-node fallback.
    // The in-memory store cannot share budgets across nodes.
    let counter_store: Arc<dyn CounterStore> = match &config.redis_url {
        Some(url) => {
            let store = RedisCounterStore::new(url).await.map_err(|e| {
                std::io::Error::new(std::io::ErrorKind::ConnectionRefused, e.to_string())
            })?;
            info!("Using Redis counter store");
            Arc::new(store)
        }
        None => {
            warn!("REDIS_URL not set, using in-process counter store; rate limits are per-node");
            Arc::new(MemoryCounterStore::new())
        }
    };

    let limiter = RateLimiterService::new(
        Arc::clone(&counter_store),
        RateLimitConfig {
            max_requests: config.rate_limit_max_requests,
            window: Duration::from_secs(config.rate_limit_window_secs),
        },
    );
    let bans = BanRecorder::new(Arc::clone(&counter_store));
    let identity = IdentityResolver::new(&config.token_secret);

    let notifier: Arc<dyn Notifier> = Arc::new(LogNotifier);

    let report_job = BanReportJob::new(
        bans.clone(),
        Arc::clone(&notifier),
        BanReportJobConfig {
            report_hour: config.ban_report_hour,
            enabled: true,
        },
    );
    let report_shutdown = report_job.start();

    let state = web::Data::new(AppState {
        db: pool,
        notifier,
    });

    let bind_addr = (config.host.clone(), config.port);
    info!("Starting server on {}:{}", bind_addr.0, bind_addr.1);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(state.clone())
            .wrap(Logger::default())
            .wrap(Compress::default())
            .wrap(AdmissionControl::new(
                limiter.clone(),
                bans.clone(),
                identity.clone(),
            ))
            .route("/health", web::get().to(health))
            // Movement routes share the /products prefix and must register
            // before the product scope
            .configure(configure_movement_routes)
            .configure(configure_product_routes)
    })
    .bind(bind_addr)?
    .run();

    let result = server.await;

    let _ = report_shutdown.send(true);
    result
}
