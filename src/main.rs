mod app_state;
mod config;
mod db;
mod models;
mod routes;
mod services;

use axum::{routing::get, routing::post, Router};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use app_state::AppState;
use config::AppConfig;

#[tokio::main]
async fn main() {
    // Initialize structured logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .json()
        .init();

    // Load configuration from environment
    let config = AppConfig::from_env().expect("Failed to load configuration from environment");

    tracing::info!("Initializing dataset-ingest server");

    // Initialize Prometheus metrics recorder
    let prometheus_handle = PrometheusBuilder::new()
        .install_recorder()
        .expect("Failed to install Prometheus metrics recorder");
    let prometheus_handle = Arc::new(prometheus_handle);

    // Register application metrics
    metrics::describe_counter!("ingest_jobs_total", "Total ingest jobs submitted");
    metrics::describe_counter!("ingest_jobs_completed", "Total ingest jobs completed");
    metrics::describe_counter!("ingest_jobs_failed", "Total ingest jobs that failed terminally");
    metrics::describe_counter!("ingest_jobs_retried", "Total ingest jobs requeued after a transient failure");
    metrics::describe_histogram!(
        "ingest_processing_seconds",
        "Time to extract and reconcile one archive"
    );
    metrics::describe_gauge!(
        "ingest_queue_depth",
        "Current number of ready jobs in the queue"
    );

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");

    // Run database migrations
    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    // Create shared application state
    let state = AppState::new(db_pool.clone(), &config);

    // Start the ingestion worker on this runtime. A single instance is the
    // only writer of job status and of destination directories.
    tracing::info!("Starting ingest worker");
    let worker = services::worker::start(db_pool);

    // Build API routes
    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route(
            "/api/v1/uploads/complete",
            post(routes::jobs::upload_complete),
        )
        .route("/api/v1/jobs/{job_id}", get(routes::jobs::get_job_status))
        .with_state(state)
        // Prometheus metrics endpoint (separate state)
        .route(
            "/metrics",
            get(routes::metrics::prometheus_metrics).with_state(prometheus_handle),
        )
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024)); // JSON bodies only

    tracing::info!("Starting dataset-ingest on {}", config.bind_addr);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // Let the worker finish the job in flight before exiting.
    tracing::info!("Shutting down ingest worker");
    worker.shutdown().await;
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to listen for shutdown signal");
}
