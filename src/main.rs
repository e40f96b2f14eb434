use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use iris_analysis::{
    app_state::AppState,
    config::AppConfig,
    db::{self, PgJobStore},
    routes,
    services::{
        dispatcher::Dispatcher,
        encryption::EncryptionService,
        inference::{Classifier, HeuristicClassifier, RemoteClassifier},
        pipeline::AnalysisPipeline,
        result_writer::ResultWriter,
        storage::{ImageSource, R2ImageSource},
        store::JobStore,
    },
};

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

    tracing::info!("Initializing iris-analysis server");

    let prometheus_handle =
        routes::metrics::install_recorder().expect("Failed to install Prometheus metrics recorder");

    // Initialize database connection pool
    tracing::info!("Connecting to PostgreSQL database");
    let db_pool = db::init_pool(&config.database_url, config.database_max_connections)
        .await
        .expect("Failed to connect to database");

    tracing::info!("Running database migrations");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations");

    let store: Arc<dyn JobStore> = Arc::new(PgJobStore::new(db_pool));

    let encryption =
        EncryptionService::new(&config.encryption_key).expect("Failed to initialize encryption");

    // Scan images live sealed in R2
    tracing::info!(bucket = %config.r2_bucket, "Initializing R2 image source");
    let images: Arc<dyn ImageSource> = Arc::new(
        R2ImageSource::connect(&config.r2(), encryption).expect("Failed to initialize R2 client"),
    );

    let classifier: Arc<dyn Classifier> = match &config.classifier_url {
        Some(url) => {
            tracing::info!(classifier_url = %url, "Using remote classifier");
            Arc::new(RemoteClassifier::new(url))
        }
        None => {
            tracing::info!("Using built-in heuristic classifier");
            Arc::new(HeuristicClassifier)
        }
    };

    let pipeline = AnalysisPipeline::new(images, classifier, store.clone());
    let writer = ResultWriter::new(store.clone());

    let (mut dispatcher, handle) =
        Dispatcher::new(config.dispatcher(), store.clone(), pipeline, writer);

    // Jobs left `queued` by a previous run go back into the queue
    dispatcher
        .rehydrate()
        .await
        .expect("Failed to rehydrate job queue");

    let shutdown = CancellationToken::new();
    let dispatcher_task = dispatcher.spawn(shutdown.clone());

    let state = AppState::new(store, handle);

    let app = routes::api_router(state)
        .merge(routes::metrics::metrics_router(prometheus_handle))
        .layer(TraceLayer::new_for_http())
        .layer(CompressionLayer::new())
        .layer(CorsLayer::permissive())
        .layer(RequestBodyLimitLayer::new(64 * 1024));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("Failed to bind to address");

    tracing::info!("Server listening on {}", config.bind_addr);

    let signal = shutdown.clone();
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for shutdown signal");
            }
            tracing::info!("Shutdown signal received");
            signal.cancel();
        })
        .await
        .expect("Server error");

    shutdown.cancel();
    if let Err(e) = dispatcher_task.await {
        tracing::error!(error = %e, "Dispatcher task ended abnormally");
    }
}
