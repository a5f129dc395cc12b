/// Tubefetch API Server
///
/// Web UI and REST API for fetching video information and running downloads.
mod error;
mod routes;

use axum::routing::{get, post};
use axum::Router;
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use tubefetch_downloader::{check_tools, YtDlp, YtDlpConfig};
use tubefetch_shared::config::AppConfig;
use tubefetch_shared::db;
use tubefetch_shared::task_queue::TaskQueue;

/// Shared application state for all API handlers.
pub struct AppState {
    pub config: AppConfig,
    pub pool: SqlitePool,
    pub ytdlp: YtDlp,
    pub queue: TaskQueue,
}

impl AppState {
    pub fn new(config: AppConfig, pool: SqlitePool) -> anyhow::Result<Self> {
        let ytdlp = YtDlp::new(YtDlpConfig::from(&config))?;
        let queue = TaskQueue::new(config.max_concurrent_downloads);
        Ok(Self { config, pool, ytdlp, queue })
    }
}

/// Build the router with all routes and layers.
pub fn build_router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::index))
        .route("/download", post(routes::simple_download))
        .route("/api/formats", get(routes::list_formats))
        .route("/api/info", post(routes::video_info))
        .route("/api/download", post(routes::submit_download))
        .route("/api/jobs", get(routes::list_jobs).delete(routes::clear_jobs))
        .route("/api/jobs/:id", get(routes::get_job).delete(routes::cancel_job))
        .route("/api/files/:id", get(routes::download_file))
        .route("/api/sites", get(routes::supported_sites))
        .route("/api/health", get(routes::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env
    dotenvy::dotenv().ok();

    // Init tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "tubefetch_api=info,tubefetch_shared=info,tubefetch_downloader=info,tower_http=info"
                    .into()
            }),
        )
        .init();

    let config = AppConfig::from_env();
    info!("Download directory: {}", config.download_dir.display());

    // Database
    let database_url = config.database_url();
    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    let interrupted = db::fail_interrupted_jobs(&pool).await?;
    if interrupted > 0 {
        warn!("Marked {} interrupted jobs as failed", interrupted);
    }

    let state = Arc::new(AppState::new(config, pool)?);

    // External tools
    check_tools(&state.ytdlp).await.log();

    // Background cleanup of finished jobs in the queue
    let cleanup_state = state.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(tokio::time::Duration::from_secs(60));
        loop {
            interval.tick().await;
            cleanup_state
                .queue
                .cleanup_old(cleanup_state.config.job_retention_secs)
                .await;
        }
    });

    let addr = state.config.bind_addr();
    let app = build_router(state);

    info!("Tubefetch listening on http://{}", addr);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}
