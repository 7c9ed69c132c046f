use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::header::CONTENT_TYPE;
use axum::middleware::from_fn;
use axum::{
    routing::{get, post},
    Router,
};
use sqlx::{migrate::MigrateDatabase, sqlite::SqlitePoolOptions, Sqlite};
use tower_http::compression::predicate::{DefaultPredicate, Predicate};
use tower_http::{compression::CompressionLayer, cors::CorsLayer, trace::TraceLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod db;
mod error;
mod metrics;
mod middleware;
mod repo;
mod routes;
mod scanner;
mod state;
mod storage;
mod tag_cache;
mod thumbs;
mod types;

use state::AppState;
use storage::FsObjectStore;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logging (stdout + tägliche Datei-Rotation unter ./logs)
    std::fs::create_dir_all("logs").ok();
    let (stdout_nb, stdout_guard) = tracing_appender::non_blocking(std::io::stdout());
    let file_appender = tracing_appender::rolling::daily("logs", "bilderwald.log");
    let (file_nb, file_guard) = tracing_appender::non_blocking(file_appender);
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "info,tower_http=info".into());
    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_writer(stdout_nb))
        .with(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(file_nb))
        .init();
    // Guards am Leben halten, damit Non-Blocking Writer korrekt flushen
    let _log_guards = (stdout_guard, file_guard);

    // Load configuration (embedded defaults -> bilderwald.toml -> env/.env)
    let app_cfg = config::load()?;

    // Prepare data dir (if sqlite)
    let db_url = &app_cfg.database.url;
    config::ensure_sqlite_parent_dir(db_url)?;
    if !Sqlite::database_exists(db_url).await.unwrap_or(false) {
        info!("Creating SQLite database at {}", db_url);
        Sqlite::create_database(db_url).await?;
    }
    let pool = SqlitePoolOptions::new()
        .max_connections(16)
        .after_connect(|conn, _meta| {
            Box::pin(async move {
                let _ = sqlx::query("PRAGMA foreign_keys=ON;").execute(&mut *conn).await;
                let _ = sqlx::query("PRAGMA busy_timeout=10000;").execute(&mut *conn).await;
                Ok(())
            })
        })
        .connect(db_url)
        .await?;

    // Initialize DB schema and indexes; both are idempotent
    db::init_db(&pool).await?;
    // Ein Scan überlebt keinen Neustart: hängengebliebene Flags lösen
    db::recover_stale_scans(&pool).await?;

    // Object store (filesystem-backed), buckets created eagerly
    let store = FsObjectStore::new(
        app_cfg.storage.root.clone(),
        app_cfg.storage.presign_secret.clone(),
    );
    store
        .ensure_buckets(&[&app_cfg.storage.originals_bucket, &app_cfg.storage.thumbs_bucket])
        .await?;

    let state = AppState::new(pool.clone(), Arc::new(store), app_cfg.clone());

    // Build compression layer but exclude SSE (text/event-stream) to avoid
    // breaking live streams.
    #[derive(Clone)]
    struct NoSseDefault(DefaultPredicate);
    impl Predicate for NoSseDefault {
        fn should_compress<B: axum::body::HttpBody>(&self, res: &axum::http::Response<B>) -> bool {
            if let Some(ct) = res.headers().get(CONTENT_TYPE) {
                if let Ok(s) = ct.to_str() {
                    if s.starts_with("text/event-stream") {
                        return false;
                    }
                }
            }
            self.0.should_compress(res)
        }
    }
    let compression = CompressionLayer::new().compress_when(NoSseDefault(DefaultPredicate::new()));

    let app = Router::new()
        .route("/healthz", get(routes::health::healthz))
        .route("/readyz", get(routes::health::readyz))
        .route("/metrics", get(routes::health::metrics))
        .route("/metrics/prometheus", get(routes::health::metrics_prometheus))
        .route("/version", get(routes::health::version))
        .route(
            "/libraries",
            get(routes::libraries::list_libraries).post(routes::libraries::create_library),
        )
        .route(
            "/libraries/{id}",
            get(routes::libraries::get_library).delete(routes::libraries::delete_library),
        )
        .route("/libraries/{id}/rescan", post(routes::libraries::rescan_library))
        .route("/libraries/{id}/progress", get(routes::libraries::scan_progress))
        .route("/libraries/{id}/events", get(routes::libraries::scan_events))
        .route("/scans/active", get(routes::libraries::active_scans))
        .route("/images", get(routes::images::list_images))
        .route("/images/{*id}", get(routes::images::get_image))
        .route("/originals/{*id}", get(routes::media::get_original))
        .route("/thumbnails/{*id}", get(routes::media::get_thumbnail))
        .route("/tags", get(routes::tags::list_tags))
        .route("/tags/batch", post(routes::tags::batch_tags))
        .route("/tags/apply/{*id}", post(routes::tags::apply_tags))
        .route("/tags/remove/{*id}", post(routes::tags::remove_tags))
        .route("/store/{bucket}/{*key}", get(routes::store::get_object))
        .with_state(state)
        // Globales Body-Limit (10 MB) – schützt vor übergroßen Requests
        .layer(DefaultBodyLimit::max(10 * 1024 * 1024))
        .layer(from_fn(middleware::validation::validate_request_middleware))
        .layer(compression)
        .layer(TraceLayer::new_for_http())
        .layer(from_fn(middleware::security_headers::security_headers_middleware));

    // CORS: in Debug permissiv (für lokale Entwicklung mit separater UI)
    let app = if cfg!(debug_assertions) { app.layer(CorsLayer::permissive()) } else { app };

    // Server listen addr (from config)
    let port: u16 = app_cfg.server.port;
    let host: String = app_cfg.server.host.clone();
    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid listen addr {}:{} - {}", host, port, e))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;

    info!("BilderWald listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;

    Ok(())
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        let mut term = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler");
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {},
            _ = term.recv() => {},
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    info!("Shutdown signal received. Stopping server...");
}
