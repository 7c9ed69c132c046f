use crate::state::AppState;
use axum::{
    extract::State,
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};

// Health check endpoint - lightweight, no dependencies touched
pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

// Readiness probe: checks DB connectivity with timeout protection
pub async fn readyz(State(state): State<AppState>) -> impl IntoResponse {
    let query = sqlx::query("SELECT 1").fetch_one(&state.db);
    match tokio::time::timeout(std::time::Duration::from_secs(5), query).await {
        Ok(Ok(_)) => (StatusCode::OK, "ready").into_response(),
        Ok(Err(e)) => (StatusCode::SERVICE_UNAVAILABLE, format!("not ready: {}", e)).into_response(),
        Err(_) => (StatusCode::SERVICE_UNAVAILABLE, "not ready: timeout").into_response(),
    }
}

// Metrics endpoint: returns JSON snapshot
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    let snapshot = state.metrics.get_snapshot();
    Json(snapshot)
}

// Prometheus-compatible text exposition format
pub async fn metrics_prometheus(State(state): State<AppState>) -> impl IntoResponse {
    let m = state.metrics.get_snapshot();
    let body = format!(
        "# HELP bilderwald_scans_started Total scans started\n# TYPE bilderwald_scans_started counter\nbilderwald_scans_started {}\n\
# HELP bilderwald_scans_completed Total scans completed\n# TYPE bilderwald_scans_completed counter\nbilderwald_scans_completed {}\n\
# HELP bilderwald_scans_failed Total scans failed\n# TYPE bilderwald_scans_failed counter\nbilderwald_scans_failed {}\n\
# HELP bilderwald_images_indexed Images indexed\n# TYPE bilderwald_images_indexed counter\nbilderwald_images_indexed {}\n\
# HELP bilderwald_images_skipped Undecodable images skipped\n# TYPE bilderwald_images_skipped counter\nbilderwald_images_skipped {}\n\
# HELP bilderwald_images_failed Per-file failures\n# TYPE bilderwald_images_failed counter\nbilderwald_images_failed {}\n\
# HELP bilderwald_bytes_stored Bytes written to the object store\n# TYPE bilderwald_bytes_stored counter\nbilderwald_bytes_stored {}\n\
# HELP bilderwald_uptime_seconds Uptime seconds\n# TYPE bilderwald_uptime_seconds gauge\nbilderwald_uptime_seconds {}\n",
        m.scans_started,
        m.scans_completed,
        m.scans_failed,
        m.images_indexed,
        m.images_skipped,
        m.images_failed,
        m.bytes_stored,
        m.uptime_seconds,
    );
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

// Version/Build info endpoint (JSON)
pub async fn version() -> impl IntoResponse {
    let body = serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "package": {
            "description": env!("CARGO_PKG_DESCRIPTION"),
            "authors": env!("CARGO_PKG_AUTHORS"),
            "license": env!("CARGO_PKG_LICENSE"),
        },
        "build": {
            "profile": if cfg!(debug_assertions) { "debug" } else { "release" },
            "os": std::env::consts::OS,
            "arch": std::env::consts::ARCH,
        }
    });
    (StatusCode::OK, Json(body))
}
