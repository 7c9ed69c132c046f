use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::{Event, Sse};
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use futures::Stream;
use serde_json::json;
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_stream::{wrappers::BroadcastStream, StreamExt};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    config::RescanPolicy,
    error::{AppError, AppResult, OptionExt},
    repo, scanner,
    state::{AppState, ScanHandle, ScanProgress},
    storage::ObjectStore,
    types::{CreateLibraryRequest, ScanEvent, ScanOptions},
};

pub async fn list_libraries(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let items = repo::list_libraries(&state.db).await?;
    Ok(Json(items))
}

pub async fn get_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let lib = repo::get_library(&state.db, &id).await?.ok_or_not_found("library")?;
    Ok(Json(lib))
}

/// Registers a library and triggers its initial scan asynchronously.
pub async fn create_library(
    State(state): State<AppState>,
    Json(req): Json<CreateLibraryRequest>,
) -> AppResult<Response> {
    let root = req.root_path.trim();
    if root.is_empty() {
        return Err(AppError::BadRequest("root_path must not be empty".into()));
    }
    let root_pb = PathBuf::from(root);
    if !root_pb.is_dir() {
        return Err(AppError::BadRequest(format!("root path is not a directory: {}", root)));
    }

    let id = Uuid::new_v4().to_string();
    let display_name = req
        .display_name
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| {
            root_pb
                .file_name()
                .and_then(|s| s.to_str())
                .map(str::to_string)
                .unwrap_or_else(|| root.to_string())
        });

    repo::insert_library(&state.db, &id, root, &display_name).await?;

    start_scan(&state, &id, root).await?;

    let lib = repo::get_library(&state.db, &id).await?.ok_or_not_found("library")?;
    Ok((StatusCode::ACCEPTED, Json(lib)).into_response())
}

/// Idempotent re-trigger. A running scan is rejected under the default
/// policy; `rescan_policy = "takeover"` cancels it and starts fresh.
pub async fn rescan_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Response> {
    let lib = repo::get_library(&state.db, &id).await?.ok_or_not_found("library")?;
    start_scan(&state, &lib.id, &lib.root_path).await?;
    let lib = repo::get_library(&state.db, &id).await?.ok_or_not_found("library")?;
    Ok((StatusCode::ACCEPTED, Json(lib)).into_response())
}

/// Dedicated progress read path, distinct from the library listing. Live
/// counters are overlaid when the scan runs in this process, so pollers see
/// fresher numbers than the periodic flush provides.
pub async fn scan_progress(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    let mut dto = repo::scan_progress(&state.db, &id).await?.ok_or_not_found("library")?;
    if let Some(handle) = state.scans.read().await.get(&id) {
        dto.scanning = true;
        dto.scan_total = handle.progress.total.load(Ordering::Relaxed) as i64;
        dto.scan_done = handle.progress.done.load(Ordering::Relaxed) as i64;
    }
    Ok(Json(dto))
}

/// Progress of currently-scanning libraries only; pollers stop as soon as
/// this list is empty.
pub async fn active_scans(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let mut items = repo::active_scans(&state.db).await?;
    let scans = state.scans.read().await;
    for dto in items.iter_mut() {
        if let Some(handle) = scans.get(&dto.library_id) {
            dto.scan_total = handle.progress.total.load(Ordering::Relaxed) as i64;
            dto.scan_done = handle.progress.done.load(Ordering::Relaxed) as i64;
        }
    }
    drop(scans);
    Ok(Json(items))
}

/// SSE stream of scan events for one library; 404 when no scan is running.
pub async fn scan_events(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<Sse<impl Stream<Item = Result<Event, std::convert::Infallible>>>> {
    let rx = {
        let scans = state.scans.read().await;
        if let Some(handle) = scans.get(&id) {
            handle.sender.subscribe()
        } else {
            return Err(AppError::NotFound("no scan running for this library".into()));
        }
    };

    let stream = BroadcastStream::new(rx).filter_map(|res| res.ok()).map(|ev| {
        let data = serde_json::to_string(&ev)
            .unwrap_or_else(|_| json!({"type":"warning","message":"serialization error"}).to_string());
        Ok::<Event, std::convert::Infallible>(Event::default().data(data))
    });

    Ok(Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new().interval(Duration::from_secs(10)).text("keep-alive"),
    ))
}

/// Cascading delete: cancels a running scan, removes all image rows (FK
/// cascade) and every store object under the library's key prefix.
pub async fn delete_library(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> AppResult<impl IntoResponse> {
    // Laufenden Scan abbrechen, bevor Zeilen und Objekte verschwinden
    {
        let mut scans = state.scans.write().await;
        if let Some(handle) = scans.remove(&id) {
            handle.cancel.cancel();
        }
    }

    let removed = repo::delete_library(&state.db, &id).await?;
    if !removed {
        return Err(AppError::NotFound("library not found".into()));
    }

    let prefix = format!("{}/", id);
    let cfg = &state.config.storage;
    for bucket in [cfg.originals_bucket.as_str(), cfg.thumbs_bucket.as_str()] {
        match state.storage.delete_by_prefix(bucket, &prefix).await {
            Ok(n) => tracing::debug!("deleted {} objects under {}/{}", n, bucket, prefix),
            Err(e) => tracing::warn!("prefix delete failed for {}/{}: {}", bucket, prefix, e),
        }
    }

    // Gelöschte Bilder können getaggt gewesen sein
    state.tag_cache.invalidate().await;

    Ok((StatusCode::NO_CONTENT, ""))
}

/// Claims the scan slot for a library and spawns the background scan task.
/// Enforces the at-most-one-active-scan invariant via a persisted
/// check-and-set; the takeover policy cancels the running scan first.
async fn start_scan(state: &AppState, library_id: &str, root_path: &str) -> AppResult<()> {
    let mut began = repo::try_begin_scan(&state.db, library_id).await?;
    if !began {
        match state.config.scanner.rescan_policy {
            RescanPolicy::Reject => {
                return Err(AppError::Conflict(format!(
                    "library {} is already scanning",
                    library_id
                )));
            }
            RescanPolicy::Takeover => {
                if let Some(handle) = state.scans.read().await.get(library_id) {
                    handle.cancel.cancel();
                }
                // Auf das Auslaufen des Worker-Pools warten, dann Slot übernehmen
                for _ in 0..100 {
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    if repo::try_begin_scan(&state.db, library_id).await? {
                        began = true;
                        break;
                    }
                }
                if !began {
                    return Err(AppError::Conflict(
                        "takeover timed out waiting for the running scan".into(),
                    ));
                }
            }
        }
    }

    let (tx, _rx) = broadcast::channel::<ScanEvent>(256);
    let cancel = CancellationToken::new();
    let progress = Arc::new(ScanProgress::default());

    state.metrics.inc_scans_started();

    let cfg = &state.config;
    let options = ScanOptions {
        concurrency: crate::config::effective_concurrency(&cfg.scanner),
        max_depth: cfg.scanner.max_depth,
        channel_capacity: cfg.scanner.channel_capacity,
        flush_interval_ms: cfg.scanner.flush_interval_ms,
        excludes: cfg.scanner.excludes.clone(),
        thumb_max_edge: cfg.thumbnails.max_edge,
        thumb_quality: cfg.thumbnails.jpeg_quality,
    };

    let db = state.db.clone();
    let storage = state.storage.clone();
    let originals_bucket = cfg.storage.originals_bucket.clone();
    let thumbs_bucket = cfg.storage.thumbs_bucket.clone();
    let library_id_owned = library_id.to_string();
    let root_path_owned = root_path.to_string();
    let tx_clone = tx.clone();
    let cancel_child = cancel.clone();
    let progress_clone = progress.clone();
    let scans_map = state.scans.clone();
    let metrics = state.metrics.clone();
    let tag_cache = state.tag_cache.clone();

    // Register the handle before spawning, so a scan that finishes
    // immediately cannot race its own removal from the map.
    {
        let mut scans = state.scans.write().await;
        scans.insert(
            library_id.to_string(),
            ScanHandle { cancel: cancel.clone(), sender: tx.clone(), progress: progress.clone() },
        );
    }

    let _handle: JoinHandle<()> = tokio::spawn(async move {
        let res = scanner::run_scan(
            db.clone(),
            storage,
            originals_bucket,
            thumbs_bucket,
            library_id_owned.clone(),
            root_path_owned,
            options,
            progress_clone,
            tx_clone.clone(),
            cancel_child.clone(),
        )
        .await;
        match res {
            Ok(outcome) => {
                metrics.inc_scans_completed();
                metrics.add_indexed(outcome.indexed);
                metrics.add_skipped(outcome.skipped);
                metrics.add_failed(outcome.failed);
                metrics.add_bytes_stored(outcome.bytes_stored);
                let _ = tx_clone.send(ScanEvent::Done {
                    total: outcome.total,
                    indexed: outcome.indexed,
                    skipped: outcome.skipped,
                    failed: outcome.failed,
                    reaped: outcome.reaped,
                });
                let done = outcome.indexed + outcome.skipped + outcome.failed;
                if let Err(e) =
                    repo::complete_scan(&db, &library_id_owned, outcome.total, done).await
                {
                    tracing::error!("failed to finalize scan for {}: {}", library_id_owned, e);
                }
                // Reaping kann getaggte Bilder entfernt haben
                if outcome.reaped > 0 {
                    tag_cache.invalidate().await;
                }
            }
            Err(e) => {
                if cancel_child.is_cancelled() {
                    let _ = tx_clone.send(ScanEvent::Cancelled);
                    let _ = repo::clear_scanning(&db, &library_id_owned).await;
                } else {
                    metrics.inc_scans_failed();
                    let message = format!("{}", e);
                    let _ = tx_clone.send(ScanEvent::Failed { message: message.clone() });
                    let _ = repo::fail_scan(&db, &library_id_owned, &message).await;
                }
            }
        }
        // Always remove the scan handle after completion
        {
            let mut scans = scans_map.write().await;
            scans.remove(&library_id_owned);
        }
    });

    Ok(())
}
