use axum::{
    extract::{Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;

use crate::{
    error::{validation, AppError, AppResult},
    repo,
    state::AppState,
    types::{BatchTagFailure, BatchTagRequest, BatchTagResult},
};

/// Aggregated tag counts, served from the TTL cache. Mutations invalidate
/// proactively, so a read directly after a tag change is already exact.
pub async fn list_tags(State(state): State<AppState>) -> AppResult<impl IntoResponse> {
    let counts = state.tag_cache.get_or_compute(&state.db).await?;
    Ok(Json(counts))
}

/// Adds tags to one image (set semantics).
pub async fn apply_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(tags): Json<Vec<String>>,
) -> AppResult<impl IntoResponse> {
    let tags = validation::validate_tags(&tags)?;
    let image_id = repo::resolve_image_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("image not found: {}", id)))?;

    repo::apply_tags(&state.db, &image_id, &tags).await?;
    state.tag_cache.invalidate().await;

    Ok(Json(json!({ "image_id": image_id, "added": tags })))
}

/// Removes tags from one image.
pub async fn remove_tags(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(tags): Json<Vec<String>>,
) -> AppResult<impl IntoResponse> {
    let tags = validation::validate_tags(&tags)?;
    let image_id = repo::resolve_image_id(&state.db, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("image not found: {}", id)))?;

    repo::remove_tags(&state.db, &image_id, &tags).await?;
    state.tag_cache.invalidate().await;

    Ok(Json(json!({ "image_id": image_id, "removed": tags })))
}

/// Batch mutation over many images. Per-item failures (unknown ids,
/// transient write errors) are collected, never abort the batch.
pub async fn batch_tags(
    State(state): State<AppState>,
    Json(req): Json<BatchTagRequest>,
) -> AppResult<impl IntoResponse> {
    if req.image_ids.is_empty() {
        return Err(AppError::BadRequest("image_ids must not be empty".into()));
    }
    if req.add.is_empty() && req.remove.is_empty() {
        return Err(AppError::BadRequest("nothing to do: add and remove are both empty".into()));
    }
    let add = validation::validate_tags(&req.add)?;
    let remove = validation::validate_tags(&req.remove)?;

    let mut result = BatchTagResult { updated: Vec::new(), failed: Vec::new() };
    for raw_id in &req.image_ids {
        match mutate_one(&state, raw_id, &add, &remove).await {
            Ok(canonical) => result.updated.push(canonical),
            Err(e) => result
                .failed
                .push(BatchTagFailure { image_id: raw_id.clone(), message: e.to_string() }),
        }
    }

    if !result.updated.is_empty() {
        state.tag_cache.invalidate().await;
    }
    Ok(Json(result))
}

async fn mutate_one(
    state: &AppState,
    raw_id: &str,
    add: &[String],
    remove: &[String],
) -> AppResult<String> {
    let image_id = repo::resolve_image_id(&state.db, raw_id)
        .await?
        .ok_or_else(|| AppError::NotFound("image not found".into()))?;
    if !add.is_empty() {
        repo::apply_tags(&state.db, &image_id, add).await?;
    }
    if !remove.is_empty() {
        repo::remove_tags(&state.db, &image_id, remove).await?;
    }
    Ok(image_id)
}
