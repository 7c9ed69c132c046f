//! Presigned object access: the target of `redirect`/`url` delivery modes.
//! Verifies the signature and expiry minted by the object store gateway,
//! then streams the object through the shared Range-aware path.

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    response::Response,
};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    routes::media::{content_type_for_key, proxy_object},
    state::AppState,
    storage::ObjectStore,
};

#[derive(Debug, Deserialize)]
pub struct PresignQuery {
    pub expires: u64,
    pub sig: String,
}

pub async fn get_object(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path((bucket, key)): Path<(String, String)>,
    Query(q): Query<PresignQuery>,
) -> AppResult<Response> {
    let cfg = &state.config.storage;
    if bucket != cfg.originals_bucket && bucket != cfg.thumbs_bucket {
        return Err(AppError::NotFound(format!("unknown bucket: {}", bucket)));
    }

    if !state.storage.verify_presign(&bucket, &key, q.expires, &q.sig) {
        return Err(AppError::Forbidden("presigned URL expired or signature mismatch".into()));
    }

    let content_type = if bucket == cfg.thumbs_bucket {
        "image/jpeg"
    } else {
        content_type_for_key(&key)
    };
    proxy_object(state.storage.clone(), &bucket, &key, content_type, method, &headers).await
}
