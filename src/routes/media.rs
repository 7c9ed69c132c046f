//! Media delivery router: serves originals and thumbnails in one of three
//! process-wide modes (proxy/redirect/url), honoring HTTP Range semantics
//! in proxy mode. `HEAD` mirrors `GET`'s content-type signal without a
//! body, so clients can probe the mode once per session.

use std::sync::Arc;

use axum::{
    body::Body,
    extract::{Path, State},
    http::{header, HeaderMap, Method, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde_json::json;
use tokio_util::io::ReaderStream;

use crate::{
    config::DeliveryMode,
    error::{AppError, AppResult, OptionExt},
    repo,
    state::AppState,
    storage::{ByteRange, ObjectStore, StoreError, IMMUTABLE_CACHE_CONTROL},
    types::ImageDoc,
};

#[derive(Debug, Clone, Copy)]
enum Variant {
    Original,
    Thumbnail,
}

pub async fn get_original(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Response> {
    serve_image(&state, &id, Variant::Original, method, &headers).await
}

pub async fn get_thumbnail(
    State(state): State<AppState>,
    method: Method,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> AppResult<Response> {
    serve_image(&state, &id, Variant::Thumbnail, method, &headers).await
}

async fn serve_image(
    state: &AppState,
    id: &str,
    variant: Variant,
    method: Method,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let doc: ImageDoc = repo::fetch_image(&state.db, id).await?.ok_or_not_found("image")?;

    let cfg = &state.config.storage;
    let (bucket, key) = match variant {
        Variant::Original => (cfg.originals_bucket.as_str(), doc.original_key.clone()),
        Variant::Thumbnail => (
            cfg.thumbs_bucket.as_str(),
            doc.thumb_key.clone().ok_or_not_found("thumbnail")?,
        ),
    };
    let content_type = match variant {
        Variant::Original => content_type_for_key(&key),
        Variant::Thumbnail => "image/jpeg",
    };

    // Ein geschlossener Modus, einmal beim Start gewählt
    match state.config.media.delivery_mode {
        DeliveryMode::Proxy => {
            proxy_object(state.storage.clone(), bucket, &key, content_type, method, headers).await
        }
        DeliveryMode::Redirect => {
            let url = state
                .storage
                .presign(bucket, &key, cfg.presign_ttl_secs)
                .map_err(|e| AppError::Storage(e.to_string()))?;
            Ok(Redirect::temporary(&url).into_response())
        }
        DeliveryMode::Url => {
            let url = state
                .storage
                .presign(bucket, &key, cfg.presign_ttl_secs)
                .map_err(|e| AppError::Storage(e.to_string()))?;
            if method == Method::HEAD {
                return Ok(Response::builder()
                    .status(StatusCode::OK)
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::empty())
                    .map_err(|e| AppError::Internal(e.into()))?);
            }
            Ok(Json(json!({ "url": url })).into_response())
        }
    }
}

/// Streams an object, honoring `Range`. Shared by proxy-mode delivery and
/// the presigned `/store` route. The body is a `ReaderStream`, so a client
/// disconnect drops the stream and stops the underlying reads.
pub async fn proxy_object(
    storage: Arc<dyn ObjectStore>,
    bucket: &str,
    key: &str,
    content_type: &str,
    method: Method,
    headers: &HeaderMap,
) -> AppResult<Response> {
    let meta = storage.head(bucket, key).await.map_err(store_error)?;

    if method == Method::HEAD {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, meta.length.to_string())
            .header(header::ACCEPT_RANGES, "bytes")
            .header(header::ETAG, meta.etag)
            .header(header::CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL)
            .body(Body::empty())
            .map_err(|e| AppError::Internal(e.into()))?);
    }

    let requested = match headers.get(header::RANGE) {
        Some(value) => {
            let raw = value
                .to_str()
                .map_err(|_| AppError::BadRequest("malformed Range header".into()))?;
            let parsed = parse_range_header(raw)
                .ok_or_else(|| AppError::BadRequest("malformed Range header".into()))?;
            Some(resolve_range(parsed, meta.length)?)
        }
        None => None,
    };

    let object = storage.get(bucket, key, requested).await.map_err(store_error)?;

    let mut builder = Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, object.length.to_string())
        .header(header::ACCEPT_RANGES, "bytes")
        .header(header::ETAG, object.etag.clone())
        .header(header::CACHE_CONTROL, IMMUTABLE_CACHE_CONTROL);

    builder = match requested {
        Some(r) => builder.status(StatusCode::PARTIAL_CONTENT).header(
            header::CONTENT_RANGE,
            format!("bytes {}-{}/{}", r.start, r.end, object.total_length),
        ),
        None => builder.status(StatusCode::OK),
    };

    let body = Body::from_stream(ReaderStream::new(object.reader));
    builder.body(body).map_err(|e| AppError::Internal(e.into()))
}

fn store_error(e: StoreError) -> AppError {
    match e {
        StoreError::NotFound(key) => AppError::NotFound(format!("object not found: {}", key)),
        StoreError::InvalidKey(key) => AppError::BadRequest(format!("invalid object key: {}", key)),
        StoreError::Io(e) => AppError::Storage(e.to_string()),
    }
}

/// A syntactically valid `Range` header, before checking object length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParsedRange {
    /// `bytes=a-` or `bytes=a-b`
    FromTo { start: u64, end: Option<u64> },
    /// `bytes=-n` (last n bytes)
    Suffix { len: u64 },
}

/// Parses a `Range` header value. Returns `None` on malformed input;
/// multi-range requests are not supported and treated the same way.
pub fn parse_range_header(value: &str) -> Option<ParsedRange> {
    let spec = value.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start_s, end_s) = spec.split_once('-')?;

    if start_s.is_empty() {
        let len = end_s.parse::<u64>().ok()?;
        return Some(ParsedRange::Suffix { len });
    }

    let start = start_s.parse::<u64>().ok()?;
    let end = if end_s.is_empty() { None } else { Some(end_s.parse::<u64>().ok()?) };
    if let Some(e) = end {
        if e < start {
            return None;
        }
    }
    Some(ParsedRange::FromTo { start, end })
}

/// Resolves a parsed range against the true object length. A start beyond
/// the object (or an empty suffix) is not satisfiable; an end beyond the
/// object is clamped per RFC 9110.
pub fn resolve_range(parsed: ParsedRange, object_len: u64) -> AppResult<ByteRange> {
    match parsed {
        ParsedRange::FromTo { start, end } => {
            if start >= object_len {
                return Err(AppError::RangeNotSatisfiable { length: object_len });
            }
            let end = end.map(|e| e.min(object_len - 1)).unwrap_or(object_len - 1);
            Ok(ByteRange { start, end })
        }
        ParsedRange::Suffix { len } => {
            if len == 0 || object_len == 0 {
                return Err(AppError::RangeNotSatisfiable { length: object_len });
            }
            let start = object_len.saturating_sub(len);
            Ok(ByteRange { start, end: object_len - 1 })
        }
    }
}

/// Content type from the stored key's extension.
pub fn content_type_for_key(key: &str) -> &'static str {
    let ext = key.rsplit('.').next().map(|e| e.to_ascii_lowercase());
    match ext.as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("bmp") => "image/bmp",
        _ => "application/octet-stream",
    }
}
