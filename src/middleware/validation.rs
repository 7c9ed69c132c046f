//! Early request validation.
//!
//! Rejects obviously hostile or oversized requests before any handler
//! runs. Image ids legitimately contain slashes and dots (they embed
//! relative paths), so only genuine `..` traversal components are blocked.

use axum::{
    extract::Request,
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

pub async fn validate_request_middleware(req: Request, next: Next) -> Response {
    // Check for path traversal attempts in URL
    let uri_path = req.uri().path();
    if contains_path_traversal(uri_path) {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({
                "error": {
                    "code": "INVALID_PATH",
                    "message": "Path traversal detected in request",
                },
                "status": 400,
            })),
        )
            .into_response();
    }

    // Early rejection of oversized bodies; redundant with DefaultBodyLimit
    // but fails before the body is read
    if matches!(req.method(), &axum::http::Method::POST | &axum::http::Method::PUT) {
        if let Some(content_length) = req.headers().get("content-length") {
            if let Ok(length) = content_length.to_str().unwrap_or("").parse::<usize>() {
                let max_body_size = std::env::var("BILDERWALD_MAX_BODY_SIZE")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
                    .unwrap_or(10 * 1024 * 1024)
                    .clamp(1024 * 1024, 50 * 1024 * 1024);
                if length > max_body_size {
                    return (
                        StatusCode::PAYLOAD_TOO_LARGE,
                        Json(json!({
                            "error": {
                                "code": "PAYLOAD_TOO_LARGE",
                                "message": format!("Request body exceeds maximum size of {} bytes", max_body_size),
                            },
                            "status": 413,
                        })),
                    )
                        .into_response();
                }
            }
        }
    }

    next.run(req).await
}

/// True when a path contains a `..` traversal component. Dots inside file
/// names (`a.png`) are fine.
pub fn contains_path_traversal(path: &str) -> bool {
    path.split(['/', '\\']).any(|component| component == "..")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn traversal_components_are_detected() {
        assert!(contains_path_traversal("/images/../etc/passwd"));
        assert!(contains_path_traversal("/store/bucket/..\\secret"));
        assert!(!contains_path_traversal("/images/lib1:sub/dir/a.png"));
        assert!(!contains_path_traversal("/images/lib1:file..png"));
    }
}
