//! Security headers middleware for HTTP responses.
//!
//! Adds a conservative set of security headers to every response and a
//! caching policy per content type: API responses (JSON) and SSE streams
//! must never be cached, while image bytes keep the immutable policy the
//! media router already set.

use axum::http::header::{CACHE_CONTROL, CONTENT_TYPE, PRAGMA};
use axum::{
    extract::Request,
    http::{HeaderName, HeaderValue},
    middleware::Next,
    response::Response,
};

pub async fn security_headers_middleware(req: Request, next: Next) -> Response {
    let mut res = next.run(req).await;
    let headers = res.headers_mut();

    // X-Content-Type-Options: nosniff
    headers.insert(HeaderName::from_static("x-content-type-options"), HeaderValue::from_static("nosniff"));

    // X-Frame-Options: SAMEORIGIN
    headers.insert(HeaderName::from_static("x-frame-options"), HeaderValue::from_static("SAMEORIGIN"));

    // Referrer-Policy: no-referrer
    headers.insert(HeaderName::from_static("referrer-policy"), HeaderValue::from_static("no-referrer"));

    // Permissions-Policy: disable sensitive APIs by default
    headers.insert(
        HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static("geolocation=(), microphone=(), camera=()"),
    );

    // Defensive caching policy for API responses (JSON) and SSE streams.
    // Media responses already carry an explicit immutable Cache-Control,
    // which must survive untouched (ETag-basiertes Cache-Busting).
    if !headers.contains_key(CACHE_CONTROL) {
        let ct_val: Option<String> = headers
            .get(CONTENT_TYPE)
            .and_then(|ct| ct.to_str().ok().map(|s| s.to_string()));
        if let Some(s) = ct_val.as_deref() {
            let is_json = s.starts_with("application/json");
            let is_sse = s.starts_with("text/event-stream");
            if is_json || is_sse {
                headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-store"));
                headers.insert(PRAGMA, HeaderValue::from_static("no-cache"));
                // Hint for reverse proxies not to buffer SSE
                if is_sse {
                    headers.insert(
                        HeaderName::from_static("x-accel-buffering"),
                        HeaderValue::from_static("no"),
                    );
                }
            }
        }
    }

    res
}
