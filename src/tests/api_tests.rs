#[cfg(test)]
mod tests {
    use crate::config::{
        AppConfig, DatabaseConfig, DeliveryMode, MediaConfig, RescanPolicy, ScannerConfig,
        ServerConfig, StorageConfig, TagsConfig, ThumbnailConfig,
    };
    use crate::routes;
    use crate::state::AppState;
    use crate::storage::FsObjectStore;
    use axum::middleware::from_fn;
    use axum::{
        body::Body,
        http::{Request, StatusCode},
        routing::{get, post},
        Router,
    };
    use http_body_util::BodyExt; // for .collect()
    use serde_json::Value;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn write_png(path: &Path, width: u32, height: u32) {
        let img = image::DynamicImage::new_rgb8(width, height);
        img.save(path).unwrap();
    }

    async fn setup_test_app() -> (Router, AppState, TempDir) {
        let store_dir = TempDir::new().unwrap();
        let storage = Arc::new(FsObjectStore::new(store_dir.path().join("objects"), "secret"));
        storage.ensure_buckets(&["test-originals", "test-thumbs"]).await.unwrap();

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        crate::db::init_db(&pool).await.unwrap();

        let config = AppConfig {
            server: ServerConfig { host: "127.0.0.1".to_string(), port: 8085 },
            database: DatabaseConfig { url: "sqlite::memory:".to_string() },
            storage: StorageConfig {
                root: store_dir.path().join("objects").to_string_lossy().into_owned(),
                originals_bucket: "test-originals".into(),
                thumbs_bucket: "test-thumbs".into(),
                presign_secret: "secret".into(),
                presign_ttl_secs: 60,
            },
            media: MediaConfig { delivery_mode: DeliveryMode::Proxy },
            scanner: ScannerConfig {
                concurrency: 2,
                max_concurrency: 4,
                max_depth: 16,
                channel_capacity: 32,
                flush_interval_ms: 25,
                excludes: vec![],
                rescan_policy: RescanPolicy::Reject,
            },
            thumbnails: ThumbnailConfig { max_edge: 64, jpeg_quality: 80 },
            tags: TagsConfig { cache_ttl_secs: 30 },
        };

        let state = AppState::new(pool, storage, config);

        let app = Router::new()
            .route("/healthz", get(routes::health::healthz))
            .route("/readyz", get(routes::health::readyz))
            .route("/metrics", get(routes::health::metrics))
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
            .route("/scans/active", get(routes::libraries::active_scans))
            .route("/images", get(routes::images::list_images))
            .route("/images/{*id}", get(routes::images::get_image))
            .route("/tags", get(routes::tags::list_tags))
            .route("/tags/batch", post(routes::tags::batch_tags))
            .route("/tags/apply/{*id}", post(routes::tags::apply_tags))
            .route("/tags/remove/{*id}", post(routes::tags::remove_tags))
            .with_state(state.clone())
            .layer(from_fn(
                crate::middleware::security_headers::security_headers_middleware,
            ));

        (app, state, store_dir)
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    /// Polls the progress endpoint until the scan finishes.
    async fn wait_for_scan(app: &Router, library_id: &str) -> Value {
        for _ in 0..200 {
            let response = app
                .clone()
                .oneshot(
                    Request::builder()
                        .uri(format!("/libraries/{}/progress", library_id))
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
            let v = body_json(response).await;
            // done <= total at every observed point
            assert!(v["scan_done"].as_i64().unwrap() <= v["scan_total"].as_i64().unwrap());
            if !v["scanning"].as_bool().unwrap() {
                return v;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        panic!("scan did not finish in time");
    }

    #[tokio::test]
    async fn test_healthz_endpoint() {
        let (app, _, _dir) = setup_test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_security_headers_present() {
        let (app, _, _dir) = setup_test_app().await;

        let response = app
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert!(headers.contains_key("x-content-type-options"));
        assert!(headers.contains_key("x-frame-options"));
        assert!(headers.contains_key("referrer-policy"));
        assert!(headers.contains_key("permissions-policy"));
    }

    #[tokio::test]
    async fn create_library_rejects_missing_root() {
        let (app, _, _dir) = setup_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/libraries")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"root_path": "/no/such/dir"}).to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn list_images_rejects_invalid_parameters() {
        let (app, _, _dir) = setup_test_app().await;

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/images?logic=nand").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .clone()
            .oneshot(
                Request::builder().uri("/images?cursor=no-colon").body(Body::empty()).unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = app
            .oneshot(Request::builder().uri("/images?limit=-5").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn tagging_unknown_image_is_not_found() {
        let (app, _, _dir) = setup_test_app().await;
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tags/apply/lib1:nope.png")
                    .header("content-type", "application/json")
                    .body(Body::from(r#"["cat"]"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn full_library_lifecycle() {
        let (app, _, _store_dir) = setup_test_app().await;

        // Library root with two images
        let lib_dir = TempDir::new().unwrap();
        write_png(&lib_dir.path().join("one.png"), 32, 24);
        write_png(&lib_dir.path().join("two.png"), 48, 48);

        // Create triggers an async scan (202)
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/libraries")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "root_path": lib_dir.path().to_string_lossy(),
                            "display_name": "Testbilder"
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let lib = body_json(response).await;
        let lib_id = lib["id"].as_str().unwrap().to_string();

        let progress = wait_for_scan(&app, &lib_id).await;
        assert_eq!(progress["scan_total"].as_i64().unwrap(), 2);
        assert_eq!(progress["scan_done"].as_i64().unwrap(), 2);
        assert!(progress["scan_error"].is_null());

        // Listing shows both, projected
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/images?library_id={}", lib_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let page = body_json(response).await;
        let items = page["items"].as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert!(items[0].get("tags").is_none(), "listing must be field-projected");
        let image_id = items[0]["id"].as_str().unwrap().to_string();

        // Tag one image; the next tag-count query reflects it immediately
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/tags/apply/{}", image_id))
                    .header("content-type", "application/json")
                    .body(Body::from(r#"["cat"]"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app
            .clone()
            .oneshot(Request::builder().uri("/tags").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let counts = body_json(response).await;
        assert_eq!(counts[0]["tag"], "cat");
        assert_eq!(counts[0]["count"], 1);

        // Single fetch returns the full document including tags
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/images/{}", image_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let doc = body_json(response).await;
        assert_eq!(doc["tags"].as_array().unwrap().len(), 1);

        // Cascading delete empties the scoped listing
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/libraries/{}", lib_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri(format!("/images?library_id={}", lib_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let page = body_json(response).await;
        assert!(page["items"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_tagging_continues_past_failures() {
        let (app, _, _store_dir) = setup_test_app().await;

        let lib_dir = TempDir::new().unwrap();
        write_png(&lib_dir.path().join("one.png"), 16, 16);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/libraries")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"root_path": lib_dir.path().to_string_lossy()})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let lib = body_json(response).await;
        let lib_id = lib["id"].as_str().unwrap().to_string();
        wait_for_scan(&app, &lib_id).await;

        let good_id = format!("{}:one.png", lib_id);
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/tags/batch")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({
                            "image_ids": [good_id, "lib9:missing.png"],
                            "add": ["vacation"]
                        })
                        .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let result = body_json(response).await;
        assert_eq!(result["updated"].as_array().unwrap().len(), 1);
        assert_eq!(result["failed"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn rescan_conflict_while_scanning_is_rejected() {
        let (app, state, _store_dir) = setup_test_app().await;

        let lib_dir = TempDir::new().unwrap();
        write_png(&lib_dir.path().join("one.png"), 16, 16);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/libraries")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        serde_json::json!({"root_path": lib_dir.path().to_string_lossy()})
                            .to_string(),
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        let lib = body_json(response).await;
        let lib_id = lib["id"].as_str().unwrap().to_string();
        wait_for_scan(&app, &lib_id).await;

        // Claim the slot directly, as a concurrent scan would
        assert!(crate::repo::try_begin_scan(&state.db, &lib_id).await.unwrap());

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri(format!("/libraries/{}/rescan", lib_id))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::CONFLICT);

        // Active-scan read path lists exactly this library
        let response = app
            .oneshot(Request::builder().uri("/scans/active").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let active = body_json(response).await;
        let arr = active.as_array().unwrap();
        assert_eq!(arr.len(), 1);
        assert_eq!(arr[0]["library_id"].as_str().unwrap(), lib_id);
    }
}
