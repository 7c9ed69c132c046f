use std::{collections::HashMap, sync::Arc};
use std::sync::atomic::AtomicU64;
use std::time::Duration;

use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::metrics::Metrics;
use crate::storage::ObjectStore;
use crate::tag_cache::TagCountCache;
use crate::types::ScanEvent;

/// Live counters of one scan run. `total` increments as files are
/// discovered, `done` as each file finishes processing, so
/// `done <= total` holds at every observation.
#[derive(Debug, Default)]
pub struct ScanProgress {
    pub total: AtomicU64,
    pub done: AtomicU64,
    pub indexed: AtomicU64,
    pub skipped: AtomicU64,
    pub failed: AtomicU64,
}

/// A handle to a running scan job.
///
/// Provides cancellation, event broadcasting and live progress counters
/// for the scan of one library.
#[derive(Clone)]
pub struct ScanHandle {
    /// Cancelling this token makes the walker and all workers wind down.
    pub cancel: CancellationToken,
    /// Real-time scan events for SSE subscribers.
    pub sender: broadcast::Sender<ScanEvent>,
    /// Shared atomics, flushed to the library row periodically.
    pub progress: Arc<ScanProgress>,
}

/// The shared application state.
///
/// Cloneable and thread-safe, handed to every handler through Axum's state
/// extraction.
#[derive(Clone)]
pub struct AppState {
    /// SQLite connection pool (metadata repository).
    pub db: sqlx::SqlitePool,
    /// Object store gateway for originals and thumbnails.
    pub storage: Arc<dyn ObjectStore>,
    /// Running scans by library id; at most one entry per library.
    pub scans: Arc<RwLock<HashMap<String, ScanHandle>>>,
    /// The application configuration.
    pub config: Arc<AppConfig>,
    /// Operational counters.
    pub metrics: Metrics,
    /// TTL + explicit-invalidation cache over the tag aggregation.
    pub tag_cache: Arc<TagCountCache>,
}

impl AppState {
    pub fn new(db: sqlx::SqlitePool, storage: Arc<dyn ObjectStore>, config: AppConfig) -> Self {
        let tag_cache =
            Arc::new(TagCountCache::new(Duration::from_secs(config.tags.cache_ttl_secs)));
        Self {
            db,
            storage,
            scans: Arc::new(RwLock::new(HashMap::new())),
            config: Arc::new(config),
            metrics: Metrics::new(),
            tag_cache,
        }
    }
}
