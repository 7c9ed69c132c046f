use serde::Serialize;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Performance metrics for monitoring
#[derive(Clone)]
pub struct Metrics {
    pub scans_started: Arc<AtomicUsize>,
    pub scans_completed: Arc<AtomicUsize>,
    pub scans_failed: Arc<AtomicUsize>,
    pub images_indexed: Arc<AtomicU64>,
    pub images_skipped: Arc<AtomicU64>,
    pub images_failed: Arc<AtomicU64>,
    pub bytes_stored: Arc<AtomicU64>,
    pub start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            scans_started: Arc::new(AtomicUsize::new(0)),
            scans_completed: Arc::new(AtomicUsize::new(0)),
            scans_failed: Arc::new(AtomicUsize::new(0)),
            images_indexed: Arc::new(AtomicU64::new(0)),
            images_skipped: Arc::new(AtomicU64::new(0)),
            images_failed: Arc::new(AtomicU64::new(0)),
            bytes_stored: Arc::new(AtomicU64::new(0)),
            start_time: Instant::now(),
        }
    }

    pub fn inc_scans_started(&self) {
        self.scans_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_completed(&self) {
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_scans_failed(&self) {
        self.scans_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_indexed(&self, count: u64) {
        self.images_indexed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_skipped(&self, count: u64) {
        self.images_skipped.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_failed(&self, count: u64) {
        self.images_failed.fetch_add(count, Ordering::Relaxed);
    }

    pub fn add_bytes_stored(&self, bytes: u64) {
        self.bytes_stored.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn get_snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            scans_started: self.scans_started.load(Ordering::Relaxed),
            scans_completed: self.scans_completed.load(Ordering::Relaxed),
            scans_failed: self.scans_failed.load(Ordering::Relaxed),
            images_indexed: self.images_indexed.load(Ordering::Relaxed),
            images_skipped: self.images_skipped.load(Ordering::Relaxed),
            images_failed: self.images_failed.load(Ordering::Relaxed),
            bytes_stored: self.bytes_stored.load(Ordering::Relaxed),
            uptime_seconds: self.start_time.elapsed().as_secs(),
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub scans_started: usize,
    pub scans_completed: usize,
    pub scans_failed: usize,
    pub images_indexed: u64,
    pub images_skipped: u64,
    pub images_failed: u64,
    pub bytes_stored: u64,
    pub uptime_seconds: u64,
}
