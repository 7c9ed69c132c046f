//! TTL-bounded memoization of tag counts.
//!
//! The aggregation is recomputed at most once per TTL window; every
//! tag-mutating operation calls [`TagCountCache::invalidate`] so
//! post-mutation staleness is effectively zero. Readers never block behind
//! a recompute they did not trigger: the lock is held only for the
//! in-memory swap, never across the database aggregation.

use std::time::{Duration, Instant};

use sqlx::SqlitePool;
use tokio::sync::RwLock;

use crate::repo;
use crate::types::TagCount;

struct CacheEntry {
    computed_at: Instant,
    counts: Vec<TagCount>,
}

pub struct TagCountCache {
    ttl: Duration,
    inner: RwLock<Option<CacheEntry>>,
}

impl TagCountCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, inner: RwLock::new(None) }
    }

    /// Returns the cached counts when fresh, otherwise recomputes and
    /// repopulates. Concurrent callers may race the recompute; last write
    /// wins, which is harmless for a derived value.
    pub async fn get_or_compute(&self, pool: &SqlitePool) -> sqlx::Result<Vec<TagCount>> {
        {
            let guard = self.inner.read().await;
            if let Some(entry) = guard.as_ref() {
                if entry.computed_at.elapsed() < self.ttl {
                    return Ok(entry.counts.clone());
                }
            }
        }

        let counts = repo::tag_counts(pool).await?;
        let mut guard = self.inner.write().await;
        *guard = Some(CacheEntry { computed_at: Instant::now(), counts: counts.clone() });
        Ok(counts)
    }

    /// Explicit invalidation; called at every mutation call site.
    pub async fn invalidate(&self) {
        let mut guard = self.inner.write().await;
        *guard = None;
    }

    /// Whether a fresh entry is currently cached (test hook).
    pub async fn is_populated(&self) -> bool {
        let guard = self.inner.read().await;
        guard.as_ref().map(|e| e.computed_at.elapsed() < self.ttl).unwrap_or(false)
    }
}
