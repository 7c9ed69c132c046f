//! Path walker and concurrency governor.
//!
//! Discovery runs on a blocking thread (`walkdir`, no symlink following,
//! bounded depth) and feeds a bounded channel. A fixed pool of workers,
//! gated by a semaphore instead of spawn-per-file, pulls paths, renders the
//! thumbnail, writes both objects and upserts the metadata row. Progress
//! counters live in shared atomics and are flushed to the library row on a
//! ticker, so pollers see live numbers while the walk continues.

use std::path::{Path, PathBuf};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use globset::{Glob, GlobSet, GlobSetBuilder};
use tokio::sync::{broadcast, mpsc, Semaphore};
use tokio::task;
use tokio::time::{interval, Duration};
use tokio_util::sync::CancellationToken;

use crate::repo::{self, ImageUpsert};
use crate::state::ScanProgress;
use crate::storage::{original_key, thumb_key, ObjectStore};
use crate::thumbs::{self, ThumbError};
use crate::types::{compose_image_id, normalize_separators, ScanEvent, ScanOptions, IMAGE_EXTS};

#[derive(Debug, Default, Clone)]
pub struct ScanOutcome {
    pub total: u64,
    pub indexed: u64,
    pub skipped: u64,
    pub failed: u64,
    pub warnings: u64,
    pub reaped: u64,
    pub bytes_stored: u64,
}

/// Per-file processing result reported over the results channel.
#[derive(Debug)]
enum FileOutcome {
    Indexed { bytes_stored: u64 },
    Skipped,
    Failed,
}

/// Runs one scan of `root_path` for `library_id`. Fails eagerly on
/// configuration errors (missing root); per-file failures never abort the
/// run. Returns an error with the token cancelled when the scan was
/// cancelled mid-flight.
#[allow(clippy::too_many_arguments)]
pub async fn run_scan(
    pool: sqlx::SqlitePool,
    storage: Arc<dyn ObjectStore>,
    originals_bucket: String,
    thumbs_bucket: String,
    library_id: String,
    root_path: String,
    options: ScanOptions,
    progress: Arc<ScanProgress>,
    tx: broadcast::Sender<ScanEvent>,
    cancel: CancellationToken,
) -> anyhow::Result<ScanOutcome> {
    let root = PathBuf::from(&root_path);
    if !root.is_dir() {
        anyhow::bail!("library root is not a readable directory: {}", root_path);
    }
    let globs = build_globset(&options.excludes)?;

    // Scan generation: upserts stamp last_seen with it; rows the walk did
    // not touch are reaped afterwards (only on success).
    let generation = chrono::Utc::now().timestamp_millis();

    let _ = tx.send(ScanEvent::Started { root_path: root_path.clone() });

    // Discovery: blocking walk feeding a bounded channel. scan_total
    // increments here, at discovery time, while the walk continues.
    let (path_tx, mut path_rx) = mpsc::channel::<PathBuf>(options.channel_capacity);
    let walker = {
        let root = root.clone();
        let progress = progress.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        let max_depth = options.max_depth;
        task::spawn_blocking(move || -> u64 {
            let mut warnings = 0u64;
            for entry in walkdir::WalkDir::new(&root)
                .follow_links(false)
                .max_depth(max_depth)
                .into_iter()
            {
                if cancel.is_cancelled() {
                    break;
                }
                match entry {
                    Ok(e) => {
                        if !e.file_type().is_file() {
                            continue;
                        }
                        let p = e.into_path();
                        if !is_image_file(&p) || matches_excludes(&p, &globs) {
                            continue;
                        }
                        progress.total.fetch_add(1, Ordering::Relaxed);
                        if path_tx.blocking_send(p).is_err() {
                            break;
                        }
                    }
                    Err(err) => {
                        // Unlesbare Verzeichnisse überspringen, Walk fortsetzen
                        warnings += 1;
                        let path = err
                            .path()
                            .map(|p| p.to_string_lossy().to_string())
                            .unwrap_or_default();
                        tracing::warn!("walk failed at {}: {}", path, err);
                        let _ = tx.send(ScanEvent::Warning {
                            path,
                            code: "walk_failed".into(),
                            message: err.to_string(),
                        });
                    }
                }
            }
            warnings
        })
    };

    // Worker pool: bounded by the semaphore, results funneled back over a
    // channel so the loop below can aggregate and flush.
    let concurrency = options.concurrency.max(1);
    let sem = Arc::new(Semaphore::new(concurrency));
    let (res_tx, mut res_rx) = mpsc::channel::<FileOutcome>(options.channel_capacity);

    let dispatcher = {
        let storage = storage.clone();
        let pool = pool.clone();
        let tx = tx.clone();
        let cancel = cancel.clone();
        let progress = progress.clone();
        let root = root.clone();
        let library_id = library_id.clone();
        let originals_bucket = originals_bucket.clone();
        let thumbs_bucket = thumbs_bucket.clone();
        let max_edge = options.thumb_max_edge;
        let quality = options.thumb_quality;
        tokio::spawn(async move {
            while let Some(path) = path_rx.recv().await {
                if cancel.is_cancelled() {
                    break;
                }
                let permit = sem.clone().acquire_owned().await.unwrap();
                let res_tx = res_tx.clone();
                let storage = storage.clone();
                let pool = pool.clone();
                let tx = tx.clone();
                let progress = progress.clone();
                let root = root.clone();
                let library_id = library_id.clone();
                let originals_bucket = originals_bucket.clone();
                let thumbs_bucket = thumbs_bucket.clone();
                tokio::spawn(async move {
                    let outcome = process_file(
                        &pool,
                        storage.as_ref(),
                        &originals_bucket,
                        &thumbs_bucket,
                        &library_id,
                        &root,
                        &path,
                        generation,
                        max_edge,
                        quality,
                        &tx,
                    )
                    .await;
                    match &outcome {
                        FileOutcome::Indexed { .. } => {
                            progress.indexed.fetch_add(1, Ordering::Relaxed)
                        }
                        FileOutcome::Skipped => progress.skipped.fetch_add(1, Ordering::Relaxed),
                        FileOutcome::Failed => progress.failed.fetch_add(1, Ordering::Relaxed),
                    };
                    // done zählt jede Datei: Erfolg, Skip oder Fehler
                    progress.done.fetch_add(1, Ordering::Relaxed);
                    let _ = res_tx.send(outcome).await;
                    drop(permit);
                });
            }
        })
    };

    let mut outcome = ScanOutcome::default();
    let mut ticker = interval(Duration::from_millis(options.flush_interval_ms.max(1)));
    loop {
        tokio::select! {
            maybe = res_rx.recv() => {
                match maybe {
                    Some(FileOutcome::Indexed { bytes_stored }) => {
                        outcome.indexed += 1;
                        outcome.bytes_stored += bytes_stored;
                    }
                    Some(FileOutcome::Skipped) => outcome.skipped += 1,
                    Some(FileOutcome::Failed) => outcome.failed += 1,
                    None => break,
                }
            }
            _ = ticker.tick() => {
                let total = progress.total.load(Ordering::Relaxed);
                let done = progress.done.load(Ordering::Relaxed);
                let _ = repo::flush_scan_progress(&pool, &library_id, total, done).await;
                let _ = tx.send(ScanEvent::Progress {
                    discovered: total,
                    processed: done,
                    indexed: progress.indexed.load(Ordering::Relaxed),
                    skipped: progress.skipped.load(Ordering::Relaxed),
                    failed: progress.failed.load(Ordering::Relaxed),
                });
            }
        }
    }

    outcome.warnings = match walker.await {
        Ok(w) => w,
        Err(e) => {
            tracing::warn!("scan walker panicked: {}", e);
            0
        }
    };
    let _ = dispatcher.await;

    outcome.total = progress.total.load(Ordering::Relaxed);
    let done = progress.done.load(Ordering::Relaxed);
    repo::flush_scan_progress(&pool, &library_id, outcome.total, done).await?;

    if cancel.is_cancelled() {
        anyhow::bail!("cancelled");
    }

    // Erfolgreicher Lauf: verschwundene Dateien aufräumen (Zeilen + Objekte)
    let reaped = repo::reap_missing(&pool, &library_id, generation).await?;
    for img in &reaped {
        if let Err(e) = storage.delete(&originals_bucket, &img.original_key).await {
            tracing::warn!("failed to delete reaped original {}: {}", img.original_key, e);
        }
        if let Some(tk) = &img.thumb_key {
            if let Err(e) = storage.delete(&thumbs_bucket, tk).await {
                tracing::warn!("failed to delete reaped thumbnail {}: {}", tk, e);
            }
        }
    }
    outcome.reaped = reaped.len() as u64;

    Ok(outcome)
}

/// Processes a single discovered file end to end. Every error path maps to
/// a per-file outcome; nothing here aborts the scan.
#[allow(clippy::too_many_arguments)]
async fn process_file(
    pool: &sqlx::SqlitePool,
    storage: &dyn ObjectStore,
    originals_bucket: &str,
    thumbs_bucket: &str,
    library_id: &str,
    root: &Path,
    path: &Path,
    generation: i64,
    max_edge: u32,
    quality: u8,
    tx: &broadcast::Sender<ScanEvent>,
) -> FileOutcome {
    let display_path = path.to_string_lossy().to_string();
    let fail = |code: &str, message: String| {
        let _ = tx.send(ScanEvent::Warning {
            path: display_path.clone(),
            code: code.into(),
            message,
        });
        FileOutcome::Failed
    };

    let rel = match path.strip_prefix(root) {
        Ok(r) => normalize_separators(&r.to_string_lossy()),
        Err(e) => return fail("relative_path", e.to_string()),
    };
    let image_id = compose_image_id(library_id, &rel);
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_else(|| "img".into());

    // Dateien können zwischen Discovery und Verarbeitung verschwinden
    let md = match tokio::fs::metadata(path).await {
        Ok(m) => m,
        Err(e) => return fail("stat_failed", e.to_string()),
    };
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) => return fail("read_failed", e.to_string()),
    };

    let created_time = unix_secs(md.created().ok()).unwrap_or(0);
    let modified_time = unix_secs(md.modified().ok()).unwrap_or(created_time);

    // CPU-bound decode/resize off the async runtime; bytes are moved in and
    // handed back so large originals are not cloned.
    let rendered = task::spawn_blocking(move || {
        let result = thumbs::render(&bytes, max_edge, quality);
        (result, bytes)
    })
    .await;
    let (render_result, bytes) = match rendered {
        Ok(pair) => pair,
        Err(e) => return fail("thumbnail_panicked", e.to_string()),
    };

    let (dims, thumb_jpeg) = match render_result {
        Ok(r) => ((r.src_width, r.src_height), Some(r.jpeg)),
        // Nicht dekodierbar: Skip, getrennt von I/O-Fehlern gezählt
        Err(ThumbError::Undecodable(_)) => return FileOutcome::Skipped,
        Err(ThumbError::Encode { src_width, src_height, source }) => {
            let _ = tx.send(ScanEvent::Warning {
                path: display_path.clone(),
                code: "thumbnail_failed".into(),
                message: source.to_string(),
            });
            ((src_width, src_height), None)
        }
    };

    // Originale sind idempotente Writes: einmal wiederholen bei I/O-Fehlern
    let okey = original_key(library_id, &image_id, &ext);
    let mut put_result = storage.put(originals_bucket, &okey, &bytes).await;
    if put_result.is_err() {
        put_result = storage.put(originals_bucket, &okey, &bytes).await;
    }
    if let Err(e) = put_result {
        return fail("store_original_failed", e.to_string());
    }

    let mut bytes_stored = bytes.len() as u64;
    let thumb_key_val = match thumb_jpeg {
        Some(jpeg) => {
            let tkey = thumb_key(library_id, &image_id);
            match storage.put(thumbs_bucket, &tkey, &jpeg).await {
                Ok(_) => {
                    bytes_stored += jpeg.len() as u64;
                    Some(tkey)
                }
                Err(e) => {
                    // Thumbnail-Fehler indexieren das Bild trotzdem
                    let _ = tx.send(ScanEvent::Warning {
                        path: display_path.clone(),
                        code: "store_thumbnail_failed".into(),
                        message: e.to_string(),
                    });
                    None
                }
            }
        }
        None => None,
    };

    let doc = ImageUpsert {
        id: image_id,
        library_id: library_id.to_string(),
        relative_path: rel,
        size: md.len() as i64,
        width: dims.0 as i64,
        height: dims.1 as i64,
        created_time,
        modified_time,
        original_key: okey,
        thumb_key: thumb_key_val,
        last_seen: generation,
    };
    if let Err(e) = repo::upsert_image(pool, &doc).await {
        return fail("upsert_failed", e.to_string());
    }

    FileOutcome::Indexed { bytes_stored }
}

fn unix_secs(t: Option<std::time::SystemTime>) -> Option<i64> {
    t.and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok()).map(|d| d.as_secs() as i64)
}

/// Extension allow-list check; the walker only dispatches matching files.
pub fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| {
            let lower = e.to_ascii_lowercase();
            IMAGE_EXTS.contains(&lower.as_str())
        })
        .unwrap_or(false)
}

fn build_globset(patterns: &[String]) -> anyhow::Result<GlobSet> {
    let mut b = GlobSetBuilder::new();
    for p in patterns {
        if p.trim().is_empty() {
            continue;
        }
        // Backslashes zu Slashes normalisieren, passend zu matches_excludes
        let norm = p.trim().replace('\\', "/");
        let g = Glob::new(&norm)?;
        b.add(g);
    }
    Ok(b.build()?)
}

fn matches_excludes(path: &Path, set: &GlobSet) -> bool {
    if set.is_empty() {
        return false;
    }
    let s = path.to_string_lossy().replace('\\', "/");
    set.is_match(&s)
}
