//! Metadata repository: all SQL for libraries, images and tags.
//!
//! Image documents are keyed by the deterministic composite id, so every
//! write is an idempotent upsert. Listing order is strictly `id DESC`, a
//! total order over a unique key, which makes cursor pagination immune to
//! drift from concurrent inserts.

use sqlx::{QueryBuilder, Row, SqlitePool};

use crate::types::{
    normalize_separators, ImageDoc, ImageFilters, ImageListItem, ImagePage, LibrarySummary,
    ScanProgressDto, TagCount, TagLogic,
};

// ---------------------- Images ----------------------

/// Document payload for a scan-time upsert. Tags are intentionally absent:
/// an update never touches them, an insert starts with an empty set.
#[derive(Debug, Clone)]
pub struct ImageUpsert {
    pub id: String,
    pub library_id: String,
    pub relative_path: String,
    pub size: i64,
    pub width: i64,
    pub height: i64,
    pub created_time: i64,
    pub modified_time: i64,
    pub original_key: String,
    pub thumb_key: Option<String>,
    pub last_seen: i64,
}

/// Last-write-wins upsert keyed by the composite id.
pub async fn upsert_image(pool: &SqlitePool, doc: &ImageUpsert) -> sqlx::Result<()> {
    sqlx::query(
        r#"INSERT INTO images
             (id, library_id, relative_path, size, width, height,
              created_time, modified_time, has_tags, original_key, thumb_key, last_seen)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, ?9, ?10, ?11)
           ON CONFLICT(id) DO UPDATE SET
             relative_path=excluded.relative_path,
             size=excluded.size,
             width=excluded.width,
             height=excluded.height,
             created_time=excluded.created_time,
             modified_time=excluded.modified_time,
             original_key=excluded.original_key,
             thumb_key=excluded.thumb_key,
             last_seen=excluded.last_seen"#,
    )
    .bind(&doc.id)
    .bind(&doc.library_id)
    .bind(&doc.relative_path)
    .bind(doc.size)
    .bind(doc.width)
    .bind(doc.height)
    .bind(doc.created_time)
    .bind(doc.modified_time)
    .bind(&doc.original_key)
    .bind(doc.thumb_key.as_deref())
    .bind(doc.last_seen)
    .execute(pool)
    .await?;
    Ok(())
}

/// Resolves a client-supplied id to the stored canonical id. Lookups
/// double-normalize: ids partially encode relative paths, so both `/` and
/// `\` separators must resolve (older deployments wrote `\`).
pub async fn resolve_image_id(pool: &SqlitePool, raw_id: &str) -> sqlx::Result<Option<String>> {
    let normalized = normalize_separators(raw_id);
    let legacy = normalized.replace('/', "\\");
    let row = sqlx::query("SELECT id FROM images WHERE id = ?1 OR id = ?2 LIMIT 1")
        .bind(&normalized)
        .bind(&legacy)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(|r| r.get::<String, _>("id")))
}

/// Full document fetch (the only query that returns tags).
pub async fn fetch_image(pool: &SqlitePool, raw_id: &str) -> sqlx::Result<Option<ImageDoc>> {
    let Some(id) = resolve_image_id(pool, raw_id).await? else {
        return Ok(None);
    };
    let row = sqlx::query(
        r#"SELECT id, library_id, relative_path, size, width, height,
                  created_time, modified_time, original_key, thumb_key
           FROM images WHERE id = ?1"#,
    )
    .bind(&id)
    .fetch_optional(pool)
    .await?;
    let Some(r) = row else { return Ok(None) };

    let tags: Vec<String> =
        sqlx::query_scalar("SELECT tag FROM image_tags WHERE image_id = ?1 ORDER BY tag ASC")
            .bind(&id)
            .fetch_all(pool)
            .await?;

    Ok(Some(ImageDoc {
        id: r.get("id"),
        library_id: r.get("library_id"),
        relative_path: r.get("relative_path"),
        size: r.get("size"),
        width: r.get("width"),
        height: r.get("height"),
        created_time: r.get("created_time"),
        modified_time: r.get("modified_time"),
        tags,
        original_key: r.get("original_key"),
        thumb_key: r.get("thumb_key"),
    }))
}

/// Cursor-stable filtered listing, projected to `(id, path, dimensions)`.
pub async fn list_images(
    pool: &SqlitePool,
    filters: &ImageFilters,
    cursor: Option<&str>,
    limit: i64,
) -> sqlx::Result<ImagePage> {
    let mut qb: QueryBuilder<sqlx::Sqlite> =
        QueryBuilder::new("SELECT id, relative_path, width, height FROM images WHERE 1=1");

    if let Some(lib) = &filters.library_id {
        qb.push(" AND library_id = ");
        qb.push_bind(lib);
    }

    if filters.no_tags {
        qb.push(" AND has_tags = 0");
    } else if !filters.tags.is_empty() {
        qb.push(" AND id IN (SELECT image_id FROM image_tags WHERE tag IN (");
        {
            let mut sep = qb.separated(", ");
            for t in &filters.tags {
                sep.push_bind(t);
            }
        }
        qb.push(")");
        if filters.logic == TagLogic::And {
            qb.push(" GROUP BY image_id HAVING COUNT(DISTINCT tag) = ");
            qb.push_bind(filters.tags.len() as i64);
        }
        qb.push(")");
    }

    if let Some(c) = cursor {
        qb.push(" AND id < ");
        qb.push_bind(c.to_string());
    }

    qb.push(" ORDER BY id DESC LIMIT ");
    qb.push_bind(limit);

    let rows = qb.build().fetch_all(pool).await?;
    let items: Vec<ImageListItem> = rows
        .into_iter()
        .map(|r| ImageListItem {
            id: r.get("id"),
            relative_path: r.get("relative_path"),
            width: r.get("width"),
            height: r.get("height"),
        })
        .collect();

    let next_cursor = items.last().map(|i| i.id.clone());
    Ok(ImagePage { items, next_cursor })
}

// ---------------------- Tags ----------------------

/// Full aggregation over all images; cached by the tag cache layer.
pub async fn tag_counts(pool: &SqlitePool) -> sqlx::Result<Vec<TagCount>> {
    let rows = sqlx::query(
        r#"SELECT tag, COUNT(*) AS count
           FROM image_tags
           GROUP BY tag
           ORDER BY count DESC, tag ASC"#,
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| TagCount { tag: r.get("tag"), count: r.get("count") })
        .collect())
}

/// Adds tags to one image (set semantics; duplicates ignored).
pub async fn apply_tags(pool: &SqlitePool, image_id: &str, tags: &[String]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    for tag in tags {
        sqlx::query("INSERT OR IGNORE INTO image_tags (image_id, tag) VALUES (?1, ?2)")
            .bind(image_id)
            .bind(tag)
            .execute(&mut *tx)
            .await?;
    }
    sqlx::query("UPDATE images SET has_tags = 1 WHERE id = ?1")
        .bind(image_id)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;
    Ok(())
}

/// Removes tags from one image, keeping `has_tags` consistent.
pub async fn remove_tags(pool: &SqlitePool, image_id: &str, tags: &[String]) -> sqlx::Result<()> {
    let mut tx = pool.begin().await?;
    let mut qb: QueryBuilder<sqlx::Sqlite> =
        QueryBuilder::new("DELETE FROM image_tags WHERE image_id = ");
    qb.push_bind(image_id);
    qb.push(" AND tag IN (");
    {
        let mut sep = qb.separated(", ");
        for t in tags {
            sep.push_bind(t);
        }
    }
    qb.push(")");
    qb.build().execute(&mut *tx).await?;

    sqlx::query(
        r#"UPDATE images
           SET has_tags = EXISTS(SELECT 1 FROM image_tags WHERE image_id = ?1)
           WHERE id = ?1"#,
    )
    .bind(image_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;
    Ok(())
}

// ---------------------- Libraries ----------------------

pub async fn insert_library(
    pool: &SqlitePool,
    id: &str,
    root_path: &str,
    display_name: &str,
) -> sqlx::Result<()> {
    sqlx::query(
        r#"INSERT INTO libraries (id, root_path, display_name) VALUES (?1, ?2, ?3)"#,
    )
    .bind(id)
    .bind(root_path)
    .bind(display_name)
    .execute(pool)
    .await?;
    Ok(())
}

fn row_to_library(r: sqlx::sqlite::SqliteRow) -> LibrarySummary {
    LibrarySummary {
        id: r.get("id"),
        root_path: r.get("root_path"),
        display_name: r.get("display_name"),
        scanning: r.get::<i64, _>("scanning") != 0,
        scan_total: r.get("scan_total"),
        scan_done: r.get("scan_done"),
        scan_error: r.get("scan_error"),
        indexed_count: r.get("indexed_count"),
        last_scanned: r.get("last_scanned"),
    }
}

const LIBRARY_COLUMNS: &str = "id, root_path, display_name, scanning, scan_total, scan_done, \
                               scan_error, indexed_count, last_scanned";

pub async fn list_libraries(pool: &SqlitePool) -> sqlx::Result<Vec<LibrarySummary>> {
    let rows = sqlx::query(&format!(
        "SELECT {} FROM libraries ORDER BY created_at DESC",
        LIBRARY_COLUMNS
    ))
    .fetch_all(pool)
    .await?;
    Ok(rows.into_iter().map(row_to_library).collect())
}

pub async fn get_library(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<LibrarySummary>> {
    let row = sqlx::query(&format!("SELECT {} FROM libraries WHERE id = ?1", LIBRARY_COLUMNS))
        .bind(id)
        .fetch_optional(pool)
        .await?;
    Ok(row.map(row_to_library))
}

/// Removes the library row; image and tag rows follow via `ON DELETE
/// CASCADE`. Object-store cleanup is the caller's responsibility (prefix
/// delete, no per-row lookup needed).
pub async fn delete_library(pool: &SqlitePool, id: &str) -> sqlx::Result<bool> {
    let res = sqlx::query("DELETE FROM libraries WHERE id = ?1").bind(id).execute(pool).await?;
    Ok(res.rows_affected() > 0)
}

// ---------------------- Scan state machine ----------------------

/// Check-and-set transition into `scanning`; enforces at most one active
/// scan per library even across processes sharing the database.
pub async fn try_begin_scan(pool: &SqlitePool, id: &str) -> sqlx::Result<bool> {
    let res = sqlx::query(
        r#"UPDATE libraries
           SET scanning=1, scan_error=NULL, scan_total=0, scan_done=0
           WHERE id=?1 AND scanning=0"#,
    )
    .bind(id)
    .execute(pool)
    .await?;
    Ok(res.rows_affected() == 1)
}

/// Periodic progress flush while a scan runs.
pub async fn flush_scan_progress(
    pool: &SqlitePool,
    id: &str,
    total: u64,
    done: u64,
) -> sqlx::Result<()> {
    sqlx::query("UPDATE libraries SET scan_total=?1, scan_done=?2 WHERE id=?3")
        .bind(total as i64)
        .bind(done as i64)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn complete_scan(pool: &SqlitePool, id: &str, total: u64, done: u64) -> sqlx::Result<()> {
    sqlx::query(
        r#"UPDATE libraries
           SET scanning=0, scan_error=NULL, scan_total=?1, scan_done=?2,
               last_scanned=strftime('%Y-%m-%dT%H:%M:%SZ','now'),
               indexed_count=(SELECT COUNT(*) FROM images WHERE library_id=?3)
           WHERE id=?3"#,
    )
    .bind(total as i64)
    .bind(done as i64)
    .bind(id)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn fail_scan(pool: &SqlitePool, id: &str, message: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE libraries SET scanning=0, scan_error=?1 WHERE id=?2")
        .bind(message)
        .bind(id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Cancelled scans clear the flag without recording an error.
pub async fn clear_scanning(pool: &SqlitePool, id: &str) -> sqlx::Result<()> {
    sqlx::query("UPDATE libraries SET scanning=0 WHERE id=?1").bind(id).execute(pool).await?;
    Ok(())
}

pub async fn scan_progress(pool: &SqlitePool, id: &str) -> sqlx::Result<Option<ScanProgressDto>> {
    let row = sqlx::query(
        "SELECT id, scanning, scan_total, scan_done, scan_error FROM libraries WHERE id = ?1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|r| ScanProgressDto {
        library_id: r.get("id"),
        scanning: r.get::<i64, _>("scanning") != 0,
        scan_total: r.get("scan_total"),
        scan_done: r.get("scan_done"),
        scan_error: r.get("scan_error"),
    }))
}

/// Progress of currently-scanning libraries only, so pollers can stop as
/// soon as the list is empty.
pub async fn active_scans(pool: &SqlitePool) -> sqlx::Result<Vec<ScanProgressDto>> {
    let rows = sqlx::query(
        "SELECT id, scanning, scan_total, scan_done, scan_error FROM libraries WHERE scanning = 1",
    )
    .fetch_all(pool)
    .await?;
    Ok(rows
        .into_iter()
        .map(|r| ScanProgressDto {
            library_id: r.get("id"),
            scanning: true,
            scan_total: r.get("scan_total"),
            scan_done: r.get("scan_done"),
            scan_error: r.get("scan_error"),
        })
        .collect())
}

// ---------------------- Removed-file reaping ----------------------

#[derive(Debug, Clone)]
pub struct ReapedImage {
    pub id: String,
    pub original_key: String,
    pub thumb_key: Option<String>,
}

/// Hard-deletes images the scan generation did not touch and returns their
/// store keys for object cleanup. Only called after a successful scan.
pub async fn reap_missing(
    pool: &SqlitePool,
    library_id: &str,
    generation: i64,
) -> sqlx::Result<Vec<ReapedImage>> {
    let rows = sqlx::query(
        r#"SELECT id, original_key, thumb_key FROM images
           WHERE library_id = ?1 AND last_seen < ?2"#,
    )
    .bind(library_id)
    .bind(generation)
    .fetch_all(pool)
    .await?;
    let reaped: Vec<ReapedImage> = rows
        .into_iter()
        .map(|r| ReapedImage {
            id: r.get("id"),
            original_key: r.get("original_key"),
            thumb_key: r.get("thumb_key"),
        })
        .collect();

    if !reaped.is_empty() {
        sqlx::query("DELETE FROM images WHERE library_id = ?1 AND last_seen < ?2")
            .bind(library_id)
            .bind(generation)
            .execute(pool)
            .await?;
    }
    Ok(reaped)
}
