use sqlx::SqlitePool;

/// Initializes the schema and all secondary indexes. Idempotent; called on
/// every process start.
pub async fn init_db(pool: &SqlitePool) -> anyhow::Result<()> {
    // Pragmas for better durability/performance
    if let Err(e) = sqlx::query("PRAGMA journal_mode=WAL;").execute(pool).await {
        tracing::warn!("Failed to set WAL journal mode: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA synchronous=NORMAL;").execute(pool).await {
        tracing::warn!("Failed to set synchronous mode: {}", e);
    }
    // Foreign keys are critical - fail if this doesn't work
    sqlx::query("PRAGMA foreign_keys=ON;").execute(pool).await?;

    if let Err(e) = sqlx::query("PRAGMA busy_timeout=10000;").execute(pool).await {
        tracing::warn!("Failed to set busy_timeout: {}", e);
    }
    if let Err(e) = sqlx::query("PRAGMA temp_store=MEMORY;").execute(pool).await {
        tracing::warn!("Failed to set temp_store: {}", e);
    }

    // libraries table: one row per registered root, including the persisted
    // scan state machine (scanning flag + counters survive restarts).
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS libraries (
            id TEXT PRIMARY KEY,
            root_path TEXT NOT NULL,
            display_name TEXT NOT NULL,
            scanning INTEGER NOT NULL DEFAULT 0,
            scan_total INTEGER NOT NULL DEFAULT 0,
            scan_done INTEGER NOT NULL DEFAULT 0,
            scan_error TEXT NULL,
            indexed_count INTEGER NOT NULL DEFAULT 0,
            last_scanned TEXT NULL,
            created_at TEXT NOT NULL DEFAULT (strftime('%Y-%m-%dT%H:%M:%SZ','now'))
        )"#,
    )
    .execute(pool)
    .await?;

    // images table: id is the composite "{library_id}:{relative_path}" with
    // normalized separators, so rescans upsert instead of duplicating.
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS images (
            id TEXT PRIMARY KEY,
            library_id TEXT NOT NULL,
            relative_path TEXT NOT NULL,
            size INTEGER NOT NULL,
            width INTEGER NOT NULL,
            height INTEGER NOT NULL,
            created_time INTEGER NOT NULL,
            modified_time INTEGER NOT NULL,
            has_tags INTEGER NOT NULL DEFAULT 0,
            original_key TEXT NOT NULL,
            thumb_key TEXT NULL,
            last_seen INTEGER NOT NULL,
            FOREIGN KEY(library_id) REFERENCES libraries(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    // image_tags: the multikey index over tags.
    sqlx::query(
        r#"CREATE TABLE IF NOT EXISTS image_tags (
            image_id TEXT NOT NULL,
            tag TEXT NOT NULL,
            PRIMARY KEY (image_id, tag),
            FOREIGN KEY(image_id) REFERENCES images(id) ON DELETE CASCADE
        )"#,
    )
    .execute(pool)
    .await?;

    let indexes = [
        // Library filter + id-descending cursor pagination
        ("idx_images_lib_id_desc", "CREATE INDEX IF NOT EXISTS idx_images_lib_id_desc ON images(library_id, id DESC)"),
        // Tag queries (AND/OR over image_tags)
        ("idx_image_tags_tag", "CREATE INDEX IF NOT EXISTS idx_image_tags_tag ON image_tags(tag, image_id)"),
        // "no tags" filter combined with library and sort
        ("idx_images_lib_has_tags_id", "CREATE INDEX IF NOT EXISTS idx_images_lib_has_tags_id ON images(library_id, has_tags, id DESC)"),
        // Removed-file reaping after a successful scan
        ("idx_images_lib_last_seen", "CREATE INDEX IF NOT EXISTS idx_images_lib_last_seen ON images(library_id, last_seen)"),
    ];

    for (name, query) in indexes {
        if let Err(e) = sqlx::query(query).execute(pool).await {
            match &e {
                sqlx::Error::Database(db_err) => {
                    let msg = db_err.message().to_lowercase();
                    if msg.contains("already exists") || msg.contains("duplicate") {
                        tracing::debug!("Index {} already exists, skipping", name);
                    } else {
                        tracing::warn!("Failed to create index {}: {}", name, e);
                    }
                }
                _ => {
                    tracing::warn!("Failed to create index {}: {}", name, e);
                }
            }
        }
    }

    Ok(())
}

/// Clears scanning flags left over from a crashed process. A scan cannot
/// survive a restart, so a stale flag would permanently block rescans.
pub async fn recover_stale_scans(pool: &SqlitePool) -> anyhow::Result<u64> {
    let res = sqlx::query(
        r#"UPDATE libraries
           SET scanning=0, scan_error='scan interrupted by restart'
           WHERE scanning=1"#,
    )
    .execute(pool)
    .await?;
    let n = res.rows_affected();
    if n > 0 {
        tracing::warn!("Recovered {} stale scan(s) after restart", n);
    }
    Ok(n)
}
