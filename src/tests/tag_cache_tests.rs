#[cfg(test)]
mod tests {
    use crate::db;
    use crate::repo::{self, ImageUpsert};
    use crate::tag_cache::TagCountCache;
    use crate::types::compose_image_id;
    use sqlx::sqlite::SqlitePoolOptions;
    use std::time::Duration;

    async fn setup_pool() -> sqlx::SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        db::init_db(&pool).await.unwrap();
        pool
    }

    async fn seed(pool: &sqlx::SqlitePool) -> String {
        repo::insert_library(pool, "lib1", "/tmp/x", "lib1").await.unwrap();
        let id = compose_image_id("lib1", "a.png");
        repo::upsert_image(
            pool,
            &ImageUpsert {
                id: id.clone(),
                library_id: "lib1".into(),
                relative_path: "a.png".into(),
                size: 10,
                width: 1,
                height: 1,
                created_time: 0,
                modified_time: 0,
                original_key: "lib1/a".into(),
                thumb_key: None,
                last_seen: 1,
            },
        )
        .await
        .unwrap();
        id
    }

    #[tokio::test]
    async fn counts_are_cached_within_ttl() {
        let pool = setup_pool().await;
        let id = seed(&pool).await;
        repo::apply_tags(&pool, &id, &["cat".into()]).await.unwrap();

        let cache = TagCountCache::new(Duration::from_secs(30));
        let first = cache.get_or_compute(&pool).await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!((first[0].tag.as_str(), first[0].count), ("cat", 1));
        assert!(cache.is_populated().await);

        // Mutation behind the cache's back: an unmutated read within the
        // TTL window returns the cached value, proving no recompute ran
        sqlx::query("INSERT INTO image_tags (image_id, tag) VALUES (?1, 'dog')")
            .bind(&id)
            .execute(&pool)
            .await
            .unwrap();
        let second = cache.get_or_compute(&pool).await.unwrap();
        assert_eq!(second, first);
    }

    #[tokio::test]
    async fn invalidation_makes_the_next_read_exact() {
        let pool = setup_pool().await;
        let id = seed(&pool).await;
        repo::apply_tags(&pool, &id, &["cat".into()]).await.unwrap();

        let cache = TagCountCache::new(Duration::from_secs(30));
        let first = cache.get_or_compute(&pool).await.unwrap();
        assert_eq!(first.len(), 1);

        // The real mutation path: repo write + proactive invalidation
        repo::apply_tags(&pool, &id, &["red".into()]).await.unwrap();
        cache.invalidate().await;
        assert!(!cache.is_populated().await);

        let second = cache.get_or_compute(&pool).await.unwrap();
        assert_eq!(second.len(), 2, "next read after invalidation reflects the mutation");
    }

    #[tokio::test]
    async fn expired_ttl_triggers_recompute() {
        let pool = setup_pool().await;
        let id = seed(&pool).await;
        repo::apply_tags(&pool, &id, &["cat".into()]).await.unwrap();

        let cache = TagCountCache::new(Duration::from_millis(10));
        let _ = cache.get_or_compute(&pool).await.unwrap();
        repo::apply_tags(&pool, &id, &["dog".into()]).await.unwrap();

        tokio::time::sleep(Duration::from_millis(30)).await;
        let counts = cache.get_or_compute(&pool).await.unwrap();
        assert_eq!(counts.len(), 2);
    }

    #[tokio::test]
    async fn counts_are_sorted_by_count_descending() {
        let pool = setup_pool().await;
        repo::insert_library(&pool, "lib1", "/tmp/x", "lib1").await.unwrap();
        for (rel, tags) in
            [("a.png", vec!["cat", "red"]), ("b.png", vec!["cat"]), ("c.png", vec!["cat"])]
        {
            let id = compose_image_id("lib1", rel);
            repo::upsert_image(
                &pool,
                &ImageUpsert {
                    id: id.clone(),
                    library_id: "lib1".into(),
                    relative_path: rel.into(),
                    size: 10,
                    width: 1,
                    height: 1,
                    created_time: 0,
                    modified_time: 0,
                    original_key: format!("lib1/{}", rel),
                    thumb_key: None,
                    last_seen: 1,
                },
            )
            .await
            .unwrap();
            let tags: Vec<String> = tags.into_iter().map(String::from).collect();
            repo::apply_tags(&pool, &id, &tags).await.unwrap();
        }

        let cache = TagCountCache::new(Duration::from_secs(30));
        let counts = cache.get_or_compute(&pool).await.unwrap();
        assert_eq!(counts[0].tag, "cat");
        assert_eq!(counts[0].count, 3);
        assert_eq!(counts[1].tag, "red");
        assert_eq!(counts[1].count, 1);
    }
}
