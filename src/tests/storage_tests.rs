#[cfg(test)]
mod tests {
    use crate::storage::{ByteRange, FsObjectStore, ObjectStore, StoreError};
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;

    const BUCKET: &str = "test-bucket";

    fn store() -> (TempDir, FsObjectStore) {
        let dir = TempDir::new().unwrap();
        let store = FsObjectStore::new(dir.path(), "test-secret");
        (dir, store)
    }

    #[tokio::test]
    async fn put_head_get_round_trip() {
        let (_dir, store) = store();
        let payload = vec![7u8; 1000];
        let etag = store.put(BUCKET, "lib1/a.png", &payload).await.unwrap();
        assert!(!etag.is_empty());

        let meta = store.head(BUCKET, "lib1/a.png").await.unwrap();
        assert_eq!(meta.length, 1000);
        assert_eq!(meta.etag, etag);

        let mut obj = store.get(BUCKET, "lib1/a.png", None).await.unwrap();
        assert_eq!(obj.length, 1000);
        assert_eq!(obj.total_length, 1000);
        let mut buf = Vec::new();
        obj.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, payload);
    }

    #[tokio::test]
    async fn ranged_get_returns_exact_slice() {
        let (_dir, store) = store();
        let payload: Vec<u8> = (0..=255).cycle().take(1000).map(|b: u16| b as u8).collect();
        store.put(BUCKET, "lib1/a.png", &payload).await.unwrap();

        let mut obj = store
            .get(BUCKET, "lib1/a.png", Some(ByteRange { start: 0, end: 99 }))
            .await
            .unwrap();
        assert_eq!(obj.length, 100);
        assert_eq!(obj.total_length, 1000);
        let mut buf = Vec::new();
        obj.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf.len(), 100);
        assert_eq!(&buf[..], &payload[..100]);

        // Slice aus der Mitte
        let mut obj = store
            .get(BUCKET, "lib1/a.png", Some(ByteRange { start: 500, end: 509 }))
            .await
            .unwrap();
        let mut buf = Vec::new();
        obj.reader.read_to_end(&mut buf).await.unwrap();
        assert_eq!(&buf[..], &payload[500..510]);
    }

    #[tokio::test]
    async fn rewrite_changes_etag() {
        let (_dir, store) = store();
        let etag1 = store.put(BUCKET, "lib1/a.png", &[1u8; 100]).await.unwrap();
        // Different length guarantees a new tag even with coarse mtimes
        let etag2 = store.put(BUCKET, "lib1/a.png", &[1u8; 200]).await.unwrap();
        assert_ne!(etag1, etag2, "a rewrite under the same key must change the ETag");
    }

    #[tokio::test]
    async fn missing_object_is_not_found() {
        let (_dir, store) = store();
        match store.head(BUCKET, "lib1/nope.png").await {
            Err(StoreError::NotFound(_)) => {}
            Err(other) => panic!("expected NotFound, got {:?}", other),
            Ok(meta) => panic!("expected NotFound, got object of length {}", meta.length),
        }
    }

    #[tokio::test]
    async fn traversal_keys_are_rejected() {
        let (_dir, store) = store();
        assert!(matches!(
            store.put(BUCKET, "../escape.png", b"x").await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.get(BUCKET, "lib1/../../etc/passwd", None).await,
            Err(StoreError::InvalidKey(_))
        ));
        assert!(matches!(
            store.delete_by_prefix(BUCKET, "").await,
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[tokio::test]
    async fn delete_by_prefix_removes_only_the_prefix() {
        let (_dir, store) = store();
        store.put(BUCKET, "lib1/a.png", b"a").await.unwrap();
        store.put(BUCKET, "lib1/sub/b.png", b"b").await.unwrap();
        store.put(BUCKET, "lib2/c.png", b"c").await.unwrap();

        let removed = store.delete_by_prefix(BUCKET, "lib1/").await.unwrap();
        assert_eq!(removed, 2);

        assert!(store.head(BUCKET, "lib1/a.png").await.is_err());
        assert!(store.head(BUCKET, "lib1/sub/b.png").await.is_err());
        assert!(store.head(BUCKET, "lib2/c.png").await.is_ok());
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let (_dir, store) = store();
        store.put(BUCKET, "lib1/a.png", b"a").await.unwrap();
        store.delete(BUCKET, "lib1/a.png").await.unwrap();
        // Second delete of a missing object is fine
        store.delete(BUCKET, "lib1/a.png").await.unwrap();
    }

    #[tokio::test]
    async fn presign_round_trip_and_tampering() {
        let (_dir, store) = store();
        store.put(BUCKET, "lib1/a b.png", b"bytes").await.unwrap();

        let url = store.presign(BUCKET, "lib1/a b.png", 60).unwrap();
        assert!(url.starts_with(&format!("/store/{}/", BUCKET)));
        // Leerzeichen im Schlüssel werden kodiert
        assert!(url.contains("a%20b.png"));

        // Extract query parameters back out of the URL
        let query = url.split_once('?').unwrap().1;
        let mut expires = 0u64;
        let mut sig = String::new();
        for pair in query.split('&') {
            let (k, v) = pair.split_once('=').unwrap();
            match k {
                "expires" => expires = v.parse().unwrap(),
                "sig" => sig = v.to_string(),
                _ => {}
            }
        }

        assert!(store.verify_presign(BUCKET, "lib1/a b.png", expires, &sig));
        // Tampered expiry or signature must fail
        assert!(!store.verify_presign(BUCKET, "lib1/a b.png", expires + 1, &sig));
        assert!(!store.verify_presign(BUCKET, "lib1/a b.png", expires, "deadbeef"));
        // Expired timestamps fail regardless of the signature
        assert!(!store.verify_presign(BUCKET, "lib1/a b.png", 1, &sig));
    }
}
