//! Object store gateway: durable byte storage for originals and thumbnails.
//!
//! Keys follow the deterministic scheme `"{library_id}/{image_id}.{ext}"`
//! (originals) and the same path forced to `.jpg` (thumbnails), so removing
//! a library is a single prefix delete per bucket with no metadata lookup.
//! The trait seam keeps handlers independent of the backing store; the
//! filesystem implementation below maps buckets to subdirectories of a
//! configured root.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt};

/// Cache policy for every served object. Content under a key is never
/// mutated in place; a changed file produces a new write with a new ETag,
/// which is the cache-busting signal.
pub const IMMUTABLE_CACHE_CONTROL: &str = "public, max-age=31536000, immutable";

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("object not found: {0}")]
    NotFound(String),
    #[error("invalid object key: {0}")]
    InvalidKey(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Inclusive byte range within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub length: u64,
    pub etag: String,
}

/// An open object, positioned at the start of the requested slice.
pub struct ObjectStream {
    pub reader: Pin<Box<dyn AsyncRead + Send>>,
    /// Bytes in this response (slice length for ranged reads).
    pub length: u64,
    /// True object length.
    pub total_length: u64,
    pub etag: String,
}

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, StoreError>;
    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError>;
    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, StoreError>;
    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError>;
    /// Removes every object under `prefix`; returns the number removed.
    async fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, StoreError>;
    /// Builds a time-limited URL (path + query) for direct object access.
    fn presign(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String, StoreError>;
    /// Verifies a presigned signature and expiry produced by [`presign`].
    fn verify_presign(&self, bucket: &str, key: &str, expires: u64, sig: &str) -> bool;
}

/// Filesystem-backed store: `<root>/<bucket>/<key>`.
pub struct FsObjectStore {
    root: PathBuf,
    presign_secret: String,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>, presign_secret: impl Into<String>) -> Self {
        Self { root: root.into(), presign_secret: presign_secret.into() }
    }

    /// Creates bucket directories; called once at startup.
    pub async fn ensure_buckets(&self, buckets: &[&str]) -> Result<(), StoreError> {
        for b in buckets {
            tokio::fs::create_dir_all(self.root.join(b)).await?;
        }
        Ok(())
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf, StoreError> {
        // Keine Pfad-Traversal über Schlüsselkomponenten
        let rel = Path::new(key);
        if key.is_empty()
            || rel.is_absolute()
            || rel.components().any(|c| matches!(c, std::path::Component::ParentDir))
        {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(bucket).join(rel))
    }

    fn signature(&self, bucket: &str, key: &str, expires: u64) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.presign_secret.as_bytes());
        hasher.update(b"\n");
        hasher.update(bucket.as_bytes());
        hasher.update(b"\n");
        hasher.update(key.as_bytes());
        hasher.update(b"\n");
        hasher.update(expires.to_string().as_bytes());
        let digest = hasher.finalize();
        digest.iter().map(|b| format!("{:02x}", b)).collect()
    }
}

/// ETag from `(mtime, len)`, identical on put and get. A rewrite under the
/// same key changes the pair and therefore the tag.
fn etag_for(md: &std::fs::Metadata) -> String {
    let mtime = md
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
    format!("\"{:x}-{:x}\"", mtime, md.len())
}

/// Percent-encodes a key for use in a URL path, leaving `/` intact.
fn encode_key_for_url(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' | b'/' | b':' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{:02X}", b)),
        }
    }
    out
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn put(&self, bucket: &str, key: &str, bytes: &[u8]) -> Result<String, StoreError> {
        let path = self.object_path(bucket, key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, bytes).await?;
        let md = tokio::fs::metadata(&path).await?;
        Ok(etag_for(&md))
    }

    async fn head(&self, bucket: &str, key: &str) -> Result<ObjectMeta, StoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::metadata(&path).await {
            Ok(md) if md.is_file() => Ok(ObjectMeta { length: md.len(), etag: etag_for(&md) }),
            Ok(_) => Err(StoreError::NotFound(key.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn get(
        &self,
        bucket: &str,
        key: &str,
        range: Option<ByteRange>,
    ) -> Result<ObjectStream, StoreError> {
        let path = self.object_path(bucket, key)?;
        let mut file = match tokio::fs::File::open(&path).await {
            Ok(f) => f,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(StoreError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let md = file.metadata().await?;
        let total_length = md.len();
        let etag = etag_for(&md);

        match range {
            Some(r) => {
                file.seek(std::io::SeekFrom::Start(r.start)).await?;
                let length = r.len().min(total_length.saturating_sub(r.start));
                Ok(ObjectStream {
                    reader: Box::pin(file.take(length)),
                    length,
                    total_length,
                    etag,
                })
            }
            None => Ok(ObjectStream {
                reader: Box::pin(file),
                length: total_length,
                total_length,
                etag,
            }),
        }
    }

    async fn delete(&self, bucket: &str, key: &str) -> Result<(), StoreError> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            // Idempotent: ein bereits fehlendes Objekt ist kein Fehler
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_by_prefix(&self, bucket: &str, prefix: &str) -> Result<u64, StoreError> {
        let bucket_dir = self.root.join(bucket);
        // Validate the prefix with the same rules as keys
        let _ = self.object_path(bucket, prefix)?;
        let prefix = prefix.to_string();
        let count = tokio::task::spawn_blocking(move || -> Result<u64, StoreError> {
            if !bucket_dir.is_dir() {
                return Ok(0);
            }
            let mut removed = 0u64;
            for entry in walkdir::WalkDir::new(&bucket_dir).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let rel = match entry.path().strip_prefix(&bucket_dir) {
                    Ok(r) => r.to_string_lossy().replace('\\', "/"),
                    Err(_) => continue,
                };
                if rel.starts_with(&prefix) {
                    if std::fs::remove_file(entry.path()).is_ok() {
                        removed += 1;
                    }
                }
            }
            // Leere Verzeichnisse unterhalb des Präfixes aufräumen (best effort)
            let prefix_dir = bucket_dir.join(prefix.trim_end_matches('/'));
            if prefix_dir.is_dir() {
                let _ = std::fs::remove_dir_all(&prefix_dir);
            }
            Ok(removed)
        })
        .await
        .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        Ok(count)
    }

    fn presign(&self, bucket: &str, key: &str, ttl_secs: u64) -> Result<String, StoreError> {
        // Validate early so broken keys fail at presign time, not at fetch time
        let _ = self.object_path(bucket, key)?;
        let expires = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
            + ttl_secs;
        let sig = self.signature(bucket, key, expires);
        Ok(format!(
            "/store/{}/{}?expires={}&sig={}",
            bucket,
            encode_key_for_url(key),
            expires,
            sig
        ))
    }

    fn verify_presign(&self, bucket: &str, key: &str, expires: u64, sig: &str) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(u64::MAX);
        if expires < now {
            return false;
        }
        self.signature(bucket, key, expires) == sig
    }
}

/// Original object key for an image id: `"{library_id}/{image_id}.{ext}"`.
pub fn original_key(library_id: &str, image_id: &str, ext: &str) -> String {
    format!("{}/{}.{}", library_id, image_id, ext)
}

/// Thumbnail key: the original's path forced to `.jpg` (separate bucket).
pub fn thumb_key(library_id: &str, image_id: &str) -> String {
    format!("{}/{}.jpg", library_id, image_id)
}
