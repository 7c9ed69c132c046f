use serde::{Deserialize, Serialize};

/// Image file extensions the scanner will index.
pub const IMAGE_EXTS: [&str; 6] = ["jpg", "jpeg", "png", "gif", "webp", "bmp"];

/// Normalizes path separators to `/`. Applied once at write time; lookups
/// additionally tolerate `\` for ids written by older deployments.
pub fn normalize_separators(s: &str) -> String {
    s.replace('\\', "/")
}

/// Deterministic composite image id: `"{library_id}:{relative_path}"` with
/// normalized separators. Re-scanning the same file therefore always
/// addresses the same document.
pub fn compose_image_id(library_id: &str, relative_path: &str) -> String {
    format!("{}:{}", library_id, normalize_separators(relative_path))
}

// ---------------------- Libraries ----------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateLibraryRequest {
    pub root_path: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LibrarySummary {
    pub id: String,
    pub root_path: String,
    pub display_name: String,
    pub scanning: bool,
    pub scan_total: i64,
    pub scan_done: i64,
    pub scan_error: Option<String>,
    pub indexed_count: i64,
    pub last_scanned: Option<String>,
}

/// Scan progress snapshot, served from a dedicated read path so pollers do
/// not have to fetch the whole library list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScanProgressDto {
    pub library_id: String,
    pub scanning: bool,
    pub scan_total: i64,
    pub scan_done: i64,
    pub scan_error: Option<String>,
}

// ---------------------- Images ----------------------

/// Full image document, returned only from single-image fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageDoc {
    pub id: String,
    pub library_id: String,
    pub relative_path: String,
    pub size: i64,
    pub width: i64,
    pub height: i64,
    pub created_time: i64,
    pub modified_time: i64,
    pub tags: Vec<String>,
    pub original_key: String,
    pub thumb_key: Option<String>,
}

/// Field-projected listing record; bounds payload size for large pages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageListItem {
    pub id: String,
    pub relative_path: String,
    pub width: i64,
    pub height: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImagePage {
    pub items: Vec<ImageListItem>,
    pub next_cursor: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TagLogic {
    And,
    Or,
}

/// Parsed filter set for the listing query.
#[derive(Debug, Clone)]
pub struct ImageFilters {
    pub tags: Vec<String>,
    pub logic: TagLogic,
    pub library_id: Option<String>,
    pub no_tags: bool,
}

impl Default for ImageFilters {
    fn default() -> Self {
        Self { tags: Vec::new(), logic: TagLogic::And, library_id: None, no_tags: false }
    }
}

// ---------------------- Tags ----------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagCount {
    pub tag: String,
    pub count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTagRequest {
    pub image_ids: Vec<String>,
    #[serde(default)]
    pub add: Vec<String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTagResult {
    pub updated: Vec<String>,
    pub failed: Vec<BatchTagFailure>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchTagFailure {
    pub image_id: String,
    pub message: String,
}

// ---------------------- Scans ----------------------

/// Walker/worker options resolved from config at scan start.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    pub concurrency: usize,
    pub max_depth: usize,
    pub channel_capacity: usize,
    pub flush_interval_ms: u64,
    pub excludes: Vec<String>,
    pub thumb_max_edge: u32,
    pub thumb_quality: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ScanEvent {
    Started {
        root_path: String,
    },
    Progress {
        discovered: u64,
        processed: u64,
        indexed: u64,
        skipped: u64,
        failed: u64,
    },
    Warning {
        path: String,
        code: String,
        message: String,
    },
    Done {
        total: u64,
        indexed: u64,
        skipped: u64,
        failed: u64,
        reaped: u64,
    },
    Cancelled,
    Failed {
        message: String,
    },
}
