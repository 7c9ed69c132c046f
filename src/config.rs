use std::path::Path;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StorageConfig {
    /// Wurzelverzeichnis der Objektablage; Buckets sind Unterverzeichnisse.
    pub root: String,
    pub originals_bucket: String,
    pub thumbs_bucket: String,
    pub presign_secret: String,
    pub presign_ttl_secs: u64,
}

/// Delivery mode for original/thumbnail retrieval. Parsed once at startup,
/// then dispatched exhaustively per request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// Stream bytes through this process (Range-aware).
    Proxy,
    /// 307 to a short-lived presigned URL.
    Redirect,
    /// JSON body containing the presigned URL.
    Url,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaConfig {
    pub delivery_mode: DeliveryMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RescanPolicy {
    /// A rescan while a scan is running is rejected with 409.
    Reject,
    /// A rescan cancels the running scan and starts fresh.
    Takeover,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScannerConfig {
    /// Worker-Anzahl; 0 = automatisch aus CPU-Kernen abgeleitet.
    pub concurrency: usize,
    /// Sicherheitsobergrenze, schützt Objektablage und Datenbank.
    pub max_concurrency: usize,
    pub max_depth: usize,
    pub channel_capacity: usize,
    pub flush_interval_ms: u64,
    pub excludes: Vec<String>,
    pub rescan_policy: RescanPolicy,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ThumbnailConfig {
    /// Längste Kante des erzeugten JPEGs.
    pub max_edge: u32,
    pub jpeg_quality: u8,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TagsConfig {
    pub cache_ttl_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub storage: StorageConfig,
    pub media: MediaConfig,
    pub scanner: ScannerConfig,
    pub thumbnails: ThumbnailConfig,
    pub tags: TagsConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        // Fallback: parse the embedded default TOML
        let defaults: &str = include_str!("../config/default.toml");
        match ::config::Config::builder()
            .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
            .build()
        {
            Ok(cfg) => match cfg.try_deserialize() {
                Ok(app_cfg) => app_cfg,
                Err(e) => {
                    eprintln!("FATAL: Failed to deserialize default config: {}", e);
                    panic!("Failed to deserialize default config: {}", e);
                }
            },
            Err(e) => {
                eprintln!("FATAL: Failed to parse default config: {}", e);
                panic!("Failed to parse default config: {}", e);
            }
        }
    }
}

pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let defaults: &str = include_str!("../config/default.toml");
    let mut builder = ::config::Config::builder()
        .add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml))
        // Optional local file: bilderwald.toml (in CWD)
        .add_source(::config::File::with_name("bilderwald").required(false));

    if let Ok(custom_path) = std::env::var("BILDERWALD_CONFIG") {
        builder = builder.add_source(::config::File::with_name(&custom_path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(::config::Environment::with_prefix("BILDERWALD").separator("__"));

    let cfg = builder.build()?;
    let app_cfg: AppConfig = cfg.try_deserialize()?;
    validate(&app_cfg)?;
    Ok(app_cfg)
}

fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }

    // Storage
    if cfg.storage.root.trim().is_empty() {
        return Err(anyhow::anyhow!("storage.root must not be empty"));
    }
    if cfg.storage.originals_bucket.is_empty() || cfg.storage.thumbs_bucket.is_empty() {
        return Err(anyhow::anyhow!("storage bucket names must not be empty"));
    }
    if cfg.storage.originals_bucket == cfg.storage.thumbs_bucket {
        return Err(anyhow::anyhow!("storage.originals_bucket and storage.thumbs_bucket must differ"));
    }
    if cfg.storage.presign_ttl_secs == 0 {
        return Err(anyhow::anyhow!("storage.presign_ttl_secs must be > 0"));
    }

    // Scanner
    if cfg.scanner.max_concurrency == 0 || cfg.scanner.max_concurrency > 256 {
        return Err(anyhow::anyhow!("scanner.max_concurrency must be in 1..=256"));
    }
    if cfg.scanner.concurrency > 256 {
        return Err(anyhow::anyhow!("scanner.concurrency must be in 0..=256"));
    }
    if cfg.scanner.max_depth == 0 {
        return Err(anyhow::anyhow!("scanner.max_depth must be > 0"));
    }
    if cfg.scanner.channel_capacity == 0 {
        return Err(anyhow::anyhow!("scanner.channel_capacity must be > 0"));
    }
    if cfg.scanner.flush_interval_ms == 0 {
        return Err(anyhow::anyhow!("scanner.flush_interval_ms must be > 0"));
    }

    // Thumbnails
    if cfg.thumbnails.max_edge < 16 {
        return Err(anyhow::anyhow!("thumbnails.max_edge must be >= 16"));
    }
    if cfg.thumbnails.jpeg_quality == 0 || cfg.thumbnails.jpeg_quality > 100 {
        return Err(anyhow::anyhow!("thumbnails.jpeg_quality must be in 1..=100"));
    }

    // Tags
    if cfg.tags.cache_ttl_secs == 0 {
        return Err(anyhow::anyhow!("tags.cache_ttl_secs must be > 0"));
    }

    Ok(())
}

/// Effective worker count: explicit value, or 3/4 of the CPU cores,
/// always clamped to the configured safety ceiling.
pub fn effective_concurrency(cfg: &ScannerConfig) -> usize {
    let auto = (num_cpus::get() * 3 / 4).max(2);
    let chosen = if cfg.concurrency == 0 { auto } else { cfg.concurrency };
    chosen.clamp(1, cfg.max_concurrency)
}

pub fn ensure_sqlite_parent_dir(url: &str) -> anyhow::Result<()> {
    if let Some(path) = url.strip_prefix("sqlite://") {
        let p = Path::new(path);
        if let Some(parent) = p.parent() {
            std::fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}
