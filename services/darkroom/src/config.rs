use chrono::TimeDelta;
use serde::Deserialize;
use std::time::Duration;

/// Main configuration for the darkroom service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Service configuration
    #[serde(default)]
    pub service: ServiceConfig,
    /// S3 configuration
    pub s3: S3Config,
    /// Database configuration
    pub database: DatabaseConfig,
    /// API configuration
    #[serde(default)]
    pub api: ApiConfig,
    /// Capture throttling
    #[serde(default)]
    pub capture: CaptureConfig,
    /// Upload compression
    #[serde(default)]
    pub compression: CompressionConfig,
    /// Gallery and rendering
    #[serde(default)]
    pub gallery: GalleryConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Service name for logging/metrics
    #[serde(default = "default_service_name")]
    pub name: String,
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Metrics port
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,
}

/// S3 storage configuration
#[derive(Debug, Clone, Deserialize)]
pub struct S3Config {
    /// Bucket holding photos and thumbnails
    pub bucket: String,
    /// AWS region
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint URL (for MinIO, LocalStack, etc.)
    pub endpoint_url: Option<String>,
    /// Force path-style access (required for MinIO)
    #[serde(default)]
    pub force_path_style: bool,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum number of connections in the pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    /// Minimum number of connections in the pool
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Idle connection timeout in seconds
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,
    /// Run migrations on startup
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

/// HTTP API configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    /// API listen address
    #[serde(default = "default_api_host")]
    pub host: String,
    /// API listen port
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Enable CORS
    #[serde(default = "default_true")]
    pub cors_enabled: bool,
    /// Allowed CORS origins (empty = any)
    #[serde(default)]
    pub cors_origins: Vec<String>,
    /// Largest accepted upload body
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

/// Per-session capture throttling
#[derive(Debug, Clone, Deserialize)]
pub struct CaptureConfig {
    /// Successful uploads allowed inside one window
    #[serde(default = "default_max_uploads_per_window")]
    pub max_uploads_per_window: usize,
    /// Sliding window length in seconds
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Penalty after hitting the window limit, in seconds
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    /// Storage write timeout in seconds
    #[serde(default = "default_storage_timeout_secs")]
    pub storage_timeout_secs: u64,
    /// Sessions unused for this long are dropped
    #[serde(default = "default_session_idle_secs")]
    pub session_idle_secs: u64,
}

/// Upload compression
#[derive(Debug, Clone, Deserialize)]
pub struct CompressionConfig {
    /// Target size of a stored photo
    #[serde(default = "default_budget_bytes")]
    pub budget_bytes: usize,
    /// Longer edge cap applied before re-encoding
    #[serde(default = "default_max_edge")]
    pub max_edge: u32,
    /// First JPEG quality tried (1-100)
    #[serde(default = "default_start_quality")]
    pub start_quality: u8,
    /// Quality decrement per attempt
    #[serde(default = "default_quality_step")]
    pub quality_step: u8,
    /// Best-effort floor
    #[serde(default = "default_min_quality")]
    pub min_quality: u8,
}

/// Gallery and rendering
#[derive(Debug, Clone, Deserialize)]
pub struct GalleryConfig {
    /// Lifetime of gallery links
    #[serde(default = "default_signed_url_ttl_secs")]
    pub signed_url_ttl_secs: u64,
    /// Longer edge of stored thumbnails
    #[serde(default = "default_thumbnail_edge")]
    pub thumbnail_edge: u32,
    /// Longer edge of filtered previews
    #[serde(default = "default_preview_edge")]
    pub preview_edge: u32,
    /// JPEG quality of filtered renders
    #[serde(default = "default_export_quality")]
    pub export_quality: u8,
}

// Default value functions
fn default_service_name() -> String {
    "darkroom".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_max_connections() -> u32 {
    10
}

fn default_min_connections() -> u32 {
    2
}

fn default_connect_timeout_secs() -> u64 {
    30
}

fn default_idle_timeout_secs() -> u64 {
    600
}

fn default_true() -> bool {
    true
}

fn default_api_host() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024 // phone cameras top out well below this
}

fn default_max_uploads_per_window() -> usize {
    5
}

fn default_window_secs() -> u64 {
    60
}

fn default_cooldown_secs() -> u64 {
    30
}

fn default_storage_timeout_secs() -> u64 {
    30
}

fn default_session_idle_secs() -> u64 {
    3600
}

fn default_budget_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

fn default_max_edge() -> u32 {
    2048
}

fn default_start_quality() -> u8 {
    90
}

fn default_quality_step() -> u8 {
    10
}

fn default_min_quality() -> u8 {
    10
}

fn default_signed_url_ttl_secs() -> u64 {
    3600
}

fn default_thumbnail_edge() -> u32 {
    400
}

fn default_preview_edge() -> u32 {
    640
}

fn default_export_quality() -> u8 {
    92
}

impl Config {
    /// Load configuration from environment and config files
    pub fn load() -> anyhow::Result<Self> {
        let config = config::Config::builder()
            .set_default("service.name", "darkroom")?
            .set_default("service.log_level", "info")?
            .set_default("service.metrics_port", 9090)?
            .add_source(config::File::with_name("config/darkroom").required(false))
            .add_source(config::File::with_name("/etc/darkroom/darkroom").required(false))
            // DARKROOM__S3__BUCKET -> s3.bucket
            .add_source(
                config::Environment::with_prefix("DARKROOM")
                    .separator("__")
                    .list_separator(",")
                    .with_list_parse_key("api.cors_origins")
                    .try_parsing(true),
            )
            .build()?;

        let config: Config = config.try_deserialize()?;
        config.compression.validate()?;
        Ok(config)
    }
}

impl DatabaseConfig {
    /// Get pool acquire timeout as Duration
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Get pool idle timeout as Duration
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }
}

// Gate timings are compared against event instants, so they are chrono deltas
impl CaptureConfig {
    pub fn window(&self) -> TimeDelta {
        TimeDelta::seconds(self.window_secs as i64)
    }

    pub fn cooldown(&self) -> TimeDelta {
        TimeDelta::seconds(self.cooldown_secs as i64)
    }

    pub fn session_idle(&self) -> TimeDelta {
        TimeDelta::seconds(self.session_idle_secs as i64)
    }

    pub fn storage_timeout(&self) -> Duration {
        Duration::from_secs(self.storage_timeout_secs)
    }
}

impl GalleryConfig {
    /// Get gallery link lifetime as Duration
    pub fn signed_url_ttl(&self) -> Duration {
        Duration::from_secs(self.signed_url_ttl_secs)
    }
}

impl CompressionConfig {
    /// Reject quality settings the JPEG encoder cannot honour
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(
            (1..=100).contains(&self.min_quality) && (1..=100).contains(&self.start_quality),
            "compression quality must be within 1..=100"
        );
        anyhow::ensure!(
            self.min_quality <= self.start_quality,
            "compression.min_quality exceeds compression.start_quality"
        );
        anyhow::ensure!(self.max_edge > 0, "compression.max_edge must be positive");
        Ok(())
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
            metrics_port: default_metrics_port(),
        }
    }
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            max_uploads_per_window: default_max_uploads_per_window(),
            window_secs: default_window_secs(),
            cooldown_secs: default_cooldown_secs(),
            storage_timeout_secs: default_storage_timeout_secs(),
            session_idle_secs: default_session_idle_secs(),
        }
    }
}

impl Default for CompressionConfig {
    fn default() -> Self {
        Self {
            budget_bytes: default_budget_bytes(),
            max_edge: default_max_edge(),
            start_quality: default_start_quality(),
            quality_step: default_quality_step(),
            min_quality: default_min_quality(),
        }
    }
}

impl Default for GalleryConfig {
    fn default() -> Self {
        Self {
            signed_url_ttl_secs: default_signed_url_ttl_secs(),
            thumbnail_edge: default_thumbnail_edge(),
            preview_edge: default_preview_edge(),
            export_quality: default_export_quality(),
        }
    }
}
